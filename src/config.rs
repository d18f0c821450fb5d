//! Configuration and command-line argument parsing

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    // Input
    /// Receiver byte stream: a file, or '-' / absent for stdin
    pub filename: Option<String>,

    // Observer position
    /// Observer latitude override (degrees)
    pub observer_lat: Option<f64>,
    /// Observer longitude override (degrees)
    pub observer_lon: Option<f64>,
    /// Path of the persisted position hint
    pub pos_file: String,

    // Output
    pub interactive: bool,
    pub interactive_rows: usize,

    // Debug
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filename: None,
            observer_lat: None,
            observer_lon: None,
            pos_file: "observer.pos".to_string(),
            interactive: false,
            interactive_rows: 15,
            verbose: false,
        }
    }
}

impl Config {
    pub fn from_args() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut config = Config::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--ifile" => {
                    i += 1;
                    config.filename = args.get(i).cloned();
                }
                "--lat" => {
                    i += 1;
                    config.observer_lat = args.get(i).and_then(|s| s.parse().ok());
                }
                "--lon" => {
                    i += 1;
                    config.observer_lon = args.get(i).and_then(|s| s.parse().ok());
                }
                "--pos-file" => {
                    i += 1;
                    if let Some(f) = args.get(i) {
                        config.pos_file = f.clone();
                    }
                }
                "--interactive" => config.interactive = true,
                "--interactive-rows" => {
                    i += 1;
                    config.interactive_rows =
                        args.get(i).and_then(|s| s.parse().ok()).unwrap_or(15);
                }
                "--verbose" => config.verbose = true,
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown option: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        config
    }
}

fn print_help() {
    println!(
        r#"adsb-rx - ADS-B receiver front-end and live aircraft database

Usage: adsb-rx [OPTIONS]

Options:
  --ifile <filename>     Read the receiver byte stream from a file
                         (use '-' for stdin; default: stdin)
  --lat <degrees>        Observer latitude for range calculation
  --lon <degrees>        Observer longitude for range calculation
  --pos-file <filename>  Where to persist the observer position hint
                         (default: observer.pos)
  --interactive          Interactive mode refreshing data on screen
  --interactive-rows <N> Max rows in interactive mode (default: 15)
  --verbose              Enable debug logging
  --help                 Show this help
"#
    );
}
