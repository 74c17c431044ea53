// FOCUS CLI Entry Point

use clap::Parser;
use focus_cli::{commands, logging, Cli};

fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);

    let result = commands::resolve_config(&cli).and_then(|config| commands::execute(&cli, config));

    match result {
        Ok(output) => {
            println!("{}", output.json);
            if !output.success {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
