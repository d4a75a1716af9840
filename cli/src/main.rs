use clap::Parser;

mod cli;
mod commands;
mod error;
mod utils;

use cli::Cli;

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    if let Err(err) = cli.execute() {
        eprintln!("{}", error::into_human_message(&err));
        std::process::exit(1);
    }
}
