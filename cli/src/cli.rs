use clap::{Parser, Subcommand};

use crate::commands;
use crate::error::Result;

#[derive(Parser)]
#[command(name = "ifhd")]
#[command(about = "Inspect and build IFHD sensor recordings")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List a file's streams
    ListStreams(commands::list_streams::ListStreamsArgs),

    /// List a file's extensions
    ListExtensions(commands::list_extensions::ListExtensionsArgs),

    /// Export streams or extensions to separate files
    Export(commands::export::ExportArgs),

    /// Create a new file, optionally importing chunks from another
    Create(commands::create::CreateArgs),

    /// Write or replace a single extension in an existing file
    Modify(commands::modify::ModifyArgs),
}

impl Cli {
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::ListStreams(args) => commands::list_streams::run(args),
            Commands::ListExtensions(args) => commands::list_extensions::run(args),
            Commands::Export(args) => commands::export::run(args),
            Commands::Create(args) => commands::create::run(args),
            Commands::Modify(args) => commands::modify::run(args),
        }
    }
}
