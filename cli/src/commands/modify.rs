use std::io::Read as _;
use std::path::PathBuf;

use clap::Args;

use crate::error::Result;

#[derive(Args)]
pub struct ModifyArgs {
    /// IFHD file to modify in place
    pub file: PathBuf,

    /// Extension identifier to write or replace
    #[arg(long)]
    pub extension: String,

    /// File supplying the new extension payload; reads stdin if omitted
    #[arg(long)]
    pub input: Option<PathBuf>,

    #[arg(long = "userid", default_value_t = 0)]
    pub user_id: u32,

    #[arg(long = "typeid", default_value_t = 0)]
    pub type_id: u32,

    #[arg(long = "versionid", default_value_t = 0)]
    pub version_id: u32,

    /// Stream the extension is scoped to; 0 is file-global
    #[arg(long = "streamid", default_value_t = 0)]
    pub stream_id: u16,
}

pub fn run(args: ModifyArgs) -> Result<()> {
    let mut data = Vec::new();
    match &args.input {
        Some(path) => {
            std::fs::File::open(path)?.read_to_end(&mut data)?;
        }
        None => {
            std::io::stdin().read_to_end(&mut data)?;
        }
    }

    ifhd::extension::write_extension(
        &args.file,
        &args.extension,
        &data,
        args.user_id,
        args.type_id,
        args.version_id,
        args.stream_id,
    )?;

    Ok(())
}
