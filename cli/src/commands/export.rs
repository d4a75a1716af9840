use std::collections::HashMap;
use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;

use clap::Args;
use ifhd::reader::{ReadChunkFlags, ReadOptions};
use ifhd::Reader;

use crate::error::{CliError, Result};

#[derive(Args)]
pub struct ExportArgs {
    /// IFHD file to export from
    pub file: PathBuf,

    /// Stream name to export; repeat for multiple streams. Each stream's
    /// concatenated chunk payloads are written to `<output-dir>/<name>.bin`.
    #[arg(long = "stream")]
    pub streams: Vec<String>,

    /// Extension identifier to export; repeat for multiple extensions. Each
    /// is written verbatim to `<output-dir>/<identifier>.ext`.
    #[arg(long = "extension")]
    pub extensions: Vec<String>,

    /// Directory exported files are written under (created if missing).
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,
}

pub fn run(args: ExportArgs) -> Result<()> {
    if args.streams.is_empty() && args.extensions.is_empty() {
        return Err(CliError::InvalidArgument(
            "export requires at least one --stream or --extension".to_string(),
        ));
    }

    std::fs::create_dir_all(&args.output_dir)?;

    let mut reader = Reader::open(&args.file, ReadOptions::empty())?;

    for name in &args.extensions {
        let ext = reader
            .find_extension(name)
            .ok_or_else(|| CliError::InvalidArgument(format!("extension not found: {name}")))?;
        let mut out = File::create(args.output_dir.join(format!("{name}.ext")))?;
        out.write_all(&ext.data)?;
    }

    if !args.streams.is_empty() {
        let ids_by_name: HashMap<String, u16> =
            reader.streams().into_iter().map(|s| (s.name, s.stream_id)).collect();
        let mut wanted: HashMap<u16, (&str, File)> = HashMap::new();
        for name in &args.streams {
            let id = *ids_by_name
                .get(name)
                .ok_or_else(|| CliError::InvalidArgument(format!("stream not found: {name}")))?;
            let out = File::create(args.output_dir.join(format!("{name}.bin")))?;
            wanted.insert(id, (name.as_str(), out));
        }

        reader.reset()?;
        let mut buf = Vec::new();
        loop {
            match reader.read_next_chunk(0, ReadChunkFlags::empty(), &mut buf) {
                Ok(header) => {
                    if let Some((_, file)) = wanted.get_mut(&header.stream_id) {
                        file.write_all(&buf)?;
                    }
                }
                Err(ifhd::IfhdError::EndOfFile) => break,
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}
