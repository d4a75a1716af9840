use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use ifhd::reader::{ReadChunkFlags, ReadOptions};
use ifhd::writer::WriterConfig;
use ifhd::{Reader, Writer};

use crate::error::{CliError, Result};

#[derive(Clone, Copy, ValueEnum)]
pub enum FileVersion {
    /// ADTF 2.x layout, microsecond timestamps, no ring-buffer history.
    #[value(name = "adtf2")]
    Adtf2,
    /// ADTF 3.x layout, microsecond timestamps.
    #[value(name = "adtf3")]
    Adtf3,
    /// Current layout, nanosecond timestamps.
    #[value(name = "adtf3ns")]
    Adtf3ns,
}

impl FileVersion {
    fn version_id(self) -> u32 {
        match self {
            FileVersion::Adtf2 => ifhd::version::V0201,
            FileVersion::Adtf3 => ifhd::version::V0400,
            FileVersion::Adtf3ns => ifhd::version::V0500,
        }
    }
}

#[derive(Args)]
pub struct CreateArgs {
    /// Output IFHD file to create
    pub file: PathBuf,

    /// On-disk format version to write
    #[arg(long)]
    pub fileversion: FileVersion,

    /// Source IFHD file to copy chunks from; imports nothing if omitted
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Drop input chunks timestamped before this nanosecond offset
    #[arg(long = "start-ns")]
    pub start_ns: Option<u64>,

    /// Drop input chunks timestamped at or after this nanosecond offset
    #[arg(long = "end-ns")]
    pub end_ns: Option<u64>,

    /// Shift every imported chunk's timestamp by this many nanoseconds
    #[arg(long = "offset-ns", default_value_t = 0)]
    pub offset_ns: i64,

    /// Rename a source stream on import, as `OLD=NEW`; repeatable
    #[arg(long = "stream")]
    pub stream_renames: Vec<String>,

    /// Carry an extension over from the source file by identifier; repeatable
    #[arg(long = "extension")]
    pub extensions: Vec<String>,
}

pub fn run(args: CreateArgs) -> Result<()> {
    let mut renames: HashMap<String, String> = HashMap::new();
    for spec in &args.stream_renames {
        let (old, new) = spec
            .split_once('=')
            .ok_or_else(|| CliError::InvalidArgument(format!("--stream expects OLD=NEW, got {spec:?}")))?;
        renames.insert(old.to_string(), new.to_string());
    }

    let config = WriterConfig {
        version_id: args.fileversion.version_id(),
        ..WriterConfig::default()
    };
    let mut writer = Writer::create(&args.file, config, None)?;

    let Some(input) = &args.input else {
        return writer.close().map_err(Into::into);
    };

    let mut reader = Reader::open(input, ReadOptions::empty())?;
    let mut names_by_id: HashMap<u16, String> = HashMap::new();
    for s in reader.streams() {
        let name = renames.get(&s.name).cloned().unwrap_or(s.name.clone());
        writer.set_stream_name(s.stream_id, name.clone());
        names_by_id.insert(s.stream_id, name);
    }

    reader.reset()?;
    let mut buf = Vec::new();
    loop {
        match reader.read_next_chunk(0, ReadChunkFlags::empty(), &mut buf) {
            Ok(header) => {
                if let Some(start) = args.start_ns {
                    if header.timestamp < start {
                        continue;
                    }
                }
                if let Some(end) = args.end_ns {
                    if header.timestamp >= end {
                        continue;
                    }
                }
                let shifted = (header.timestamp as i64).saturating_add(args.offset_ns).max(0) as u64;
                writer.write_chunk(header.stream_id, &buf, shifted, header.flags)?;
            }
            Err(ifhd::IfhdError::EndOfFile) => break,
            Err(e) => return Err(e.into()),
        }
    }

    for name in &args.extensions {
        if let Some(ext) = reader.find_extension(name) {
            let d = &ext.descriptor;
            writer.get_extension_stream(name, d.user_id, d.type_id, d.version_id)?;
            writer.write_to_extension_stream(name, &ext.data)?;
        }
    }

    writer.close()?;
    Ok(())
}
