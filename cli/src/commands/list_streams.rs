use std::path::PathBuf;

use clap::Args;
use ifhd::reader::{ReadOption, ReadOptions};
use ifhd::Reader;

use crate::error::Result;
use crate::utils::{format_table, format_time_ns};

#[derive(Args)]
pub struct ListStreamsArgs {
    /// IFHD file to inspect
    pub file: PathBuf,

    /// Also list the file's extensions (diagnostic surface)
    #[arg(long)]
    pub extension: bool,
}

pub fn run(args: ListStreamsArgs) -> Result<()> {
    let mut opts: ReadOptions = ReadOptions::empty();
    opts.insert(ReadOption::QueryInfo);
    let mut reader = Reader::open(&args.file, opts)?;

    let (short, _long) = reader.description();
    if !short.is_empty() {
        println!("description: {short}");
    }
    println!("version: 0x{:04x}", reader.file_version());
    println!("chunk_count: {}", reader.chunk_count());

    let mut rows = vec![vec![
        "stream_id".to_string(),
        "name".to_string(),
        "chunks".to_string(),
        "first_time".to_string(),
        "last_time".to_string(),
    ]];
    for s in reader.streams() {
        rows.push(vec![
            s.stream_id.to_string(),
            s.name,
            s.indexed_chunk_count.to_string(),
            format_time_ns(s.first_time_ns),
            format_time_ns(s.last_time_ns),
        ]);
    }
    format_table(&rows);

    if args.extension {
        super::list_extensions::print_extensions(&mut reader)?;
    }

    Ok(())
}
