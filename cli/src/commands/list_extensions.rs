use std::path::PathBuf;

use clap::Args;
use ifhd::reader::{ReadOption, ReadOptions};
use ifhd::Reader;

use crate::error::Result;
use crate::utils::format_table;

#[derive(Args)]
pub struct ListExtensionsArgs {
    /// IFHD file to inspect
    pub file: PathBuf,
}

pub fn run(args: ListExtensionsArgs) -> Result<()> {
    let mut opts: ReadOptions = ReadOptions::empty();
    opts.insert(ReadOption::QueryInfo);
    let mut reader = Reader::open(&args.file, opts)?;
    print_extensions(&mut reader)
}

/// Shared with `list-streams --extension`.
pub fn print_extensions(reader: &mut Reader) -> Result<()> {
    let mut rows = vec![vec![
        "identifier".to_string(),
        "stream_id".to_string(),
        "user_id".to_string(),
        "type_id".to_string(),
        "version_id".to_string(),
        "size".to_string(),
    ]];

    let count = reader.extension_count();
    if count == 0 {
        // Legacy files only expose their synthesized `storage_info`
        // extension by name.
        if let Some(ext) = reader.find_extension("storage_info") {
            rows.push(vec![
                ext.descriptor.identifier.clone(),
                ext.descriptor.stream_id.to_string(),
                ext.descriptor.user_id.to_string(),
                ext.descriptor.type_id.to_string(),
                ext.descriptor.version_id.to_string(),
                ext.descriptor.data_size.to_string(),
            ]);
        }
    }
    for i in 0..count {
        let ext = reader.get_extension(i)?;
        rows.push(vec![
            ext.descriptor.identifier.clone(),
            ext.descriptor.stream_id.to_string(),
            ext.descriptor.user_id.to_string(),
            ext.descriptor.type_id.to_string(),
            ext.descriptor.version_id.to_string(),
            ext.descriptor.data_size.to_string(),
        ]);
    }
    format_table(&rows);
    Ok(())
}
