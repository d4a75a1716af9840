//! CLI-level error type: wraps the library's [`ifhd::IfhdError`] plus the
//! I/O and argument-parsing errors the driver itself can produce, and
//! unwinds nested causes for display, one indent level per cause.

use std::fmt::Write as _;

use colored::Colorize as _;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Ifhd(#[from] ifhd::IfhdError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Unwinds `err`'s cause chain into a human-readable message, one line per
/// cause with a leading indent proportional to its depth.
pub fn into_human_message(err: &CliError) -> String {
    let mut out = String::new();
    let _ = write!(out, "{}", err.to_string().red());
    let mut depth = 1;
    let mut source: Option<&dyn std::error::Error> = std::error::Error::source(err);
    while let Some(cause) = source {
        let _ = write!(out, "\n{}{}", "  ".repeat(depth), cause.to_string().red());
        source = cause.source();
        depth += 1;
    }
    out
}
