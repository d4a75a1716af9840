pub mod create;
pub mod export;
pub mod list_extensions;
pub mod list_streams;
pub mod modify;
