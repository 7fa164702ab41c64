pub mod archive;
pub mod columns;
pub mod config;
pub mod error;
pub mod etl;
pub mod identifier;
pub mod output;
pub mod reader;
pub mod table;

pub use config::EtlConfig;
pub use error::{EtlError, Result};
