//! Table sources: where files come from and how they are parsed.
//!
//! - [`connector`]: Storage connector trait (list, read, stat)
//! - [`local_fs`]: Connector over a local directory
//! - [`reader`]: Table reader trait (encoding, metadata, data section)
//! - [`px_reader`]: Reader for PX-style text tables

pub mod connector;
pub mod local_fs;
pub mod px_reader;
pub mod reader;

pub use connector::StorageConnector;
pub use local_fs::LocalFsConnector;
pub use px_reader::PxReader;
pub use reader::{Encoding, MetadataEntry, TableReader};
