//! Table file reader: metadata and data extraction from raw file bytes.

use crate::error::SourceError;
use crate::table::map::TableMap;
use crate::table::metadata::{DataValue, Metadata};

/// Text encoding of a table file's metadata section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Latin1,
}

impl Encoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => {
                let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                String::from_utf8_lossy(bytes).into_owned()
            }
            // Latin-1 code points map one-to-one onto U+0000..U+00FF.
            Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

pub const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One keyword entry of the metadata section, e.g. `VALUES("year")="2020","2021"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub keyword: String,
    /// Optional language tag, `TITLE[en]`.
    pub language: Option<String>,
    /// Optional parameter, usually a dimension name.
    pub param: Option<String>,
    pub values: Vec<String>,
}

/// Lazily parsed metadata entries.
pub type MetadataEntries<'a> = Box<dyn Iterator<Item = Result<MetadataEntry, SourceError>> + Send + 'a>;

/// Parses one table file format.
pub trait TableReader: Send + Sync {
    fn detect_encoding(&self, bytes: &[u8]) -> Encoding;

    /// Entries of the metadata section, in file order, up to the data section.
    fn read_metadata_entries<'a>(&self, bytes: &'a [u8], encoding: Encoding) -> MetadataEntries<'a>;

    fn build_metadata(&self, entries: MetadataEntries<'_>) -> Result<Metadata, SourceError>;

    /// Byte offset where the data section's values begin.
    fn find_data_section_offset(&self, bytes: &[u8]) -> Result<u64, SourceError>;

    /// Values for `target`, in target cell order.
    ///
    /// The file stores every cell of `source`, which must contain `target`.
    fn read_values(
        &self,
        bytes: &[u8],
        offset: u64,
        target: &TableMap,
        source: &TableMap,
    ) -> Result<Vec<DataValue>, SourceError>;

    /// Convenience: detect, parse and build in one call.
    fn read_metadata(&self, bytes: &[u8]) -> Result<Metadata, SourceError> {
        let encoding = self.detect_encoding(bytes);
        self.build_metadata(self.read_metadata_entries(bytes, encoding))
    }
}
