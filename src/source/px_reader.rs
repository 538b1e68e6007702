//! Reader for PX-style statistical table files.
//!
//! A file is a sequence of keyword entries terminated by `;`, followed by
//! the data section:
//!
//! ```text
//! CHARSET="ANSI";
//! MATRIX="pop";
//! TITLE="Population by region and year";
//! STUB="region";
//! HEADING="year";
//! VALUES("region")="North","South";
//! CODES("region")="n","s";
//! VALUES("year")="2020","2021";
//! DATA=
//! 10 11
//! 20 ".."
//! ;
//! ```
//!
//! Dimensions are the `STUB` variables followed by the `HEADING` variables;
//! cells are stored row-major over that order.

use std::collections::BTreeMap;

use tracing::trace;

use crate::error::SourceError;
use crate::source::reader::{Encoding, MetadataEntries, MetadataEntry, TableReader, UTF8_BOM};
use crate::table::map::{build_index_mapping, TableMap};
use crate::table::metadata::{DataValue, Dimension, Metadata};

const DATA_KEYWORD: &[u8] = b"DATA=";
const CHARSET_KEYWORD: &[u8] = b"CHARSET=";

/// Keywords consumed into [`Metadata`] fields rather than `properties`.
const STRUCTURAL_KEYWORDS: [&str; 4] = ["MATRIX", "TITLE", "STUB", "HEADING"];

#[derive(Debug, Default, Clone, Copy)]
pub struct PxReader;

impl PxReader {
    pub fn new() -> Self {
        Self
    }
}

/// Position of the `DATA=` keyword at the start of an entry.
fn find_data_keyword(bytes: &[u8]) -> Option<usize> {
    let mut i = if bytes.starts_with(UTF8_BOM) { UTF8_BOM.len() } else { 0 };
    let mut entry_start = true;
    let mut in_quotes = false;
    while i < bytes.len() {
        let b = bytes[i];
        if in_quotes {
            in_quotes = b != b'"';
            i += 1;
            continue;
        }
        if entry_start {
            if b.is_ascii_whitespace() {
                i += 1;
                continue;
            }
            if bytes[i..].starts_with(DATA_KEYWORD) {
                return Some(i);
            }
            entry_start = false;
        }
        match b {
            b'"' => in_quotes = true,
            b';' => entry_start = true,
            _ => {}
        }
        i += 1;
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Index of the first `target` outside double quotes.
fn find_unquoted(text: &str, target: char) -> Option<usize> {
    let mut in_quotes = false;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == target && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Split a comma-separated value list.
///
/// Quoted items lose their quotes, and adjacent quoted segments of one item
/// are concatenated (long strings may be wrapped over several lines).
fn split_values(body: &str) -> Vec<String> {
    if body.trim().is_empty() {
        return Vec::new();
    }
    let finish = |current: &mut String, quoted: bool| {
        let value = std::mem::take(current);
        if quoted {
            value
        } else {
            value.trim().to_string()
        }
    };

    let mut values = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    for c in body.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            ',' if !in_quotes => {
                values.push(finish(&mut current, quoted));
                quoted = false;
            }
            c if in_quotes => current.push(c),
            // Whitespace between quoted segments.
            _ if quoted => {}
            c => current.push(c),
        }
    }
    values.push(finish(&mut current, quoted));
    values
}

fn parse_entry(raw: &str) -> Result<MetadataEntry, SourceError> {
    let eq = find_unquoted(raw, '=')
        .ok_or_else(|| SourceError::Parse(format!("entry without '=': {}", raw.trim())))?;
    let head = raw[..eq].trim();
    let body = &raw[eq + 1..];

    let keyword_end = head.find(|c: char| c == '[' || c == '(').unwrap_or(head.len());
    let keyword = head[..keyword_end].trim();
    if keyword.is_empty() {
        return Err(SourceError::Parse(format!("entry without keyword: {}", raw.trim())));
    }

    let mut rest = &head[keyword_end..];
    let mut language = None;
    if let Some(tail) = rest.strip_prefix('[') {
        let close = tail
            .find(']')
            .ok_or_else(|| SourceError::Parse(format!("unclosed language tag in {keyword}")))?;
        language = Some(tail[..close].trim().to_string());
        rest = &tail[close + 1..];
    }

    let mut param = None;
    if let Some(tail) = rest.strip_prefix('(') {
        let close = tail
            .rfind(')')
            .ok_or_else(|| SourceError::Parse(format!("unclosed parameter in {keyword}")))?;
        param = Some(split_values(&tail[..close]).join(","));
    }

    Ok(MetadataEntry {
        keyword: keyword.to_string(),
        language,
        param,
        values: split_values(body),
    })
}

/// Iterates the `;`-terminated entries of a decoded metadata section.
struct EntryIter {
    text: String,
    pos: usize,
}

impl Iterator for EntryIter {
    type Item = Result<MetadataEntry, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = &self.text[self.pos..];
        let start = remaining.len() - remaining.trim_start().len();
        let remaining = &remaining[start..];
        if remaining.is_empty() {
            self.pos = self.text.len();
            return None;
        }

        match find_unquoted(remaining, ';') {
            Some(end) => {
                let entry = parse_entry(&remaining[..end]);
                self.pos += start + end + 1;
                Some(entry)
            }
            None => {
                let err = SourceError::Parse(format!("unterminated entry: {}", remaining.trim()));
                self.pos = self.text.len();
                Some(Err(err))
            }
        }
    }
}

impl TableReader for PxReader {
    fn detect_encoding(&self, bytes: &[u8]) -> Encoding {
        if bytes.starts_with(UTF8_BOM) {
            return Encoding::Utf8;
        }
        let head = &bytes[..find_data_keyword(bytes).unwrap_or(bytes.len())];
        let Some(pos) = find_subslice(head, CHARSET_KEYWORD) else {
            return Encoding::Utf8;
        };
        let value = head[pos + CHARSET_KEYWORD.len()..]
            .split(|&b| b == b';')
            .next()
            .unwrap_or_default();
        let value = String::from_utf8_lossy(value);
        if value.trim().trim_matches('"').eq_ignore_ascii_case("ANSI") {
            Encoding::Latin1
        } else {
            Encoding::Utf8
        }
    }

    fn read_metadata_entries<'a>(&self, bytes: &'a [u8], encoding: Encoding) -> MetadataEntries<'a> {
        let end = find_data_keyword(bytes).unwrap_or(bytes.len());
        Box::new(EntryIter {
            text: encoding.decode(&bytes[..end]),
            pos: 0,
        })
    }

    fn build_metadata(&self, entries: MetadataEntries<'_>) -> Result<Metadata, SourceError> {
        let mut single: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut texts: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut codes: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for entry in entries {
            let entry = entry?;
            // Only the default language describes the structure.
            if entry.language.is_some() {
                continue;
            }
            match (entry.keyword.as_str(), entry.param) {
                ("VALUES", Some(dim)) => {
                    texts.insert(dim, entry.values);
                }
                ("CODES", Some(dim)) => {
                    codes.insert(dim, entry.values);
                }
                (_, Some(_)) => {}
                (keyword, None) => {
                    single.insert(keyword.to_string(), entry.values);
                }
            }
        }

        let table_id = single
            .get("MATRIX")
            .and_then(|v| v.first())
            .cloned()
            .ok_or_else(|| SourceError::Parse("missing MATRIX entry".to_string()))?;
        let title = single.get("TITLE").map(|v| v.join(","));

        let names: Vec<String> = ["STUB", "HEADING"]
            .iter()
            .filter_map(|k| single.get(*k))
            .flatten()
            .cloned()
            .collect();
        if names.is_empty() {
            return Err(SourceError::Parse(format!("table {table_id} declares no dimensions")));
        }

        let mut dimensions = Vec::with_capacity(names.len());
        for name in names {
            let value_texts = texts
                .remove(&name)
                .ok_or_else(|| SourceError::Parse(format!("no VALUES for dimension '{name}'")))?;
            let value_codes = codes.remove(&name).unwrap_or_else(|| value_texts.clone());
            if value_codes.len() != value_texts.len() {
                return Err(SourceError::Parse(format!(
                    "dimension '{name}' has {} codes but {} values",
                    value_codes.len(),
                    value_texts.len()
                )));
            }
            dimensions.push(Dimension {
                code: name.clone(),
                name,
                value_codes,
                value_texts,
            });
        }

        let properties = single
            .into_iter()
            .filter(|(k, _)| !STRUCTURAL_KEYWORDS.contains(&k.as_str()))
            .map(|(k, v)| (k, v.join(",")))
            .collect();

        trace!(table = %table_id, dimensions = dimensions.len(), "Built table metadata");
        Ok(Metadata {
            table_id,
            title,
            dimensions,
            properties,
        })
    }

    fn find_data_section_offset(&self, bytes: &[u8]) -> Result<u64, SourceError> {
        let start = find_data_keyword(bytes)
            .ok_or_else(|| SourceError::Parse("no DATA section".to_string()))?;
        Ok((start + DATA_KEYWORD.len()) as u64)
    }

    fn read_values(
        &self,
        bytes: &[u8],
        offset: u64,
        target: &TableMap,
        source: &TableMap,
    ) -> Result<Vec<DataValue>, SourceError> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&o| o <= bytes.len())
            .ok_or_else(|| SourceError::Parse(format!("data offset {offset} beyond end of file")))?;

        let text = String::from_utf8_lossy(&bytes[start..]);
        let section = text.split(';').next().unwrap_or_default();

        let values = section
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(|token| {
                if token.starts_with('"') {
                    return Ok(DataValue::Missing);
                }
                token
                    .parse::<f64>()
                    .map(DataValue::Number)
                    .map_err(|_| SourceError::Parse(format!("invalid data value '{token}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if values.len() != source.size() {
            return Err(SourceError::Parse(format!(
                "data section holds {} values, table has {} cells",
                values.len(),
                source.size()
            )));
        }
        if target.is_identical(source) {
            return Ok(values);
        }

        let mapping = build_index_mapping(source, target)
            .map_err(|e| SourceError::Parse(format!("selection does not fit table: {e}")))?;
        Ok(mapping.into_iter().map(|i| values[i]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"CHARSET="ANSI";
MATRIX="pop";
TITLE="Population by "
  "region and year";
STUB="region";
HEADING="year";
VALUES("region")="North","South";
CODES("region")="n","s";
VALUES("year")="2020","2021","2022";
TITLE[sv]="Folkmangd";
NOTE="Counts; in thousands";
DATA=
10 11 12
20 ".." 22
;
"#;

    fn latin1(text: &str) -> Vec<u8> {
        text.chars().map(|c| c as u8).collect()
    }

    #[test]
    fn test_detect_encoding() {
        let reader = PxReader::new();
        assert_eq!(reader.detect_encoding(SAMPLE.as_bytes()), Encoding::Latin1);
        assert_eq!(reader.detect_encoding(b"MATRIX=\"x\";DATA=1;"), Encoding::Utf8);

        let mut bom = UTF8_BOM.to_vec();
        bom.extend_from_slice(SAMPLE.as_bytes());
        assert_eq!(reader.detect_encoding(&bom), Encoding::Utf8);
    }

    #[test]
    fn test_entries_respect_quotes() {
        let reader = PxReader::new();
        let entries: Vec<MetadataEntry> = reader
            .read_metadata_entries(SAMPLE.as_bytes(), Encoding::Utf8)
            .collect::<Result<_, _>>()
            .unwrap();

        let note = entries.iter().find(|e| e.keyword == "NOTE").unwrap();
        assert_eq!(note.values, vec!["Counts; in thousands"]);

        let codes = entries.iter().find(|e| e.keyword == "CODES").unwrap();
        assert_eq!(codes.param.as_deref(), Some("region"));
        assert_eq!(codes.values, vec!["n", "s"]);

        let swedish = entries.iter().find(|e| e.language.is_some()).unwrap();
        assert_eq!(swedish.language.as_deref(), Some("sv"));
        assert!(!entries.iter().any(|e| e.keyword == "DATA"));
    }

    #[test]
    fn test_build_metadata() {
        let reader = PxReader::new();
        let meta = reader.read_metadata(SAMPLE.as_bytes()).unwrap();

        assert_eq!(meta.table_id, "pop");
        assert_eq!(meta.title.as_deref(), Some("Population by region and year"));
        assert_eq!(meta.dimensions.len(), 2);
        assert_eq!(meta.dimensions[0].value_codes, vec!["n", "s"]);
        assert_eq!(meta.dimensions[0].value_texts, vec!["North", "South"]);
        // No CODES: codes fall back to the value texts.
        assert_eq!(meta.dimensions[1].value_codes, vec!["2020", "2021", "2022"]);
        assert_eq!(meta.properties.get("NOTE").map(String::as_str), Some("Counts; in thousands"));
        assert_eq!(meta.properties.get("CHARSET").map(String::as_str), Some("ANSI"));
    }

    #[test]
    fn test_latin1_values() {
        let reader = PxReader::new();
        let text = "CHARSET=\"ANSI\";MATRIX=\"t\";STUB=\"ort\";VALUES(\"ort\")=\"Gävle\";DATA=1;";
        let meta = reader.read_metadata(&latin1(text)).unwrap();
        assert_eq!(meta.dimensions[0].value_texts, vec!["Gävle"]);
    }

    #[test]
    fn test_missing_structure_is_parse_error() {
        let reader = PxReader::new();
        assert!(matches!(
            reader.read_metadata(b"TITLE=\"x\";DATA=;"),
            Err(SourceError::Parse(_))
        ));
        assert!(matches!(
            reader.read_metadata(b"MATRIX=\"x\";STUB=\"a\";DATA=;"),
            Err(SourceError::Parse(_))
        ));
        assert!(matches!(
            reader.read_metadata(b"MATRIX=\"x\";STUB=\"a\""),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn test_data_offset_and_values() {
        let reader = PxReader::new();
        let bytes = SAMPLE.as_bytes();
        let offset = reader.find_data_section_offset(bytes).unwrap();
        assert!(bytes[..offset as usize].ends_with(b"DATA="));

        let full = reader.read_metadata(bytes).unwrap().full_map();
        let all = reader.read_values(bytes, offset, &full, &full).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], DataValue::Number(10.0));
        assert_eq!(all[4], DataValue::Missing);

        let south_2022 = TableMap::default()
            .with_dimension("region", ["s"])
            .with_dimension("year", ["2022", "2020"]);
        let subset = reader.read_values(bytes, offset, &south_2022, &full).unwrap();
        assert_eq!(subset, vec![DataValue::Number(22.0), DataValue::Number(20.0)]);
    }

    #[test]
    fn test_value_count_must_match_table() {
        let reader = PxReader::new();
        let text = "MATRIX=\"t\";STUB=\"a\";VALUES(\"a\")=\"x\",\"y\";DATA=1;";
        let offset = reader.find_data_section_offset(text.as_bytes()).unwrap();
        let full = reader.read_metadata(text.as_bytes()).unwrap().full_map();
        assert!(matches!(
            reader.read_values(text.as_bytes(), offset, &full, &full),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn test_no_data_section() {
        let reader = PxReader::new();
        assert!(reader.find_data_section_offset(b"MATRIX=\"t\";").is_err());
    }
}
