//! Table metadata and data cell values.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize, Serializer};

use crate::error::CacheError;
use crate::table::map::{DimensionMap, TableMap};

/// One dimension of a table, with its value codes in storage order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub code: String,
    pub name: String,
    pub value_codes: Vec<String>,
    pub value_texts: Vec<String>,
}

/// Structured metadata for one table file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub table_id: String,
    pub title: Option<String>,
    /// Dimensions in data order (row-major, last varies fastest).
    pub dimensions: Vec<Dimension>,
    /// Remaining keyword entries, kept for callers that need them.
    pub properties: BTreeMap<String, String>,
}

/// A requested selection for one dimension, as received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSelection {
    pub code: String,
    pub values: Vec<String>,
}

impl Metadata {
    /// The map covering every cell of the table.
    pub fn full_map(&self) -> TableMap {
        TableMap::new(
            self.dimensions
                .iter()
                .map(|d| DimensionMap::new(d.code.clone(), d.value_codes.iter().cloned()))
                .collect(),
        )
    }

    /// Turn a client selection into a map in table dimension order.
    ///
    /// Dimensions not mentioned select all of their values.
    pub fn resolve_selection(&self, selection: &[DimensionSelection]) -> Result<TableMap, CacheError> {
        for requested in selection {
            if !self.dimensions.iter().any(|d| d.code == requested.code) {
                return Err(CacheError::InvalidSelection(format!(
                    "unknown dimension '{}'",
                    requested.code
                )));
            }
        }

        let mut dimensions = Vec::with_capacity(self.dimensions.len());
        for dim in &self.dimensions {
            let Some(requested) = selection.iter().find(|s| s.code == dim.code) else {
                dimensions.push(DimensionMap::new(dim.code.clone(), dim.value_codes.iter().cloned()));
                continue;
            };
            if requested.values.is_empty() {
                return Err(CacheError::InvalidSelection(format!(
                    "dimension '{}' selects no values",
                    dim.code
                )));
            }

            let known: HashSet<&str> = dim.value_codes.iter().map(String::as_str).collect();
            let mut seen = HashSet::new();
            let mut values = Vec::with_capacity(requested.values.len());
            for value in &requested.values {
                if !known.contains(value.as_str()) {
                    return Err(CacheError::InvalidSelection(format!(
                        "dimension '{}' has no value '{}'",
                        dim.code, value
                    )));
                }
                if seen.insert(value.as_str()) {
                    values.push(value.clone());
                }
            }
            dimensions.push(DimensionMap::new(dim.code.clone(), values));
        }
        Ok(TableMap::new(dimensions))
    }
}

/// A single data cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataValue {
    Number(f64),
    /// Missing or confidential cell; serialized as `null`.
    Missing,
}

impl Serialize for DataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DataValue::Number(v) => serializer.serialize_f64(*v),
            DataValue::Missing => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        Metadata {
            table_id: "pop".to_string(),
            title: Some("Population".to_string()),
            dimensions: vec![
                Dimension {
                    code: "region".to_string(),
                    name: "Region".to_string(),
                    value_codes: vec!["n".to_string(), "s".to_string()],
                    value_texts: vec!["North".to_string(), "South".to_string()],
                },
                Dimension {
                    code: "year".to_string(),
                    name: "Year".to_string(),
                    value_codes: vec!["2020".to_string(), "2021".to_string()],
                    value_texts: vec!["2020".to_string(), "2021".to_string()],
                },
            ],
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn test_full_map() {
        let map = sample().full_map();
        assert_eq!(map.size(), 4);
        assert_eq!(map.dimensions()[1].code, "year");
    }

    #[test]
    fn test_resolve_selection_fills_missing_dimensions() {
        let selection = vec![DimensionSelection {
            code: "year".to_string(),
            values: vec!["2021".to_string(), "2021".to_string()],
        }];
        let map = sample().resolve_selection(&selection).unwrap();
        let expected = TableMap::default()
            .with_dimension("region", ["n", "s"])
            .with_dimension("year", ["2021"]);
        assert_eq!(map, expected);
    }

    #[test]
    fn test_resolve_selection_rejects_unknowns() {
        let meta = sample();
        let bad_dim = vec![DimensionSelection {
            code: "month".to_string(),
            values: vec!["1".to_string()],
        }];
        assert!(meta.resolve_selection(&bad_dim).is_err());

        let bad_value = vec![DimensionSelection {
            code: "year".to_string(),
            values: vec!["1999".to_string()],
        }];
        assert!(meta.resolve_selection(&bad_value).is_err());
    }

    #[test]
    fn test_data_value_serializes_missing_as_null() {
        let json = serde_json::to_string(&vec![DataValue::Number(1.5), DataValue::Missing]).unwrap();
        assert_eq!(json, "[1.5,null]");
    }
}
