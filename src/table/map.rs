//! Dimension selections ("maps") and the comparisons the cache relies on.
//!
//! A [`TableMap`] lists, per dimension and in table order, the value codes a
//! data array covers. Data arrays are laid out row-major over that order, so
//! the last dimension varies fastest.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// The selected value codes of one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimensionMap {
    pub code: String,
    pub value_codes: Vec<String>,
}

impl DimensionMap {
    pub fn new<I, S>(code: impl Into<String>, value_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code: code.into(),
            value_codes: value_codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.value_codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value_codes.is_empty()
    }
}

/// A full dimension selection for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableMap {
    dimensions: Vec<DimensionMap>,
}

impl TableMap {
    pub fn new(dimensions: Vec<DimensionMap>) -> Self {
        Self { dimensions }
    }

    /// Append a dimension selection (builder style).
    pub fn with_dimension<I, S>(mut self, code: impl Into<String>, value_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions.push(DimensionMap::new(code, value_codes));
        self
    }

    pub fn dimensions(&self) -> &[DimensionMap] {
        &self.dimensions
    }

    pub fn dimension(&self, code: &str) -> Option<&DimensionMap> {
        self.dimensions.iter().find(|d| d.code == code)
    }

    /// Number of cells the selection addresses (product of value counts).
    pub fn size(&self) -> usize {
        self.dimensions.iter().map(DimensionMap::len).product()
    }

    /// Same dimensions, same value codes, same order.
    pub fn is_identical(&self, other: &TableMap) -> bool {
        self == other
    }

    /// Every selection in `other` is contained in the matching selection here.
    ///
    /// Dimensions are matched positionally and must carry the same codes.
    /// Identical maps are supersets of each other.
    pub fn is_superset_of(&self, other: &TableMap) -> bool {
        if self.dimensions.len() != other.dimensions.len() {
            return false;
        }
        self.dimensions
            .iter()
            .zip(&other.dimensions)
            .all(|(mine, theirs)| {
                if mine.code != theirs.code {
                    return false;
                }
                let available: HashSet<&str> =
                    mine.value_codes.iter().map(String::as_str).collect();
                theirs
                    .value_codes
                    .iter()
                    .all(|code| available.contains(code.as_str()))
            })
    }

    pub fn is_submap_of(&self, other: &TableMap) -> bool {
        other.is_superset_of(self)
    }
}

/// Source indices into a `superset`-shaped array, in `submap` cell order.
///
/// Copying `source[i]` for each yielded `i` produces exactly the array a
/// direct read for `submap` would return.
pub fn build_index_mapping(superset: &TableMap, submap: &TableMap) -> Result<Vec<usize>, CacheError> {
    if !superset.is_superset_of(submap) {
        return Err(CacheError::InvalidSelection(
            "index mapping requires a superset of the target map".to_string(),
        ));
    }

    let dims = superset.dimensions();
    let mut strides = vec![1usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1].len();
    }

    // Per dimension: offset contribution of each selected value.
    let offsets: Vec<Vec<usize>> = dims
        .iter()
        .zip(submap.dimensions())
        .zip(&strides)
        .map(|((source, target), stride)| {
            let position: HashMap<&str, usize> = source
                .value_codes
                .iter()
                .enumerate()
                .map(|(i, code)| (code.as_str(), i))
                .collect();
            target
                .value_codes
                .iter()
                .map(|code| position[code.as_str()] * stride)
                .collect()
        })
        .collect();

    let total = submap.size();
    let mut indices = Vec::with_capacity(total);
    if total == 0 {
        return Ok(indices);
    }

    let mut counters = vec![0usize; offsets.len()];
    loop {
        indices.push(
            counters
                .iter()
                .zip(&offsets)
                .map(|(&c, dim)| dim[c])
                .sum(),
        );

        // Odometer increment, last dimension fastest.
        let mut dim = offsets.len();
        loop {
            if dim == 0 {
                return Ok(indices);
            }
            dim -= 1;
            counters[dim] += 1;
            if counters[dim] < offsets[dim].len() {
                break;
            }
            counters[dim] = 0;
        }
    }
}
