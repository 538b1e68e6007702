//! Table domain types: identifiers, dimension maps and metadata.
//!
//! - [`ids`]: DatabaseId, FileId, FileRef
//! - [`map`]: TableMap and the superset/submap comparator
//! - [`metadata`]: Metadata, Dimension, DataValue

pub mod ids;
pub mod map;
pub mod metadata;

pub use ids::{DatabaseId, FileId, FileRef};
pub use map::{build_index_mapping, DimensionMap, TableMap};
pub use metadata::{DataValue, Dimension, DimensionSelection, Metadata};
