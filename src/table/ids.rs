//! Validated identifiers for databases and table files.
//!
//! Identifiers are short ASCII alphanumeric strings. They end up in cache
//! keys, file paths and URLs, so anything else is rejected at the boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Maximum identifier length in characters.
pub const MAX_ID_LEN: usize = 50;

fn validate(kind: &str, raw: &str) -> Result<(), CacheError> {
    if raw.is_empty() || raw.len() > MAX_ID_LEN {
        return Err(CacheError::InvalidIdentifier(format!(
            "{kind} must be 1..={MAX_ID_LEN} characters, got {}",
            raw.len()
        )));
    }
    if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CacheError::InvalidIdentifier(format!(
            "{kind} '{raw}' may only contain letters and digits"
        )));
    }
    Ok(())
}

macro_rules! validated_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Result<Self, CacheError> {
                let raw = raw.into();
                validate($kind, &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = CacheError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = CacheError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

validated_id!(
    /// Identifies a configured database (a directory or container of tables).
    DatabaseId,
    "database id"
);

validated_id!(
    /// Identifies a table file within a database, without its extension.
    FileId,
    "file id"
);

/// The primary key for per-table caching: a file within a database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileRef {
    pub database: DatabaseId,
    pub file: FileId,
}

impl FileRef {
    pub fn new(database: DatabaseId, file: FileId) -> Self {
        Self { database, file }
    }

    /// Parse both halves at once.
    pub fn parse(database: &str, file: &str) -> Result<Self, CacheError> {
        Ok(Self::new(DatabaseId::new(database)?, FileId::new(file)?))
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.file)
    }
}
