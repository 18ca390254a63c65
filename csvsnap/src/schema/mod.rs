//! Deriving a destination table schema from a header row.

use serde::Serialize;
use std::{collections::HashMap, fmt, str::FromStr};

use crate::common::*;

mod column_name;
mod uniquifier;

pub use self::column_name::ColumnName;
use self::uniquifier::Uniquifier;

/// A column storage type.
///
/// We only have one today. See [`StringOnlySchema`] for why.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    String,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String => "STRING".fmt(f),
        }
    }
}

/// Column nullability, named the way BigQuery names it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Nullable,
}

/// A single column in a derived schema.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ColumnSchema {
    pub name: ColumnName,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub mode: Mode,
}

/// An ordered list of columns, with unique names.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// The column names, in order.
    pub fn column_names(&self) -> impl Iterator<Item = &ColumnName> + '_ {
        self.columns.iter().map(|c| &c.name)
    }

    /// Render this schema as a BigQuery JSON schema.
    pub fn to_bigquery_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Decides the storage type of each column.
pub trait SchemaPolicy: fmt::Debug + Send + Sync {
    /// The type to use for the column with the given raw header name.
    fn column_type(&self, raw_name: &str) -> DataType;
}

/// Every column is a nullable string, including columns which look like
/// dates or numbers.
///
/// Published CSV files mix date formats, use empty strings for missing values
/// and format numbers by locale, so any real typing here would reject rows at
/// load time. Consumers can cast downstream.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringOnlySchema;

impl SchemaPolicy for StringOnlySchema {
    fn column_type(&self, _raw_name: &str) -> DataType {
        DataType::String
    }
}

/// What to do when two header names normalize to the same column name.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DuplicateColumns {
    /// Fail with [`SchemaError::DuplicateName`].
    #[default]
    Reject,
    /// Append `_2`, `_3`, ... to later columns.
    Suffix,
}

impl fmt::Display for DuplicateColumns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateColumns::Reject => "reject".fmt(f),
            DuplicateColumns::Suffix => "suffix".fmt(f),
        }
    }
}

impl FromStr for DuplicateColumns {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reject" => Ok(DuplicateColumns::Reject),
            "suffix" => Ok(DuplicateColumns::Suffix),
            _ => Err(format_err!(
                "unknown duplicate column policy {:?} (expected reject or suffix)",
                s,
            )),
        }
    }
}

/// Derive a table schema from a header row.
#[instrument(level = "debug", skip(header, policy))]
pub fn derive(
    header: &[String],
    policy: &dyn SchemaPolicy,
    duplicates: DuplicateColumns,
) -> Result<TableSchema, SchemaError> {
    if header.is_empty() {
        return Err(SchemaError::EmptyHeader);
    }

    let mut columns = Vec::with_capacity(header.len());
    match duplicates {
        DuplicateColumns::Reject => {
            let mut seen = HashMap::<ColumnName, &str>::with_capacity(header.len());
            for raw in header {
                let name = ColumnName::normalize(raw);
                if let Some(first) = seen.insert(name.clone(), raw) {
                    return Err(SchemaError::DuplicateName {
                        name: name.as_str().to_owned(),
                        first: first.to_owned(),
                        second: raw.to_owned(),
                    });
                }
                columns.push(column(name, raw, policy));
            }
        }
        DuplicateColumns::Suffix => {
            let mut uniquifier = Uniquifier::default();
            for raw in header {
                let name = ColumnName::normalize(raw);
                let unique = uniquifier.unique_name_for(&name).ok_or_else(|| {
                    SchemaError::DuplicateName {
                        name: name.as_str().to_owned(),
                        first: name.as_str().to_owned(),
                        second: raw.to_owned(),
                    }
                })?;
                if unique != name {
                    debug!("renamed duplicate column {:?} to {:?}", raw, unique);
                }
                columns.push(column(unique, raw, policy));
            }
        }
    }

    let schema = TableSchema { columns };
    trace!("derived schema {:?}", schema);
    Ok(schema)
}

/// Build a single column.
fn column(name: ColumnName, raw: &str, policy: &dyn SchemaPolicy) -> ColumnSchema {
    ColumnSchema {
        name,
        data_type: policy.column_type(raw),
        mode: Mode::Nullable,
    }
}
