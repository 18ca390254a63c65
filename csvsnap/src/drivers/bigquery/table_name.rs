//! BigQuery table names.

use lazy_static::lazy_static;
use regex::Regex;
use std::{fmt, str::FromStr};

use crate::common::*;

/// A BigQuery table name of the form `"project:dataset.table"`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableName {
    /// The name of the Google Cloud project.
    project: String,
    /// The BigQuery dataset.
    dataset: String,
    /// The table.
    table: String,
}

impl TableName {
    /// Return the name of the table's project.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Return the name of the table's dataset.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Return the bare table name itself, without project or dataset.
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.project, self.dataset, self.table)
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^([^:.`]+):([^:.`]+)\.([^:.`]+)$")
                .expect("could not parse built-in regex");
        }
        let cap = RE.captures(s).ok_or_else(|| {
            format_err!("could not parse BigQuery table name: {:?}", s)
        })?;
        let (project, dataset, table) = (&cap[1], &cap[2], &cap[3]);
        Ok(TableName {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }
}

#[test]
fn parses_and_displays_table_names() {
    let name = "my-project:abr.business_names".parse::<TableName>().unwrap();
    assert_eq!(name.project(), "my-project");
    assert_eq!(name.dataset(), "abr");
    assert_eq!(name.table(), "business_names");
    assert_eq!(name.to_string(), "my-project:abr.business_names");
}

#[test]
fn rejects_malformed_table_names() {
    for bad in &["abr.business_names", "p:d:t", "p:d.t.x", "p:`d`.t", ""] {
        assert!(bad.parse::<TableName>().is_err(), "parsed {:?}", bad);
    }
}
