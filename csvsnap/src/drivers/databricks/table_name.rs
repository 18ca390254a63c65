//! Unity Catalog table names.

use lazy_static::lazy_static;
use regex::Regex;
use std::{fmt, str::FromStr};

use crate::common::*;

/// A three-level Unity Catalog name of the form `"catalog.schema.table"`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableName {
    catalog: String,
    schema: String,
    table: String,
}

impl TableName {
    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Return a value which will be formatted as
    /// `` `catalog`.`schema`.`table` ``, for use in Databricks SQL.
    pub(crate) fn quoted(&self) -> QuotedTableName<'_> {
        QuotedTableName(self)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"^([^.`\s]+)\.([^.`\s]+)\.([^.`\s]+)$")
                .expect("could not parse built-in regex");
        }
        let cap = RE.captures(s).ok_or_else(|| {
            format_err!("could not parse Databricks table name: {:?}", s)
        })?;
        Ok(TableName {
            catalog: cap[1].to_owned(),
            schema: cap[2].to_owned(),
            table: cap[3].to_owned(),
        })
    }
}

/// Displays a [`TableName`] with each part backtick-quoted.
pub(crate) struct QuotedTableName<'a>(&'a TableName);

impl fmt::Display for QuotedTableName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            Ident(&self.0.catalog),
            Ident(&self.0.schema),
            Ident(&self.0.table),
        )
    }
}

/// A Databricks SQL identifier, for formatting purposes.
pub(crate) struct Ident<'a>(pub(crate) &'a str);

impl fmt::Display for Ident<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Our parser never accepts backticks, so there's nothing to escape.
        write!(f, "`{}`", self.0)
    }
}

#[test]
fn parses_and_quotes_table_names() {
    let name = "main.abr.business_names".parse::<TableName>().unwrap();
    assert_eq!(name.catalog(), "main");
    assert_eq!(name.schema(), "abr");
    assert_eq!(name.table(), "business_names");
    assert_eq!(name.to_string(), "main.abr.business_names");
    assert_eq!(
        name.quoted().to_string(),
        "`main`.`abr`.`business_names`",
    );
}

#[test]
fn rejects_malformed_table_names() {
    for bad in &["abr.business_names", "a.b.c.d", "a.`b`.c", "a.b c.d"] {
        assert!(bad.parse::<TableName>().is_err(), "parsed {:?}", bad);
    }
}
