//! The remote tabular file we ingest.

use std::{fmt, str::FromStr};

use crate::common::*;
use crate::decode::DecodePolicy;

/// The dataset we load by default: the Australian business names register.
pub const DEFAULT_SOURCE_URL: &str = "https://data.gov.au/data/dataset/bc515135-4bb6-4d50-957a-3713709a76d3/resource/55ad4b1c-5eeb-44ea-8b29-d410da431be3/download/business_names_202505.csv";

/// The field delimiter used by a dataset.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Delimiter {
    #[default]
    Comma,
    Tab,
}

impl Delimiter {
    /// The delimiter as a single byte, for the `csv` crate.
    pub fn as_byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
        }
    }

    /// The delimiter as a string, for destinations which want one.
    pub fn as_str(self) -> &'static str {
        match self {
            Delimiter::Comma => ",",
            Delimiter::Tab => "\t",
        }
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delimiter::Comma => "comma".fmt(f),
            Delimiter::Tab => "tab".fmt(f),
        }
    }
}

impl FromStr for Delimiter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "comma" | "," => Ok(Delimiter::Comma),
            "tab" | "\t" | "\\t" => Ok(Delimiter::Tab),
            _ => Err(format_err!("unknown delimiter {:?} (expected comma or tab)", s)),
        }
    }
}

/// A remote dataset. The encoding is not part of this: we resolve it every
/// time we fetch.
#[derive(Clone, Debug)]
pub struct SourceDataset {
    pub url: Url,
    pub delimiter: Delimiter,
    pub decode_policy: DecodePolicy,
}

/// Read the header row from decoded text.
///
/// Returns an empty vector if there is no header. A first line which is
/// completely blank also counts as no header, because it has no column names
/// in it.
pub fn read_header(text: &str, delimiter: Delimiter) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter.as_byte())
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut record = csv::StringRecord::new();
    if !rdr.read_record(&mut record).context("could not read header row")? {
        return Ok(vec![]);
    }
    if record.len() == 1 && record[0].is_empty() {
        return Ok(vec![]);
    }
    Ok(record.iter().map(str::to_owned).collect())
}
