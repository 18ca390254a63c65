//! Errors reported by the individual pipeline stages.
//!
//! Each stage fails fast with its own error type. [`PipelineError`] records
//! which stage failed, so the invoking process can report both the stage and
//! the kind of error.

use std::{error, fmt};

use strum_macros::Display;

/// The stage of the pipeline which produced an error.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Fetch,
    Decode,
    Schema,
    Load,
}

/// We could not fetch the source dataset.
#[derive(Debug)]
pub enum FetchError {
    /// DNS, connection, timeout or body read failure.
    Transport { url: String, source: reqwest::Error },
    /// The server answered with something other than success.
    HttpStatus { url: String, code: u16 },
}

impl FetchError {
    /// The HTTP status code, if the server sent one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Transport { .. } => None,
            FetchError::HttpStatus { code, .. } => Some(*code),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transport { url, source } => {
                write!(f, "transport error fetching {}: {}", url, source)
            }
            FetchError::HttpStatus { url, code } => {
                write!(f, "fetching {} returned HTTP {}", url, code)
            }
        }
    }
}

impl error::Error for FetchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            FetchError::Transport { source, .. } => Some(source),
            FetchError::HttpStatus { .. } => None,
        }
    }
}

/// The payload was not valid UTF-8, and the legacy fallback was disabled.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodeError {
    /// Number of leading bytes which were valid UTF-8.
    pub valid_up_to: usize,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "source is not valid UTF-8 (first bad byte at offset {}) and the Latin-1 fallback is disabled",
            self.valid_up_to,
        )
    }
}

impl error::Error for DecodeError {}

/// We could not derive a table schema from the header row.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SchemaError {
    /// The source has no header row.
    EmptyHeader,
    /// The CSV reader could not parse the header row.
    UnreadableHeader { detail: String },
    /// Two raw column names normalize to the same column name.
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::EmptyHeader => write!(f, "source has no header row"),
            SchemaError::UnreadableHeader { detail } => {
                write!(f, "could not read header row: {}", detail)
            }
            SchemaError::DuplicateName {
                name,
                first,
                second,
            } => write!(
                f,
                "columns {:?} and {:?} both normalize to {:?}",
                first, second, name,
            ),
        }
    }
}

impl error::Error for SchemaError {}

/// Broad classes of load failure.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum LoadErrorKind {
    /// We could not talk to the destination.
    Transport,
    /// The destination refused the work because of a quota or rate limit.
    Quota,
    /// One or more rows were rejected, failing the whole job.
    RowRejected,
    /// Anything else the destination reported.
    Unknown,
}

/// A problem with an individual row, as reported by the destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RowError {
    /// Where the destination says the problem is, if it says.
    pub location: Option<String>,
    pub message: String,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.message, location),
            None => write!(f, "{}", self.message),
        }
    }
}

/// The destination could not complete a full-refresh load.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub detail: String,
    /// Per-row errors, when the destination reports them. Empty otherwise.
    pub row_errors: Vec<RowError>,
}

impl LoadError {
    /// Create a new error without any per-row detail.
    pub fn new<D: Into<String>>(kind: LoadErrorKind, detail: D) -> Self {
        LoadError {
            kind,
            detail: detail.into(),
            row_errors: vec![],
        }
    }

    /// Attach per-row errors.
    pub fn with_row_errors(mut self, row_errors: Vec<RowError>) -> Self {
        self.row_errors = row_errors;
        self
    }

    /// Build a `Transport` error from any error chain.
    pub(crate) fn transport(err: &anyhow::Error) -> Self {
        LoadError::new(LoadErrorKind::Transport, format!("{:#}", err))
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "load failed ({}): {}", self.kind, self.detail)?;
        for row_error in &self.row_errors {
            write!(f, "\n  {}", row_error)?;
        }
        Ok(())
    }
}

impl error::Error for LoadError {}

/// The error returned by a pipeline run: which stage failed, and how.
#[derive(Debug)]
pub struct PipelineError {
    pub stage: Stage,
    pub error: StageError,
}

/// The error from a single stage.
#[derive(Debug)]
pub enum StageError {
    Fetch(FetchError),
    Decode(DecodeError),
    Schema(SchemaError),
    Load(LoadError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed", self.stage)
    }
}

impl error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.error {
            StageError::Fetch(err) => Some(err),
            StageError::Decode(err) => Some(err),
            StageError::Schema(err) => Some(err),
            StageError::Load(err) => Some(err),
        }
    }
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        PipelineError {
            stage: Stage::Fetch,
            error: StageError::Fetch(err),
        }
    }
}

impl From<DecodeError> for PipelineError {
    fn from(err: DecodeError) -> Self {
        PipelineError {
            stage: Stage::Decode,
            error: StageError::Decode(err),
        }
    }
}

impl From<SchemaError> for PipelineError {
    fn from(err: SchemaError) -> Self {
        PipelineError {
            stage: Stage::Schema,
            error: StageError::Schema(err),
        }
    }
}

impl From<LoadError> for PipelineError {
    fn from(err: LoadError) -> Self {
        PipelineError {
            stage: Stage::Load,
            error: StageError::Load(err),
        }
    }
}

#[test]
fn pipeline_error_reports_stage_and_cause() {
    let err = PipelineError::from(SchemaError::EmptyHeader);
    assert_eq!(err.stage, Stage::Schema);
    let chain = format!("{:#}", anyhow::Error::new(err));
    assert_eq!(chain, "schema stage failed: source has no header row");
}

#[test]
fn unreadable_header_keeps_its_cause() {
    let err = PipelineError::from(SchemaError::UnreadableHeader {
        detail: "CSV parse error: record 1".to_owned(),
    });
    assert_eq!(err.stage, Stage::Schema);
    let chain = format!("{:#}", anyhow::Error::new(err));
    assert_eq!(
        chain,
        "schema stage failed: could not read header row: CSV parse error: record 1",
    );
}

#[test]
fn load_error_lists_row_errors() {
    let err = LoadError::new(LoadErrorKind::RowRejected, "job failed").with_row_errors(
        vec![RowError {
            location: Some("line 3".to_owned()),
            message: "too many fields".to_owned(),
        }],
    );
    assert_eq!(
        err.to_string(),
        "load failed (row_rejected): job failed\n  too many fields at line 3",
    );
}
