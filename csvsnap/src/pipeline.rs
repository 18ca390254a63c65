//! The ingestion pipeline: fetch, decode, derive a schema, then load.
//!
//! The stages run strictly in sequence, and each one finishes with its input
//! before the next one starts. The first error stops the run, and the
//! [`PipelineError`] says which stage it came from. We never retry, and we
//! never touch the destination unless every earlier stage succeeded.

use serde::Serialize;
use std::fmt;

use crate::common::*;
use crate::decode::{decode, TextEncoding};
use crate::fetch::Fetcher;
use crate::schema::{self, DuplicateColumns, SchemaPolicy, StringOnlySchema};
use crate::source::{read_header, SourceDataset};

/// Everything a pipeline run needs, apart from the destination.
#[derive(Debug)]
pub struct PipelineConfig {
    pub source: SourceDataset,
    pub duplicate_columns: DuplicateColumns,
    pub schema_policy: Box<dyn SchemaPolicy>,
    pub fetcher: Fetcher,
}

impl PipelineConfig {
    /// Configure a run for `source`, with our default policies.
    pub fn new(source: SourceDataset) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            source,
            duplicate_columns: DuplicateColumns::default(),
            schema_policy: Box::new(StringOnlySchema),
            fetcher: Fetcher::new()?,
        })
    }
}

/// What a successful run did.
#[derive(Clone, Debug, Serialize)]
pub struct LoadReport {
    pub source_url: String,
    pub destination: String,
    /// The encoding we decoded the source as, like `utf-8`.
    pub encoding: String,
    pub columns: Vec<String>,
    /// The number of rows visible in the destination after the load.
    pub row_count: u64,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "source:      {}", self.source_url)?;
        writeln!(f, "destination: {}", self.destination)?;
        writeln!(f, "encoding:    {}", self.encoding)?;
        writeln!(f, "columns:     {}", self.columns.join(", "))?;
        write!(f, "rows:        {}", self.row_count)
    }
}

/// The output of the first three stages.
#[derive(Clone, Debug)]
pub struct DerivedSource {
    /// Decoded text, still including its header row.
    pub text: String,
    pub encoding: TextEncoding,
    pub schema: TableSchema,
}

/// Fetch, decode and derive a schema, without loading anything.
#[instrument(level = "debug", skip(config), fields(url = %config.source.url))]
pub async fn derive_from_url(config: &PipelineConfig) -> Result<DerivedSource, PipelineError> {
    let source = &config.source;

    let raw = config.fetcher.fetch(&source.url).await?;

    let decoded = decode(&raw, source.decode_policy)?;
    // We don't need the raw bytes once we have text.
    drop(raw);
    debug!("decoded source as {}", decoded.encoding);

    let header = read_header(&decoded.text, source.delimiter).map_err(|err| {
        SchemaError::UnreadableHeader {
            detail: format!("{:#}", err),
        }
    })?;
    trace!("header row: {:?}", header);
    let schema = schema::derive(
        &header,
        config.schema_policy.as_ref(),
        config.duplicate_columns,
    )?;
    info!(
        "derived {} columns from {}",
        schema.columns.len(),
        source.url,
    );

    Ok(DerivedSource {
        text: decoded.text,
        encoding: decoded.encoding,
        schema,
    })
}

/// Run the whole pipeline against `destination`.
///
/// On success, `destination` holds exactly the new snapshot. On failure it
/// holds whatever it held before, because every destination replaces its
/// contents atomically.
#[instrument(level = "info", skip_all, fields(destination = %destination))]
pub async fn run(
    config: &PipelineConfig,
    destination: &dyn Destination,
) -> Result<LoadReport, PipelineError> {
    let derived = derive_from_url(config).await?;

    let columns = derived
        .schema
        .column_names()
        .map(|c| c.as_str().to_owned())
        .collect::<Vec<_>>();
    let data = Bytes::from(derived.text);
    info!("loading {} bytes into {}", data.len(), destination);
    let row_count = destination
        .load(&derived.schema, config.source.delimiter, data)
        .await?;
    info!("{} now has {} rows", destination, row_count);

    Ok(LoadReport {
        source_url: config.source.url.to_string(),
        destination: destination.to_string(),
        encoding: derived.encoding.to_string(),
        columns,
        row_count,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::decode::DecodePolicy;
    use crate::drivers::memory::{MemoryDestination, Snapshot};
    use crate::fetch::test_server;

    const BUSINESS_NAMES: &[u8] =
        b"Name,BN_ABN,BN_REG_DT\nAcme Pty Ltd,12345,2020-01-01\n";

    async fn config_for(body: &[u8], connections: usize) -> PipelineConfig {
        let url = test_server::serve("200 OK", body.to_vec(), connections).await;
        PipelineConfig::new(SourceDataset {
            url,
            delimiter: Delimiter::Comma,
            decode_policy: DecodePolicy::default(),
        })
        .unwrap()
    }

    fn previous_snapshot() -> Snapshot {
        Snapshot {
            columns: vec!["Name".to_owned()],
            rows: vec![vec!["Old Pty Ltd".to_owned()], vec!["Older Pty Ltd".to_owned()]],
        }
    }

    #[tokio::test]
    async fn loads_business_names() {
        let config = config_for(BUSINESS_NAMES, 1).await;
        let dest = MemoryDestination::default();
        let report = run(&config, &dest).await.unwrap();
        assert_eq!(report.columns, vec!["Name", "BN_ABN", "BN_REG_DT"]);
        assert_eq!(report.row_count, 1);
        assert_eq!(report.encoding, "utf-8");
        assert_eq!(
            dest.snapshot().unwrap().rows,
            vec![vec!["Acme Pty Ltd", "12345", "2020-01-01"]],
        );
    }

    #[tokio::test]
    async fn running_twice_gives_the_same_table() {
        let config = config_for(BUSINESS_NAMES, 2).await;
        let dest = MemoryDestination::default();
        let first = run(&config, &dest).await.unwrap();
        let after_first = dest.snapshot();
        let second = run(&config, &dest).await.unwrap();
        assert_eq!(first.row_count, second.row_count);
        assert_eq!(after_first, dest.snapshot());
        assert_eq!(dest.loads(), 2);
    }

    #[tokio::test]
    async fn failed_load_leaves_previous_snapshot() {
        let body = b"Name\nA\nB\nC\nD\n";
        let config = config_for(body, 1).await;
        let dest = MemoryDestination::with_snapshot(previous_snapshot());
        dest.fail_next_load_after(2);
        let err = run(&config, &dest).await.unwrap_err();
        assert_eq!(err.stage, Stage::Load);
        assert!(matches!(
            err.error,
            StageError::Load(LoadError {
                kind: LoadErrorKind::Transport,
                ..
            }),
        ));
        assert_eq!(dest.snapshot(), Some(previous_snapshot()));
    }

    #[tokio::test]
    async fn rejected_rows_fail_the_whole_load() {
        let body = b"Name,BN_ABN\nAcme,1\nBroken\nBeta,2\n";
        let config = config_for(body, 1).await;
        let dest = MemoryDestination::with_snapshot(previous_snapshot());
        let err = run(&config, &dest).await.unwrap_err();
        match err.error {
            StageError::Load(load_err) => {
                assert_eq!(load_err.kind, LoadErrorKind::RowRejected);
                assert_eq!(load_err.row_errors.len(), 1);
                assert_eq!(load_err.row_errors[0].location.as_deref(), Some("line 3"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(dest.snapshot(), Some(previous_snapshot()));
    }

    #[tokio::test]
    async fn fetch_errors_never_touch_the_destination() {
        let url = test_server::serve("503 Service Unavailable", vec![], 1).await;
        let config = PipelineConfig::new(SourceDataset {
            url,
            delimiter: Delimiter::Comma,
            decode_policy: DecodePolicy::default(),
        })
        .unwrap();
        let dest = MemoryDestination::with_snapshot(previous_snapshot());
        let err = run(&config, &dest).await.unwrap_err();
        assert_eq!(err.stage, Stage::Fetch);
        assert!(matches!(
            err.error,
            StageError::Fetch(FetchError::HttpStatus { code: 503, .. }),
        ));
        assert_eq!(dest.loads(), 0);
        assert_eq!(dest.snapshot(), Some(previous_snapshot()));
    }

    #[tokio::test]
    async fn empty_source_is_a_schema_error() {
        let config = config_for(b"", 1).await;
        let dest = MemoryDestination::default();
        let err = run(&config, &dest).await.unwrap_err();
        assert_eq!(err.stage, Stage::Schema);
        assert!(matches!(
            err.error,
            StageError::Schema(SchemaError::EmptyHeader),
        ));
        assert_eq!(dest.loads(), 0);
    }

    #[tokio::test]
    async fn strict_decoding_reports_the_decode_stage() {
        let url = test_server::serve("200 OK", b"Name\nCaf\xE9\n".to_vec(), 1).await;
        let config = PipelineConfig::new(SourceDataset {
            url,
            delimiter: Delimiter::Comma,
            decode_policy: DecodePolicy {
                legacy_fallback: false,
            },
        })
        .unwrap();
        let err = derive_from_url(&config).await.unwrap_err();
        assert_eq!(err.stage, Stage::Decode);
        assert_eq!(err.to_string(), "decode stage failed");
    }

    #[tokio::test]
    async fn latin1_sources_are_loaded() {
        let config = config_for(b"Business (Trading) Name\nCaf\xE9 Pty Ltd\n", 1).await;
        let dest = MemoryDestination::default();
        let report = run(&config, &dest).await.unwrap();
        assert_eq!(report.encoding, "latin-1");
        assert_eq!(report.columns, vec!["Business_Trading_Name"]);
        assert_eq!(
            dest.snapshot().unwrap().rows,
            vec![vec!["Café Pty Ltd"]],
        );
    }

    #[tokio::test]
    async fn row_count_failures_are_load_errors() {
        let config = config_for(BUSINESS_NAMES, 1).await;
        let dest = MemoryDestination::default();
        dest.fail_next_row_count();
        let err = run(&config, &dest).await.unwrap_err();
        assert_eq!(err.stage, Stage::Load);
    }
}
