//! BigQuery batch jobs.
//!
//! These use a number of closely-related types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

use super::{
    super::{original_gcloud_error, percent_encode, Client, ClientError, NoQuery},
    classify_reason, BigQueryError, TableSchema, BIGQUERY_API,
};
use crate::clouds::original_http_error;
use crate::common::*;
use crate::drivers::bigquery::TableName;

/// Key/value pairs. See [JobConfiguration][config].
///
/// [config]: https://cloud.google.com/bigquery/docs/reference/rest/v2/Job#jobconfiguration
pub(crate) type Labels = HashMap<String, String>;

/// The longest we'll sleep between polls.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(16);

/// A BigQuery job, as we submit it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Job {
    /// The configuration for this job.
    pub(crate) configuration: JobConfiguration,
}

impl Job {
    /// Create a new load job.
    pub(crate) fn new_load(load: JobConfigurationLoad, labels: Labels) -> Self {
        Job {
            configuration: JobConfiguration { load, labels },
        }
    }
}

/// Configuration for a job. We only ever run loads.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobConfiguration {
    /// Configuration information load jobs.
    pub(crate) load: JobConfigurationLoad,

    /// Labels to attach to jobs.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub(crate) labels: Labels,
}

/// Configuration for data load jobs.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobConfigurationLoad {
    pub(crate) source_format: SourceFormat,
    pub(crate) field_delimiter: String,
    pub(crate) encoding: &'static str,
    pub(crate) schema: TableSchema,
    pub(crate) autodetect: bool,
    pub(crate) destination_table: TableReference,
    pub(crate) create_disposition: CreateDisposition,
    pub(crate) write_disposition: WriteDisposition,
    pub(crate) skip_leading_rows: i32,
    pub(crate) allow_quoted_newlines: bool,
}

/// The format of the data we're uploading.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum SourceFormat {
    Csv,
}

/// A job, as BigQuery reports it back to us.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobInfo {
    /// A reference to this job.
    pub(crate) job_reference: JobReference,

    /// The status of this job.
    pub(crate) status: Option<JobStatus>,
}

impl JobInfo {
    /// Has this job finished?
    fn is_done(&self) -> bool {
        self.status.as_ref().map(|s| s.state) == Some(JobState::Done)
    }

    /// A URL which can be used to poll this job.
    fn url(&self) -> String {
        let reference = &self.job_reference;
        let mut url = format!(
            "{}/bigquery/v2/projects/{}/jobs/{}",
            BIGQUERY_API,
            percent_encode(&reference.project_id),
            percent_encode(&reference.job_id),
        );
        if let Some(location) = &reference.location {
            url.push_str(&format!("?location={}", percent_encode(location)));
        }
        url
    }
}

/// A compound job ID containing project and region information.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobReference {
    /// The project containing this job.
    pub(crate) project_id: String,

    /// The bare ID, suitable for use in URL.
    pub(crate) job_id: String,

    /// The location of this job.
    pub(crate) location: Option<String>,
}

/// The status of a job.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobStatus {
    /// The state of this job.
    state: JobState,

    /// If present, indicates that the job failed.
    error_result: Option<BigQueryError>,

    /// Errors encountered while running the job. These do not necessarily
    /// indicate that the job has finished or was unsuccessful.
    #[serde(default)]
    errors: Vec<BigQueryError>,
}

impl JobStatus {
    /// Check to see if we've encountered an error.
    pub(crate) fn check_for_error(&self) -> Result<(), LoadError> {
        let err = match &self.error_result {
            Some(err) => err,
            None => return Ok(()),
        };
        let kind = if err.is_quota() {
            LoadErrorKind::Quota
        } else if err.is_row_rejection()
            || self.errors.iter().any(BigQueryError::is_row_rejection)
        {
            LoadErrorKind::RowRejected
        } else {
            LoadErrorKind::Unknown
        };
        let row_errors = self
            .errors
            .iter()
            .filter(|e| e.location.is_some() || e.is_row_rejection())
            .map(BigQueryError::to_row_error)
            .collect();
        Err(LoadError::new(kind, err.to_string()).with_row_errors(row_errors))
    }
}

/// The state of a job.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum JobState {
    /// This job is waiting to run.
    Pending,
    /// This job is currently running.
    Running,
    /// This job has finished.
    Done,
}

/// The name of a table.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableReference {
    pub(crate) project_id: String,
    pub(crate) dataset_id: String,
    pub(crate) table_id: String,
}

impl From<&TableName> for TableReference {
    fn from(name: &TableName) -> Self {
        Self {
            project_id: name.project().to_owned(),
            dataset_id: name.dataset().to_owned(),
            table_id: name.table().to_owned(),
        }
    }
}

/// Should this job create new tables?
#[derive(Clone, Copy, Debug, Eq, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(clippy::enum_variant_names, dead_code)]
pub(crate) enum CreateDisposition {
    CreateIfNeeded,
    CreateNever,
}

/// What should this job do with existing data?
///
/// We only ever replace, but the other values exist in the API.
#[derive(Clone, Copy, Debug, Eq, Serialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(clippy::enum_variant_names, dead_code)]
pub(crate) enum WriteDisposition {
    WriteTruncate,
    WriteAppend,
    WriteEmpty,
}

/// Wait for a submitted job to finish, and check whether it succeeded.
#[instrument(level = "debug", skip(client, job), fields(job_id = %job.job_reference.job_id))]
pub(crate) async fn wait_for_job(
    client: &Client,
    mut job: JobInfo,
) -> Result<JobInfo, LoadError> {
    let job_url = job.url();
    let mut sleep_duration = Duration::from_secs(2);
    while !job.is_done() {
        // Wait for a while.
        sleep(sleep_duration).await;
        if sleep_duration < MAX_POLL_INTERVAL {
            sleep_duration *= 2;
        }

        // Update our job.
        trace!("polling {}", job_url);
        job = client
            .get::<JobInfo, _, _>(job_url.as_str(), NoQuery)
            .await
            .map_err(classify_client_error)?;
    }

    // Return either an error or a finished job.
    if let Some(status) = &job.status {
        status.check_for_error()?;
    }
    Ok(job)
}

/// Classify an HTTP-level error from BigQuery.
pub(crate) fn classify_client_error(err: ClientError) -> LoadError {
    let err = err.into_error();
    if let Some(gcloud_err) = original_gcloud_error(&err) {
        let kinds = gcloud_err
            .errors
            .iter()
            .map(|detail| classify_reason(&detail.reason))
            .collect::<Vec<_>>();
        let kind = if gcloud_err.code == 429 || kinds.contains(&LoadErrorKind::Quota) {
            LoadErrorKind::Quota
        } else if kinds.contains(&LoadErrorKind::RowRejected) {
            LoadErrorKind::RowRejected
        } else {
            LoadErrorKind::Unknown
        };
        let row_errors = gcloud_err
            .errors
            .iter()
            .zip(&kinds)
            .filter(|(detail, kind)| {
                detail.location.is_some() || **kind == LoadErrorKind::RowRejected
            })
            .map(|(detail, _)| RowError {
                location: detail.location.clone(),
                message: detail.message.clone(),
            })
            .collect();
        LoadError::new(kind, format!("{:#}", err)).with_row_errors(row_errors)
    } else if original_http_error(&err).is_some() {
        LoadError::transport(&err)
    } else {
        LoadError::new(LoadErrorKind::Unknown, format!("{:#}", err))
    }
}
