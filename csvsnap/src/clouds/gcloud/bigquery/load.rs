//! Upload data straight into a BigQuery table.

use super::{
    super::{percent_encode, Client},
    jobs::{
        classify_client_error, wait_for_job, CreateDisposition, Job, JobConfigurationLoad,
        JobInfo, Labels, SourceFormat, TableReference, WriteDisposition,
    },
    TableSchema, BIGQUERY_API,
};
use crate::common::*;
use crate::drivers::bigquery::TableName;
use crate::schema;

/// Query parameters for the upload endpoint.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadQuery {
    upload_type: &'static str,
}

/// Build the configuration for a full-refresh CSV load.
pub(crate) fn full_refresh_config(
    dest: &TableName,
    schema: &schema::TableSchema,
    delimiter: Delimiter,
) -> JobConfigurationLoad {
    JobConfigurationLoad {
        source_format: SourceFormat::Csv,
        field_delimiter: delimiter.as_str().to_owned(),
        // We always upload the decoded text, which is UTF-8 by now.
        encoding: "UTF-8",
        schema: TableSchema::from(schema),
        autodetect: false,
        destination_table: TableReference::from(dest),
        create_disposition: CreateDisposition::CreateIfNeeded,
        write_disposition: WriteDisposition::WriteTruncate,
        skip_leading_rows: 1,
        allow_quoted_newlines: true,
    }
}

/// Upload `data` (including its header row) and replace the contents of
/// `dest` with it, in a single load job.
///
/// BigQuery only swaps in the new contents if the whole job succeeds.
#[instrument(level = "debug", skip(client, schema, data, labels), fields(dest = %dest))]
pub(crate) async fn load_full_refresh(
    client: &Client,
    dest: &TableName,
    schema: &schema::TableSchema,
    delimiter: Delimiter,
    data: Bytes,
    labels: &Labels,
) -> Result<(), LoadError> {
    let job = Job::new_load(
        full_refresh_config(dest, schema, delimiter),
        labels.to_owned(),
    );
    let url = format!(
        "{}/upload/bigquery/v2/projects/{}/jobs",
        BIGQUERY_API,
        percent_encode(dest.project()),
    );
    let job = client
        .post_related::<JobInfo, _, _, _>(
            url.as_str(),
            UploadQuery {
                upload_type: "multipart",
            },
            job,
            data,
        )
        .await
        .map_err(classify_client_error)?;
    info!(
        "started BigQuery load job {} into {}",
        job.job_reference.job_id, dest,
    );
    wait_for_job(client, job).await?;
    debug!("BigQuery load job finished");
    Ok(())
}
