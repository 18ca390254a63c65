//! Staging files in a Unity Catalog volume with the Files API.

use super::{classify_error, Client};
use crate::common::*;

/// Split a volume path like `/Volumes/main/abr/staging/x.csv` into URL path
/// segments.
fn path_segments(path: &str) -> impl Iterator<Item = &str> + '_ {
    path.split('/').filter(|s| !s.is_empty())
}

/// Build the Files API URL for `path`.
fn file_url(client: &Client, path: &str) -> Result<Url> {
    client.url(
        ["api", "2.0", "fs", "files"]
            .into_iter()
            .chain(path_segments(path)),
    )
}

/// Upload `data` to `path`, replacing anything already there.
#[instrument(level = "debug", skip(client, data), fields(len = data.len()))]
pub(crate) async fn upload_file(
    client: &Client,
    path: &str,
    data: Bytes,
) -> Result<(), LoadError> {
    let mut url = file_url(client, path).map_err(|err| classify_error(&err))?;
    url.set_query(Some("overwrite=true"));
    client
        .put_bytes(&url, data)
        .await
        .map_err(|err| classify_error(&err))?;
    debug!("staged {}", path);
    Ok(())
}

/// Delete the file at `path`.
#[instrument(level = "debug", skip(client))]
pub(crate) async fn delete_file(client: &Client, path: &str) -> Result<()> {
    let url = file_url(client, path)?;
    client.delete(&url).await
}

#[test]
fn file_urls_follow_the_volume_path() {
    let client = Client::new(
        "https://dbc-1234.cloud.databricks.com/".parse().unwrap(),
        "dapi".to_owned(),
    )
    .unwrap();
    let url = file_url(&client, "/Volumes/main/abr/staging/csvsnap_1.csv").unwrap();
    assert_eq!(
        url.as_str(),
        "https://dbc-1234.cloud.databricks.com/api/2.0/fs/files/Volumes/main/abr/staging/csvsnap_1.csv",
    );
}
