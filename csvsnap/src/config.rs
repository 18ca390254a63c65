//! Configuration file support.

use std::{
    env, fmt,
    fs::{create_dir_all, File},
    io::{self, Read, Write},
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
};
use toml_edit::{value, DocumentMut, Item};

use crate::common::*;
use crate::decode::DecodePolicy;
use crate::schema::DuplicateColumns;
use crate::source::{SourceDataset, DEFAULT_SOURCE_URL};

/// The catalog we proxy searches to by default.
pub const DEFAULT_CKAN_URL: &str = "https://www.data.gov.au/data/";

/// The catalog resource we search by default: the business names register.
pub const DEFAULT_RESOURCE_ID: &str = "55ad4b1c-5eeb-44ea-8b29-d410da431be3";

/// Where `serve` listens by default.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Find the path to our configuration directory.
pub(crate) fn config_dir() -> Result<PathBuf> {
    // Use `var_os` instead of `var`, because if it returns a non-Unicode path,
    // we can hand it off directly to `PathBuf`.
    match env::var_os("CSVSNAP_CONFIG_DIR") {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => Ok(dirs::config_dir()
            .ok_or_else(|| format_err!("could not find user config dir"))?
            .join("csvsnap")),
    }
}

/// Find the path to our configuration file.
pub(crate) fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("csvsnap.toml"))
}

/// A configuration file key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Key {
    /// The key in the TOML file.
    key: &'static str,
    /// The environment variable which overrides it, if any.
    env_var: Option<&'static str>,
}

impl Key {
    /// Every key we understand.
    pub const ALL: &'static [Key] = &[
        Key::new("source_url", Some("CSVSNAP_SOURCE_URL")),
        Key::new("delimiter", Some("CSVSNAP_DELIMITER")),
        Key::new("destination", Some("CSVSNAP_DESTINATION")),
        Key::new("duplicate_columns", None),
        Key::new("legacy_fallback", None),
        Key::new("databricks_host", Some("DATABRICKS_HOST")),
        Key::new("databricks_warehouse_id", Some("DATABRICKS_WAREHOUSE_ID")),
        Key::new("databricks_staging_volume", Some("DATABRICKS_STAGING_VOLUME")),
        Key::new("ckan_url", Some("CKAN_INSTANCE_URL")),
        Key::new("resource_id", Some("RESOURCE_ID")),
        Key::new("listen", None),
    ];

    const fn new(key: &'static str, env_var: Option<&'static str>) -> Key {
        Key { key, env_var }
    }

    /// The name of this key in `csvsnap.toml`.
    pub fn name(&self) -> &'static str {
        self.key
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key.fmt(f)
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Key::ALL
            .iter()
            .find(|k| k.key == s)
            .copied()
            .ok_or_else(|| format_err!("unknown configuration key {:?}", s))
    }
}

/// Our `csvsnap.toml` configuration file.
#[derive(Debug)]
pub struct Configuration {
    /// The path from which we read this file.
    path: PathBuf,
    /// Our raw configuration data.
    doc: DocumentMut,
}

// We use `toml_edit` rather than `serde` so that `config set` and `config
// unset` keep whatever comments and formatting the user had in the file.
impl Configuration {
    /// Load our default configuration.
    pub fn try_default() -> Result<Self> {
        Self::from_path(&config_file()?)
    }

    /// Load the configuration file at `path`.
    pub fn from_path(path: &Path) -> Result<Self> {
        match File::open(path) {
            Ok(rdr) => Ok(Self::from_reader(path.to_owned(), rdr)
                .with_context(|| format!("could not read file {}", path.display()))?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self {
                path: path.to_owned(),
                doc: DocumentMut::default(),
            }),
            Err(err) => {
                Err(err).context(format!("could not open file {}", path.display()))
            }
        }
    }

    /// Load a configuration file from the specified reader.
    fn from_reader<R>(path: PathBuf, mut rdr: R) -> Result<Self>
    where
        R: Read + 'static,
    {
        let mut buf = String::new();
        rdr.read_to_string(&mut buf)?;
        let doc = buf.parse::<DocumentMut>()?;
        Ok(Self { path, doc })
    }

    /// The path of this configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the configuration file to disk.
    pub fn write(&self) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            format_err!("cannot find parent directory of {}", self.path.display())
        })?;
        create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
        let data = self.doc.to_string();
        let mut f = File::create(&self.path)
            .with_context(|| format!("cannot create {}", self.path.display()))?;
        f.write_all(data.as_bytes())
            .with_context(|| format!("error writing to {}", self.path.display()))?;
        f.flush()
            .with_context(|| format!("error writing to {}", self.path.display()))?;
        Ok(())
    }

    /// Get the raw value of `key`, as it appears in the file.
    ///
    /// Booleans are returned as `"true"` or `"false"`.
    pub fn get(&self, key: Key) -> Result<Option<String>> {
        match self.doc.as_table().get(key.key) {
            None => Ok(None),
            Some(item) => {
                if let Some(s) = item.as_str() {
                    Ok(Some(s.to_owned()))
                } else if let Some(b) = item.as_bool() {
                    Ok(Some(b.to_string()))
                } else {
                    Err(format_err!(
                        "expected string for {} in {}, found {:?}",
                        key,
                        self.path.display(),
                        item.to_string().trim(),
                    ))
                }
            }
        }
    }

    /// Set `key` to `raw`. `legacy_fallback` is stored as a boolean and
    /// everything else as a string.
    pub fn set(&mut self, key: Key, raw: &str) -> Result<()> {
        let item = if key.key == "legacy_fallback" {
            value(parse_bool(raw).with_context(|| format!("invalid value for {}", key))?)
        } else {
            value(raw)
        };
        self.doc.as_table_mut().insert(key.key, item);
        Ok(())
    }

    /// Remove `key`, if present.
    pub fn unset(&mut self, key: Key) {
        self.doc.as_table_mut().remove(key.key);
    }

    /// Does this file mention `key` at all?
    pub fn contains(&self, key: Key) -> bool {
        !matches!(self.doc.as_table().get(key.key), None | Some(Item::None))
    }
}

/// Parse a boolean the way users tend to write them.
fn parse_bool(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(format_err!("expected true or false, found {:?}", s)),
    }
}

/// Fully-resolved settings: built-in defaults, then `csvsnap.toml`, then
/// environment variables. Command-line flags are applied on top of this by
/// each subcommand.
#[derive(Clone, Debug)]
pub struct Settings {
    pub source_url: Url,
    pub delimiter: Delimiter,
    pub destination: Option<DestinationLocator>,
    pub duplicate_columns: DuplicateColumns,
    pub legacy_fallback: bool,
    pub databricks_host: Option<Url>,
    pub databricks_warehouse_id: Option<String>,
    pub databricks_staging_volume: Option<String>,
    pub ckan_url: Url,
    pub resource_id: String,
    pub listen: SocketAddr,
}

impl Settings {
    /// Resolve settings from `config` and the process environment.
    pub fn resolve(config: &Configuration) -> Result<Settings> {
        Self::resolve_with_env(config, |var| env::var(var).ok())
    }

    /// Resolve settings, looking up environment variables with `env`.
    fn resolve_with_env<F>(config: &Configuration, env: F) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| -> Result<Option<String>> {
            let key = name.parse::<Key>()?;
            if let Some(var) = key.env_var {
                if let Some(v) = env(var).filter(|v| !v.is_empty()) {
                    trace!("{} set from ${}", key, var);
                    return Ok(Some(v));
                }
            }
            config.get(key)
        };
        fn parsed<T>(key: &str, raw: Option<String>) -> Result<Option<T>>
        where
            T: FromStr,
            T::Err: Into<Error>,
        {
            raw.map(|raw| {
                raw.parse::<T>()
                    .map_err(|err| -> Error { err.into() })
                    .with_context(|| format!("invalid value for {}: {:?}", key, raw))
            })
            .transpose()
        }

        // `PORT` is the conventional way for a hosting platform to tell us
        // where to listen.
        let listen = match env("PORT").filter(|p| !p.is_empty()) {
            Some(port) => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("invalid PORT {:?}", port))?;
                SocketAddr::from(([0, 0, 0, 0], port))
            }
            None => parsed("listen", lookup("listen")?)?
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080))),
        };

        let legacy_fallback = match lookup("legacy_fallback")? {
            Some(raw) => parse_bool(&raw).context("invalid value for legacy_fallback")?,
            None => DecodePolicy::default().legacy_fallback,
        };

        Ok(Settings {
            source_url: parsed("source_url", lookup("source_url")?)?
                .map_or_else(|| DEFAULT_SOURCE_URL.parse(), Ok)?,
            delimiter: parsed("delimiter", lookup("delimiter")?)?.unwrap_or_default(),
            destination: parsed("destination", lookup("destination")?)?,
            duplicate_columns: parsed("duplicate_columns", lookup("duplicate_columns")?)?
                .unwrap_or_default(),
            legacy_fallback,
            databricks_host: parsed("databricks_host", lookup("databricks_host")?)?,
            databricks_warehouse_id: lookup("databricks_warehouse_id")?,
            databricks_staging_volume: lookup("databricks_staging_volume")?,
            ckan_url: parsed("ckan_url", lookup("ckan_url")?)?
                .map_or_else(|| DEFAULT_CKAN_URL.parse(), Ok)?,
            resource_id: lookup("resource_id")?
                .unwrap_or_else(|| DEFAULT_RESOURCE_ID.to_owned()),
            listen,
        })
    }

    /// The source dataset described by these settings.
    pub fn source(&self) -> SourceDataset {
        SourceDataset {
            url: self.source_url.clone(),
            delimiter: self.delimiter,
            decode_policy: DecodePolicy {
                legacy_fallback: self.legacy_fallback,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    use super::*;

    fn temp_config(contents: &str) -> (tempfile::TempDir, Configuration) {
        let dir = tempfile::Builder::new().prefix("csvsnap").tempdir().unwrap();
        let path = dir.path().join("csvsnap.toml");
        std::fs::write(&path, contents).unwrap();
        let config = Configuration::from_path(&path).unwrap();
        (dir, config)
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_apply_without_a_file() {
        let config = Configuration::from_path(Path::new("/nonexistent/csvsnap.toml"))
            .unwrap();
        let settings = Settings::resolve_with_env(&config, no_env).unwrap();
        assert_eq!(settings.source_url.as_str(), DEFAULT_SOURCE_URL);
        assert_eq!(settings.delimiter, Delimiter::Comma);
        assert_eq!(settings.destination, None);
        assert_eq!(settings.duplicate_columns, DuplicateColumns::Reject);
        assert!(settings.legacy_fallback);
        assert_eq!(settings.ckan_url.as_str(), DEFAULT_CKAN_URL);
        assert_eq!(settings.resource_id, DEFAULT_RESOURCE_ID);
        assert_eq!(settings.listen.to_string(), DEFAULT_LISTEN);
    }

    #[test]
    fn env_overrides_file() {
        let (_dir, config) = temp_config(
            "# Our dataset.\ndelimiter = \"tab\"\nresource_id = \"from-file\"\n",
        );
        let env = HashMap::from([
            ("RESOURCE_ID", "from-env".to_owned()),
            ("PORT", "9000".to_owned()),
        ]);
        let settings =
            Settings::resolve_with_env(&config, |v| env.get(v).cloned()).unwrap();
        assert_eq!(settings.delimiter, Delimiter::Tab);
        assert_eq!(settings.resource_id, "from-env");
        assert_eq!(settings.listen.port(), 9000);
    }

    #[test]
    fn set_and_unset_preserve_comments() {
        let (_dir, mut config) = temp_config(
            "# Keep me.\ndelimiter = \"comma\"\nlisten = \"127.0.0.1:1\"\n",
        );
        config
            .set("destination".parse().unwrap(), "bigquery:p:d.t")
            .unwrap();
        config.set("legacy_fallback".parse().unwrap(), "no").unwrap();
        config.unset("listen".parse().unwrap());
        config.write().unwrap();

        let reloaded = Configuration::from_path(config.path()).unwrap();
        let text = std::fs::read_to_string(config.path()).unwrap();
        assert!(text.contains("# Keep me."));
        assert!(!reloaded.contains("listen".parse().unwrap()));
        assert!(text.contains("legacy_fallback = false"));
        let settings = Settings::resolve_with_env(&reloaded, no_env).unwrap();
        assert!(!settings.legacy_fallback);
        assert_eq!(
            settings.destination.map(|d| d.to_string()),
            Some("bigquery:p:d.t".to_owned()),
        );
    }

    #[test]
    fn bad_values_are_reported() {
        let (_dir, config) = temp_config("delimiter = \"pipe\"\n");
        let err = Settings::resolve_with_env(&config, no_env).unwrap_err();
        assert!(format!("{:#}", err).contains("delimiter"));
        assert!("colour".parse::<Key>().is_err());
    }
}
