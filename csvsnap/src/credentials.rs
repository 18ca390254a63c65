//! Support for looking up credentials.
//!
//! Every credential we use is a static token. We look for it in an
//! environment variable first, and then in a file in our config directory.

use async_trait::async_trait;
use std::{collections::HashMap, env, fmt, io, path::PathBuf};
use tokio::{fs, sync::Mutex};

use crate::common::*;
use crate::config::config_dir;

/// A token we can use to access a service.
#[derive(Clone)]
pub struct Token(String);

impl Token {
    /// Wrap a token we got from somewhere else.
    pub fn new<S: Into<String>>(token: S) -> Token {
        Token(token.into())
    }

    /// The token itself.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(..)")
    }
}

/// An interface which can be used to look up credentials.
pub struct CredentialsManager {
    /// Places to look up credentials.
    sources: HashMap<&'static str, Box<dyn CredentialsSource>>,

    /// Credentials that we've already looked up.
    cache: Mutex<HashMap<&'static str, Token>>,
}

impl CredentialsManager {
    /// Create a new credentials manager and install the default handlers.
    pub fn new() -> Result<CredentialsManager> {
        Ok(Self::with_config_dir(config_dir()?))
    }

    /// Create a credentials manager which looks for files in `dir`.
    pub(crate) fn with_config_dir(dir: PathBuf) -> CredentialsManager {
        let mut sources = HashMap::new();
        for &(name, var) in &[
            ("bigquery_access_token", "GOOGLE_OAUTH_ACCESS_TOKEN"),
            ("databricks_token", "DATABRICKS_TOKEN"),
            ("ckan_api_token", "API_TOKEN"),
        ] {
            let source = CredentialsSources::new(vec![
                EnvCredentialsSource::new(var).boxed(),
                FileCredentialsSource::new(dir.join(format!("{}.txt", name))).boxed(),
            ]);
            sources.insert(name, source.boxed());
        }
        CredentialsManager {
            sources,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the credential `name` and return it.
    #[instrument(level = "trace", skip(self))]
    pub async fn get(&self, name: &str) -> Result<Token> {
        let (&key, source) = self
            .sources
            .get_key_value(name)
            .ok_or_else(|| format_err!("unknown credential {:?}", name))?;

        // Hold the cache lock while we look, so we only read each file once.
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(key) {
            return Ok(token.clone());
        }
        if let Some(token) = source.get_credentials().await? {
            cache.insert(key, token.clone());
            Ok(token)
        } else {
            // The `Display` impl on our source explains how to set this.
            Err(format_err!(
                "could not find credentials for {} in any of:\n{}",
                name,
                source,
            ))
        }
    }
}

impl fmt::Debug for CredentialsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsManager")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// An interface for looking up credentials.
#[async_trait]
trait CredentialsSource: fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Look up a token, returning `None` if this source doesn't have one.
    async fn get_credentials(&self) -> Result<Option<Token>>;
}

/// Extra methods for `CredentialsSource` which aren't "object safe".
trait CredentialsSourceExt: CredentialsSource + Sized + 'static {
    /// Convert to a `Box<dyn CredentialsSource>`.
    fn boxed(self) -> Box<dyn CredentialsSource> {
        Box::new(self)
    }
}

impl<CS: CredentialsSource> CredentialsSourceExt for CS {}

/// Look up a token stored in an environment variable.
#[derive(Debug)]
struct EnvCredentialsSource {
    var: &'static str,
}

impl EnvCredentialsSource {
    fn new(var: &'static str) -> Self {
        Self { var }
    }
}

impl fmt::Display for EnvCredentialsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "- The environment variable {}", self.var)
    }
}

#[async_trait]
impl CredentialsSource for EnvCredentialsSource {
    async fn get_credentials(&self) -> Result<Option<Token>> {
        match env::var(self.var) {
            Ok(value) => Ok(token_from(&value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(..)) => Err(format_err!(
                "environment variable {} cannot be converted to UTF-8",
                self.var,
            )),
        }
    }
}

/// Load a token stored in a file.
#[derive(Debug)]
struct FileCredentialsSource {
    path: PathBuf,
}

impl FileCredentialsSource {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl fmt::Display for FileCredentialsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "- The file {}", self.path.display())
    }
}

#[async_trait]
impl CredentialsSource for FileCredentialsSource {
    async fn get_credentials(&self) -> Result<Option<Token>> {
        match fs::read_to_string(&self.path).await {
            Ok(value) => Ok(token_from(&value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(format_err!(
                "error reading {}: {}",
                self.path.display(),
                err
            )),
        }
    }
}

/// Look in multiple places for credentials.
#[derive(Debug)]
struct CredentialsSources {
    sources: Vec<Box<dyn CredentialsSource>>,
}

impl CredentialsSources {
    /// Create a new list of credentials sources that will be searched in order.
    fn new(sources: Vec<Box<dyn CredentialsSource>>) -> Self {
        Self { sources }
    }
}

impl fmt::Display for CredentialsSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.sources {
            write!(f, "{}", s)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialsSource for CredentialsSources {
    async fn get_credentials(&self) -> Result<Option<Token>> {
        for source in &self.sources {
            if let Some(token) = source.get_credentials().await? {
                return Ok(Some(token));
            }
        }
        Ok(None)
    }
}

/// Tokens pasted into files usually end with a newline. A blank value counts
/// as missing.
fn token_from(raw: &str) -> Option<Token> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(Token(trimmed.to_owned()))
    }
}
