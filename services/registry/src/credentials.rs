//! Registry credentials, resolved from the local docker configuration.
//!
//! The docker CLI keeps credentials in `$DOCKER_CONFIG/config.json`
//! (`~/.docker/config.json` by default), either inline under `auths` or in an
//! external credential helper named by `credHelpers` / `credsStore`.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io::Write as _;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use serde::Deserialize;
use zeroize::Zeroize;

const DOCKER_HUB_KEY: &str = "index.docker.io";

/// A password or token.
///
/// This wrapper just prevents the value from appearing in debug reprs, and
/// zeroes owned values on drop.
///
/// Use [Secret::revealed] to get the underlying value.
#[derive(Clone, Deserialize)]
#[serde(from = "String")]
pub struct Secret(Cow<'static, str>);

impl Secret {
    /// Expose the underlying value
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }

    /// Whether the secret is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}

/// A username and password for a registry.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Account name
    pub username: String,

    /// Password or personal access token
    pub password: Secret,
}

impl Credentials {
    /// Create new credentials.
    pub fn new(username: impl Into<String>, password: impl Into<Secret>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Decode the base64 `user:password` form used by the `auth` field.
    pub fn from_auth_field(auth: &str) -> Result<Self, CredentialError> {
        let decoded = BASE64_STANDARD
            .decode(auth.trim())
            .map_err(|_| CredentialError::Malformed("auth is not valid base64"))?;
        let mut text = String::from_utf8(decoded)
            .map_err(|_| CredentialError::Malformed("auth is not valid utf-8"))?;

        let credentials = text.split_once(':').map(|(username, password)| {
            Credentials::new(username, Secret::from(password.to_string()))
        });
        text.zeroize();

        credentials.ok_or(CredentialError::Malformed("auth is missing ':'"))
    }
}

/// Errors that can occur while resolving credentials
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Reading the configuration file failed
    #[error("reading docker config {path}")]
    Io {
        /// The configuration file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON
    #[error("parsing docker config {path}")]
    Parse {
        /// The configuration file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A stored credential could not be decoded
    #[error("malformed credential: {0}")]
    Malformed(&'static str),

    /// A credential helper failed
    #[error("credential helper docker-credential-{helper}: {message}")]
    Helper {
        /// Helper name
        helper: String,
        /// What went wrong
        message: String,
    },
}

/// Resolves the credentials for a registry domain.
pub trait CredentialProvider {
    /// Look up credentials for `domain`. `Ok(None)` means anonymous access.
    fn resolve(&self, domain: &str) -> Result<Option<Credentials>, CredentialError>;
}

/// Credentials given up front, used for every domain.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<Credentials>);

impl StaticCredentials {
    /// Use these credentials.
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self(credentials)
    }
}

impl CredentialProvider for StaticCredentials {
    fn resolve(&self, _domain: &str) -> Result<Option<Credentials>, CredentialError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<Secret>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default)]
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperResponse {
    username: String,
    secret: Secret,
}

/// Credentials from a docker CLI configuration file.
#[derive(Debug, Clone, Default)]
pub struct DockerConfig {
    config: ConfigFile,
    helper_dir: Option<PathBuf>,
}

impl DockerConfig {
    /// The configuration file docker itself would use.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Some(PathBuf::from(dir).join("config.json"));
        }
        dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
    }

    /// Load the default configuration file. A missing file means no credentials.
    pub fn from_env() -> Result<Self, CredentialError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                tracing::debug!(path = %path.display(), "No docker config, using anonymous access");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let data = std::fs::read(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data).map_err(|source| CredentialError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse(data: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(Self {
            config: serde_json::from_slice(data)?,
            helper_dir: None,
        })
    }

    /// Run credential helpers from `dir` instead of searching `PATH`.
    pub fn with_helper_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.helper_dir = Some(dir.into());
        self
    }

    fn helper_program(&self, helper: &str) -> PathBuf {
        let name = format!("docker-credential-{helper}");
        match &self.helper_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    fn helper_for(&self, key: &str) -> Option<&str> {
        self.config
            .cred_helpers
            .iter()
            .find(|(domain, _)| normalize(domain) == key)
            .map(|(_, helper)| helper.as_str())
            .or(self.config.creds_store.as_deref())
    }

    fn inline(&self, key: &str) -> Result<Option<Credentials>, CredentialError> {
        let Some(entry) = self
            .config
            .auths
            .iter()
            .find(|(domain, _)| normalize(domain) == key)
            .map(|(_, entry)| entry)
        else {
            return Ok(None);
        };

        if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
            return Credentials::from_auth_field(auth).map(Some);
        }

        match (&entry.username, &entry.password) {
            (Some(username), Some(password)) => {
                Ok(Some(Credentials::new(username.clone(), password.clone())))
            }
            _ => Ok(None),
        }
    }
}

impl CredentialProvider for DockerConfig {
    fn resolve(&self, domain: &str) -> Result<Option<Credentials>, CredentialError> {
        let key = normalize(domain);

        if let Some(helper) = self.helper_for(&key) {
            let server = if key == DOCKER_HUB_KEY {
                "https://index.docker.io/v1/".to_string()
            } else {
                key.clone()
            };
            if let Some(credentials) = run_helper(&self.helper_program(helper), helper, &server)? {
                return Ok(Some(credentials));
            }
        }

        self.inline(&key)
    }
}

/// Reduce a config key or domain to a bare host[:port].
fn normalize(domain: &str) -> String {
    let host = domain
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host);

    match host {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => DOCKER_HUB_KEY.to_string(),
        other => other.to_ascii_lowercase(),
    }
}

fn run_helper(
    program: &Path,
    helper: &str,
    server: &str,
) -> Result<Option<Credentials>, CredentialError> {
    let error = |message: String| CredentialError::Helper {
        helper: helper.to_string(),
        message,
    };

    tracing::debug!(program = %program.display(), %server, "Querying credential helper");
    let mut child = Command::new(program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| error(err.to_string()))?;

    // A helper may exit without reading its input; its exit status decides.
    if let Some(mut stdin) = child.stdin.take() {
        match stdin.write_all(server.as_bytes()) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(err) => return Err(error(err.to_string())),
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|err| error(err.to_string()))?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("credentials not found") {
            return Ok(None);
        }
        return Err(error(format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let response: HelperResponse =
        serde_json::from_slice(&output.stdout).map_err(|err| error(err.to_string()))?;
    Ok(Some(Credentials::new(response.username, response.secret)))
}
