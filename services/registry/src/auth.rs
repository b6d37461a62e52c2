//! Authentication with a registry.
//!
//! Registries either accept HTTP basic credentials directly, or answer `401`
//! with a `WWW-Authenticate: Bearer realm=...` challenge naming a token service.
//! The [`Authenticator`] remembers which scheme the registry asked for, and keeps
//! one bearer token per access scope.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use http::HeaderValue;
use serde::Deserialize;

use crate::credentials::{Credentials, Secret};
use crate::error::{RegistryError, RegistryResult};

/// Create a basic authentication header value, with the password being optional.
///
/// Basic authentication Base64 encodes the username and password, separated by a colon.
pub fn basic_auth<U, P>(username: U, password: Option<P>) -> HeaderValue
where
    U: std::fmt::Display,
    P: std::fmt::Display,
{
    use base64::prelude::BASE64_STANDARD;
    use base64::write::EncoderWriter;
    use std::io::Write;

    let mut buf = b"Basic ".to_vec();
    {
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        let _ = write!(encoder, "{}:", username);
        if let Some(password) = password {
            let _ = write!(encoder, "{}", password);
        }
    }
    let mut header = HeaderValue::from_bytes(&buf).expect("base64 is always valid HeaderValue");
    header.set_sensitive(true);
    header
}

fn bearer(token: &Secret) -> RegistryResult<HeaderValue> {
    let mut header = HeaderValue::try_from(format!("Bearer {}", token.revealed()))
        .map_err(|_| RegistryError::Authentication("token is not a valid header".into()))?;
    header.set_sensitive(true);
    Ok(header)
}

/// The access scope needed for pulling from a repository.
pub fn pull_scope(repository: &str) -> String {
    format!("repository:{repository}:pull")
}

/// The access scope needed for pushing to a repository.
pub fn push_scope(repository: &str) -> String {
    format!("repository:{repository}:pull,push")
}

/// The access scope needed for listing the catalog.
pub const CATALOG_SCOPE: &str = "registry:catalog:*";

/// An authentication challenge from a `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// The registry wants HTTP basic credentials
    Basic,

    /// The registry wants a bearer token from a token service
    Bearer {
        /// Token service URL
        realm: String,
        /// Service name to request the token for
        service: Option<String>,
        /// Scopes named by the registry, if any
        scope: Option<String>,
    },
}

impl Challenge {
    /// Parse a `WWW-Authenticate` header value.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (key, value) in parse_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Challenge::Bearer {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// Split `key="value", key2=value2` into pairs. Quoted values may contain commas.
fn parse_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = params.trim();

    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_string();
        let after = after.trim_start();

        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            let mut value = String::new();
            let mut escaped = false;
            let mut end = quoted.len();
            for (idx, c) in quoted.char_indices() {
                match c {
                    _ if escaped => {
                        value.push(c);
                        escaped = false;
                    }
                    '\\' => escaped = true,
                    '"' => {
                        end = idx + 1;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            (value, &quoted[end.min(quoted.len())..])
        } else {
            let end = after.find(',').unwrap_or(after.len());
            (after[..end].trim().to_string(), &after[end..])
        };

        pairs.push((key, value));
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }

    pairs
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<Secret>,
    #[serde(default)]
    access_token: Option<Secret>,
}

/// Decode the token service response.
pub(crate) fn parse_token(body: &[u8]) -> RegistryResult<Secret> {
    let response: TokenResponse =
        serde_json::from_slice(body).map_err(|source| RegistryError::Json {
            what: "token response",
            source,
        })?;

    response
        .token
        .filter(|t| !t.is_empty())
        .or(response.access_token.filter(|t| !t.is_empty()))
        .ok_or_else(|| RegistryError::Authentication("token service returned no token".into()))
}

/// The scheme the registry has asked for so far.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scheme {
    /// No challenge seen yet, requests go out anonymously
    Anonymous,
    /// Send basic credentials with every request
    Basic,
    /// Send the cached token for the request scope
    Bearer,
}

/// Tracks the authentication scheme and tokens for one registry.
#[derive(Debug)]
pub struct Authenticator {
    credentials: Option<Credentials>,
    scheme: ArcSwap<Scheme>,
    tokens: DashMap<String, Secret>,
}

impl Authenticator {
    /// Create an authenticator using optional credentials.
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            credentials,
            scheme: ArcSwap::new(Arc::new(Scheme::Anonymous)),
            tokens: DashMap::new(),
        }
    }

    /// The configured credentials.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// The `Authorization` header to send for a request needing `scope`.
    pub fn header(&self, scope: &str) -> RegistryResult<Option<HeaderValue>> {
        match **self.scheme.load() {
            Scheme::Anonymous => Ok(None),
            Scheme::Basic => Ok(self
                .credentials
                .as_ref()
                .map(|c| basic_auth(&c.username, Some(c.password.revealed())))),
            Scheme::Bearer => self.tokens.get(scope).map(|t| bearer(&t)).transpose(),
        }
    }

    /// Switch to basic authentication after a `Basic` challenge.
    pub fn use_basic(&self) -> RegistryResult<()> {
        if self.credentials.is_none() {
            return Err(RegistryError::Authentication(
                "registry requires credentials, none configured".into(),
            ));
        }
        self.scheme.store(Arc::new(Scheme::Basic));
        Ok(())
    }

    /// Remember a token obtained for `scope`.
    pub fn store_token(&self, scope: &str, token: Secret) {
        self.scheme.store(Arc::new(Scheme::Bearer));
        self.tokens.insert(scope.to_string(), token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_header() {
        let header = basic_auth("username", Some("password"));
        assert_eq!(header.to_str().unwrap(), "Basic dXNlcm5hbWU6cGFzc3dvcmQ=");
        assert!(header.is_sensitive());
    }

    #[test]
    fn parse_bearer_challenge() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:samalba/my-app:pull,push""#,
        )
        .unwrap();

        assert_eq!(
            challenge,
            Challenge::Bearer {
                realm: "https://auth.docker.io/token".into(),
                service: Some("registry.docker.io".into()),
                scope: Some("repository:samalba/my-app:pull,push".into()),
            }
        );
    }

    #[test]
    fn parse_other_challenges() {
        assert_eq!(
            Challenge::parse(r#"Basic realm="Registry Realm""#),
            Some(Challenge::Basic)
        );
        assert_eq!(
            Challenge::parse("bearer realm=https://r.example/token, service=r.example"),
            Some(Challenge::Bearer {
                realm: "https://r.example/token".into(),
                service: Some("r.example".into()),
                scope: None,
            })
        );
        assert_eq!(Challenge::parse(r#"Bearer service="x""#), None);
        assert_eq!(Challenge::parse("Negotiate"), None);
    }

    #[test]
    fn token_response_variants() {
        assert_eq!(parse_token(br#"{"token": "abc"}"#).unwrap().revealed(), "abc");
        assert_eq!(
            parse_token(br#"{"access_token": "def", "expires_in": 300}"#)
                .unwrap()
                .revealed(),
            "def"
        );
        assert!(parse_token(br#"{"token": ""}"#).is_err());
    }

    #[test]
    fn headers_follow_scheme() {
        let auth = Authenticator::new(Some(Credentials::new("user", "pass")));
        assert!(auth.header("repository:app:pull").unwrap().is_none());

        auth.use_basic().unwrap();
        let header = auth.header("repository:app:pull").unwrap().unwrap();
        assert!(header.to_str().unwrap().starts_with("Basic "));

        auth.store_token("repository:app:pull", Secret::from("tok"));
        let header = auth.header("repository:app:pull").unwrap().unwrap();
        assert_eq!(header.to_str().unwrap(), "Bearer tok");
        assert!(auth.header("repository:other:pull").unwrap().is_none());

        let anonymous = Authenticator::new(None);
        assert!(anonymous.use_basic().is_err());
    }
}
