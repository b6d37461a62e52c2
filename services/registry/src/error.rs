//! Error types for the registry client

use std::fmt;

use http::StatusCode;
use serde::Deserialize;

use crate::credentials::CredentialError;

/// A boxed error from the underlying transport
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The request could not be sent, or no response arrived in time
    #[error("{method} {uri}")]
    Transport {
        /// Request method
        method: http::Method,
        /// Request URI
        uri: http::Uri,
        /// Underlying transport error
        #[source]
        source: BoxError,
    },

    /// The registry answered with an error status
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// An error occured while recieving the response body
    #[error("reading response body")]
    Body(#[source] BoxError),

    /// A JSON document from the registry could not be decoded
    #[error("decoding {what}")]
    Json {
        /// What was being decoded
        what: &'static str,
        /// Decoding error
        #[source]
        source: serde_json::Error,
    },

    /// The catalog endpoint did not answer with a registry document
    #[error("domain {0} is not a valid registry")]
    NotARegistry(String),

    /// Invalid digest format
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Unsupported manifest media type
    #[error("unsupported manifest type: {0}")]
    UnsupportedManifestType(String),

    /// Digest mismatch
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: String,
        /// Actual digest
        actual: String,
    },

    /// Invalid repository name
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    /// Invalid registry domain
    #[error("invalid registry domain: {0}")]
    InvalidDomain(String),

    /// A required response header was missing or malformed
    #[error("missing or invalid {0} header")]
    Header(&'static str),

    /// Too many redirects while fetching a blob
    #[error("too many redirects fetching {0}")]
    Redirects(String),

    /// A request could not be assembled
    #[error("building request")]
    Request(#[from] http::Error),

    /// A URI could not be assembled
    #[error("invalid uri")]
    Uri(#[from] http::uri::InvalidUri),

    /// The registry requested authentication that could not be satisfied
    #[error("authentication: {0}")]
    Authentication(String),

    /// Credentials could not be resolved
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

impl RegistryError {
    /// The OCI error code reported by the registry, if any.
    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            RegistryError::Response(response) => response.code(),
            _ => None,
        }
    }

    /// Whether the registry reported that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            RegistryError::Response(response) => response.status == StatusCode::NOT_FOUND,
            _ => false,
        }
    }
}

/// An error code from the OCI distribution specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// Blob unknown to registry
    BlobUnknown,
    /// Blob upload invalid
    BlobUploadInvalid,
    /// Provided digest did not match uploaded content
    DigestInvalid,
    /// Manifest unknown to registry
    ManifestUnknown,
    /// Manifest invalid
    ManifestInvalid,
    /// Invalid repository name
    NameInvalid,
    /// Repository name not known to registry
    NameUnknown,
    /// Authentication required
    Unauthorized,
    /// Requested access to the resource is denied
    Denied,
    /// The operation is unsupported
    Unsupported,
    /// Too many requests
    TooManyRequests,
    /// A code not recognized by this library
    Other(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::BlobUnknown => f.write_str("BLOB_UNKNOWN"),
            ErrorCode::BlobUploadInvalid => f.write_str("BLOB_UPLOAD_INVALID"),
            ErrorCode::DigestInvalid => f.write_str("DIGEST_INVALID"),
            ErrorCode::ManifestUnknown => f.write_str("MANIFEST_UNKNOWN"),
            ErrorCode::ManifestInvalid => f.write_str("MANIFEST_INVALID"),
            ErrorCode::NameInvalid => f.write_str("NAME_INVALID"),
            ErrorCode::NameUnknown => f.write_str("NAME_UNKNOWN"),
            ErrorCode::Unauthorized => f.write_str("UNAUTHORIZED"),
            ErrorCode::Denied => f.write_str("DENIED"),
            ErrorCode::Unsupported => f.write_str("UNSUPPORTED"),
            ErrorCode::TooManyRequests => f.write_str("TOOMANYREQUESTS"),
            ErrorCode::Other(code) => f.write_str(code),
        }
    }
}

impl From<String> for ErrorCode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "BLOB_UNKNOWN" => ErrorCode::BlobUnknown,
            "BLOB_UPLOAD_INVALID" => ErrorCode::BlobUploadInvalid,
            "DIGEST_INVALID" => ErrorCode::DigestInvalid,
            "MANIFEST_UNKNOWN" => ErrorCode::ManifestUnknown,
            "MANIFEST_INVALID" => ErrorCode::ManifestInvalid,
            "NAME_INVALID" => ErrorCode::NameInvalid,
            "NAME_UNKNOWN" => ErrorCode::NameUnknown,
            "UNAUTHORIZED" => ErrorCode::Unauthorized,
            "DENIED" => ErrorCode::Denied,
            "UNSUPPORTED" => ErrorCode::Unsupported,
            "TOOMANYREQUESTS" => ErrorCode::TooManyRequests,
            _ => ErrorCode::Other(value),
        }
    }
}

/// OCI error response format
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<RawErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct RawErrorDetail {
    code: String,
    #[serde(default)]
    message: String,
}

/// One entry of an OCI error response.
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    /// The error code
    pub code: ErrorCode,

    /// Human readable message
    pub message: String,
}

/// A registry returned an error response
#[derive(Debug, Clone)]
pub struct ResponseError {
    /// The HTTP status code of the response
    pub status: StatusCode,

    /// The request URI which failed
    pub uri: http::Uri,

    /// Errors decoded from the response body
    pub errors: Vec<ErrorDetail>,

    /// The raw response body, when it was not an OCI error document
    pub message: String,
}

impl ResponseError {
    /// Build an error from a failed response's status and body.
    pub fn new(status: StatusCode, uri: http::Uri, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorResponse>(body) {
            Ok(response) if !response.errors.is_empty() => Self {
                status,
                uri,
                errors: response
                    .errors
                    .into_iter()
                    .map(|raw| ErrorDetail {
                        code: raw.code.into(),
                        message: raw.message,
                    })
                    .collect(),
                message: String::new(),
            },
            _ => Self {
                status,
                uri,
                errors: Vec::new(),
                message: String::from_utf8_lossy(body).trim().to_string(),
            },
        }
    }

    /// The first OCI error code in the response.
    pub fn code(&self) -> Option<&ErrorCode> {
        self.errors.first().map(|detail| &detail.code)
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HTTP {} from {}", self.status, self.uri)?;
        if self.errors.is_empty() {
            if !self.message.is_empty() {
                write!(f, ": {}", self.message)?;
            }
            return Ok(());
        }

        for (n, detail) in self.errors.iter().enumerate() {
            let sep = if n == 0 { ": " } else { "; " };
            write!(f, "{sep}{} ({})", detail.message, detail.code)?;
        }
        Ok(())
    }
}

impl std::error::Error for ResponseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_oci_error_body() {
        let body = br#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown","detail":{}}]}"#;
        let error = ResponseError::new(
            StatusCode::NOT_FOUND,
            "https://r.example/v2/app/manifests/v1".parse().unwrap(),
            body,
        );

        assert_eq!(error.code(), Some(&ErrorCode::ManifestUnknown));
        assert_eq!(
            error.to_string(),
            "HTTP 404 Not Found from https://r.example/v2/app/manifests/v1: manifest unknown (MANIFEST_UNKNOWN)"
        );
        assert!(RegistryError::from(error).is_not_found());
    }

    #[test]
    fn plain_error_body() {
        let error = ResponseError::new(
            StatusCode::BAD_GATEWAY,
            "https://r.example/v2/".parse().unwrap(),
            b"upstream went away\n",
        );

        assert!(error.code().is_none());
        assert_eq!(error.message, "upstream went away");
    }

    #[test]
    fn unknown_codes_round_trip() {
        let code = ErrorCode::from("SOMETHING_NEW".to_string());
        assert_eq!(code.to_string(), "SOMETHING_NEW");
        assert_eq!(
            ErrorCode::from("TOOMANYREQUESTS".to_string()),
            ErrorCode::TooManyRequests
        );
    }
}
