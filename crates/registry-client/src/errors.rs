//! Errors surfaced by the registry client.
//!
//! Authentication failures and network failures are deliberately distinct
//! kinds: callers retry a different endpoint on one and abort (or back off)
//! on the other. Cancellations and timeouts surface through the wrapped
//! transport error, never as an authentication failure.

/// Errors produced while authenticating against or talking to a registry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The registry demanded authentication but offered no scheme this
    /// client understands. Not retried.
    #[error("no supported authentication scheme offered by the registry")]
    ChallengeUnsupported,

    /// The token endpoint refused the exchange or returned a body without
    /// a token.
    #[error("token exchange with {realm} failed: {reason}")]
    TokenExchangeFailed {
        /// The realm URL named by the challenge.
        realm: String,
        /// What went wrong, as reported by the endpoint.
        reason: String,
    },

    /// The request still received a 401 after credentials were attached.
    /// Fatal for this pull attempt.
    #[error("registry rejected the supplied credentials")]
    AuthenticationRejected,

    /// The endpoint URL cannot be used to build a client.
    #[error("invalid registry endpoint: {message}")]
    InvalidEndpoint {
        /// Why the endpoint was rejected.
        message: String,
    },

    /// The repository reference failed validation.
    #[error(transparent)]
    Reference(#[from] crate::reference::ParseError),

    /// Connection, timeout, or cancellation failure from the transport.
    #[error(transparent)]
    Network(#[from] reqwest::Error),

    /// A redirect could not be followed (missing or unusable `Location`,
    /// hop limit reached). Network-class: says nothing about credentials.
    #[error("redirect handling failed: {message}")]
    Redirect {
        /// Description of the offending hop.
        message: String,
    },

    /// The registry answered with an error payload outside the
    /// authentication flow.
    #[error("registry error (status {status}): {message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// First error message from the body, or the raw body.
        message: String,
    },
}

impl Error {
    /// True for failures of the authentication handshake itself.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Error::ChallengeUnsupported
                | Error::TokenExchangeFailed { .. }
                | Error::AuthenticationRejected
        )
    }

    /// True for transport-level failures a caller may retry elsewhere.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Redirect { .. })
    }
}

/// A pull failure, carrying the reference it happened for.
#[derive(Debug, thiserror::Error)]
#[error("failed to pull {reference}: {source}")]
pub struct PullError {
    /// The reference the pull was resolving.
    pub reference: String,
    /// The underlying failure.
    #[source]
    pub source: Error,
}

/// Error envelope format used by distribution-spec registries.
#[derive(serde::Deserialize)]
pub(crate) struct ApiErrors {
    pub(crate) errors: Vec<ApiError>,
}

/// A single error entry from a registry error envelope.
#[derive(serde::Deserialize, Debug)]
pub(crate) struct ApiError {
    pub(crate) code: ApiErrorCode,
    #[serde(default)]
    pub(crate) message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{:?}", self.code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error codes a registry reports in its envelope, reduced to the ones the
/// pull path can meet.
#[derive(serde::Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum ApiErrorCode {
    /// Authentication required.
    Unauthorized,
    /// Requested access to the resource is denied.
    Denied,
    /// Invalid repository name.
    NameInvalid,
    /// Repository name is not known.
    NameUnknown,
    /// Manifest, identified by name and reference, is unknown.
    ManifestUnknown,
    /// Too many requests from this client.
    Toomanyrequests,
    /// The operation is unsupported.
    Unsupported,
    /// Any code this client has no specific handling for.
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod test {
    use super::*;

    const EXAMPLE_ERROR: &str = r#"
      {"errors":[{"code":"UNAUTHORIZED","message":"authentication required","detail":[{"Type":"repository","Name":"library/hello","Action":"pull"}]}]}
      "#;

    #[test]
    fn envelope_parses() {
        let envelope: ApiErrors = serde_json::from_str(EXAMPLE_ERROR).expect("parse envelope");
        let e = &envelope.errors[0];
        assert_eq!(ApiErrorCode::Unauthorized, e.code);
        assert_eq!("authentication required", e.message);
    }

    #[test]
    fn unknown_codes_do_not_fail_parsing() {
        let envelope: ApiErrors =
            serde_json::from_str(r#"{"errors":[{"code":"BLOB_UNKNOWN"}]}"#).expect("parse envelope");
        assert_eq!(ApiErrorCode::Other, envelope.errors[0].code);
    }

    #[test]
    fn display_falls_back_to_the_code() {
        let error: ApiError =
            serde_json::from_str(r#"{"code":"MANIFEST_UNKNOWN"}"#).expect("parse error");
        assert_eq!(format!("{}", error), "ManifestUnknown");
    }

    #[test]
    fn kinds_are_distinguishable() {
        assert!(Error::AuthenticationRejected.is_authentication());
        assert!(!Error::AuthenticationRejected.is_network());
        let redirect = Error::Redirect {
            message: "no Location header".to_string(),
        };
        assert!(redirect.is_network());
        assert!(!redirect.is_authentication());
    }
}
