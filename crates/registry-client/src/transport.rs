//! The authenticating transport and the credential gate it delegates to.
//!
//! Every logical request runs a small state machine: send, and on a 401
//! with a parseable challenge resolve credentials and resend exactly once.
//! Redirects are followed here rather than inside the HTTP client so the
//! credential gate is re-evaluated for every hop: a hop that leaves the
//! original host goes out bare, and once stripped, credentials are not
//! reinstated for the rest of that logical request even if a later hop
//! returns to the original host.

use reqwest::header::{self, HeaderMap};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::challenge::{self, Challenge};
use crate::endpoint::HostIdentity;
use crate::errors::Error;
use crate::secrets::RegistryAuth;
use crate::token::{Credential, TokenExchanger};

const MAX_REDIRECTS: usize = 10;

/// Decides, per outgoing request, whether credentials may be attached.
///
/// The decision is a pure function of the target host against the host the
/// client was constructed for; no per-request state is involved. Caller
/// headers and the Authorization header ride together: both are scoped to
/// the original host only.
pub(crate) struct CredentialScoper {
    origin: HostIdentity,
    meta_headers: HeaderMap,
}

impl CredentialScoper {
    pub(crate) fn new(origin: HostIdentity, meta_headers: HeaderMap) -> Self {
        CredentialScoper {
            origin,
            meta_headers,
        }
    }

    pub(crate) fn origin(&self) -> &HostIdentity {
        &self.origin
    }

    /// Attach caller headers and credentials iff `target` is the original
    /// host; otherwise return the request untouched.
    pub(crate) fn decorate(
        &self,
        builder: RequestBuilder,
        target: &HostIdentity,
        credential: Option<&Credential>,
    ) -> RequestBuilder {
        if *target != self.origin {
            return builder;
        }
        let mut builder = builder.headers(self.meta_headers.clone());
        match credential {
            Some(Credential::Bearer(token)) => builder = builder.bearer_auth(token),
            Some(Credential::Basic(username, password)) => {
                builder = builder.basic_auth(username, Some(password))
            }
            None => {}
        }
        builder
    }
}

/// HTTP transport that answers 401 challenges and scopes credentials to
/// the endpoint it was built for.
pub(crate) struct AuthenticatingTransport {
    client: reqwest::Client,
    scoper: CredentialScoper,
    exchanger: TokenExchanger,
    action_scope: String,
    // Challenge learned from the /v2/ probe or the most recent 401.
    challenge: RwLock<Option<Challenge>>,
}

impl AuthenticatingTransport {
    pub(crate) fn new(
        client: reqwest::Client,
        origin: HostIdentity,
        meta_headers: HeaderMap,
        auth: RegistryAuth,
        action_scope: String,
    ) -> Self {
        AuthenticatingTransport {
            exchanger: TokenExchanger::new(client.clone(), auth),
            client,
            scoper: CredentialScoper::new(origin, meta_headers),
            action_scope,
            challenge: RwLock::new(None),
        }
    }

    /// Probe the registry root to learn whether, and how, it wants
    /// authentication.
    ///
    /// A 401 here is discovery, not failure: the challenge is kept for the
    /// requests that follow. A 401 nothing can be made of is a hard
    /// authentication failure.
    pub(crate) async fn probe(&self, v2_root: Url) -> Result<(), Error> {
        let response = self.send(Method::GET, v2_root, &HeaderMap::new(), None).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => {
                let challenges =
                    challenge::parse_challenges(response.headers().get_all(header::WWW_AUTHENTICATE));
                let preferred = challenges
                    .into_iter()
                    .next()
                    .ok_or(Error::ChallengeUnsupported)?;
                debug!(challenge = ?preferred, "Registry requires authentication");
                *self.challenge.write().await = Some(preferred);
                Ok(())
            }
            status => Err(Error::Api {
                status: status.as_u16(),
                message: "unexpected response to /v2/ probe".to_string(),
            }),
        }
    }

    /// Run one logical request through the challenge state machine.
    ///
    /// `headers` are content-negotiation headers (Accept and friends) that
    /// ride on every hop; anything sensitive goes through the scoper
    /// instead.
    pub(crate) async fn execute(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
    ) -> Result<Response, Error> {
        let credential = match self.challenge.read().await.as_ref() {
            Some(challenge) => {
                self.exchanger
                    .credential_for(challenge, &self.action_scope, false)
                    .await?
            }
            None => None,
        };

        let response = self
            .send(method.clone(), url.clone(), &headers, credential.as_ref())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // Challenged. Resolve fresh credentials and retry exactly once.
        let retry_credential = if self.from_origin(&response) {
            let challenges =
                challenge::parse_challenges(response.headers().get_all(header::WWW_AUTHENTICATE));
            match challenges.into_iter().next() {
                None => return Err(Error::ChallengeUnsupported),
                Some(fresh) => {
                    let credential = self
                        .exchanger
                        .credential_for(&fresh, &self.action_scope, true)
                        .await?;
                    *self.challenge.write().await = Some(fresh);
                    credential
                }
            }
        } else {
            // The 401 came back from a host we never attach credentials
            // to. Exchanging a token against a realm named by that host
            // would hand our credentials to an arbitrary server; retry
            // with what we already have.
            credential
        };

        let retry = self
            .send(method, url, &headers, retry_credential.as_ref())
            .await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(Error::AuthenticationRejected);
        }
        Ok(retry)
    }

    /// Send a request, following redirects by hand and re-evaluating the
    /// credential gate for each hop.
    async fn send(
        &self,
        method: Method,
        mut url: Url,
        headers: &HeaderMap,
        credential: Option<&Credential>,
    ) -> Result<Response, Error> {
        let mut stripped = false;
        for _ in 0..MAX_REDIRECTS {
            let target = HostIdentity::from_url(&url).ok_or_else(|| Error::Redirect {
                message: format!("redirect target '{}' has no usable host", url),
            })?;
            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if stripped || target != *self.scoper.origin() {
                // Leaving the original host: this hop and every later one
                // go out without injected headers, even back home.
                stripped = true;
                trace!(%url, "Hop outside the original host, sending bare request");
            } else {
                builder = self.scoper.decorate(builder, &target, credential);
            }

            let response = builder.send().await?;
            if !response.status().is_redirection() {
                return Ok(response);
            }
            let location = response
                .headers()
                .get(header::LOCATION)
                .ok_or_else(|| Error::Redirect {
                    message: format!("redirect from '{}' without a Location header", url),
                })?
                .to_str()
                .map_err(|_| Error::Redirect {
                    message: "Location header is not valid UTF-8".to_string(),
                })?
                .to_string();
            url = url.join(&location).map_err(|err| Error::Redirect {
                message: format!("unusable Location '{}': {}", location, err),
            })?;
            debug!(%url, "Following redirect");
        }
        Err(Error::Redirect {
            message: format!("stopped after {} redirects", MAX_REDIRECTS),
        })
    }

    fn from_origin(&self, response: &Response) -> bool {
        HostIdentity::from_url(response.url()).as_ref() == Some(self.scoper.origin())
    }
}
