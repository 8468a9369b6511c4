//! Exchanging static credentials for short-lived bearer tokens.
//!
//! Tokens live in memory for the lifetime of one repository handle and are
//! memoized per (realm, service, scope) so concurrent requests sharing a
//! handle trigger at most one exchange. Nothing is persisted and nothing is
//! shared between handles, so two pulls with different credentials can
//! never cross-contaminate.

use std::collections::HashMap;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::challenge::{BearerChallenge, Challenge};
use crate::errors::Error;
use crate::secrets::{Authenticable, RegistryAuth};

/// A token granted by a realm endpoint. Opaque to this client.
#[derive(Deserialize, Clone)]
#[serde(untagged)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RegistryToken {
    Token { token: String },
    AccessToken { access_token: String },
}

impl RegistryToken {
    pub(crate) fn token(&self) -> &str {
        match self {
            RegistryToken::Token { token } => token,
            RegistryToken::AccessToken { access_token } => access_token,
        }
    }
}

/// A credential ready to be attached to a request by the scoper.
#[derive(Clone)]
pub(crate) enum Credential {
    Bearer(String),
    Basic(String, String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(..)"),
            Credential::Basic(..) => f.write_str("Basic(..)"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct TokenKey {
    realm: String,
    service: String,
    scope: String,
}

/// Resolves a challenge plus the configured credentials into something
/// attachable, performing the realm round-trip for bearer challenges.
pub(crate) struct TokenExchanger {
    client: reqwest::Client,
    auth: RegistryAuth,
    tokens: Mutex<HashMap<TokenKey, RegistryToken>>,
}

impl TokenExchanger {
    pub(crate) fn new(client: reqwest::Client, auth: RegistryAuth) -> Self {
        TokenExchanger {
            client,
            auth,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a credential for the given challenge and action scope.
    ///
    /// `Ok(None)` means the configured credentials cannot answer this
    /// challenge (e.g. a Basic challenge with no username); the caller
    /// proceeds unauthenticated and lets the registry have the last word.
    /// With `refresh` set, any memoized token for the challenge is
    /// discarded first — used on the retry path when a previously issued
    /// token just bounced.
    pub(crate) async fn credential_for(
        &self,
        challenge: &Challenge,
        scope: &str,
        refresh: bool,
    ) -> Result<Option<Credential>, Error> {
        match challenge {
            Challenge::Basic(_) => match &self.auth {
                RegistryAuth::Basic(username, password) => Ok(Some(Credential::Basic(
                    username.clone(),
                    password.clone(),
                ))),
                _ => Ok(None),
            },
            Challenge::Bearer(bearer) => {
                // A pre-issued registry token is forwarded verbatim; the
                // realm is never contacted on its behalf.
                if let RegistryAuth::RegistryToken(token) = &self.auth {
                    return Ok(Some(Credential::Bearer(token.clone())));
                }
                let token = self.bearer_token(bearer, scope, refresh).await?;
                Ok(Some(Credential::Bearer(token.token().to_string())))
            }
        }
    }

    /// Fetch (or reuse) a token for a bearer challenge.
    ///
    /// The cache mutex is held across the exchange: the first caller
    /// performs it, concurrent callers wait and read the memoized result.
    async fn bearer_token(
        &self,
        bearer: &BearerChallenge,
        scope: &str,
        refresh: bool,
    ) -> Result<RegistryToken, Error> {
        let realm = bearer.realm.as_deref().ok_or(Error::ChallengeUnsupported)?;
        let realm_url = Url::parse(realm).map_err(|_| Error::TokenExchangeFailed {
            realm: realm.to_string(),
            reason: "realm is not an absolute URL".to_string(),
        })?;

        let key = TokenKey {
            realm: realm.to_string(),
            service: bearer.service.clone().unwrap_or_default(),
            scope: scope.to_string(),
        };
        let mut tokens = self.tokens.lock().await;
        if refresh {
            tokens.remove(&key);
        }
        if let Some(token) = tokens.get(&key) {
            debug!(%realm, scope, "Reusing memoized token");
            return Ok(token.clone());
        }

        debug!(%realm, service = ?bearer.service, scope, "Making authentication call");
        let token = self
            .exchange(&realm_url, bearer.service.as_deref(), scope)
            .await?;
        tokens.insert(key, token.clone());
        Ok(token)
    }

    async fn exchange(
        &self,
        realm: &Url,
        service: Option<&str>,
        scope: &str,
    ) -> Result<RegistryToken, Error> {
        let response = match &self.auth {
            // Identity tokens go through the OAuth refresh-token grant.
            RegistryAuth::Identity(identity_token) => {
                let mut form = vec![
                    ("grant_type", "refresh_token"),
                    ("refresh_token", identity_token.as_str()),
                    ("client_id", "registry-client"),
                    ("scope", scope),
                ];
                if let Some(service) = service {
                    form.push(("service", service));
                }
                self.client.post(realm.clone()).form(&form).send().await?
            }
            _ => {
                let mut query = vec![("scope", scope)];
                if let Some(service) = service {
                    query.push(("service", service));
                }
                self.client
                    .get(realm.clone())
                    .query(&query)
                    .apply_authentication(&self.auth)
                    .send()
                    .await?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(Error::TokenExchangeFailed {
                realm: realm.to_string(),
                reason: format!("status {}: {}", status, reason),
            });
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|_| Error::TokenExchangeFailed {
            realm: realm.to_string(),
            reason: "response body carries no token".to_string(),
        })
    }
}
