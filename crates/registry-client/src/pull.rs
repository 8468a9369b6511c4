//! The pull trigger: establish authentication, then resolve a reference.

use reqwest::header::HeaderMap;
use tracing::{debug, instrument};

use crate::endpoint::Endpoint;
use crate::errors::PullError;
use crate::reference::RepositoryReference;
use crate::repository::{Descriptor, Repository};
use crate::secrets::RegistryAuth;

const PULL_ACTIONS: &str = "pull";

/// Caller-supplied configuration for one pull attempt.
#[derive(Debug, Default)]
pub struct PullConfig {
    /// Extra headers forwarded to the originally targeted host only.
    pub meta_headers: HeaderMap,
    /// Credentials for the endpoint.
    pub auth: RegistryAuth,
}

/// Drives a pull of one reference from one endpoint.
///
/// Construction is where authentication state is established: the
/// repository handle it builds probes the registry and is ready to answer
/// challenges before the first manifest request goes out. The surrounding
/// engine invokes one puller per candidate endpoint; mirror ordering and
/// cross-endpoint retry live there, not here.
pub struct Puller {
    reference: RepositoryReference,
    repository: Repository,
}

impl std::fmt::Debug for Puller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Puller").finish_non_exhaustive()
    }
}

impl Puller {
    /// Build an authenticated puller for `reference` at `endpoint`.
    pub async fn new(
        endpoint: &Endpoint,
        reference: &RepositoryReference,
        config: PullConfig,
    ) -> Result<Self, PullError> {
        let repository = Repository::new(
            endpoint,
            reference.repository(),
            config.meta_headers,
            config.auth,
            PULL_ACTIONS,
        )
        .await
        .map_err(|source| PullError {
            reference: reference.whole(),
            source,
        })?;
        Ok(Puller {
            reference: reference.clone(),
            repository,
        })
    }

    /// Resolve the bound reference to its manifest.
    ///
    /// Any mid-pull 401 re-enters the challenge cycle through the
    /// repository's transport; failures come back wrapped with the
    /// reference they happened for.
    #[instrument(level = "info", skip(self), fields(reference = %self.reference))]
    pub async fn pull(&self) -> Result<(Descriptor, Vec<u8>), PullError> {
        debug!("Resolving manifest");
        self.repository
            .manifest(&self.reference)
            .await
            .map_err(|source| PullError {
                reference: self.reference.whole(),
                source,
            })
    }

    /// The repository handle, for the blob operations that follow a
    /// successful manifest resolution.
    pub fn repository(&self) -> &Repository {
        &self.repository
    }
}
