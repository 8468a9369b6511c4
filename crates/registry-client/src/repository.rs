//! Building authenticated repository handles.

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use sha2::Digest;
use tracing::debug;
use url::Url;

use crate::endpoint::Endpoint;
use crate::errors::{ApiErrors, Error};
use crate::reference::{self, RepositoryReference};
use crate::secrets::RegistryAuth;
use crate::transport::AuthenticatingTransport;

const MIME_TYPES_DISTRIBUTION_MANIFEST: &[&str] = &[
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.manifest.v1+json",
];

/// Content descriptor for a fetched manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// The manifest's media type as reported by the registry.
    pub media_type: String,
    /// Content digest: the `Docker-Content-Digest` header when the
    /// registry sends one, otherwise computed from the body.
    pub digest: String,
    /// Size of the manifest payload in bytes.
    pub size: u64,
}

/// An authenticated handle onto one repository at one endpoint.
///
/// Construction validates the repository name, binds an authenticating
/// transport to the endpoint's host, and probes `/v2/` so authentication
/// is established before the first manifest request. A handle carries the
/// credentials it was built with; pulls with different credentials build
/// their own handle.
pub struct Repository {
    name: String,
    base: Url,
    transport: AuthenticatingTransport,
}

impl Repository {
    /// Build a repository handle for `name` at `endpoint`.
    ///
    /// `meta_headers` are attached to requests to the endpoint's own host
    /// only. `actions` is the action scope tokens are requested for,
    /// e.g. `pull`.
    pub async fn new(
        endpoint: &Endpoint,
        name: &str,
        meta_headers: HeaderMap,
        auth: RegistryAuth,
        actions: &str,
    ) -> Result<Self, Error> {
        reference::validate_name(name)?;
        let client = endpoint.http_client()?;
        let action_scope = format!("repository:{}:{}", name, actions);
        let transport = AuthenticatingTransport::new(
            client,
            endpoint.host_identity().clone(),
            meta_headers,
            auth,
            action_scope,
        );
        let repository = Repository {
            name: name.to_string(),
            base: endpoint.url().clone(),
            transport,
        };
        repository.transport.probe(repository.url("/v2/")?).await?;
        Ok(repository)
    }

    /// The repository name this handle is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the manifest the reference resolves to, returning its
    /// descriptor and raw payload.
    pub async fn manifest(
        &self,
        reference: &RepositoryReference,
    ) -> Result<(Descriptor, Vec<u8>), Error> {
        let url = self.manifest_url(reference)?;
        debug!(%url, "Fetching manifest");

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            MIME_TYPES_DISTRIBUTION_MANIFEST
                .join(", ")
                .parse()
                .expect("static accept list"),
        );
        let response = self.transport.execute(Method::GET, url, headers).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }
        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(MIME_TYPES_DISTRIBUTION_MANIFEST[0])
            .to_string();
        let digest_header = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        let digest = match digest_header {
            Some(digest) => digest,
            // Some registries omit the header; hash the payload instead.
            None => {
                let hex = format!("sha256:{:x}", sha2::Sha256::digest(&body));
                debug!(%hex, "Computed digest of manifest payload");
                hex
            }
        };
        Ok((
            Descriptor {
                media_type,
                digest,
                size: body.len() as u64,
            },
            body,
        ))
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base.join(path).map_err(|err| Error::InvalidEndpoint {
            message: format!("cannot resolve '{}' against endpoint: {}", path, err),
        })
    }

    fn manifest_url(&self, reference: &RepositoryReference) -> Result<Url, Error> {
        self.url(&format!(
            "/v2/{}/manifests/{}",
            self.name,
            reference.manifest_reference()
        ))
    }
}

async fn api_error(status: StatusCode, response: Response) -> Error {
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrors>(&body) {
        Ok(envelope) if !envelope.errors.is_empty() => envelope.errors[0].to_string(),
        _ => body,
    };
    Error::Api {
        status: status.as_u16(),
        message,
    }
}
