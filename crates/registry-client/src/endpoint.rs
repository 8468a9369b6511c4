//! Registry endpoints and the host identity used for credential scoping.

use reqwest::redirect;
use url::Url;

use crate::errors::Error;

/// The identity of the host a request is sent to.
///
/// Credential attachment is decided by comparing two of these: the identity
/// the client was constructed for and the identity of the request (or
/// redirect hop) about to go out. Ports are normalized to the scheme default
/// so `https://registry.example.com` and `https://registry.example.com:443`
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    scheme: String,
    host: String,
    port: u16,
}

impl HostIdentity {
    /// Extract the host identity from a URL.
    ///
    /// Returns `None` when the URL has no host or the scheme has no known
    /// default port to normalize against.
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_ascii_lowercase();
        let port = url.port_or_known_default()?;
        Some(HostIdentity {
            scheme: url.scheme().to_string(),
            host,
            port,
        })
    }
}

impl std::fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// The encoding of an extra root certificate.
#[derive(Debug, Clone)]
pub enum CertificateEncoding {
    #[allow(missing_docs)]
    Der,
    #[allow(missing_docs)]
    Pem,
}

/// An x509 certificate trusted for this endpoint only.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// Which encoding is used by the certificate
    pub encoding: CertificateEncoding,

    /// Actual certificate
    pub data: Vec<u8>,
}

impl Certificate {
    fn to_reqwest(&self) -> Result<reqwest::Certificate, reqwest::Error> {
        match self.encoding {
            CertificateEncoding::Der => reqwest::Certificate::from_der(self.data.as_slice()),
            CertificateEncoding::Pem => reqwest::Certificate::from_pem(self.data.as_slice()),
        }
    }
}

/// A resolved registry endpoint.
///
/// Produced by endpoint resolution (mirror ordering, `/etc/docker`-style
/// configuration) which is outside this crate; immutable afterwards.
#[derive(Debug, Clone)]
pub struct Endpoint {
    url: Url,
    host: HostIdentity,

    /// Whether this endpoint is a mirror rather than the official registry.
    pub mirror: bool,

    /// Skip TLS verification for this endpoint. Defaults to false.
    pub allow_insecure: bool,

    /// Extra root certificates to trust, e.g. for registries using
    /// self-signed certificates.
    pub extra_root_certificates: Vec<Certificate>,
}

impl Endpoint {
    /// Create an endpoint from a base URL.
    ///
    /// Fails fast when the URL carries no usable host, since every
    /// credential-scoping decision needs the endpoint's host identity.
    pub fn new(url: Url) -> Result<Self, Error> {
        let host = HostIdentity::from_url(&url).ok_or_else(|| Error::InvalidEndpoint {
            message: format!("endpoint URL '{}' has no host", url),
        })?;
        Ok(Endpoint {
            url,
            host,
            mirror: false,
            allow_insecure: false,
            extra_root_certificates: Vec::new(),
        })
    }

    /// The endpoint's base URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The host identity credentials are scoped to.
    pub fn host_identity(&self) -> &HostIdentity {
        &self.host
    }

    /// Build the HTTP client used for this endpoint.
    ///
    /// Redirects are not followed by the client itself; the authenticating
    /// transport follows them so the credential gate is re-evaluated on
    /// every hop.
    pub(crate) fn http_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(self.allow_insecure);

        builder = match () {
            #[cfg(feature = "native-tls")]
            () => builder.danger_accept_invalid_hostnames(self.allow_insecure),
            #[cfg(not(feature = "native-tls"))]
            () => {
                if self.allow_insecure {
                    tracing::warn!(
                        "Cannot relax hostname verification: missing 'native-tls' feature"
                    );
                }
                builder
            }
        };

        for certificate in &self.extra_root_certificates {
            let certificate = certificate.to_reqwest().map_err(|err| Error::InvalidEndpoint {
                message: format!("invalid extra root certificate: {}", err),
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        builder.build().map_err(|err| Error::InvalidEndpoint {
            message: format!("failed to construct HTTP client: {}", err),
        })
    }
}

impl std::str::FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|err| Error::InvalidEndpoint {
            message: format!("cannot parse endpoint URL '{}': {}", s, err),
        })?;
        Endpoint::new(url)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn identity(url: &str) -> HostIdentity {
        HostIdentity::from_url(&Url::parse(url).expect("test url")).expect("host identity")
    }

    #[test]
    fn default_ports_are_normalized() {
        assert_eq!(identity("https://registry.example.com"), identity("https://registry.example.com:443"));
        assert_eq!(identity("http://registry.example.com"), identity("http://registry.example.com:80"));
    }

    #[test]
    fn hosts_are_compared_case_insensitively() {
        assert_eq!(identity("https://Registry.Example.COM"), identity("https://registry.example.com"));
    }

    #[test]
    fn different_port_scheme_or_host_is_a_different_identity() {
        assert_ne!(identity("https://registry.example.com"), identity("https://registry.example.com:5000"));
        assert_ne!(identity("https://registry.example.com"), identity("http://registry.example.com"));
        assert_ne!(identity("https://a.example.com"), identity("https://b.example.com"));
    }

    #[test]
    fn endpoint_requires_a_host() {
        let url = Url::parse("unix:/var/run/docker.sock").expect("test url");
        assert!(Endpoint::new(url).is_err());
    }

    #[test]
    fn unparseable_endpoints_fail_fast() {
        assert!("not a url".parse::<Endpoint>().is_err());
        assert!("https://registry.example.com".parse::<Endpoint>().is_ok());
    }
}
