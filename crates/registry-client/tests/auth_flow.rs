//! End-to-end authentication flows against mock registries.
//!
//! The servers here stand in for an untrusted registry: they decide per
//! path whether to challenge, and they record every request so the tests
//! can assert what the client actually sent — most importantly, what it
//! did *not* send to a host it was never configured to trust.

use registry_client::{
    Endpoint, Error, PullConfig, Puller, RegistryAuth, RepositoryReference,
};
use reqwest::header::HeaderMap;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET_TOKEN: &str = "mysecrettoken";
const MANIFEST_PATH: &str = "/v2/testremotename/manifests/tag_goes_here";
const MANIFEST_BODY: &str =
    r#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json"}"#;
const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
const BEARER_CHALLENGE: &str = r#"Bearer realm="foorealm""#;

fn endpoint_for(server: &MockServer) -> Endpoint {
    Endpoint::new(Url::parse(&server.uri()).expect("mock server uri")).expect("endpoint")
}

fn test_reference() -> RepositoryReference {
    "testremotename:tag_goes_here".parse().expect("reference")
}

fn registry_token_config() -> PullConfig {
    let mut meta_headers = HeaderMap::new();
    meta_headers.insert("x-meta-source", "engine".parse().expect("meta header"));
    PullConfig {
        meta_headers,
        auth: RegistryAuth::RegistryToken(SECRET_TOKEN.to_string()),
    }
}

fn manifest_response() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(MANIFEST_BODY.as_bytes().to_vec(), MANIFEST_MEDIA_TYPE)
}

fn challenge_response(challenge: &str) -> ResponseTemplate {
    ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge)
}

#[tokio::test]
async fn token_is_forwarded_to_the_challenging_host() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(challenge_response(BEARER_CHALLENGE))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(manifest_response())
        .mount(&registry)
        .await;

    let puller = Puller::new(&endpoint_for(&registry), &test_reference(), registry_token_config())
        .await
        .expect("puller");
    let (descriptor, body) = puller.pull().await.expect("pull succeeds");
    assert_eq!(body, MANIFEST_BODY.as_bytes());
    assert_eq!(descriptor.media_type, MANIFEST_MEDIA_TYPE);
    assert!(descriptor.digest.starts_with("sha256:"));

    let requests = registry.received_requests().await.expect("recorded requests");
    let manifest_request = requests
        .iter()
        .find(|request| request.url.path() == MANIFEST_PATH)
        .expect("manifest request reached the registry");
    let authorization = manifest_request
        .headers
        .get("authorization")
        .expect("authorization header on the manifest request")
        .to_str()
        .expect("header text");
    assert!(authorization.contains(SECRET_TOKEN));
    assert_eq!(
        manifest_request.headers.get("x-meta-source").expect("meta header"),
        "engine"
    );
}

#[tokio::test]
async fn redirect_to_a_different_host_never_carries_credentials() {
    // Stands in for a host the engine was never configured to trust. It
    // challenges everything, like a registry that wants credentials.
    let other = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(challenge_response(BEARER_CHALLENGE))
        .mount(&other)
        .await;

    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(challenge_response(BEARER_CHALLENGE))
        .with_priority(1)
        .mount(&registry)
        .await;
    let relocated = format!("{}{}", other.uri(), MANIFEST_PATH);
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", relocated.as_str()))
        .with_priority(10)
        .mount(&registry)
        .await;

    let puller = Puller::new(&endpoint_for(&registry), &test_reference(), registry_token_config())
        .await
        .expect("puller");
    let error = puller.pull().await.expect_err("pull must fail");
    assert!(matches!(error.source, Error::AuthenticationRejected));

    let reached = other.received_requests().await.expect("recorded requests");
    assert!(!reached.is_empty(), "redirect target was never reached");
    for request in &reached {
        assert!(
            request.headers.get("authorization").is_none(),
            "Authorization header leaked to another host"
        );
        assert!(
            request.headers.get("x-meta-source").is_none(),
            "meta headers leaked to another host"
        );
        for value in request.headers.values() {
            assert!(
                !value
                    .as_bytes()
                    .windows(SECRET_TOKEN.len())
                    .any(|window| window == SECRET_TOKEN.as_bytes()),
                "secret token leaked to another host"
            );
        }
    }
}

#[tokio::test]
async fn exactly_one_retry_follows_a_challenge() {
    // A server that answers 401 to absolutely everything must produce a
    // failed pull, not a loop.
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(challenge_response(BEARER_CHALLENGE))
        .mount(&registry)
        .await;

    let puller = Puller::new(&endpoint_for(&registry), &test_reference(), registry_token_config())
        .await
        .expect("the probe treats a challenge as discovery, not failure");
    let error = puller.pull().await.expect_err("pull must fail");
    assert!(matches!(error.source, Error::AuthenticationRejected));
    assert!(error.source.is_authentication());

    let requests = registry.received_requests().await.expect("recorded requests");
    let probes = requests.iter().filter(|r| r.url.path() == "/v2/").count();
    let manifests = requests
        .iter()
        .filter(|r| r.url.path() == MANIFEST_PATH)
        .count();
    assert_eq!(probes, 1);
    assert_eq!(manifests, 2, "one initial request and exactly one retry");
}

#[tokio::test]
async fn bearer_exchange_hits_the_realm_once_per_handle() {
    let token_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("service", "registry.example"))
        .and(query_param("scope", "repository:testremotename:pull"))
        .and(header(
            "authorization",
            format!("Basic {}", base64::encode("user:secret")).as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"token": "short-lived-token", "expires_in": 300}),
        ))
        .expect(1)
        .mount(&token_server)
        .await;

    let registry = MockServer::start().await;
    let challenge = format!(
        r#"Bearer realm="{}/token",service="registry.example""#,
        token_server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(challenge_response(&challenge))
        .with_priority(1)
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .and(header("authorization", "Bearer short-lived-token"))
        .respond_with(manifest_response())
        .with_priority(1)
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .respond_with(challenge_response(&challenge))
        .with_priority(10)
        .mount(&registry)
        .await;

    let config = PullConfig {
        meta_headers: HeaderMap::new(),
        auth: RegistryAuth::Basic("user".to_string(), "secret".to_string()),
    };
    let puller = Puller::new(&endpoint_for(&registry), &test_reference(), config)
        .await
        .expect("puller");
    // Concurrent requests on one handle: the first caller performs the
    // exchange, the second waits and reuses it.
    let (first, second) = tokio::join!(puller.pull(), puller.pull());
    first.expect("first pull");
    second.expect("second pull reuses the memoized token");

    token_server.verify().await;
}

#[tokio::test]
async fn basic_challenge_uses_basic_credentials() {
    let registry = MockServer::start().await;
    let expected = format!("Basic {}", base64::encode("user:secret"));
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(challenge_response(r#"Basic realm="registry""#))
        .with_priority(1)
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .and(header("authorization", expected.as_str()))
        .respond_with(
            manifest_response().insert_header("Docker-Content-Digest", "sha256:deadbeef"),
        )
        .with_priority(1)
        .mount(&registry)
        .await;

    let config = PullConfig {
        meta_headers: HeaderMap::new(),
        auth: RegistryAuth::Basic("user".to_string(), "secret".to_string()),
    };
    let puller = Puller::new(&endpoint_for(&registry), &test_reference(), config)
        .await
        .expect("puller");
    let (descriptor, _) = puller.pull().await.expect("pull succeeds");
    assert_eq!(descriptor.digest, "sha256:deadbeef");
}

#[tokio::test]
async fn same_host_redirect_reattaches_credentials() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(challenge_response(BEARER_CHALLENGE))
        .with_priority(1)
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("Location", "/v2/testremotename/manifests/relocated"),
        )
        .with_priority(1)
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/testremotename/manifests/relocated"))
        .and(header(
            "authorization",
            format!("Bearer {}", SECRET_TOKEN).as_str(),
        ))
        .respond_with(manifest_response())
        .with_priority(1)
        .mount(&registry)
        .await;

    let puller = Puller::new(&endpoint_for(&registry), &test_reference(), registry_token_config())
        .await
        .expect("puller");
    // A path-only redirect stays on the original host, so the relocated
    // request must carry credentials again.
    puller.pull().await.expect("pull succeeds through the redirect");
}

#[tokio::test]
async fn failed_token_exchange_is_an_authentication_error() {
    let token_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&token_server)
        .await;

    let registry = MockServer::start().await;
    let challenge = format!(r#"Bearer realm="{}/token""#, token_server.uri());
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(challenge_response(&challenge))
        .mount(&registry)
        .await;

    let config = PullConfig {
        meta_headers: HeaderMap::new(),
        auth: RegistryAuth::Basic("user".to_string(), "secret".to_string()),
    };
    let puller = Puller::new(&endpoint_for(&registry), &test_reference(), config)
        .await
        .expect("puller");
    let error = puller.pull().await.expect_err("pull must fail");
    assert!(matches!(error.source, Error::TokenExchangeFailed { .. }));
    assert!(error.source.is_authentication());
    assert!(!error.source.is_network());
}

#[tokio::test]
async fn token_body_without_a_token_fails_the_exchange() {
    let token_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&token_server)
        .await;

    let registry = MockServer::start().await;
    let challenge = format!(r#"Bearer realm="{}/token""#, token_server.uri());
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(challenge_response(&challenge))
        .mount(&registry)
        .await;

    let puller = Puller::new(
        &endpoint_for(&registry),
        &test_reference(),
        PullConfig::default(),
    )
    .await
    .expect("puller");
    let error = puller.pull().await.expect_err("pull must fail");
    assert!(matches!(error.source, Error::TokenExchangeFailed { .. }));
}

#[tokio::test]
async fn unsupported_challenge_fails_the_pull_immediately() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(challenge_response(r#"Negotiate"#))
        .mount(&registry)
        .await;

    let error = Puller::new(
        &endpoint_for(&registry),
        &test_reference(),
        registry_token_config(),
    )
    .await
    .expect_err("an unanswerable challenge is a hard failure");
    assert!(matches!(error.source, Error::ChallengeUnsupported));

    // Same for a 401 that carries no challenge header at all.
    let silent = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&silent)
        .await;
    let error = Puller::new(
        &endpoint_for(&silent),
        &test_reference(),
        registry_token_config(),
    )
    .await
    .expect_err("a bare 401 is a hard failure");
    assert!(matches!(error.source, Error::ChallengeUnsupported));
}

#[tokio::test]
async fn open_registry_needs_no_credentials() {
    let registry = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(manifest_response())
        .mount(&registry)
        .await;

    let puller = Puller::new(
        &endpoint_for(&registry),
        &test_reference(),
        PullConfig::default(),
    )
    .await
    .expect("puller");
    puller.pull().await.expect("anonymous pull succeeds");

    let requests = registry.received_requests().await.expect("recorded requests");
    for request in &requests {
        assert!(request.headers.get("authorization").is_none());
    }
}
