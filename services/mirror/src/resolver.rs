//! Deciding whether a digest belongs to the upstream image

use http::uri::InvalidUri;
use http::{Method, StatusCode, header};
use registry_client::HttpResponseError;

use crate::digest::{Digest, DigestError};
use crate::manifest::{self, Descriptor, IndexManifest};
use crate::reference::Identifier;
use crate::upstream::{Upstream, UpstreamError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How a queried digest relates to the upstream image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    /// The upstream's own top-level manifest
    Direct,
    /// One of the manifests listed by the upstream's index
    Child(Descriptor),
    /// Not part of the upstream image
    Absent,
}

impl Membership {
    /// `Direct` or `Child`
    pub fn is_member(&self) -> bool {
        !matches!(self, Membership::Absent)
    }
}

/// The upstream manifest needed to decide membership could not be fetched or read.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No client for the upstream
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The manifest URL could not be built
    #[error("building manifest URL: {0}")]
    Url(#[from] InvalidUri),

    /// The request did not complete
    #[error("fetching upstream manifest: {0}")]
    Fetch(#[from] registry_client::Error),

    /// The upstream answered with something other than 200
    #[error("fetching upstream manifest: {0}")]
    Status(HttpResponseError),

    /// `Docker-Content-Digest` was missing or malformed
    #[error("upstream manifest digest: {0}")]
    Digest(#[from] DigestError),

    /// The index body could not be read
    #[error("reading upstream index: {0}")]
    Body(#[source] BoxError),

    /// The index body is not a valid index
    #[error("parsing upstream index: {0}")]
    Index(#[from] serde_json::Error),
}

/// Decide whether `digest` is the upstream's manifest or one of its index children.
///
/// Costs no round trip when the upstream is pinned to `digest` already; otherwise one
/// manifest fetch. Only one level of index is inspected.
pub async fn resolve(upstream: &Upstream, digest: &Digest) -> Result<Membership, ResolveError> {
    let reference = upstream.reference();
    if let Identifier::Digest(pinned) = reference.identifier() {
        if pinned == digest {
            tracing::debug!(%digest, "digest matches pinned upstream");
            return Ok(Membership::Direct);
        }
    }

    let client = upstream.client().await?;
    let url = reference.manifest_url(reference.identifier())?;

    let response = client
        .request(Method::GET, url)
        .header(header::ACCEPT, manifest::accept_header())
        .send()
        .await?
        .expect_status(StatusCode::OK)
        .await
        .map_err(ResolveError::Status)?;

    let upstream_digest = Digest::parse(response.content_digest().unwrap_or_default())?;
    if &upstream_digest == digest {
        tracing::debug!(%digest, "digest is the upstream manifest");
        return Ok(Membership::Direct);
    }

    if !response.content_type().is_some_and(manifest::is_index) {
        tracing::debug!(%digest, %upstream_digest, "upstream is a single manifest");
        return Ok(Membership::Absent);
    }

    let body = response.bytes().await.map_err(ResolveError::Body)?;
    let index = IndexManifest::from_slice(&body)?;
    match index.find(digest) {
        Some(child) => {
            tracing::debug!(%digest, media_type = %child.media_type, "digest is an upstream index child");
            Ok(Membership::Child(child.clone()))
        }
        None => {
            tracing::debug!(%digest, %upstream_digest, "digest is not part of upstream");
            Ok(Membership::Absent)
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, HeaderValue};
    use registry_client::mock::MockService;
    use registry_client::response::DOCKER_CONTENT_DIGEST;

    use super::*;
    use crate::keychain::Keychain;
    use crate::manifest::{OCI_INDEX, OCI_MANIFEST};
    use crate::reference::Reference;

    const MANIFEST_PATH: &str = "/v2/base/image/manifests/v2";

    fn digest(fill: char) -> Digest {
        format!("sha256:{}", fill.to_string().repeat(64))
            .parse()
            .unwrap()
    }

    fn manifest_headers(content_type: &str, digest: &Digest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).unwrap(),
        );
        headers.insert(
            DOCKER_CONTENT_DIGEST,
            HeaderValue::from_str(&digest.to_string()).unwrap(),
        );
        headers
    }

    fn index_body(children: &[Digest]) -> Vec<u8> {
        let manifests = children
            .iter()
            .map(|child| {
                format!(r#"{{"mediaType":"{OCI_MANIFEST}","digest":"{child}","size":512}}"#)
            })
            .collect::<Vec<_>>()
            .join(",");
        format!(r#"{{"schemaVersion":2,"mediaType":"{OCI_INDEX}","manifests":[{manifests}]}}"#)
            .into_bytes()
    }

    fn registry() -> MockService {
        let mut mock = MockService::new();
        mock.add("/v2/", StatusCode::OK, HeaderMap::new(), Vec::new());
        mock
    }

    fn upstream(reference: &str, mock: &MockService) -> Upstream {
        Upstream::with_transport(
            reference.parse::<Reference>().unwrap(),
            Keychain::anonymous(),
            registry_client::shared(mock.clone()),
        )
    }

    fn index_registry() -> MockService {
        let mut mock = registry();
        mock.add(
            MANIFEST_PATH,
            StatusCode::OK,
            manifest_headers(OCI_INDEX, &digest('1')),
            index_body(&[digest('a'), digest('c')]),
        );
        mock
    }

    #[tokio::test]
    async fn pinned_digest_needs_no_round_trip() {
        let mock = MockService::new();
        let upstream = upstream(
            &format!("registry.example.com/base/image@{}", digest('1')),
            &mock,
        );

        let membership = resolve(&upstream, &digest('1')).await.unwrap();
        assert_eq!(membership, Membership::Direct);
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn top_level_digest_is_direct() {
        let mock = index_registry();
        let upstream = upstream("registry.example.com/base/image:v2", &mock);

        let membership = resolve(&upstream, &digest('1')).await.unwrap();
        assert_eq!(membership, Membership::Direct);

        let requests = mock.requests();
        let manifest_request = &requests[1];
        assert_eq!(
            manifest_request.uri,
            "https://registry.example.com/v2/base/image/manifests/v2"
        );
        assert!(
            manifest_request.headers[header::ACCEPT]
                .to_str()
                .unwrap()
                .contains(OCI_INDEX)
        );
    }

    #[tokio::test]
    async fn index_child_is_member() {
        let mock = index_registry();
        let upstream = upstream("registry.example.com/base/image:v2", &mock);

        let membership = resolve(&upstream, &digest('c')).await.unwrap();
        assert!(membership.is_member());
        let Membership::Child(child) = membership else {
            panic!("expected child, got {membership:?}");
        };
        assert_eq!(child.digest, digest('c'));
    }

    #[tokio::test]
    async fn unknown_digest_is_absent() {
        let mock = index_registry();
        let upstream = upstream("registry.example.com/base/image:v2", &mock);

        let membership = resolve(&upstream, &digest('0')).await.unwrap();
        assert_eq!(membership, Membership::Absent);
        assert!(!membership.is_member());
    }

    #[tokio::test]
    async fn single_manifest_body_is_not_searched() {
        let mut mock = registry();
        // An index body behind a non-index content type is ignored.
        mock.add(
            MANIFEST_PATH,
            StatusCode::OK,
            manifest_headers(OCI_MANIFEST, &digest('1')),
            index_body(&[digest('a')]),
        );
        let upstream = upstream("registry.example.com/base/image:v2", &mock);

        let membership = resolve(&upstream, &digest('a')).await.unwrap();
        assert_eq!(membership, Membership::Absent);
    }

    #[tokio::test]
    async fn nested_indexes_are_not_expanded() {
        let mut mock = index_registry();
        mock.add(
            &format!("/v2/base/image/manifests/{}", digest('a')),
            StatusCode::OK,
            manifest_headers(OCI_INDEX, &digest('a')),
            index_body(&[digest('e')]),
        );
        let upstream = upstream("registry.example.com/base/image:v2", &mock);

        let membership = resolve(&upstream, &digest('e')).await.unwrap();
        assert_eq!(membership, Membership::Absent);
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn missing_digest_header_is_an_error() {
        let mut mock = registry();
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OCI_INDEX));
        mock.add(MANIFEST_PATH, StatusCode::OK, headers, index_body(&[]));
        let upstream = upstream("registry.example.com/base/image:v2", &mock);

        let error = resolve(&upstream, &digest('a')).await.unwrap_err();
        assert!(matches!(error, ResolveError::Digest(_)), "{error:?}");
    }

    #[tokio::test]
    async fn upstream_errors_are_reported() {
        let mock = registry();
        let upstream = upstream("registry.example.com/base/image:v2", &mock);

        let error = resolve(&upstream, &digest('a')).await.unwrap_err();
        let ResolveError::Status(status) = &error else {
            panic!("expected status error, got {error:?}");
        };
        assert_eq!(status.status, StatusCode::NOT_FOUND);
        assert!(error.to_string().contains("NAME_UNKNOWN"));
    }

    #[tokio::test]
    async fn handshake_failure_is_reported() {
        let mut mock = MockService::new();
        mock.add(
            "/v2/",
            StatusCode::SERVICE_UNAVAILABLE,
            HeaderMap::new(),
            b"down for maintenance".to_vec(),
        );
        let upstream = upstream("registry.example.com/base/image:v2", &mock);

        let error = resolve(&upstream, &digest('a')).await.unwrap_err();
        assert!(matches!(error, ResolveError::Upstream(_)), "{error:?}");
        assert!(error.to_string().contains("down for maintenance"));
    }
}
