//! Request classification and upstream URL rewriting

use http::{HeaderName, Method, Uri};

use crate::digest::Digest;
use crate::error::{MirrorResult, RouteError};
use crate::resolver;
use crate::upstream::Upstream;

/// Header every registry API response carries.
pub const API_VERSION_HEADER: HeaderName =
    HeaderName::from_static("docker-distribution-api-version");

/// The only API version the mirror speaks.
pub const API_VERSION: &str = "registry/2.0";

/// The kind segment of a `/v2/<name>/<kind>/<identifier>` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// `manifests`
    Manifests,
    /// `blobs`
    Blobs,
    /// Anything else, passed through verbatim
    Other(String),
}

impl ResourceKind {
    fn from_segment(segment: &str) -> Self {
        match segment {
            "manifests" => ResourceKind::Manifests,
            "blobs" => ResourceKind::Blobs,
            other => ResourceKind::Other(other.to_owned()),
        }
    }

    /// The path segment.
    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Manifests => "manifests",
            ResourceKind::Blobs => "blobs",
            ResourceKind::Other(kind) => kind,
        }
    }
}

/// A client request path split into repository, kind and identifier.
///
/// The last two segments are always kind and identifier, even for short paths:
/// `/v2/x` has kind `v2` and identifier `x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    /// The repository the client asked for; ignored when rewriting
    pub repository: String,
    /// Second to last segment
    pub kind: ResourceKind,
    /// Last segment
    pub identifier: String,
}

impl RequestPath {
    /// Split a decoded request path.
    pub fn parse(path: &str) -> Self {
        let mut segments = path.rsplitn(3, '/');
        let identifier = segments.next().unwrap_or_default();
        let kind = segments.next().unwrap_or_default();
        let rest = segments.next().unwrap_or_default();

        let repository = rest
            .strip_prefix("/v2/")
            .or_else(|| rest.strip_prefix("/v2"))
            .unwrap_or(rest);

        RequestPath {
            repository: repository.to_owned(),
            kind: ResourceKind::from_segment(kind),
            identifier: identifier.to_owned(),
        }
    }
}

/// What to do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/v2` or `/v2/`: answer locally
    VersionCheck,
    /// Outside `/v2/`: answer 200 with nothing
    Unmatched,
    /// Forward to `url`
    Proxy {
        /// The parsed client path
        path: RequestPath,
        /// The rewritten upstream URL
        url: Uri,
    },
}

/// Decide how to answer `method path`.
///
/// Manifest requests by digest cost an upstream round trip to check membership.
/// Everything else is decided locally.
pub async fn route(upstream: &Upstream, method: &Method, path: &str) -> MirrorResult<Route> {
    if *method != Method::GET && *method != Method::HEAD {
        return Err(crate::MirrorError::read_only());
    }

    if path == "/v2" || path == "/v2/" {
        return Ok(Route::VersionCheck);
    }

    if !path.starts_with("/v2/") {
        return Ok(Route::Unmatched);
    }

    let path = RequestPath::parse(path);
    let url = upstream_url(upstream, &path).await?;
    Ok(Route::Proxy { path, url })
}

async fn upstream_url(upstream: &Upstream, path: &RequestPath) -> Result<Uri, RouteError> {
    let reference = upstream.reference();

    match &path.kind {
        ResourceKind::Manifests if Digest::has_prefix(&path.identifier) => {
            let digest = Digest::parse(&path.identifier)?;
            let membership = resolver::resolve(upstream, &digest).await?;
            tracing::debug!(%digest, ?membership, "resolved manifest digest");

            if membership.is_member() {
                Ok(reference.manifest_url(&path.identifier)?)
            } else {
                Ok(reference.manifest_url(reference.identifier())?)
            }
        }
        ResourceKind::Manifests => Ok(reference.manifest_url(reference.identifier())?),
        kind => Ok(reference.url(kind.as_str(), &path.identifier)?),
    }
}
