//! Manifest media types and the index documents the mirror looks inside

use serde::Deserialize;

use crate::digest::Digest;

/// Docker schema 2 image manifest
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker schema 2 manifest list
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// OCI image manifest
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Every manifest type the mirror asks the upstream for.
pub const ACCEPTED_MEDIA_TYPES: [&str; 4] =
    [OCI_INDEX, DOCKER_MANIFEST_LIST, OCI_MANIFEST, DOCKER_MANIFEST];

/// The `Accept` header value for manifest requests.
pub fn accept_header() -> String {
    ACCEPTED_MEDIA_TYPES.join(", ")
}

/// Whether a `Content-Type` names a multi-platform index.
///
/// Parameters such as `charset` are ignored. Unparseable values are never an index.
pub fn is_index(content_type: &str) -> bool {
    let Ok(mime) = content_type.parse::<mime::Mime>() else {
        return false;
    };

    matches!(mime.essence_str(), DOCKER_MANIFEST_LIST | OCI_INDEX)
}

/// An OCI image index or Docker manifest list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    /// Always 2 in practice
    #[serde(default)]
    pub schema_version: u32,

    /// Optional in OCI indexes, required in Docker lists
    #[serde(default)]
    pub media_type: Option<String>,

    /// The child manifests
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

impl IndexManifest {
    /// Parse an index from its JSON body.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// The child whose digest matches exactly.
    ///
    /// Children that are themselves indexes are not searched.
    pub fn find(&self, digest: &Digest) -> Option<&Descriptor> {
        self.manifests
            .iter()
            .find(|descriptor| &descriptor.digest == digest)
    }
}

/// A reference to a child manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the child
    #[serde(default)]
    pub media_type: String,

    /// Content address of the child
    pub digest: Digest,

    /// Size of the child in bytes
    #[serde(default)]
    pub size: i64,

    /// Platform the child was built for, if any
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// A child manifest's target platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Platform {
    /// CPU architecture, e.g. `amd64`
    pub architecture: String,

    /// Operating system, e.g. `linux`
    pub os: String,

    /// CPU variant, e.g. `v8`
    #[serde(default)]
    pub variant: Option<String>,
}
