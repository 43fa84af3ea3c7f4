//! Upstream image references.
//!
//! Accepts the same shorthand as the Docker CLI:
//! - `alpine` is `index.docker.io/library/alpine:latest`
//! - `org/app:v1` is `index.docker.io/org/app:v1`
//! - `ghcr.io/org/app@sha256:...` is pinned to a digest
//! - `localhost:5000/app` is served over plain HTTP

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use http::Uri;
use http::uri::InvalidUri;

use crate::digest::{Digest, DigestError};

/// Canonical Docker Hub registry host.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Hosts that all mean Docker Hub.
pub(crate) const DOCKER_HUB_ALIASES: [&str; 3] =
    ["docker.io", "index.docker.io", "registry-1.docker.io"];

const DEFAULT_TAG: &str = "latest";
const OFFICIAL_REPO_PREFIX: &str = "library";
const MAX_REPOSITORY_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

/// Errors from parsing an image reference
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    /// Nothing to parse
    #[error("empty image reference")]
    Empty,

    /// The `@digest` part did not parse
    #[error("invalid digest in reference: {0}")]
    Digest(#[from] DigestError),

    /// The registry host contains characters no host can
    #[error("invalid registry {0:?}")]
    Registry(String),

    /// The repository path is not lowercase `a/b-c/d_e` form
    #[error("invalid repository {0:?}")]
    Repository(String),

    /// The tag is too long or contains invalid characters
    #[error("invalid tag {0:?}")]
    Tag(String),
}

/// Tag or digest an image is addressed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// A mutable tag such as `latest`
    Tag(String),
    /// An immutable content address
    Digest(Digest),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Tag(tag) => f.write_str(tag),
            Identifier::Digest(digest) => digest.fmt(f),
        }
    }
}

/// A parsed, validated image reference. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    registry: String,
    repository: String,
    identifier: Identifier,
}

impl Reference {
    /// Parse `[registry/]repository[:tag][@digest]`.
    ///
    /// When both a tag and a digest are given, the digest wins.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name, digest) = match input.split_once('@') {
            Some((name, digest)) => (name, Some(Digest::parse(digest)?)),
            None => (input, None),
        };

        // A tag colon is one that comes after the last path separator.
        let (name, tag) = match name.rfind(':') {
            Some(idx) if !name[idx..].contains('/') => (&name[..idx], Some(&name[idx + 1..])),
            _ => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if is_registry(first) => (normalize_registry(first), rest),
            _ => (DEFAULT_REGISTRY, name),
        };

        if !valid_registry(registry) {
            return Err(ReferenceError::Registry(registry.to_owned()));
        }
        if !valid_repository(repository) {
            return Err(ReferenceError::Repository(repository.to_owned()));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("{OFFICIAL_REPO_PREFIX}/{repository}")
        } else {
            repository.to_owned()
        };

        let identifier = match (digest, tag) {
            (Some(digest), _) => Identifier::Digest(digest),
            (None, Some(tag)) if valid_tag(tag) => Identifier::Tag(tag.to_owned()),
            (None, Some(tag)) => return Err(ReferenceError::Tag(tag.to_owned())),
            (None, None) => Identifier::Tag(DEFAULT_TAG.to_owned()),
        };

        Ok(Reference {
            registry: registry.to_owned(),
            repository,
            identifier,
        })
    }

    /// Registry host, with port if one was given.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The pinned tag or digest.
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// `http` for loopback and private-network registries, `https` for everything else.
    pub fn scheme(&self) -> &'static str {
        let registry = self.registry.as_str();
        if registry.starts_with("localhost:") || registry.contains("::1") {
            return "http";
        }

        let host = registry.split_once(':').map_or(registry, |(host, _)| host);
        match host.parse::<Ipv4Addr>() {
            Ok(ip) if ip.is_loopback() || ip.is_private() => "http",
            _ => "https",
        }
    }

    /// The registry's API root, `<scheme>://<registry>/v2/`.
    pub fn api_base(&self) -> Result<Uri, InvalidUri> {
        format!("{}://{}/v2/", self.scheme(), self.registry).parse()
    }

    /// `<scheme>://<registry>/v2/<repository>/<kind>/<identifier>`
    pub fn url(&self, kind: &str, identifier: impl fmt::Display) -> Result<Uri, InvalidUri> {
        format!(
            "{}://{}/v2/{}/{}/{}",
            self.scheme(),
            self.registry,
            self.repository,
            kind,
            identifier
        )
        .parse()
    }

    /// URL of the manifest at `identifier` in this repository.
    pub fn manifest_url(&self, identifier: impl fmt::Display) -> Result<Uri, InvalidUri> {
        self.url("manifests", identifier)
    }

    /// The token scope that grants pulls from this repository.
    pub fn scope(&self) -> String {
        format!("repository:{}:pull", self.repository)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        match &self.identifier {
            Identifier::Tag(tag) => write!(f, ":{tag}"),
            Identifier::Digest(digest) => write!(f, "@{digest}"),
        }
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::parse(s)
    }
}

/// Map Docker Hub's aliases onto [`DEFAULT_REGISTRY`].
pub(crate) fn normalize_registry(host: &str) -> &str {
    if DOCKER_HUB_ALIASES.contains(&host) {
        DEFAULT_REGISTRY
    } else {
        host
    }
}

fn is_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn valid_registry(registry: &str) -> bool {
    !registry.is_empty()
        && registry
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b':' | b'[' | b']'))
}

fn valid_repository(repository: &str) -> bool {
    !repository.is_empty()
        && repository.len() <= MAX_REPOSITORY_LEN
        && repository.split('/').all(valid_path_component)
}

fn is_lower_alnum(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

/// `[a-z0-9]+` runs joined by `.`, `_`, `__` or any number of `-`.
fn valid_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) if is_lower_alnum(first) && is_lower_alnum(last) => {}
        _ => return false,
    }

    let mut idx = 0;
    while idx < bytes.len() {
        if is_lower_alnum(bytes[idx]) {
            idx += 1;
            continue;
        }

        let start = idx;
        while idx < bytes.len() && !is_lower_alnum(bytes[idx]) {
            idx += 1;
        }
        let separator = &component[start..idx];
        let allowed = matches!(separator, "." | "_" | "__")
            || separator.bytes().all(|b| b == b'-');
        if !allowed {
            return false;
        }
    }

    true
}

fn valid_tag(tag: &str) -> bool {
    let mut bytes = tag.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };

    tag.len() <= MAX_TAG_LEN
        && (first.is_ascii_alphanumeric() || first == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(fill: char) -> String {
        format!("sha256:{}", fill.to_string().repeat(64))
    }

    #[test]
    fn parse_simple() {
        let r = Reference::parse("ubuntu").unwrap();
        assert_eq!(r.registry(), "index.docker.io");
        assert_eq!(r.repository(), "library/ubuntu");
        assert_eq!(r.identifier(), &Identifier::Tag("latest".into()));
        assert_eq!(r.scheme(), "https");
    }

    #[test]
    fn parse_user_repo() {
        let r = Reference::parse("myuser/myapp:v1").unwrap();
        assert_eq!(r.registry(), "index.docker.io");
        assert_eq!(r.repository(), "myuser/myapp");
        assert_eq!(r.identifier(), &Identifier::Tag("v1".into()));
    }

    #[test]
    fn docker_hub_aliases_normalize() {
        for input in ["docker.io/alpine", "registry-1.docker.io/alpine:3.20"] {
            let r = Reference::parse(input).unwrap();
            assert_eq!(r.registry(), "index.docker.io");
            assert_eq!(r.repository(), "library/alpine");
        }
    }

    #[test]
    fn parse_custom_registry() {
        let r = Reference::parse("registry.example.com/base/image:v2").unwrap();
        assert_eq!(r.registry(), "registry.example.com");
        assert_eq!(r.repository(), "base/image");
        assert_eq!(r.to_string(), "registry.example.com/base/image:v2");
        assert_eq!(
            r.manifest_url(r.identifier()).unwrap(),
            "https://registry.example.com/v2/base/image/manifests/v2"
        );
        assert_eq!(
            r.url("blobs", digest('b')).unwrap().to_string(),
            format!("https://registry.example.com/v2/base/image/blobs/{}", digest('b'))
        );
        assert_eq!(r.scope(), "repository:base/image:pull");
    }

    #[test]
    fn single_component_outside_docker_hub_keeps_name() {
        let r = Reference::parse("localhost:5000/test:v1").unwrap();
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.repository(), "test");
        assert_eq!(r.identifier(), &Identifier::Tag("v1".into()));
    }

    #[test]
    fn parse_digest() {
        let r = Reference::parse(&format!("ghcr.io/org/app@{}", digest('a'))).unwrap();
        assert_eq!(
            r.identifier(),
            &Identifier::Digest(digest('a').parse().unwrap())
        );
        assert_eq!(r.to_string(), format!("ghcr.io/org/app@{}", digest('a')));

        let r = Reference::parse(&format!("ghcr.io/org/app:v1@{}", digest('a'))).unwrap();
        assert!(matches!(r.identifier(), Identifier::Digest(_)));
    }

    #[test]
    fn schemes() {
        let scheme = |input: &str| Reference::parse(input).unwrap().scheme();
        assert_eq!(scheme("localhost:5000/app"), "http");
        assert_eq!(scheme("127.0.0.1:5000/app"), "http");
        assert_eq!(scheme("10.1.2.3/app"), "http");
        assert_eq!(scheme("172.16.0.9:443/app"), "http");
        assert_eq!(scheme("192.168.1.20:5000/app"), "http");
        assert_eq!(scheme("[::1]:5000/app"), "http");
        assert_eq!(scheme("172.32.0.1/app"), "https");
        assert_eq!(scheme("ghcr.io/org/app"), "https");
        assert_eq!(scheme("localhost/app"), "https");
    }

    #[test]
    fn api_base() {
        let r = Reference::parse("localhost:5000/app").unwrap();
        assert_eq!(r.api_base().unwrap(), "http://localhost:5000/v2/");
    }

    #[test]
    fn reject_invalid() {
        assert!(matches!(Reference::parse(""), Err(ReferenceError::Empty)));
        assert!(matches!(
            Reference::parse("Ubuntu"),
            Err(ReferenceError::Repository(_))
        ));
        assert!(matches!(
            Reference::parse("ghcr.io/org//app"),
            Err(ReferenceError::Repository(_))
        ));
        assert!(matches!(
            Reference::parse("ghcr.io/org/app-"),
            Err(ReferenceError::Repository(_))
        ));
        assert!(matches!(
            Reference::parse("ghcr.io/org/a...b"),
            Err(ReferenceError::Repository(_))
        ));
        assert!(matches!(
            Reference::parse("alpine:.hidden"),
            Err(ReferenceError::Tag(_))
        ));
        assert!(matches!(
            Reference::parse(&format!("alpine:{}", "t".repeat(129))),
            Err(ReferenceError::Tag(_))
        ));
        assert!(matches!(
            Reference::parse("alpine@sha256:abc"),
            Err(ReferenceError::Digest(_))
        ));
        assert!(matches!(
            Reference::parse("bad_host.io/app"),
            Err(ReferenceError::Registry(_))
        ));
    }

    #[test]
    fn path_components() {
        assert!(valid_path_component("a"));
        assert!(valid_path_component("my-app"));
        assert!(valid_path_component("my--app"));
        assert!(valid_path_component("my__app"));
        assert!(valid_path_component("v1.2"));
        assert!(!valid_path_component("my___app"));
        assert!(!valid_path_component("_app"));
        assert!(!valid_path_component("app."));
    }
}
