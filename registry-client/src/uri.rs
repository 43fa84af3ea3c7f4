//! URI utilities.

use camino::Utf8Path;
use http::Uri;
use thiserror::Error;
use url::Url;

/// The provided URL cannot be a base URL,
/// and so is not valid as the base part of an API URL.
#[derive(Debug, Error)]
#[error("cannot be a base URL: {0}")]
pub struct CannotBeABase(url::Url);

/// Errors that can occur when parsing a URI.
#[derive(Debug, Error)]
pub enum ParseUriError {
    /// An error occurred while parsing the URI.
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// The provided URL cannot be a base URL,
    #[error(transparent)]
    CannotBeABase(#[from] CannotBeABase),

    /// The URI is invalid, but URL parsing succeded.
    #[error("invalid URI: {0}")]
    Invalid(http::uri::InvalidUri),
}

/// Convert a value into a URI.
pub trait IntoUri {
    /// Convert the value into a URI.
    fn into_uri(self) -> Result<Uri, ParseUriError>;
}

impl IntoUri for Url {
    fn into_uri(self) -> Result<Uri, ParseUriError> {
        if self.cannot_be_a_base() {
            return Err(CannotBeABase(self).into());
        }

        match self.as_str().parse() {
            Ok(uri) => Ok(uri),
            Err(e) => Err(ParseUriError::Invalid(e)),
        }
    }
}

impl IntoUri for &str {
    fn into_uri(self) -> Result<Uri, ParseUriError> {
        let url: Url = self.parse()?;
        url.into_uri()
    }
}

/// Extension trait for URIs.
pub trait UriExtension {
    /// Join a path to a URI.
    fn join<P: AsRef<str>>(self, path: P) -> Uri;
}

impl UriExtension for Uri {
    fn join<P: AsRef<str>>(self, path: P) -> Uri {
        let mut parts = self.into_parts();

        parts.path_and_query = parts.path_and_query.as_ref().map(|pq| {
            let joined = Utf8Path::new(pq.path()).join(path.as_ref());
            http::uri::PathAndQuery::from_maybe_shared(joined.to_string())
                .expect("joined paths stay valid")
        });
        Uri::from_parts(parts).expect("joining a path keeps the URI valid")
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn join_registry_endpoints() {
        let uri = "https://registry.example.com/v2/".parse::<Uri>().unwrap();
        let joined = uri.join("base/image/manifests/v2");
        assert_eq!(
            joined.to_string(),
            "https://registry.example.com/v2/base/image/manifests/v2"
        );

        let uri = "https://registry.example.com/v2".parse::<Uri>().unwrap();
        let joined = uri.join("base/image/blobs/sha256:abc");
        assert_eq!(
            joined.to_string(),
            "https://registry.example.com/v2/base/image/blobs/sha256:abc"
        );
    }

    #[test]
    fn join_empty_keeps_trailing_slash() {
        let uri = "https://registry.example.com/v2".parse::<Uri>().unwrap();
        assert_eq!(uri.join("").to_string(), "https://registry.example.com/v2/");

        let uri = "http://localhost:5000/v2/".parse::<Uri>().unwrap();
        assert_eq!(uri.join("").to_string(), "http://localhost:5000/v2/");
    }

    #[test]
    fn token_realm_into_uri() {
        let uri = "https://auth.example.com/token?service=registry.example.com"
            .into_uri()
            .unwrap();
        assert_eq!(uri.host(), Some("auth.example.com"));
        assert_eq!(uri.query(), Some("service=registry.example.com"));

        assert!(matches!(
            "not a url".into_uri(),
            Err(ParseUriError::Url(_))
        ));
    }
}
