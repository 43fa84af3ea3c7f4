//! Responses from the upstream registry.

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, StatusCode, Uri};
use http_body_util::BodyExt as _;
use hyperdriver::Body;
use serde::de::DeserializeOwned;

use crate::error::HttpResponseError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The header registries use to report the canonical digest of a manifest.
pub const DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");

/// Wrapper around an HTTP response that keeps the head of the request that produced it.
#[derive(Debug)]
pub struct Response {
    request: http::request::Parts,
    response: http::response::Parts,
    body: Body,
}

impl Response {
    /// Create a new `Response` instance.
    pub fn new(request: http::request::Parts, response: http::response::Response<Body>) -> Self {
        let (response, body) = response.into_parts();

        Self {
            request,
            response,
            body,
        }
    }

    /// Split into the request head, response head and the unread body.
    pub fn into_parts(self) -> (http::request::Parts, http::response::Parts, Body) {
        (self.request, self.response, self.body)
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    /// URI of the request that produced this response.
    pub fn uri(&self) -> &Uri {
        &self.request.uri
    }

    /// The `Docker-Content-Digest` header, if present and readable.
    pub fn content_digest(&self) -> Option<&str> {
        self.header_str(&DOCKER_CONTENT_DIGEST)
    }

    /// The `Content-Type` header, if present and readable.
    pub fn content_type(&self) -> Option<&str> {
        self.header_str(&header::CONTENT_TYPE)
    }

    fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.response
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    /// Collect the whole body.
    pub async fn bytes(self) -> Result<Bytes, BoxError> {
        let collected = self.body.collect().await?;
        Ok(collected.to_bytes())
    }

    /// Collect the body as UTF-8 text.
    pub async fn text(self) -> Result<String, BoxError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    /// Collect the body and deserialize it as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, BoxError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Convert the `Response` into an `HttpResponseError` instance.
    pub async fn into_error(self) -> HttpResponseError {
        HttpResponseError::from_response(self).await
    }

    /// Keep the response only if it has exactly the expected status.
    pub async fn expect_status(self, status: StatusCode) -> Result<Self, HttpResponseError> {
        if self.status() == status {
            Ok(self)
        } else {
            Err(self.into_error().await)
        }
    }
}
