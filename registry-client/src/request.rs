//! Building and sending requests to the upstream registry.

use http::{header::HeaderValue, HeaderName, Uri};

use crate::{error::Error, response::Response, Authentication, RegistryClient};

/// Extensions for outgoing requests.
pub trait RequestExt {
    /// A body-less copy of the request head, kept alongside the response.
    fn parts(&self) -> http::request::Parts;
}

impl<B> RequestExt for http::Request<B> {
    fn parts(&self) -> http::request::Parts {
        let mut builder = http::request::Request::builder()
            .uri(self.uri().clone())
            .method(self.method().clone());

        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers().clone();
        }

        let (parts, _) = builder
            .body(())
            .expect("parts copied from a valid request")
            .into_parts();
        parts
    }
}

/// A request to the upstream registry, sent with the client's current credentials.
///
/// Registry reads never carry a body, so requests are always sent with an empty one.
#[derive(Debug)]
pub struct RequestBuilder<A> {
    req: http::request::Builder,
    client: RegistryClient<A>,
}

impl<A> RequestBuilder<A> {
    /// Start a request for `uri`.
    pub fn new(client: RegistryClient<A>, uri: Uri, method: http::Method) -> Self {
        Self {
            req: http::Request::builder().method(method).uri(uri),
            client,
        }
    }

    /// Add a header.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.req = self.req.header(key, value);
        self
    }

    /// Mutable access to the headers, `None` if an earlier header was invalid.
    pub fn headers_mut(&mut self) -> Option<&mut http::header::HeaderMap> {
        self.req.headers_mut()
    }

    /// Send the request.
    pub async fn send(self) -> Result<Response, Error>
    where
        A: Authentication,
    {
        let req = self.req.body(hyperdriver::Body::empty())?;
        Ok(self.client.execute(req).await?)
    }
}
