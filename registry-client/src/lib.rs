//! An HTTP client for talking to a single upstream container registry.
//!
//! [`RegistryClient`] wraps a `hyperdriver` client service with a swappable
//! [`AuthenticationLayer`]. A client starts out anonymous and is upgraded by
//! [`RegistryClient::authorize`], which runs the registry's `/v2/` handshake
//! and installs Basic or Bearer credentials for the requests that follow.

#![allow(clippy::arc_with_non_send_sync)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use arc_swap::Guard;
use http::Method;
use http::Uri;
use hyperdriver::service::SharedService;
pub use secret::Secret;
use tower::ServiceExt;

mod authentication;
mod error;
pub mod request;
pub mod response;
mod token;
pub mod uri;

pub use self::authentication::{
    basic_auth, Authentication, AuthenticationLayer, AuthenticationService, BasicAuth,
    BearerAuth, RegistryAuth,
};
pub use self::error::{Error, HttpResponseError};
pub use self::request::RequestBuilder;
use self::request::RequestExt as _;
pub use self::response::Response;
pub use self::token::{AuthError, Challenge};
use self::uri::UriExtension as _;

/// The type-erased transport every [`RegistryClient`] sends through.
pub type RegistryService = hyperdriver::client::SharedClientService<hyperdriver::Body, hyperdriver::Body>;

/// Build the default TCP + TLS transport used to reach real registries.
///
/// Redirects are returned to the caller rather than followed, so a blob
/// redirect to a CDN reaches the pulling client intact.
pub fn transport() -> RegistryService {
    hyperdriver::Client::build_tcp_http()
        .with_default_tls()
        .without_redirects()
        .build_service()
}

/// Erase the type of an arbitrary client service, e.g. a [`mock::MockService`].
pub fn shared<S>(service: S) -> RegistryService
where
    S: tower::Service<
            http::Request<hyperdriver::Body>,
            Response = http::Response<hyperdriver::Body>,
            Error = hyperdriver::client::Error,
        > + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    tower::ServiceBuilder::new()
        .layer(SharedService::layer())
        .service(service)
}

/// A client for one registry's `/v2/` API.
///
/// Clones share the authentication state, so a token installed by
/// [`RegistryClient::authorize`] is visible to every clone.
#[derive(Debug, Clone)]
pub struct RegistryClient<A> {
    base: Uri,
    inner: RegistryService,
    authentication: Arc<ArcSwap<A>>,
}

impl<A> RegistryClient<A>
where
    A: Authentication + Send + Sync + 'static,
{
    /// Create a client for the API rooted at `base`, sending through `inner`.
    pub fn new_with_inner_service<S>(base: Uri, authentication: A, inner: S) -> Self
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let authentication = Arc::new(ArcSwap::new(Arc::new(authentication)));

        let service = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .layer(AuthenticationLayer::new(authentication.clone()))
            .service(inner);

        RegistryClient {
            base,
            inner: service,
            authentication,
        }
    }

    /// Replace the credentials attached to subsequent requests.
    pub fn refresh_auth(&self, authentication: A) {
        self.authentication.store(Arc::new(authentication));
    }

    /// The credentials currently attached to requests.
    pub fn auth(&self) -> Guard<Arc<A>> {
        self.authentication.as_ref().load()
    }
}

impl<A> RegistryClient<A>
where
    A: Authentication,
{
    /// The API root this client was built for, e.g. `https://ghcr.io/v2/`.
    pub fn base(&self) -> &Uri {
        &self.base
    }

    /// Start a GET request for an endpoint relative to the API root.
    pub fn get(&self, endpoint: &str) -> RequestBuilder<A> {
        let url = self.base.clone().join(endpoint);
        RequestBuilder::new(self.clone(), url, Method::GET)
    }

    /// Start a request for an absolute URL.
    pub fn request(&self, method: Method, uri: Uri) -> RequestBuilder<A> {
        RequestBuilder::new(self.clone(), uri, method)
    }

    /// Send a fully built request through the authenticated transport.
    pub async fn execute(
        &self,
        req: http::Request<hyperdriver::Body>,
    ) -> Result<Response, hyperdriver::client::Error> {
        let parts = req.parts();

        let response = self.inner.clone().oneshot(req).await?;
        Ok(Response::new(parts, response))
    }
}

/// An in-memory upstream registry for tests.
pub mod mock {
    use bytes::Bytes;
    use http::response;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// A canned response for one request path.
    #[derive(Debug, Clone)]
    pub struct MockResponse {
        status: http::StatusCode,
        headers: http::HeaderMap,
        body: Vec<u8>,
    }

    impl MockResponse {
        /// Create a canned response.
        pub fn new(status: http::StatusCode, headers: http::HeaderMap, body: Vec<u8>) -> Self {
            Self {
                status,
                headers,
                body,
            }
        }
    }

    /// A request the mock received.
    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        /// Request method
        pub method: http::Method,
        /// Full request URI, including scheme and authority
        pub uri: http::Uri,
        /// Request headers as sent, after authentication was applied
        pub headers: http::HeaderMap,
    }

    /// Serves canned responses keyed by request path and records every request.
    ///
    /// Paths without a canned response get a registry-style 404.
    #[derive(Debug, Default, Clone)]
    pub struct MockService {
        responses: HashMap<String, MockResponse>,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    impl MockService {
        /// Create a mock with no canned responses.
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer requests for `path` (query string ignored) with this response.
        pub fn add(
            &mut self,
            path: &str,
            status: http::StatusCode,
            headers: http::HeaderMap,
            body: Vec<u8>,
        ) {
            let response = MockResponse::new(status, headers, body);
            self.responses.insert(path.to_owned(), response);
        }

        /// Every request received so far, in order.
        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().clone()
        }

        /// The URIs of every request received so far, as strings.
        pub fn uris(&self) -> Vec<String> {
            self.requests
                .lock()
                .iter()
                .map(|request| request.uri.to_string())
                .collect()
        }
    }

    impl tower::Service<http::Request<hyperdriver::Body>> for MockService {
        type Response = http::Response<hyperdriver::Body>;
        type Error = hyperdriver::client::Error;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(
            &mut self,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
            self.requests.lock().push(RecordedRequest {
                method: req.method().clone(),
                uri: req.uri().clone(),
                headers: req.headers().clone(),
            });

            let not_found = MockResponse::new(
                http::StatusCode::NOT_FOUND,
                http::HeaderMap::new(),
                br#"{"errors":[{"code":"NAME_UNKNOWN","message":"repository name not known to registry"}]}"#
                    .to_vec(),
            );
            let response = self
                .responses
                .get(req.uri().path())
                .unwrap_or(&not_found);

            let mut builder = response::Builder::new()
                .status(response.status)
                .version(http::Version::HTTP_11);

            for (key, value) in response.headers.iter() {
                builder = builder.header(key, value);
            }

            let response = builder
                .body(hyperdriver::Body::from(Bytes::from(response.body.clone())))
                .expect("canned responses are valid");

            std::future::ready(Ok(response))
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn extensions_produce_send_futures() {
        let client = RegistryClient::new_with_inner_service(
            "https://registry.example.com/v2/".parse().unwrap(),
            RegistryAuth::Anonymous,
            mock::MockService::new(),
        );
        let builder = client.get("base/image/manifests/latest");

        fn assert_send<T: Send>(_t: T) {}

        let fut = builder.send();
        assert_send(fut);
    }

    #[tokio::test]
    async fn mock_client_records_requests() {
        let mut mock = mock::MockService::new();
        mock.add(
            "/v2/",
            http::StatusCode::OK,
            http::HeaderMap::new(),
            b"{}".to_vec(),
        );

        let client = RegistryClient::new_with_inner_service(
            "https://registry.example.com/v2/".parse().unwrap(),
            RegistryAuth::Bearer(BearerAuth::new("secret garden")),
            mock.clone(),
        );

        let response = client.get("").send().await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);

        let missing = client.get("nothing/here").send().await.unwrap();
        assert_eq!(missing.status(), http::StatusCode::NOT_FOUND);

        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].uri, "https://registry.example.com/v2/");
        assert_eq!(
            requests[0].headers[http::header::AUTHORIZATION],
            "Bearer secret garden"
        );
        assert_eq!(
            mock.uris()[1],
            "https://registry.example.com/v2/nothing/here"
        );
    }

    #[tokio::test]
    async fn refreshed_auth_is_shared_between_clones() {
        let mock = mock::MockService::new();
        let client = RegistryClient::new_with_inner_service(
            "https://registry.example.com/v2/".parse().unwrap(),
            RegistryAuth::Anonymous,
            mock.clone(),
        );
        let clone = client.clone();

        client.refresh_auth(RegistryAuth::Bearer(BearerAuth::new("fresh")));
        assert!(matches!(**clone.auth(), RegistryAuth::Bearer(_)));

        clone.get("").send().await.unwrap();
        assert_eq!(
            mock.requests()[0].headers[http::header::AUTHORIZATION],
            "Bearer fresh"
        );
    }
}
