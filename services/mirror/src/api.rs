//! Mirror builder and router

use std::sync::Arc;

use axum::Router;
use registry_client::RegistryService;
use tower_http::trace::TraceLayer;

use crate::keychain::Keychain;
use crate::reference::Reference;
use crate::upstream::Upstream;

/// Mirror builder for configuring and creating the registry mirror service
#[derive(Debug)]
pub struct MirrorBuilder {
    reference: Reference,
    keychain: Option<Keychain>,
    transport: Option<RegistryService>,
}

impl MirrorBuilder {
    /// Create a mirror of `reference`.
    pub fn new(reference: Reference) -> Self {
        Self {
            reference,
            keychain: None,
            transport: None,
        }
    }

    /// Set where upstream credentials come from
    ///
    /// Defaults to `~/.docker/config.json`.
    pub fn keychain(mut self, keychain: Keychain) -> Self {
        self.keychain = Some(keychain);
        self
    }

    /// Set the client service used to reach the upstream
    ///
    /// Defaults to a TCP + TLS client.
    pub fn transport(mut self, transport: RegistryService) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the mirror service
    ///
    /// Returns a Router that can be served with any tower-compatible server.
    /// Every path is handled by the mirror; there are no other routes.
    pub fn build(self) -> Router {
        let keychain = self.keychain.unwrap_or_else(Keychain::from_home);
        let upstream = match self.transport {
            Some(transport) => Upstream::with_transport(self.reference, keychain, transport),
            None => Upstream::new(self.reference, keychain),
        };

        Router::new()
            .fallback(crate::proxy::serve)
            .with_state(Arc::new(upstream))
            .layer(TraceLayer::new_for_http())
    }
}
