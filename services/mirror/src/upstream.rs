//! The single upstream image every request is served from

use http::uri::InvalidUri;
use registry_client::{AuthError, RegistryAuth, RegistryClient, RegistryService};

use crate::keychain::{Keychain, KeychainError};
use crate::reference::Reference;

/// An authenticated client for the upstream could not be set up.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Credential lookup failed
    #[error("resolving credentials: {0}")]
    Keychain(#[from] KeychainError),

    /// The registry's auth handshake failed
    #[error("authenticating with upstream: {0}")]
    Auth(#[from] AuthError),

    /// The registry host does not form a URL
    #[error("invalid upstream registry URL: {0}")]
    Base(#[from] InvalidUri),
}

/// The upstream reference plus what is needed to reach it.
///
/// Shared read-only between all requests.
#[derive(Debug, Clone)]
pub struct Upstream {
    reference: Reference,
    keychain: Keychain,
    transport: RegistryService,
}

impl Upstream {
    /// Reach `reference` over TCP + TLS.
    pub fn new(reference: Reference, keychain: Keychain) -> Self {
        Self::with_transport(reference, keychain, registry_client::transport())
    }

    /// Reach `reference` through an arbitrary client service.
    pub fn with_transport(
        reference: Reference,
        keychain: Keychain,
        transport: RegistryService,
    ) -> Self {
        Self {
            reference,
            keychain,
            transport,
        }
    }

    /// The configured upstream reference.
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// A client authorized to pull from the upstream repository.
    ///
    /// Every call runs a fresh handshake; nothing is cached between requests.
    pub async fn client(&self) -> Result<RegistryClient<RegistryAuth>, UpstreamError> {
        let registry = self.reference.registry();
        let credential = self.keychain.resolve(registry).await?;

        let client = RegistryClient::new_with_inner_service(
            self.reference.api_base()?,
            RegistryAuth::Anonymous,
            self.transport.clone(),
        );
        client
            .authorize(&self.reference.scope(), credential.as_ref())
            .await?;

        tracing::debug!(%registry, credentials = credential.is_some(), "authorized with upstream");
        Ok(client)
    }
}
