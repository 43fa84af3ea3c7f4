//! # Single-image registry mirror
//!
//! A read-only registry that answers every pull with one upstream image.
//!
//! Whatever repository and tag a client asks for, manifest requests are
//! forwarded to the configured upstream reference. Requests by digest are
//! forwarded unchanged when the digest is the upstream's own manifest or one of
//! the platform manifests its index lists; any other digest is swapped for the
//! upstream reference too. Blob and other requests keep their identifier but are
//! redirected to the upstream repository.
//!
//! ## Example
//!
//! ```no_run
//! use mirror::{Keychain, MirrorBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = MirrorBuilder::new("ghcr.io/org/app:v1".parse()?)
//!     .keychain(Keychain::from_home())
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod digest;
mod error;
mod keychain;
pub mod manifest;
mod proxy;
mod reference;
pub mod resolver;
pub mod route;
mod upstream;

pub use api::MirrorBuilder;
pub use digest::{Digest, DigestError};
pub use error::{InternalError, MirrorError, MirrorResult, RouteError};
pub use keychain::{Keychain, KeychainError};
pub use reference::{Identifier, Reference, ReferenceError};
pub use resolver::{Membership, ResolveError, resolve};
pub use route::{RequestPath, Route, route};
pub use upstream::{Upstream, UpstreamError};
