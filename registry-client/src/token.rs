//! The registry authentication handshake.
//!
//! A registry answers an anonymous `GET /v2/` with 200 when pulls are open,
//! or with 401 and a `WWW-Authenticate` challenge. A `Bearer` challenge names
//! a token realm which issues a token for a requested scope; a `Basic`
//! challenge wants the credentials directly.

use http::{header, HeaderMap, Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::uri::{IntoUri as _, ParseUriError};
use crate::{BasicAuth, BearerAuth, Error, HttpResponseError, RegistryAuth, RegistryClient};
use secret::Secret;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The handshake with the upstream registry failed.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The ping or token request could not be sent.
    #[error("{0}")]
    Request(#[from] Error),

    /// The `/v2/` ping answered with something other than 200 or 401.
    #[error("pinging registry: {0}")]
    Ping(HttpResponseError),

    /// A 401 came back without a challenge this client understands.
    #[error("unsupported authentication challenge: {0}")]
    Challenge(String),

    /// The challenge realm is not a usable URL.
    #[error("invalid token realm {realm:?}: {source}")]
    Realm {
        /// The realm as sent by the registry
        realm: String,
        /// Why it could not be used
        source: ParseUriError,
    },

    /// The token realm refused to issue a token.
    #[error("requesting token: {0}")]
    Token(HttpResponseError),

    /// The token realm's response body could not be read.
    #[error("reading token response: {0}")]
    TokenBody(#[source] BoxError),

    /// The token realm's response carried neither `token` nor `access_token`.
    #[error("token response did not include a token")]
    MissingToken,
}

/// An authentication challenge from a registry's `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Fetch a token from `realm`, passing `service` along.
    Bearer {
        /// Token endpoint URL
        realm: String,
        /// Service name the token is issued for
        service: Option<String>,
    },

    /// Send Basic credentials with every request.
    Basic,
}

impl Challenge {
    /// Parse the first `Bearer` or `Basic` challenge out of a `WWW-Authenticate` header.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let value = headers
            .get(header::WWW_AUTHENTICATE)
            .ok_or_else(|| AuthError::Challenge("missing WWW-Authenticate header".into()))?;
        let value = value
            .to_str()
            .map_err(|err| AuthError::Challenge(err.to_string()))?;

        Self::parse(value)
    }

    /// Parse the first `Bearer` or `Basic` challenge out of a header value.
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        http_auth::ChallengeParser::new(value)
            .filter_map(|challenge| challenge.ok())
            .find_map(|challenge| {
                if challenge.scheme.eq_ignore_ascii_case("Basic") {
                    return Some(Challenge::Basic);
                }
                if !challenge.scheme.eq_ignore_ascii_case("Bearer") {
                    return None;
                }

                let mut realm = None;
                let mut service = None;
                for (k, v) in &challenge.params {
                    if k.eq_ignore_ascii_case("realm") {
                        realm = Some(v.to_unescaped());
                    }

                    if k.eq_ignore_ascii_case("service") {
                        service = Some(v.to_unescaped());
                    }
                }

                Some(Challenge::Bearer {
                    realm: realm?,
                    service,
                })
            })
            .ok_or_else(|| AuthError::Challenge(value.to_owned()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<Secret>,
    access_token: Option<Secret>,
}

impl RegistryClient<RegistryAuth> {
    /// Run the `/v2/` handshake and install whatever credentials it calls for.
    ///
    /// `scope` is the token scope to request from a bearer realm, e.g.
    /// `repository:library/alpine:pull`. `credential` comes from the keychain and
    /// is sent to the token realm, or used directly for a Basic challenge.
    pub async fn authorize(
        &self,
        scope: &str,
        credential: Option<&BasicAuth>,
    ) -> Result<(), AuthError> {
        self.refresh_auth(RegistryAuth::Anonymous);
        let ping = self.get("").send().await?;

        let auth = match ping.status() {
            StatusCode::OK => {
                tracing::debug!(registry = %self.base(), "registry allows anonymous access");
                RegistryAuth::Anonymous
            }
            StatusCode::UNAUTHORIZED => match Challenge::from_headers(ping.headers())? {
                Challenge::Bearer { realm, service } => {
                    let token = self
                        .token(&realm, service.as_deref(), scope, credential)
                        .await?;
                    RegistryAuth::Bearer(BearerAuth::new(token))
                }
                Challenge::Basic => match credential {
                    Some(credential) => RegistryAuth::Basic(credential.clone()),
                    None => {
                        tracing::debug!(registry = %self.base(), "basic challenge without credentials");
                        RegistryAuth::Anonymous
                    }
                },
            },
            _ => return Err(AuthError::Ping(ping.into_error().await)),
        };

        self.refresh_auth(auth);
        Ok(())
    }

    async fn token(
        &self,
        realm: &str,
        service: Option<&str>,
        scope: &str,
        credential: Option<&BasicAuth>,
    ) -> Result<Secret, AuthError> {
        let mut query = vec![("scope", scope)];
        if let Some(service) = service {
            query.push(("service", service));
        }
        let query = serde_urlencoded::to_string(&query)
            .map_err(|err| AuthError::Challenge(err.to_string()))?;

        let separator = if realm.contains('?') { '&' } else { '?' };
        let url = format!("{realm}{separator}{query}");
        let uri = url.as_str().into_uri().map_err(|source| AuthError::Realm {
            realm: realm.to_owned(),
            source,
        })?;

        tracing::debug!(%realm, ?service, %scope, "requesting registry token");
        let mut request = self.request(Method::GET, uri);
        if let Some(credential) = credential {
            request = request.header(header::AUTHORIZATION, credential.header_value());
        }

        let response = request
            .send()
            .await?
            .expect_status(StatusCode::OK)
            .await
            .map_err(AuthError::Token)?;

        let body: TokenResponse = response.json().await.map_err(AuthError::TokenBody)?;
        body.token
            .filter(|token| !token.is_empty())
            .or(body.access_token)
            .ok_or(AuthError::MissingToken)
    }
}
