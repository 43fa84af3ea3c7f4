//! Registry credentials from the Docker CLI config file

use std::collections::BTreeMap;
use std::io;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use registry_client::BasicAuth;
use serde::Deserialize;

use crate::reference::normalize_registry;

const CONFIG_FILE: &str = "config.json";
const IDENTITY_TOKEN_USERNAME: &str = "<token>";

/// Credentials could not be read from the config file.
#[derive(Debug, thiserror::Error)]
pub enum KeychainError {
    /// The file exists but could not be read
    #[error("reading {path}: {source}")]
    Read {
        /// Config file path
        path: Utf8PathBuf,
        /// Underlying IO error
        source: io::Error,
    },

    /// The file is not a Docker config
    #[error("parsing {path}: {source}")]
    Parse {
        /// Config file path
        path: Utf8PathBuf,
        /// Underlying JSON error
        source: serde_json::Error,
    },

    /// An `auth` field is not base64 `username:password`
    #[error("malformed auth entry for {registry}: {reason}")]
    Auth {
        /// Registry host of the entry
        registry: String,
        /// What was wrong with it
        reason: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,

    #[serde(default)]
    creds_store: Option<String>,

    #[serde(default)]
    cred_helpers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,

    #[serde(default)]
    username: Option<String>,

    #[serde(default)]
    password: Option<String>,

    #[serde(default)]
    identitytoken: Option<String>,
}

/// Looks up registry credentials in a Docker `config.json`.
///
/// The file is read on every lookup, so credential changes apply to the next request.
#[derive(Debug, Clone, Default)]
pub struct Keychain {
    config: Option<Utf8PathBuf>,
}

impl Keychain {
    /// A keychain with no credentials at all.
    pub fn anonymous() -> Self {
        Self { config: None }
    }

    /// Use `<dir>/config.json`.
    pub fn from_dir(dir: impl AsRef<Utf8Path>) -> Self {
        Self {
            config: Some(dir.as_ref().join(CONFIG_FILE)),
        }
    }

    /// Use `$HOME/.docker/config.json`, or nothing if `HOME` is unset.
    pub fn from_home() -> Self {
        let home = std::env::var("HOME").ok().filter(|home| !home.is_empty());
        match home {
            Some(home) => Self::from_dir(Utf8Path::new(&home).join(".docker")),
            None => Self::anonymous(),
        }
    }

    /// The config file this keychain reads, if any.
    pub fn path(&self) -> Option<&Utf8Path> {
        self.config.as_deref()
    }

    /// Credentials for `registry`, or `None` to pull anonymously.
    pub async fn resolve(&self, registry: &str) -> Result<Option<BasicAuth>, KeychainError> {
        let Some(path) = &self.config else {
            return Ok(None);
        };

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(%path, "no docker config, pulling anonymously");
                return Ok(None);
            }
            Err(source) => {
                return Err(KeychainError::Read {
                    path: path.clone(),
                    source,
                });
            }
        };

        let config: DockerConfig =
            serde_json::from_str(&contents).map_err(|source| KeychainError::Parse {
                path: path.clone(),
                source,
            })?;

        config.credential(normalize_registry(registry))
    }
}

impl DockerConfig {
    fn credential(&self, registry: &str) -> Result<Option<BasicAuth>, KeychainError> {
        // An exact key wins, then the first key (in sorted order) naming the same host.
        let entry = self.auths.get(registry).or_else(|| {
            self.auths
                .iter()
                .find(|(key, _)| normalize_key(key) == registry)
                .map(|(_, entry)| entry)
        });

        let Some(entry) = entry else {
            if let Some(helper) = self.cred_helpers.get(registry).or(self.creds_store.as_ref()) {
                tracing::debug!(%registry, %helper, "credential helpers are not supported, pulling anonymously");
            }
            return Ok(None);
        };

        entry.credential(registry)
    }
}

impl AuthEntry {
    fn credential(&self, registry: &str) -> Result<Option<BasicAuth>, KeychainError> {
        if let Some(token) = self.identitytoken.as_deref().filter(|t| !t.is_empty()) {
            return Ok(Some(BasicAuth::new(
                IDENTITY_TOKEN_USERNAME,
                Some(token.to_owned()),
            )));
        }

        if let Some(auth) = self.auth.as_deref().filter(|a| !a.is_empty()) {
            let malformed = |reason: String| KeychainError::Auth {
                registry: registry.to_owned(),
                reason,
            };
            let decoded = STANDARD
                .decode(auth)
                .map_err(|err| malformed(err.to_string()))?;
            let decoded = String::from_utf8(decoded).map_err(|err| malformed(err.to_string()))?;
            let (username, password) = decoded
                .split_once(':')
                .ok_or_else(|| malformed("expected username:password".into()))?;

            return Ok(Some(BasicAuth::new(
                username,
                Some(password.to_owned()),
            )));
        }

        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(username), password) if !username.is_empty() => Ok(Some(BasicAuth::new(
                username,
                password.map(str::to_owned),
            ))),
            _ => Ok(None),
        }
    }
}

/// `https://index.docker.io/v1/` and friends are keyed by bare host.
fn normalize_key(key: &str) -> &str {
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = key.split_once('/').map_or(key, |(host, _)| host);
    normalize_registry(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keychain_with(config: &str) -> (tempfile::TempDir, Keychain) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), config).unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        (dir, Keychain::from_dir(path))
    }

    fn header(auth: BasicAuth) -> String {
        auth.header_value().to_str().unwrap().to_owned()
    }

    #[test]
    fn normalize_config_keys() {
        assert_eq!(normalize_key("https://index.docker.io/v1/"), "index.docker.io");
        assert_eq!(normalize_key("docker.io"), "index.docker.io");
        assert_eq!(normalize_key("http://localhost:5000"), "localhost:5000");
        assert_eq!(normalize_key("ghcr.io"), "ghcr.io");
    }

    #[tokio::test]
    async fn anonymous_keychain() {
        assert!(Keychain::anonymous().resolve("ghcr.io").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_file_is_anonymous() {
        let dir = tempfile::tempdir().unwrap();
        let keychain = Keychain::from_dir(Utf8Path::from_path(dir.path()).unwrap());
        assert!(keychain.resolve("ghcr.io").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn base64_auth_entry() {
        // robot:hunter2
        let (_dir, keychain) =
            keychain_with(r#"{"auths":{"ghcr.io":{"auth":"cm9ib3Q6aHVudGVyMg=="}}}"#);

        let auth = keychain.resolve("ghcr.io").await.unwrap().unwrap();
        assert_eq!(auth.username(), "robot");
        assert_eq!(header(auth), "Basic cm9ib3Q6aHVudGVyMg==");

        assert!(keychain.resolve("quay.io").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn docker_hub_entry_matches_any_alias() {
        let (_dir, keychain) = keychain_with(
            r#"{"auths":{"https://index.docker.io/v1/":{"username":"robot","password":"hunter2"}}}"#,
        );

        for registry in ["index.docker.io", "docker.io", "registry-1.docker.io"] {
            let auth = keychain.resolve(registry).await.unwrap().unwrap();
            assert_eq!(header(auth), "Basic cm9ib3Q6aHVudGVyMg==");
        }
    }

    #[tokio::test]
    async fn exact_entry_wins_over_aliases() {
        // http://localhost:5000 sorts first, but the bare key is an exact match.
        let (_dir, keychain) = keychain_with(
            r#"{"auths":{
                "http://localhost:5000":{"username":"alias","password":"pw"},
                "localhost:5000":{"username":"exact","password":"pw"}
            }}"#,
        );
        let auth = keychain.resolve("localhost:5000").await.unwrap().unwrap();
        assert_eq!(auth.username(), "exact");

        let (_dir, keychain) = keychain_with(
            r#"{"auths":{
                "https://index.docker.io/v1/":{"username":"legacy","password":"pw"},
                "docker.io":{"username":"short","password":"pw"}
            }}"#,
        );
        for _ in 0..4 {
            let auth = keychain.resolve("docker.io").await.unwrap().unwrap();
            assert_eq!(auth.username(), "short");
        }
    }

    #[tokio::test]
    async fn identity_token_entry() {
        let (_dir, keychain) =
            keychain_with(r#"{"auths":{"registry.example.com":{"identitytoken":"refresh-me"}}}"#);

        let auth = keychain.resolve("registry.example.com").await.unwrap().unwrap();
        assert_eq!(auth.username(), "<token>");
    }

    #[tokio::test]
    async fn helpers_are_not_run() {
        let (_dir, keychain) = keychain_with(
            r#"{"auths":{"ghcr.io":{}},"credsStore":"desktop","credHelpers":{"gcr.io":"gcloud"}}"#,
        );

        assert!(keychain.resolve("ghcr.io").await.unwrap().is_none());
        assert!(keychain.resolve("gcr.io").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_files_are_errors() {
        let (_dir, keychain) = keychain_with("{not json");
        assert!(matches!(
            keychain.resolve("ghcr.io").await,
            Err(KeychainError::Parse { .. })
        ));

        let (_dir, keychain) = keychain_with(r#"{"auths":{"ghcr.io":{"auth":"bm8tY29sb24="}}}"#);
        assert!(matches!(
            keychain.resolve("ghcr.io").await,
            Err(KeychainError::Auth { .. })
        ));
    }
}
