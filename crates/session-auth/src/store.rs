//! Token pair storage
//!
//! `TokenStore` is the only owner of the session's `Credentials`. Two
//! implementations ship here:
//!
//! - `MemoryTokenStore` keeps the pair in process memory (tests, embedders
//!   that persist elsewhere).
//! - `FileTokenStore` mirrors the pair to a JSON file so a session survives
//!   restarts. Writes use atomic temp-file + rename, and a tokio Mutex makes
//!   every `set`/`clear` visible to the next `get` with no stale window.

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::constants::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Durable holder for the current token pair.
///
/// Uses boxed futures so the store can live behind `Arc<dyn TokenStore>`.
pub trait TokenStore: Send + Sync {
    /// Current pair, or `None` when signed out.
    fn get(&self) -> BoxFuture<'_, Option<Credentials>>;

    /// Replace both tokens at once.
    ///
    /// The new pair is what `get` returns from here on, even when persisting
    /// it fails; the error only reports that it won't survive a restart. A
    /// rotated refresh token is already spent, so keeping the old pair would
    /// strand the session.
    fn set(&self, credentials: Credentials) -> BoxFuture<'_, Result<()>>;

    /// Remove both tokens at once.
    fn clear(&self) -> BoxFuture<'_, Result<()>>;
}

/// In-process token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: RwLock<Option<Credentials>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing session.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            state: RwLock::new(Some(credentials)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> BoxFuture<'_, Option<Credentials>> {
        Box::pin(async move { self.state.read().await.clone() })
    }

    fn set(&self, credentials: Credentials) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.write().await = Some(credentials);
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.write().await = None;
            Ok(())
        })
    }
}

/// On-disk layout: one JSON object keyed by the two persistence keys.
#[derive(Serialize, Deserialize)]
struct StoredTokens {
    #[serde(rename = "access_token", default)]
    access: Option<String>,
    #[serde(rename = "refresh_token", default)]
    refresh: Option<String>,
}

/// File-backed token store.
///
/// The Mutex serializes writes, and reads take the same lock so they never
/// observe a pair that is only half persisted.
pub struct FileTokenStore {
    path: PathBuf,
    state: Mutex<Option<Credentials>>,
}

impl FileTokenStore {
    /// Open the session file at `path`.
    ///
    /// A missing file means "signed out". A file holding only one of the two
    /// tokens is treated the same way, since a lone token can't be used safely.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::Io(format!("checking session file: {e}")))?
        {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let stored: StoredTokens = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing session file: {e}")))?;
            match (stored.access, stored.refresh) {
                (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                    info!(path = %path.display(), "loaded stored session");
                    Some(Credentials::new(access, refresh))
                }
                _ => {
                    warn!(
                        path = %path.display(),
                        "session file is missing {ACCESS_TOKEN_KEY} or {REFRESH_TOKEN_KEY}, ignoring it"
                    );
                    None
                }
            }
        } else {
            debug!(path = %path.display(), "no session file, starting signed out");
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> BoxFuture<'_, Option<Credentials>> {
        Box::pin(async move { self.state.lock().await.clone() })
    }

    fn set(&self, credentials: Credentials) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let stored = StoredTokens {
                access: Some(credentials.access_token.expose().clone()),
                refresh: Some(credentials.refresh_token.expose().clone()),
            };
            // Memory first: see `TokenStore::set`
            *state = Some(credentials);
            write_atomic(&self.path, &stored).await
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            *state = None;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "removed session file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(format!("removing session file: {e}"))),
            }
        })
    }
}

/// Write the session file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 on unix since the file holds tokens.
async fn write_atomic(path: &Path, data: &StoredTokens) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing session: {e}")))?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating session directory: {e}")))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}
