use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{StoreError, replace_file};
use crate::domain::SessionState;

/// Pass-through storage for the persisted session blob.
///
/// Load-if-exists, save-on-successful-login. Anything unreadable is treated
/// as "no session", which only costs a fresh login.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Option<SessionState> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted session");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read persisted session");
                return None;
            }
        };

        match serde_json::from_slice::<SessionState>(&bytes) {
            Ok(state) if !state.as_value().is_null() => Some(state),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "persisted session is not valid JSON");
                None
            }
        }
    }

    /// Overwrite the persisted session with `state`.
    pub async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        let body = serde_json::to_vec(state)?;
        replace_file(&self.path, &body).await?;
        info!(path = %self.path.display(), "persisted session state");
        Ok(())
    }
}
