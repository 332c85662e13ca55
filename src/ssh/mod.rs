//! Remote session management
//!
//! Every remote operation gets its own freshly authenticated session that is
//! closed when the operation finishes. There is no pooling: the
//! [`SessionConnector`] seam is where one would go.

pub mod connection;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::*;
pub use session::*;

use crate::error::{AppError, AppResult};
use parking_lot::RwLock;
use std::io::{Read, Write};
use std::sync::Arc;
use uuid::Uuid;

/// Output captured from a remote exec channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

/// An authenticated channel to a remote host, used for one operation.
pub trait RemoteSession {
    /// Run a command and wait until its channel closes.
    fn exec(&mut self, command: &str) -> AppResult<CommandOutput>;

    /// Open a remote file for reading over the file-transfer sub-channel.
    fn open_read(&mut self, path: &str) -> AppResult<Box<dyn Read + '_>>;

    /// Create (or truncate) a remote file for writing.
    fn open_write(&mut self, path: &str) -> AppResult<Box<dyn Write + '_>>;

    fn close(&mut self) -> AppResult<()>;
}

/// Opens sessions for a profile. Implementations block.
pub trait SessionConnector: Send + Sync {
    fn connect(&self, profile: &ConnectionProfile) -> AppResult<Box<dyn RemoteSession>>;
}

/// Owns the active connection profile and hands out scoped sessions
pub struct SessionManager {
    connector: Arc<dyn SessionConnector>,
    profile: RwLock<Option<ConnectionProfile>>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            connector,
            profile: RwLock::new(None),
        }
    }

    /// Replace the active profile. Sessions already in flight are untouched.
    pub fn set_profile(&self, profile: ConnectionProfile) {
        tracing::info!("Connection profile set to {}", profile.target());
        *self.profile.write() = Some(profile);
    }

    /// Snapshot of the active profile
    pub fn profile(&self) -> AppResult<ConnectionProfile> {
        self.profile.read().clone().ok_or(AppError::ProfileNotSet)
    }

    pub fn has_profile(&self) -> bool {
        self.profile.read().is_some()
    }

    /// Open a session for `profile`. Blocking; the caller owns and must close it.
    pub fn connect(&self, profile: &ConnectionProfile) -> AppResult<Box<dyn RemoteSession>> {
        open_session(self.connector.as_ref(), profile)
    }

    /// Run `op` inside a new session for the active profile.
    pub async fn with_session<F, T>(&self, op: F) -> AppResult<T>
    where
        F: FnOnce(&mut dyn RemoteSession) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let profile = self.profile()?;
        self.with_session_using(profile, op).await
    }

    /// Run `op` inside a new session for an explicit profile.
    ///
    /// The session is closed exactly once whether `op` succeeds, fails or
    /// panics.
    pub async fn with_session_using<F, T>(&self, profile: ConnectionProfile, op: F) -> AppResult<T>
    where
        F: FnOnce(&mut dyn RemoteSession) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let connector = Arc::clone(&self.connector);

        tokio::task::spawn_blocking(move || {
            let session = open_session(connector.as_ref(), &profile)?;
            let mut guard = SessionGuard::new(session, &profile);
            let result = op(guard.session());
            guard.release();
            result
        })
        .await?
    }

    /// Open and immediately close a session against the active profile.
    pub async fn check_connection(&self) -> AppResult<()> {
        self.with_session(|_| Ok(())).await
    }
}

fn open_session(
    connector: &dyn SessionConnector,
    profile: &ConnectionProfile,
) -> AppResult<Box<dyn RemoteSession>> {
    // Reject before touching the network when no credential is present
    profile.credential()?;
    tracing::debug!("Opening session to {}", profile.target());
    connector.connect(profile)
}

/// Closes the wrapped session once, on release or on drop.
struct SessionGuard {
    session: Box<dyn RemoteSession>,
    id: String,
    released: bool,
}

impl SessionGuard {
    fn new(session: Box<dyn RemoteSession>, profile: &ConnectionProfile) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        tracing::debug!("Session {} open for {}", &id[..8], profile.target());
        Self {
            session,
            id,
            released: false,
        }
    }

    fn session(&mut self) -> &mut dyn RemoteSession {
        self.session.as_mut()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.session.close() {
            Ok(()) => tracing::debug!("Session {} closed", &self.id[..8]),
            Err(e) => tracing::warn!("Session {} close failed: {}", &self.id[..8], e),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}
