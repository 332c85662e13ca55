use crate::config::{get_known_hosts_path, AppSettings};
use crate::error::AppResult;
use crate::exec::CommandExecutor;
use crate::files::{ByteSource, DirectoryEntry, FileStream, FilesystemAdapter};
use crate::monitoring::{CpuSnapshot, DiskSnapshot, GpuSnapshot, Monitor, ServerInfo};
use crate::ssh::{ConnectionProfile, SecretMaterial, SessionConnector, SessionManager, Ssh2Connector};
use crate::target::OperationTarget;
use std::path::Path;
use std::sync::Arc;

/// Global application state
///
/// Every operation takes an [`OperationTarget`]; remote ones use whatever
/// profile is active when they start.
pub struct AppState {
    pub settings: AppSettings,
    pub sessions: Arc<SessionManager>,
    pub executor: CommandExecutor,
    pub files: FilesystemAdapter,
    pub monitor: Arc<Monitor>,
}

impl AppState {
    pub fn new(settings: AppSettings) -> AppResult<Self> {
        let connector = Ssh2Connector::new(settings.ssh.clone(), get_known_hosts_path()?);
        Ok(Self::with_connector(settings, Arc::new(connector)))
    }

    pub fn with_connector(settings: AppSettings, connector: Arc<dyn SessionConnector>) -> Self {
        let sessions = Arc::new(SessionManager::new(connector));
        let executor = CommandExecutor::new(Arc::clone(&sessions));
        let files = FilesystemAdapter::new(
            Arc::clone(&sessions),
            executor.clone(),
            settings.files.clone(),
        );
        let monitor = Arc::new(Monitor::new(executor.clone(), &settings.monitoring));

        Self {
            settings,
            sessions,
            executor,
            files,
            monitor,
        }
    }

    /// Replace the active connection profile as a whole.
    pub fn set_connection_profile(
        &self,
        host: &str,
        port: Option<u16>,
        username: &str,
        secret: SecretMaterial,
    ) {
        let port = port.unwrap_or(self.settings.ssh.default_port);
        self.sessions
            .set_profile(ConnectionProfile::new(host, Some(port), username, secret));
    }

    pub async fn check_connection(&self) -> AppResult<()> {
        self.sessions.check_connection().await
    }

    pub async fn list_directory(
        &self,
        target: OperationTarget,
        path: &str,
    ) -> AppResult<Vec<DirectoryEntry>> {
        self.files.list(target, path).await
    }

    pub async fn read_file(&self, target: OperationTarget, path: &str) -> AppResult<FileStream> {
        self.files.read_file(target, path).await
    }

    pub async fn write_file(
        &self,
        target: OperationTarget,
        path: &str,
        source: ByteSource,
    ) -> AppResult<u64> {
        self.files.write_file(target, path, source).await
    }

    pub async fn upload(
        &self,
        target: OperationTarget,
        dest_dir: Option<&str>,
        file_name: &str,
        staged: &Path,
    ) -> AppResult<(String, u64)> {
        self.files.upload(target, dest_dir, file_name, staged).await
    }

    /// Run a command line and return its raw stdout.
    pub async fn run_command(&self, target: OperationTarget, command: &str) -> AppResult<String> {
        Ok(self.executor.run(target, command).await?.stdout)
    }

    pub async fn server_info(&self) -> AppResult<ServerInfo> {
        self.monitor.server_info().await
    }

    pub async fn cpu(&self) -> AppResult<CpuSnapshot> {
        self.monitor.cpu().await
    }

    pub async fn gpu(&self, target: OperationTarget) -> AppResult<GpuSnapshot> {
        self.monitor.gpu(target).await
    }

    pub async fn disk(&self) -> AppResult<Vec<DiskSnapshot>> {
        self.monitor.disk().await
    }
}
