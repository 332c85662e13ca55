use super::{CommandOutput, ConnectionProfile, Credential, RemoteSession, SessionConnector};
use crate::config::SshSettings;
use crate::error::{AppError, AppResult};
use crate::logging::sanitize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ssh2::{CheckResult, HostKeyType, KnownHostFileKind, KnownHostKeyFormat, Session as Ssh2Session, Sftp};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Known hosts policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnownHostsPolicy {
    /// Host must already be present in known_hosts
    Strict,
    /// Trust on first use, reject changed keys
    #[default]
    AcceptNew,
    /// Skip verification entirely
    AcceptAll,
}

/// Opens libssh2 sessions
pub struct Ssh2Connector {
    settings: SshSettings,
    known_hosts_path: PathBuf,
}

impl Ssh2Connector {
    pub fn new(settings: SshSettings, known_hosts_path: PathBuf) -> Self {
        Self {
            settings,
            known_hosts_path,
        }
    }

    /// TCP connect, handshake, host key check and authentication
    fn establish(&self, profile: &ConnectionProfile) -> AppResult<Ssh2Session> {
        tracing::info!("Connecting to {}", profile.target());

        let connect_timeout = Duration::from_secs(self.settings.connect_timeout_secs);
        let tcp = connect_tcp(&profile.host, profile.port, connect_timeout)?;
        tcp.set_nodelay(true)
            .map_err(|e| AppError::Connection(format!("Failed to configure socket: {}", e)))?;

        let mut session = Ssh2Session::new()
            .map_err(|e| AppError::Connection(format!("Failed to create SSH session: {}", e)))?;
        session.set_tcp_stream(tcp);
        // Bound the handshake and auth by the connect timeout, then switch to
        // the operation timeout (0 = wait forever)
        session.set_timeout(timeout_ms(connect_timeout));
        if self.settings.keepalive_interval > 0 {
            session.set_keepalive(true, self.settings.keepalive_interval);
        }

        session
            .handshake()
            .map_err(|e| AppError::Connection(format!("SSH handshake failed: {}", e)))?;

        self.verify_host_key(&session, profile)?;
        authenticate(&session, profile)?;

        session.set_timeout(self.settings.operation_timeout_ms);
        tracing::info!("SSH authentication successful for {}", profile.target());
        Ok(session)
    }

    /// Verify the host key against known_hosts according to policy
    fn verify_host_key(&self, session: &Ssh2Session, profile: &ConnectionProfile) -> AppResult<()> {
        let policy = self.settings.known_hosts_policy;
        if policy == KnownHostsPolicy::AcceptAll {
            tracing::debug!("Host key verification disabled for {}", profile.host);
            return Ok(());
        }

        let (key, key_type) = session
            .host_key()
            .ok_or_else(|| AppError::Connection("No host key received".to_string()))?;
        let fingerprint = compute_sha256_fingerprint(key);

        let mut known_hosts = session
            .known_hosts()
            .map_err(|e| AppError::Connection(format!("Failed to create known_hosts: {}", e)))?;
        if self.known_hosts_path.exists() {
            known_hosts
                .read_file(&self.known_hosts_path, KnownHostFileKind::OpenSSH)
                .map_err(|e| AppError::Connection(format!("Failed to read known_hosts: {}", e)))?;
        }

        match known_hosts.check_port(&profile.host, profile.port, key) {
            CheckResult::Match => {
                tracing::debug!("Host key matched for {}:{}", profile.host, profile.port);
                Ok(())
            }
            CheckResult::NotFound if policy == KnownHostsPolicy::AcceptNew => {
                tracing::info!(
                    "Trusting new {} host key for {}:{} ({})",
                    key_type_name(key_type),
                    profile.host,
                    profile.port,
                    fingerprint
                );
                known_hosts
                    .add(
                        &known_hosts_entry(&profile.host, profile.port),
                        key,
                        &format!("Added by sysdeck on {}", chrono::Utc::now()),
                        KnownHostKeyFormat::from(key_type),
                    )
                    .map_err(|e| AppError::Connection(format!("Failed to add known host: {}", e)))?;

                if let Some(parent) = self.known_hosts_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                known_hosts
                    .write_file(&self.known_hosts_path, KnownHostFileKind::OpenSSH)
                    .map_err(|e| AppError::Connection(format!("Failed to write known_hosts: {}", e)))?;
                Ok(())
            }
            CheckResult::NotFound => Err(AppError::Connection(format!(
                "Unknown host key for {}:{} ({})",
                profile.host, profile.port, fingerprint
            ))),
            CheckResult::Mismatch => {
                tracing::error!(
                    "HOST KEY MISMATCH for {}:{}! Possible MITM attack!",
                    profile.host,
                    profile.port
                );
                Err(AppError::Connection(format!(
                    "Host key for {}:{} has changed ({}); remove the old entry from {} if this is expected",
                    profile.host,
                    profile.port,
                    fingerprint,
                    self.known_hosts_path.display()
                )))
            }
            CheckResult::Failure => Err(AppError::Connection("Failed to check known hosts".to_string())),
        }
    }
}

impl SessionConnector for Ssh2Connector {
    fn connect(&self, profile: &ConnectionProfile) -> AppResult<Box<dyn RemoteSession>> {
        let session = self.establish(profile)?;
        Ok(Box::new(Ssh2RemoteSession { session, sftp: None }))
    }
}

/// A live libssh2 session; the SFTP subsystem is opened on first use.
pub struct Ssh2RemoteSession {
    session: Ssh2Session,
    sftp: Option<Sftp>,
}

impl Ssh2RemoteSession {
    fn sftp(&mut self) -> AppResult<&Sftp> {
        if self.sftp.is_none() {
            let sftp = self
                .session
                .sftp()
                .map_err(|e| AppError::Execution(format!("Failed to open SFTP: {}", e)))?;
            self.sftp = Some(sftp);
        }
        self.sftp
            .as_ref()
            .ok_or_else(|| AppError::Internal("SFTP subsystem unavailable".to_string()))
    }
}

impl RemoteSession for Ssh2RemoteSession {
    fn exec(&mut self, command: &str) -> AppResult<CommandOutput> {
        let safe_command = sanitize(command);
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| AppError::Execution(format!("Failed to open channel: {}", e)))?;
        channel
            .exec(command)
            .map_err(|e| AppError::Execution(format!("Failed to exec '{}': {}", safe_command, e)))?;

        let mut stdout = Vec::new();
        channel
            .read_to_end(&mut stdout)
            .map_err(|e| AppError::Execution(format!("Output stream of '{}' failed: {}", safe_command, e)))?;
        let mut stderr = Vec::new();
        channel
            .stderr()
            .read_to_end(&mut stderr)
            .map_err(|e| AppError::Execution(format!("Error stream of '{}' failed: {}", safe_command, e)))?;

        channel
            .wait_close()
            .map_err(|e| AppError::Execution(format!("Channel close for '{}' failed: {}", safe_command, e)))?;
        let exit_status = channel
            .exit_status()
            .map_err(|e| AppError::Execution(format!("No exit status for '{}': {}", safe_command, e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    fn open_read(&mut self, path: &str) -> AppResult<Box<dyn Read + '_>> {
        let file = self
            .sftp()?
            .open(Path::new(path))
            .map_err(|e| AppError::transfer(path, format!("Failed to open file: {}", e)))?;
        Ok(Box::new(file))
    }

    fn open_write(&mut self, path: &str) -> AppResult<Box<dyn Write + '_>> {
        let file = self
            .sftp()?
            .create(Path::new(path))
            .map_err(|e| AppError::transfer(path, format!("Failed to create file: {}", e)))?;
        Ok(Box::new(file))
    }

    fn close(&mut self) -> AppResult<()> {
        self.sftp = None;
        self.session
            .disconnect(None, "sysdeck: operation complete", None)
            .map_err(|e| AppError::Connection(format!("Disconnect failed: {}", e)))
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Duration) -> AppResult<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| AppError::Connection(format!("Cannot resolve {}:{}: {}", host, port, e)))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(e) => last_error = Some(e),
        }
    }

    Err(AppError::Connection(match last_error {
        Some(e) => format!("TCP connect to {}:{} failed: {}", host, port, e),
        None => format!("No addresses found for {}", host),
    }))
}

/// Authenticate with the SSH server
fn authenticate(session: &Ssh2Session, profile: &ConnectionProfile) -> AppResult<()> {
    match profile.credential()? {
        Credential::Password(password) => {
            session
                .userauth_password(&profile.username, password)
                .map_err(|_| AppError::Connection("Password authentication failed".to_string()))?;
        }
        Credential::PrivateKey { key, passphrase } => {
            // Write key to a private temp file for the duration of auth only
            let key_file_path = std::env::temp_dir().join(format!("sysdeck_key_{}", uuid::Uuid::new_v4()));
            std::fs::write(&key_file_path, key)
                .map_err(|e| AppError::Connection(format!("Failed to write temp key file: {}", e)))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o600);
                let _ = std::fs::set_permissions(&key_file_path, perms);
            }

            let auth_result = session.userauth_pubkey_file(&profile.username, None, &key_file_path, passphrase);

            // Always delete the temp key file
            let _ = std::fs::remove_file(&key_file_path);

            auth_result.map_err(|e| {
                let msg = e.to_string().to_lowercase();
                if msg.contains("passphrase") || msg.contains("decrypt") || msg.contains("parse") {
                    AppError::Connection(
                        "Invalid passphrase or key format. Ensure the key is in PEM or OpenSSH format.".to_string(),
                    )
                } else {
                    AppError::Connection("Private key not accepted by server".to_string())
                }
            })?;
        }
    }

    if !session.authenticated() {
        return Err(AppError::Connection("Authentication failed".to_string()));
    }
    Ok(())
}

fn timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// known_hosts host field; non-default ports use the `[host]:port` form
fn known_hosts_entry(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

fn key_type_name(key_type: HostKeyType) -> &'static str {
    match key_type {
        HostKeyType::Rsa => "ssh-rsa",
        HostKeyType::Dss => "ssh-dss",
        HostKeyType::Ecdsa256 => "ecdsa-sha2-nistp256",
        HostKeyType::Ecdsa384 => "ecdsa-sha2-nistp384",
        HostKeyType::Ecdsa521 => "ecdsa-sha2-nistp521",
        _ => "unknown",
    }
}

/// Compute SHA256 fingerprint of a key
fn compute_sha256_fingerprint(key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key);
    let result = hasher.finalize();

    // Format as SHA256:base64
    let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, result);
    format!("SHA256:{}", b64.trim_end_matches('='))
}
