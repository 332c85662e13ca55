use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use sysdeck::config::{get_config_dir, AppSettings};
use sysdeck::error::{AppError, ErrorKind, SerializableError};
use sysdeck::files::remote::shell_quote;
use sysdeck::monitoring::MetricsEvent;
use sysdeck::ssh::SecretMaterial;
use sysdeck::state::AppState;
use sysdeck::target::OperationTarget;

/// Inspect and operate a server, locally or over SSH
#[derive(Parser)]
#[command(name = "sysdeck")]
#[command(author, version, about)]
struct Cli {
    /// Run against the SSH host instead of this machine
    #[arg(short, long, global = true)]
    remote: bool,

    #[arg(short = 'H', long, global = true)]
    host: Option<String>,

    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[arg(short, long, global = true)]
    user: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    /// Private key file; its contents are used as key material
    #[arg(short, long, global = true)]
    key_file: Option<PathBuf>,

    #[arg(long, global = true)]
    passphrase: Option<String>,

    /// Settings file (default: <config dir>/sysdeck/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls { path: Option<String> },

    /// Download a file to `out`, or to stdout
    Get { path: String, out: Option<PathBuf> },

    /// Upload a local file into a directory
    Put {
        file: PathBuf,
        dest_dir: Option<String>,
    },

    /// Run a command and print its stdout
    ///
    /// A single argument is passed to the shell as a full command line;
    /// several arguments are quoted one by one.
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Static server information
    Info,

    /// CPU usage and top processes
    Cpu,

    /// Disk throughput per mount
    Disk,

    /// GPU utilization and top processes
    Gpu,

    /// Stream metrics as JSON lines
    Watch {
        /// Stop after this many updates
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Open and close a session to test the connection
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        let (report, code) = match e.downcast_ref::<AppError>() {
            Some(app) => (SerializableError::from(app), exit_code(app.kind())),
            None => (
                SerializableError {
                    code: "INTERNAL_ERROR".to_string(),
                    message: sysdeck::logging::sanitize(&format!("{:#}", e)),
                    details: None,
                },
                1,
            ),
        };
        match serde_json::to_string(&report) {
            Ok(json) => eprintln!("{}", json),
            Err(_) => eprintln!("Error: {}", report.message),
        }
        std::process::exit(code);
    }
}

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Config => 2,
        ErrorKind::Connection => 3,
        ErrorKind::Execution => 4,
        ErrorKind::Io => 5,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = match &cli.config {
        Some(path) => AppSettings::load_file(path)?,
        None => AppSettings::load(&get_config_dir()?)?,
    };
    sysdeck::logging::init_tracing(&settings.logging);

    let state = AppState::new(settings)?;
    configure_profile(&state, &cli)?;
    let target = OperationTarget::from_ssh_flag(cli.remote);

    match cli.command {
        Commands::Ls { path } => {
            let entries = state
                .list_directory(target, path.as_deref().unwrap_or_default())
                .await?;
            print_json(&entries)?;
        }
        Commands::Get { path, out } => {
            let stream = state.read_file(target, &path).await?;
            match out {
                Some(out) => {
                    let mut file = tokio::fs::File::create(&out)
                        .await
                        .map_err(|e| AppError::file_io(out.display().to_string(), e))?;
                    let bytes = stream.copy_to(&mut file).await?;
                    print_json(&serde_json::json!({ "path": out, "bytes": bytes }))?;
                }
                None => {
                    stream.copy_to(&mut tokio::io::stdout()).await?;
                }
            }
        }
        Commands::Put { file, dest_dir } => {
            let name = file_name(&file)?;
            let (path, bytes) = state
                .upload(target, dest_dir.as_deref(), &name, &file)
                .await?;
            print_json(&serde_json::json!({ "path": path, "bytes": bytes }))?;
        }
        Commands::Exec { command } => {
            let stdout = state.run_command(target, &command_line(&command)).await?;
            print!("{}", stdout);
        }
        Commands::Info => print_json(&state.server_info().await?)?,
        Commands::Cpu => print_json(&state.cpu().await?)?,
        Commands::Disk => print_json(&state.disk().await?)?,
        Commands::Gpu => print_json(&state.gpu(target).await?)?,
        Commands::Watch { count } => watch(&state, target, count).await?,
        Commands::Check => {
            let profile = state.sessions.profile()?;
            state.check_connection().await?;
            print_json(&serde_json::json!({ "status": "ok", "target": profile.target() }))?;
        }
    }

    Ok(())
}

/// Build the active profile from the connection flags, when a host is given.
fn configure_profile(state: &AppState, cli: &Cli) -> anyhow::Result<()> {
    let Some(host) = cli.host.as_deref() else {
        return Ok(());
    };
    let user = cli
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .context("--user is required with --host")?;

    let secret = match (&cli.password, &cli.key_file) {
        (Some(password), _) => SecretMaterial::Password(password.clone()),
        (None, Some(key_file)) => SecretMaterial::PrivateKey {
            key: std::fs::read_to_string(key_file)
                .map_err(|e| AppError::file_io(key_file.display().to_string(), e))?,
            passphrase: cli.passphrase.clone(),
        },
        // Rejected with a connection error on first use
        (None, None) => SecretMaterial::Password(String::new()),
    };

    state.set_connection_profile(host, cli.port, &user, secret);
    Ok(())
}

async fn watch(state: &AppState, target: OperationTarget, count: Option<usize>) -> anyhow::Result<()> {
    let (handle, mut events) = state.monitor.watch(target);
    let mut updates = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.stop().await;
            }
            event = events.recv() => match event {
                Some(MetricsEvent::Update(sample)) => {
                    println!("{}", serde_json::to_string(&sample)?);
                    updates += 1;
                    if count.is_some_and(|limit| updates >= limit) {
                        handle.stop().await;
                        break;
                    }
                }
                Some(MetricsEvent::ProbeError(message)) => {
                    tracing::warn!("Metrics probe failed: {}", message);
                }
                Some(MetricsEvent::Stopped) | None => break,
            },
        }
    }

    Ok(())
}

fn command_line(args: &[String]) -> String {
    match args {
        [line] => line.clone(),
        words => words
            .iter()
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_single_argument_is_a_command_line() {
        assert_eq!(command_line(&args(&["df -h | tail -n 1"])), "df -h | tail -n 1");
    }

    #[test]
    fn test_separate_arguments_keep_their_boundaries() {
        assert_eq!(
            command_line(&args(&["sh", "-c", "echo a b"])),
            "'sh' '-c' 'echo a b'"
        );
        assert_eq!(command_line(&args(&["echo", "it's"])), "'echo' 'it'\\''s'");
    }

    #[test]
    fn test_exec_collects_trailing_arguments() {
        let cli = Cli::try_parse_from(["sysdeck", "exec", "--", "sh", "-c", "echo a b"]).unwrap();
        match cli.command {
            Commands::Exec { command } => assert_eq!(command, args(&["sh", "-c", "echo a b"])),
            _ => panic!("expected exec"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_quoted_arguments_survive_the_shell() {
        let line = command_line(&args(&["sh", "-c", "printf '%s|' a b"]));
        let output = sysdeck::exec::run_local(&line).await.unwrap();
        assert_eq!(output.stdout, "a|b|");
    }
}
