//! Launching and stopping the platform sidecar process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
    },
    tracing::{Level, debug, error, info, warn},
};

use crate::{
    error::{Error, Result},
    sidecar::DEFAULT_SIDECAR_PORT,
};

const SIDECAR_DIR_ENV: &str = "WABRIDGE_SIDECAR_DIR";
const STOP_GRACE: Duration = Duration::from_secs(5);
const STARTUP_PROBE_DELAY: Duration = Duration::from_millis(500);

/// Settings for one sidecar launch.
#[derive(Debug, Clone)]
pub struct SidecarLaunch {
    /// Directory containing the sidecar `package.json`.
    pub dir: PathBuf,
    pub port: u16,
    /// Session store the sidecar reads and persists credentials in.
    pub store_path: PathBuf,
}

impl SidecarLaunch {
    pub fn new(dir: PathBuf, store_path: PathBuf) -> Self {
        Self {
            dir,
            port: DEFAULT_SIDECAR_PORT,
            store_path,
        }
    }
}

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, then kill if the process is still around after a grace period.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping platform sidecar");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill().await;
        }

        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "platform sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar process"),
            Err(_) => {
                warn!("sidecar did not exit gracefully, killing");
                self.child.kill().await?;
            },
        }
        Ok(())
    }
}

/// Locate the sidecar package.
///
/// Searches in order:
/// 1. Explicit path if provided
/// 2. `WABRIDGE_SIDECAR_DIR`
/// 3. `sidecar/` next to or one level above the executable
/// 4. `sidecar/` under the working directory
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let has_package = |dir: &Path| dir.join("package.json").exists();

    if let Some(path) = explicit {
        if has_package(path) {
            return Ok(path.to_path_buf());
        }
        return Err(Error::message(format!(
            "sidecar directory missing package.json: {}",
            path.display()
        )));
    }

    if let Ok(dir) = std::env::var(SIDECAR_DIR_ENV) {
        let path = PathBuf::from(&dir);
        if has_package(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} set but package.json not found");
    }

    let exe_candidates = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .map(|dir| vec![dir.join("sidecar"), dir.join("../sidecar")])
        .unwrap_or_default();

    exe_candidates
        .into_iter()
        .chain([PathBuf::from("sidecar")])
        .find(|dir| has_package(dir))
        .map(|dir| dir.canonicalize().unwrap_or(dir))
        .ok_or_else(|| {
            Error::message(format!(
                "platform sidecar not found; set {SIDECAR_DIR_ENV} or sidecar.dir in the config"
            ))
        })
}

/// Build (if needed) and start the sidecar.
pub async fn start_sidecar(launch: &SidecarLaunch) -> Result<SidecarProcess> {
    let dir = &launch.dir;
    if !dir.join("dist/index.js").exists() {
        info!(path = %dir.display(), "building platform sidecar");
        if !dir.join("node_modules").exists() {
            run_npm(dir, &["install"]).await?;
        }
        run_npm(dir, &["run", "build"]).await?;
    }

    info!(path = %dir.display(), port = launch.port, "starting platform sidecar");

    let mut child = Command::new("node")
        .arg("dist/index.js")
        .current_dir(dir)
        .env("WABRIDGE_SIDECAR_PORT", launch.port.to_string())
        .env("WABRIDGE_SESSION_STORE", &launch.store_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::external("failed to spawn sidecar process", e))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout, Level::INFO));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr, Level::WARN));
    }

    tokio::time::sleep(STARTUP_PROBE_DELAY).await;
    if let Some(status) = child.try_wait()? {
        return Err(Error::message(format!(
            "sidecar process exited immediately with status: {status}"
        )));
    }

    info!(port = launch.port, "platform sidecar started");
    Ok(SidecarProcess {
        child,
        port: launch.port,
    })
}

async fn run_npm(dir: &Path, args: &[&str]) -> Result<()> {
    info!(path = %dir.display(), ?args, "running npm for sidecar");
    let output = Command::new("npm")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| Error::external("failed to run npm", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::message(format!(
            "npm {} failed: {stderr}",
            args.join(" ")
        )));
    }
    Ok(())
}

async fn forward_output(stream: impl AsyncRead + Unpin, plain_level: Level) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let (level, msg) = classify_log_line(&line, plain_level);
        if level == Level::DEBUG {
            debug!(target: "whatsapp_sidecar", "{msg}");
        } else if level == Level::INFO {
            info!(target: "whatsapp_sidecar", "{msg}");
        } else if level == Level::WARN {
            warn!(target: "whatsapp_sidecar", "{msg}");
        } else {
            error!(target: "whatsapp_sidecar", "{msg}");
        }
    }
}

/// Map a pino JSON log line to a level and message. Non-JSON lines keep
/// `plain_level` and their raw text.
fn classify_log_line(line: &str, plain_level: Level) -> (Level, String) {
    if line.starts_with('{')
        && let Ok(log) = serde_json::from_str::<serde_json::Value>(line)
    {
        let level = match log.get("level").and_then(serde_json::Value::as_u64) {
            Some(10 | 20) => Level::DEBUG,
            Some(30) | None => Level::INFO,
            Some(40) => Level::WARN,
            Some(_) => Level::ERROR,
        };
        let msg = log
            .get("msg")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(line)
            .to_owned();
        return (level, msg);
    }
    (plain_level, line.to_owned())
}
