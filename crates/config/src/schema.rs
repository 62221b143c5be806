//! Config schema for the bridge.
use std::{path::PathBuf, time::Duration};

use {
    serde::{Deserialize, Serialize},
    wabridge_protocol::Routing,
};

/// Display name applied when neither config nor `BOT_NAME` provide one.
pub const DEFAULT_DISPLAY_NAME: &str = "Awara";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub identity: IdentityConfig,
    pub session: SessionConfig,
    pub sidecar: SidecarConfig,
    pub lifecycle: LifecycleConfig,
    pub output: OutputConfig,
    pub tasks: TasksConfig,
    pub media: MediaConfig,
    pub scrapers: ScrapersConfig,
}

/// Account identity announced once connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Push name applied when the account has none yet.
    pub display_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_name: DEFAULT_DISPLAY_NAME.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session store handed to the platform sidecar. Defaults to `bot.db`
    /// in the data directory.
    pub store_path: Option<PathBuf>,
}

/// Platform sidecar settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// WebSocket URL of an already running sidecar. When set, no process is
    /// launched.
    pub url: Option<String>,
    pub port: u16,
    /// Directory containing the sidecar package.
    pub dir: Option<PathBuf>,
    pub auto_start: bool,
    /// Connection attempts (one second apart) while the sidecar boots.
    pub connect_attempts: u32,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            url: None,
            port: 3710,
            dir: None,
            auto_start: true,
            connect_attempts: 10,
        }
    }
}

impl SidecarConfig {
    /// URL the bridge connects to.
    #[must_use]
    pub fn ws_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("ws://127.0.0.1:{}/ws", self.port))
    }
}

/// Connection lifecycle timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub presence_delay_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            presence_delay_secs: 3,
            reconnect_delay_secs: 5,
            max_reconnect_attempts: 5,
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn presence_delay(&self) -> Duration {
        Duration::from_secs(self.presence_delay_secs)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub routing: Routing,
}

/// Concurrency ceiling for network-bound commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub max_concurrent: usize,
    /// How long shutdown waits for cancelled tasks to wind down.
    pub shutdown_grace_secs: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            shutdown_grace_secs: 5,
        }
    }
}

impl TasksConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Explicit `ffprobe` binary; looked up on `PATH` when unset.
    pub ffprobe_path: Option<PathBuf>,
    pub http_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: None,
            http_timeout_secs: 60,
        }
    }
}

impl MediaConfig {
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// External download, enhancement and chat services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapersConfig {
    pub tikwm_url: String,
    pub ytb2mp4_url: String,
    pub savetube_url: String,
    pub vyro_url: String,
    pub gpt_url: String,
    /// System message prepended to chat histories that lack one.
    pub chat_system_prompt: String,
    pub default_chat_model: String,
    pub request_timeout_secs: u64,
}

impl Default for ScrapersConfig {
    fn default() -> Self {
        Self {
            tikwm_url: "https://www.tikwm.com".into(),
            ytb2mp4_url: "https://ytb2mp4.com".into(),
            savetube_url: "https://media.savetube.me/api".into(),
            vyro_url: "https://inferenceengine.vyro.ai".into(),
            gpt_url: "https://nexra.aryahcr.cc/api/chat".into(),
            chat_system_prompt: "Kamu adalah Alexa, asisten WhatsApp yang cerdas...".into(),
            default_chat_model: "GPT-4".into(),
            request_timeout_secs: 30,
        }
    }
}

impl ScrapersConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
