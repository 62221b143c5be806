use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    wabridge_config::BridgeConfig,
    wabridge_gateway::{Bridge, TaskPool, spawn_output},
    wabridge_media::MediaPipeline,
    wabridge_protocol::{EventSink, Routing},
    wabridge_scrapers::Services,
    wabridge_whatsapp::{
        LifecycleManager, Session, SidecarConnection, SidecarLaunch, SidecarProcess,
        find_sidecar_dir, start_sidecar,
    },
};

/// How long the output writer gets to drain after shutdown.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(
    name = "wabridge",
    version,
    about = "WhatsApp bridge driven by sentinel-framed commands on stdin"
)]
struct Cli {
    /// Config file (toml, yaml or json). Discovered when omitted.
    #[arg(long, env = "WABRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Connect to an already running sidecar instead of starting one.
    #[arg(long, env = "WABRIDGE_SIDECAR_URL")]
    sidecar_url: Option<String>,

    /// Session store path (overrides config value).
    #[arg(long)]
    store: Option<PathBuf>,

    /// Output routing: `single` (everything on stdout) or `split`.
    #[arg(long, env = "WABRIDGE_ROUTING")]
    routing: Option<Routing>,
}

/// Logs always go to stderr; stdout belongs to the protocol.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let mut config = wabridge_config::load_or_default(cli.config.as_deref())?;
    wabridge_config::apply_env_overrides(&mut config);

    if let Some(url) = &cli.sidecar_url {
        config.sidecar.url = Some(url.clone());
    }
    if let Some(store) = &cli.store {
        config.session.store_path = Some(store.clone());
    }
    if let Some(routing) = cli.routing {
        config.output.routing = routing;
    }
    Ok(config)
}

async fn launch_sidecar(config: &BridgeConfig) -> anyhow::Result<Option<SidecarProcess>> {
    if config.sidecar.url.is_some() || !config.sidecar.auto_start {
        return Ok(None);
    }
    let dir = find_sidecar_dir(config.sidecar.dir.as_deref())?;
    let store_path = config.session_store_path();
    if let Some(parent) = store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating session store directory {}", parent.display()))?;
    }

    let mut launch = SidecarLaunch::new(dir, store_path);
    launch.port = config.sidecar.port;
    Ok(Some(start_sidecar(&launch).await?))
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for interrupt");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("interrupt received"),
        () = terminate => info!("terminate signal received"),
    }
}

async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let url = config.sidecar.ws_url();
    let connection = SidecarConnection::connect_with_retry(&url, config.sidecar.connect_attempts)
        .await
        .with_context(|| format!("connecting to platform sidecar at {url}"))?;

    let routing = config.output.routing;
    let (sink, writer) = spawn_output(tokio::io::stdout(), tokio::io::stderr(), routing);
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    let session = Arc::new(Session::new(Arc::new(connection)));
    let lifecycle = Arc::new(LifecycleManager::new(
        session,
        Arc::clone(&sink),
        config.lifecycle.clone(),
        config.identity.display_name.clone(),
    ));
    let bridge = Bridge::new(
        lifecycle,
        MediaPipeline::new(&config.media)?,
        Services::from_config(&config.scrapers)?,
        TaskPool::from_config(&config.tasks),
        sink,
    );

    info!(?routing, "bridge ready");
    let result = bridge.run(tokio::io::stdin(), shutdown_signal()).await;
    drop(bridge);

    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!("output writer did not drain in time");
    }
    result.context("bridge stopped with an error")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "wabridge starting");
    let config = load_config(&cli)?;

    let sidecar = launch_sidecar(&config).await?;
    let result = run(config).await;
    if let Some(mut process) = sidecar
        && let Err(e) = process.stop().await
    {
        warn!(error = %e, "failed to stop platform sidecar");
    }
    result?;

    info!("wabridge stopped");
    Ok(())
}
