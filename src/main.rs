use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tab_recorder::dispatcher::{self, TracingIndicator};
use tab_recorder::host::{self, ArtifactSink, TabHost};
use tab_recorder::recorder::{ProcessCapture, RecorderDeps, TabCapture};
use tab_recorder::store::KeyValueStore;
use tab_recorder::{
    create_router, AppState, CdpBrowser, Config, ControlSurface, Dispatcher, JsonFileStore,
    LocalDownloads, SurfaceLauncher,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Tab audio and screenshot recorder
#[derive(Debug, Parser)]
#[command(name = "tab-recorder", version, about)]
struct Cli {
    /// Configuration file, without extension
    #[arg(short, long, default_value = "config/tab-recorder")]
    config: String,

    /// Override the HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Override the browser remote-debugging endpoint
    #[arg(long)]
    cdp_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)?;
    if let Some(port) = cli.port {
        cfg.http.port = port;
    }
    if let Some(endpoint) = cli.cdp_endpoint {
        cfg.cdp.endpoint = endpoint;
    }

    info!("Tab Recorder v{}", env!("CARGO_PKG_VERSION"));
    info!("Browser endpoint: {}", cfg.cdp.endpoint);
    info!("Downloads: {}", cfg.storage.downloads_dir.display());

    // Host
    let events = host::host_events();
    let browser = CdpBrowser::new(&cfg.cdp.endpoint, events.clone())
        .context("Failed to create browser client")?;
    browser.tabs().await.context("Browser remote-debugging endpoint is not reachable")?;
    let _tab_watch = browser.watch_tabs(cfg.cdp.poll_interval());

    let store: Arc<dyn KeyValueStore> = Arc::new(
        JsonFileStore::open(&cfg.storage.store_path)
            .await
            .with_context(|| format!("Failed to open store {}", cfg.storage.store_path.display()))?,
    );
    let tabs: Arc<dyn TabHost> = Arc::new(browser.clone());
    let sink: Arc<dyn ArtifactSink> = Arc::new(LocalDownloads::new(&cfg.storage.downloads_dir));
    let capture: Arc<dyn TabCapture> = Arc::new(ProcessCapture::new((&cfg.capture).into()));

    // Dispatcher
    let dispatcher = Dispatcher::new(
        Arc::new(browser),
        Arc::new(TracingIndicator),
        Arc::clone(&store),
    );
    let (bus, dispatcher_task) = dispatcher::spawn(dispatcher, &events);

    // Recorder surfaces and the control surface
    let launcher = SurfaceLauncher::new(
        RecorderDeps {
            bus: bus.clone(),
            store: Arc::clone(&store),
            tabs,
            capture,
            sink,
        },
        cfg.recorder.page_url.clone(),
    );
    let _launcher_watch = launcher.watch_host(&events);
    let control = ControlSurface::new(bus, store, Arc::new(launcher));

    // HTTP
    let app = create_router(AppState::new(control));
    let addr: SocketAddr = format!("{}:{}", cfg.http.bind, cfg.http.port)
        .parse()
        .context("Invalid HTTP bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Control API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutting down");
    dispatcher_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
    }
}
