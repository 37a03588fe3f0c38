//! live2d-stage - Live2D avatar stage service
//!
//! Main entry point for the CLI application.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use live2d_stage::{
    config::Config,
    error::WebError,
    live2d::{
        interaction::EventCanvas, native::Live2dModule, registry::ModelInfo, HeadlessModule,
    },
    web::WebServer,
    Live2dApp,
};

/// live2d-stage - Live2D avatar stage service
#[derive(Parser, Debug)]
#[command(name = "live2d-stage", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Live2D assets directory (overrides config)
    #[arg(short, long)]
    assets_dir: Option<PathBuf>,

    /// HTTP server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Disable HTTP server
    #[arg(long)]
    no_http: bool,

    /// Run without the Live2D native module
    #[arg(long)]
    no_native: bool,

    /// List registered characters and exit
    #[arg(long)]
    list_models: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", live2d_stage::NAME, live2d_stage::VERSION);

    let config = load_config(&args)?;

    if args.list_models {
        list_models(&config);
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config, args.no_native))?;

    info!("live2d-stage stopped");
    Ok(())
}

/// Load configuration and apply CLI overrides
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if let Some(ref path) = args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    if let Some(ref dir) = args.assets_dir {
        config.live2d.assets_dir = dir.clone();
    }
    if args.no_http {
        config.http.enabled = false;
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }

    config.validate()?;

    info!("Assets: {} ({:?})", config.live2d.assets_root(), config.live2d.source);
    info!("Characters: {}", config.characters.len());
    info!("HTTP server: {}", config.http.enabled);

    Ok(config)
}

fn list_models(config: &Config) {
    let root = config.live2d.assets_root();

    println!("Registered Live2D characters:\n");
    for character in &config.characters {
        let info = ModelInfo::from_character(&root, character);
        let marker = if config.live2d.default_model.as_deref() == Some(character.name.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "  {} {} [{}] {} ({})",
            marker,
            character.name,
            info.id,
            info.model_json_path(),
            info.kind
        );
    }
}

async fn run(config: Config, no_native: bool) -> anyhow::Result<()> {
    let module: Option<Arc<dyn Live2dModule>> = if no_native {
        None
    } else {
        Some(Arc::new(HeadlessModule::new()))
    };

    let app = Live2dApp::new(config.clone(), module);

    // Start HTTP server if enabled
    let http_task = if config.http.enabled {
        let http_app = Arc::clone(&app);
        Some(tokio::spawn(async move {
            if let Err(e) = run_http_server(http_app).await {
                error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    let (width, height) = (config.live2d.canvas_width, config.live2d.canvas_height);
    let canvas = Arc::new(EventCanvas::new(width, height));

    if app.manager.initialize_viewer(canvas, width, height) {
        let summary = app.manager.load_all_models().settled().await;
        info!(
            "{} Live2D models loaded, {} failed",
            summary.loaded.len(),
            summary.failed.len()
        );
        for (name, reason) in &summary.failed {
            warn!("{}: {}", name, reason);
        }

        app.manager.start_render();
        app.manager.attach_interaction();
    } else {
        warn!("Live2D viewer unavailable, running without rendering");
    }

    shutdown_signal().await;
    info!("Shutdown signal received");

    app.manager.detach_interaction();
    app.manager.cancel_render();
    app.manager.release_viewer();
    app.shutdown();

    if let Some(task) = http_task {
        if let Err(e) = task.await {
            error!("HTTP server task failed: {}", e);
        }
    }

    Ok(())
}

async fn run_http_server(app: Arc<Live2dApp>) -> anyhow::Result<()> {
    let config = app.config.read().await;
    let http_config = config.http.clone();
    let live2d_config = config.live2d.clone();
    drop(config);

    let web_server = WebServer::new(Arc::clone(&app), &http_config, &live2d_config);

    let addr = format!("{}:{}", http_config.host, http_config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| WebError::Bind(format!("{}: {}", addr, e)))?;
    info!("HTTP server listening on {}", addr);

    let mut shutdown_rx = app.subscribe_shutdown();

    axum::serve(listener, web_server.router())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| WebError::Startup(e.to_string()))?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
