use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fulcrum_core::cache::{self, ResponseCacher};
use fulcrum_core::config::{AppConfig, CliOverrides};
use fulcrum_core::matcher::Matcher;
use fulcrum_core::metrics;
use fulcrum_core::proxy::ProxyEngine;
use fulcrum_core::refresh::Refresher;
use server::router::{self, AppState};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Caching JSON-RPC reverse proxy.
#[derive(Parser)]
#[command(name = "fulcrum", version, about)]
struct Cli {
    /// Config file, YAML format
    #[arg(short, long, env = "PROXY_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// JWT secret, overrides the config file
    #[arg(short = 's', long, env = "PROXY_JWT_SECRET")]
    jwt_secret: Option<String>,

    /// Upstream RPC endpoint, overrides the config file
    #[arg(short, long, env = "PROXY_URL")]
    proxy_url: Option<String>,

    /// Redis URI, overrides the config file
    #[arg(short, long, env = "REDIS_URI")]
    redis_uri: Option<String>,
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        if let Some(path) = &self.config {
            return path.clone();
        }
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE)
    }
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

/// Waits for ctrl-c or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    error!(error = %err, "cannot install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_path();
    let config = AppConfig::load(
        &config_path.to_string_lossy(),
        CliOverrides {
            jwt_secret: cli.jwt_secret,
            proxy_url: cli.proxy_url,
            redis_uri: cli.redis_uri,
        },
    )
    .with_context(|| format!("cannot load config file {}", config_path.display()))?;

    init_logging(&config);
    metrics::install_recorder().context("cannot install metrics recorder")?;

    let upstream: url::Url = config
        .proxy_url
        .parse()
        .context("cannot parse proxy_url")?;
    info!(upstream = %upstream, "initializing proxy server");

    let store = cache::from_config(&config)
        .await
        .context("cannot initialize cache store")?;
    let matcher = Arc::new(Matcher::from_config(&config.cache_methods));
    let cacher = Arc::new(ResponseCacher::new(Arc::clone(&store), matcher));
    let engine = Arc::new(ProxyEngine::new(
        Arc::clone(&cacher),
        upstream,
        config.debug_http_request,
        config.debug_http_response,
    ));
    let refresher = Arc::new(
        Refresher::from_config(&config, Arc::clone(&cacher))
            .context("cannot initialize refresher")?,
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    tokio::spawn(Arc::clone(&refresher).run_method_refresher(
        shutdown_tx.subscribe(),
        Duration::from_secs(config.update_custom_cache_period),
    ));
    tokio::spawn(Arc::clone(&refresher).run_cache_refresher(
        shutdown_tx.subscribe(),
        Duration::from_secs(config.update_user_cache_period),
    ));

    let app = router::build(AppState::new(
        Arc::clone(&engine),
        config.jwt_secret_bytes(),
        &config.jwt_alg,
    ));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(address = %addr, "listening");

    let mut server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.recv().await;
        })
        .await
    });

    shutdown_signal().await;
    info!("caught shutdown signal, stopping");
    let _ = shutdown_tx.send(());

    if refresher
        .stop_with_timeout(2, Duration::from_secs(config.shutdown_timeout))
        .await
    {
        info!("shut down gracefully");
    } else {
        info!("shut down forcibly");
    }

    if let Err(err) = store.close().await {
        error!(error = %err, "cannot close cache store");
    }

    server.await?.context("server error")?;
    info!("server stopped");
    Ok(())
}
