//! Stonegate - S3-compatible object storage gateway

use axum::http::Request;
use axum::{middleware, routing::get, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stonegate::admin::rest::{
    admin_bucket_delete, admin_bucket_get, admin_bucket_post, admin_bucket_put,
};
use stonegate::api::auth::authorize_middleware;
use stonegate::api::handlers::{
    auth_check, bucket_delete, bucket_get, bucket_head, bucket_post, bucket_put, health_check,
    list_buckets, object_delete, object_get, object_head, object_post, object_put, AppState,
};
use stonegate::api::host::rewrite_host_style;
use stonegate::api::log::request_log_middleware;
use stonegate::config::Config;
use stonegate::iam::UserDb;
use stonegate::multipart::MultipartStore;
use stonegate::storage::FilesystemBackend;
use tokio::net::TcpListener;
use tokio::signal;
use tower::Layer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Stonegate — S3-compatible object storage gateway
#[derive(Parser, Debug)]
#[command(name = "stonegate")]
#[command(version, author, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Priority: RUST_LOG > STONEGATE_LOG_LEVEL > --verbose > default
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("STONEGATE_LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("stonegate=trace,tower_http=trace")
            } else {
                EnvFilter::new("stonegate=info,tower_http=info")
            }
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    info!("Starting Stonegate v{}", env!("CARGO_PKG_VERSION"));
    info!("  Listen address: {}", config.listen_addr);
    info!("  Data directory: {:?}", config.data_dir);
    if config.host_suffix.is_empty() {
        info!("  Addressing: path-style only");
    } else {
        info!(
            "  Addressing: path-style + virtual-host (*.{})",
            config.host_suffix
        );
    }
    info!("  Listing ceiling: {} keys", config.max_keys_ceiling);
    if config.anonymous_enabled {
        info!("  Anonymous access: enabled (per-op ACLs apply)");
    } else {
        info!("  Anonymous access: disabled (unsigned requests refused)");
    }

    let backend = FilesystemBackend::new(config.data_dir.clone()).await?;
    let users = Arc::new(UserDb::open(config.iam_path())?);
    if users.list_user_ids().is_empty() {
        warn!("  User database is empty — create users with `stonegate-admin user create`");
    }

    let multipart = Arc::new(MultipartStore::new());
    // Abandoned uploads are dropped after a day.
    spawn_periodic(Duration::from_secs(3600), {
        let mp = multipart.clone();
        move || mp.cleanup_expired(Duration::from_secs(24 * 3600))
    });

    let state = Arc::new(AppState {
        backend: Box::new(backend),
        users,
        multipart,
        config: config.clone(),
    });

    // S3 API paths:
    //   GET  /                    - list buckets
    //   PUT  /{bucket}            - create bucket (?acl to set ACLs)
    //   GET  /{bucket}            - list objects (?acl, ?logging, ?uploads, ?uploadId)
    //   POST /{bucket}            - form upload, or ?delete for multi-object delete
    //   PUT  /{bucket}/{key...}   - upload object (copy / part upload variants)
    //   GET  /{bucket}/{key...}   - download object
    //   POST /{bucket}/{key...}   - initiate/complete multipart upload
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/auth", get(auth_check))
        .route(
            "/admin/bucket",
            get(admin_bucket_get)
                .put(admin_bucket_put)
                .post(admin_bucket_post)
                .delete(admin_bucket_delete),
        )
        .route("/", get(list_buckets).head(list_buckets))
        .route(
            "/:bucket/*key",
            get(object_get)
                .put(object_put)
                .delete(object_delete)
                .head(object_head)
                .post(object_post),
        )
        .route(
            "/:bucket",
            get(bucket_get)
                .put(bucket_put)
                .delete(bucket_delete)
                .head(bucket_head)
                .post(bucket_post),
        )
        .route(
            "/:bucket/",
            get(bucket_get)
                .put(bucket_put)
                .delete(bucket_delete)
                .head(bucket_head)
                .post(bucket_post),
        )
        .layer(TraceLayer::new_for_http())
        // access log runs inside auth so the bound identity is visible
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_log_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            authorize_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    // Virtual-host rewrite must run before routing, so it wraps the
    // whole router rather than sitting in its layer stack.
    let host_suffix = config.host_suffix.clone();
    let app = tower::util::MapRequestLayer::new(move |req: Request<axum::body::Body>| {
        rewrite_host_style(req, &host_suffix)
    })
    .layer(app);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("Stonegate listening on http://{}", config.listen_addr);
    axum::serve(
        listener,
        axum::ServiceExt::<Request<axum::body::Body>>::into_make_service_with_connect_info::<
            SocketAddr,
        >(app),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Spawn a background task that runs `f` every `interval`.
fn spawn_periodic(interval: Duration, f: impl Fn() + Send + 'static) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            f();
        }
    });
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
