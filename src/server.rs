use anyhow::{Context, Result};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::graphql::{self, FleetgateSchema};
use crate::api::rest::{self, AppState};
use crate::config::Config;
use crate::domain::control_plane::ControlPlane;
use crate::domain::remote::SshExecutor;

/// Install the global subscriber. `RUST_LOG` wins over `level`; the daemon
/// logs JSON, CLI commands log compact lines to stderr.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().with_target(false).init();
    }
}

pub async fn run(config: Config) -> Result<()> {
    init_tracing(&config.daemon.log_level, true);

    info!(version = env!("CARGO_PKG_VERSION"), "fleetgate daemon starting");

    let daemon = config.daemon.clone();
    let executor = Arc::new(SshExecutor::new(&config.remote));
    let plane = Arc::new(ControlPlane::new(config, executor)?);

    // Serve the last persisted report until the first run finishes
    plane.load_from_disk().await;

    let app_state = AppState {
        plane: plane.clone(),
    };

    let schema = graphql::build_schema(plane.clone());
    let graphql_router = Router::new()
        .route("/graphql", get(graphql_playground).post(graphql_handler))
        .with_state(schema);

    let app = rest::router(app_state)
        .merge(graphql_router)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&daemon.http_addr)
        .await
        .with_context(|| format!("binding to {}", daemon.http_addr))?;

    info!(addr = %daemon.http_addr, "HTTP server listening");

    // Initial run in the background; the daemon serves immediately
    {
        let plane = plane.clone();
        tokio::spawn(async move {
            info!("running initial readiness checks");
            match plane.refresh().await {
                Ok(stored) => info!(
                    checksum = %stored.checksum,
                    ready = stored.ready(),
                    "initial readiness checks completed"
                ),
                Err(e) => warn!(error = %e, "initial readiness checks failed"),
            }
        });
    }

    if daemon.refresh_interval_secs > 0 {
        let plane = plane.clone();
        let interval_secs = daemon.refresh_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            // first tick fires immediately; the initial run covers it
            interval.tick().await;
            loop {
                interval.tick().await;
                match plane.refresh().await {
                    Ok(stored) => info!(
                        checksum = %stored.checksum,
                        ready = stored.ready(),
                        "periodic readiness refresh completed"
                    ),
                    Err(e) => warn!(error = %e, "periodic readiness refresh failed"),
                }
            }
        });
    }

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("fleetgate daemon stopped");
    Ok(())
}

async fn graphql_playground() -> Html<String> {
    Html(async_graphql::http::playground_source(
        async_graphql::http::GraphQLPlaygroundConfig::new("/graphql"),
    ))
}

async fn graphql_handler(
    State(schema): State<FleetgateSchema>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    schema.execute(req.into_inner()).await.into()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down"); },
        _ = terminate => { info!("Received SIGTERM, shutting down"); },
    }
}
