//! HTTP front end
//!
//! `/metrics` runs a full speedtest per request, so scrapes are slow and
//! expensive. The [`ScrapeGate`] rejects a second scrape with 503 while one
//! is running, and every scrape is bounded by a deadline.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::exporter::Exporter;
use crate::gate::ScrapeGate;
use crate::metrics;

pub const METRICS_PATH: &str = "/metrics";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub exporter: Arc<Exporter>,
    pub gate: ScrapeGate,
    /// Upper bound for one scrape.
    pub scrape_timeout: Duration,
}

impl AppState {
    pub fn new(exporter: Exporter, scrape_timeout: Duration) -> Self {
        Self {
            exporter: Arc::new(exporter),
            gate: ScrapeGate::new(),
            scrape_timeout,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route(METRICS_PATH, get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves. In-flight scrapes are allowed to finish.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn root_handler(State(state): State<AppState>) -> Html<String> {
    let exported: String = state
        .exporter
        .describe()
        .iter()
        .map(|d| format!("<li><code>{}</code> {}</li>", d.fq_name(), d.help))
        .collect();

    Html(format!(
        r#"<html>
             <head><title>Speedtest Exporter</title></head>
             <body>
             <h1>Speedtest Exporter</h1>
             <p>Metrics page will take approx 40 seconds to load and show results, as the exporter carries out a speedtest when scraped.</p>
             <p><a href='{}'>Metrics</a></p>
             <p><a href='/health'>Health</a></p>
             <ul>{}</ul>
             </body>
             </html>"#,
        METRICS_PATH, exported
    ))
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let Some(_guard) = state.gate.try_acquire() else {
        tracing::warn!("rejecting scrape, another one is in progress");
        return (StatusCode::SERVICE_UNAVAILABLE, "Scrape already in progress").into_response();
    };

    // Cancelled when this handler returns or is dropped (client gone), which
    // also ends the deadline task.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let _deadline = spawn_deadline(&cancel, state.scrape_timeout);

    let observations = state.exporter.collect(&cancel).await;

    match metrics::encode(&observations) {
        Ok(body) => ([(header::CONTENT_TYPE, metrics::content_type())], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Cancel `cancel` once `timeout` has passed. The task exits early when the
/// token is cancelled by someone else.
fn spawn_deadline(cancel: &CancellationToken, timeout: Duration) -> JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "scrape deadline reached");
                cancel.cancel();
            }
        }
    })
}
