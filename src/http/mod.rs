use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus::{Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;

use crate::partition_state::SharedPartitionStateCache;
use crate::prometheus_metrics::bespoke::append_partition_states;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct HttpServiceState {
    group_id: Arc<str>,
    cache: SharedPartitionStateCache,
    metrics: Arc<Registry>,
}

/// Serve `/` and `/metrics` on `listen_on`, until `shutdown_token` is cancelled.
pub async fn init(
    listen_on: SocketAddr,
    group_id: &str,
    cache: SharedPartitionStateCache,
    metrics: Arc<Registry>,
    shutdown_token: CancellationToken,
) -> io::Result<()> {
    // Assemble the HTTP Service State object, that will be passed to the routes
    let state = HttpServiceState {
        group_id: Arc::from(group_id),
        cache,
        metrics,
    };

    let app = Router::new()
        .route("/", get(root))
        .route("/metrics", get(prometheus_metrics))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state);

    let listener = TcpListener::bind(listen_on).await?;

    info!("Begin listening on '{}'...", listen_on);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
            info!("Shutting down");
        })
        .await
}

async fn root() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}

async fn prometheus_metrics(State(state): State<HttpServiceState>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();

    // As defined by Prometheus: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#basic-info
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));

    match render_metrics(&state) {
        Ok(body) => (StatusCode::OK, headers, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, headers, format!("Failed to encode metrics: {e}")),
    }
}

fn render_metrics(state: &HttpServiceState) -> prometheus::Result<String> {
    // Snapshot first, so the cache is not locked while rendering
    let states = state.cache.with(|c| c.states());

    // 3 bespoke metrics, each with 2 header lines and 1 line per partition
    let mut body: Vec<String> = Vec::with_capacity(3 * (2 + states.len()));
    append_partition_states(&state.group_id, &states, &mut body);

    let mut body = body.join("\n");
    body.push('\n');

    // Append to the bespoke metrics, classic Prometheus Metrics
    TextEncoder.encode_utf8(&state.metrics.gather(), &mut body)?;

    Ok(body)
}
