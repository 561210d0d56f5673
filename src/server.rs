use std::{convert::Infallible, future::Future, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{Query, State},
    response::{
        IntoResponse,
        sse::{Event, Sse},
    },
    routing::get,
};
use futures_util::Stream;
use http::header::{CACHE_CONTROL, CONNECTION, HeaderName};
use log::{debug, info};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::LogStreamConfig;
use crate::logs::{LogSession, StreamFrame, StreamQuery};
use crate::runtime::ContainerRuntime;

pub const LOGS_PATH: &str = "/internal/logs";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Unable to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared across axum handlers.
pub struct AppState {
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<LogStreamConfig>,
    /// Parent of every session token; cancelled on shutdown.
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: Arc<LogStreamConfig>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            config,
            shutdown,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(LOGS_PATH, get(stream_logs))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Binds `addr` and serves until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    serve_on(listener, state, shutdown).await
}

pub async fn serve_on(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    info!("Serving container logs on {}", listener.local_addr()?);
    let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

fn sse_stream(rx: mpsc::Receiver<StreamFrame>) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((Ok(frame.into_sse()), rx))
    })
}

/// Streams the logs of every matching container as Server-Sent Events.
///
/// Failures after this point are reported in-band, so the status is always 200.
/// The query is taken as raw pairs so repeated keys resolve to their first
/// value instead of failing extraction.
async fn stream_logs(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let query: StreamQuery = pairs.into_iter().collect();
    let (options, filters) = query.resolve(&state.config);
    let (session, rx) = LogSession::new(
        Arc::clone(&state.runtime),
        Arc::clone(&state.config),
        options,
        filters,
        state.shutdown.child_token(),
    );
    debug!("Opening log session {}", session.id());
    session.spawn();

    (
        [
            (CACHE_CONTROL, "no-cache, no-transform"),
            (CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(sse_stream(rx)),
    )
}
