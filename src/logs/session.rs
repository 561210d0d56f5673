//! One log stream request, from container discovery to teardown.
//!
//! A session walks `Initializing -> Streaming -> Closed`. Every byte source it
//! opens is an [`ActiveStreamHandle`] merged into a single [`SelectAll`]; the
//! session finishes when the client goes away, the process shuts down, setup
//! fails, or the last handle ends. Closing drops every handle, which releases
//! the underlying runtime connections, and then drops the outbound sender.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{BoxStream, SelectAll};
use futures_util::{StreamExt, future};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::LogStreamConfig;
use crate::runtime::{ContainerRuntime, LogByteStream, RuntimeError};

use super::containers::{ContainerDescriptor, filter_containers, list_running_containers};
use super::demux::{Demuxed, Origin, demultiplex};
use super::event::{LogEvent, StreamFrame};
use super::query::{ContainerFilters, StreamRequestOptions};

pub const MISSING_INCLUDE_MESSAGE: &str =
    "'include' parameter is required (comma-separated container/service names)";
pub const NO_MATCHES_MESSAGE: &str = "No containers matched the include/exclude filters";

/// Frames buffered between the session and the HTTP body.
const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Streaming,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnected,
    Shutdown,
    SetupFailed,
    SourcesEnded,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            CloseReason::ClientDisconnected => "client disconnected",
            CloseReason::Shutdown => "server shutting down",
            CloseReason::SetupFailed => "setup failed",
            CloseReason::SourcesEnded => "all log streams ended",
        };
        f.write_str(reason)
    }
}

/// A byte source attached to a session.
pub struct ActiveStreamHandle {
    pub container_id: String,
    /// Display name carried on every event.
    pub container: Arc<str>,
    /// `name` for TTY containers, `name:stdout` / `name:stderr` otherwise.
    pub label: String,
    pub origin: Origin,
    source: LogByteStream,
}

impl ActiveStreamHandle {
    pub fn new(
        container: &ContainerDescriptor,
        label: String,
        origin: Origin,
        source: LogByteStream,
    ) -> Self {
        Self {
            container_id: container.id.clone(),
            container: Arc::from(container.name.as_str()),
            label,
            origin,
            source,
        }
    }

    /// Chunks until the first error or the end of the source, then one `Ended`.
    fn into_events(self) -> BoxStream<'static, SourceEvent> {
        let ActiveStreamHandle {
            container,
            label,
            origin,
            source,
            ..
        } = self;

        futures_util::stream::unfold(Phase::Open(source), move |phase| {
            let container = Arc::clone(&container);
            let label = label.clone();
            async move {
                match phase {
                    Phase::Open(mut source) => match source.next().await {
                        Some(Ok(bytes)) => Some((
                            SourceEvent::Chunk {
                                container,
                                origin,
                                bytes,
                            },
                            Phase::Open(source),
                        )),
                        Some(Err(error)) => Some((
                            SourceEvent::Failed {
                                container,
                                label,
                                error,
                            },
                            Phase::Ending,
                        )),
                        None => Some((SourceEvent::Ended { label }, Phase::Done)),
                    },
                    Phase::Ending => Some((SourceEvent::Ended { label }, Phase::Done)),
                    Phase::Done => None,
                }
            }
        })
        .boxed()
    }
}

enum Phase {
    Open(LogByteStream),
    Ending,
    Done,
}

enum SourceEvent {
    Chunk {
        container: Arc<str>,
        origin: Origin,
        bytes: Bytes,
    },
    Failed {
        container: Arc<str>,
        label: String,
        error: RuntimeError,
    },
    Ended {
        label: String,
    },
}

/// Opens the log stream of one container and splits it when it is multiplexed.
pub async fn open_container(
    runtime: &dyn ContainerRuntime,
    container: &ContainerDescriptor,
    options: &StreamRequestOptions,
) -> Result<Vec<ActiveStreamHandle>, RuntimeError> {
    let raw = runtime.container_logs(&container.id, options).await?;
    let handles = if runtime.is_tty(&container.id).await? {
        vec![ActiveStreamHandle::new(
            container,
            container.name.clone(),
            Origin::Stdout,
            raw,
        )]
    } else {
        let Demuxed { stdout, stderr } = demultiplex(raw);
        vec![
            ActiveStreamHandle::new(
                container,
                format!("{}:stdout", container.name),
                Origin::Stdout,
                stdout,
            ),
            ActiveStreamHandle::new(
                container,
                format!("{}:stderr", container.name),
                Origin::Stderr,
                stderr,
            ),
        ]
    };
    Ok(handles)
}

async fn client_gone(tx: &Option<mpsc::Sender<StreamFrame>>) {
    match tx {
        Some(tx) => tx.closed().await,
        None => {}
    }
}

pub struct LogSession {
    id: Uuid,
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<LogStreamConfig>,
    options: StreamRequestOptions,
    filters: ContainerFilters,
    cancel: CancellationToken,
    tx: Option<mpsc::Sender<StreamFrame>>,
    state: SessionState,
    sources: SelectAll<BoxStream<'static, SourceEvent>>,
    active: usize,
}

impl LogSession {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: Arc<LogStreamConfig>,
        options: StreamRequestOptions,
        filters: ContainerFilters,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let session = Self {
            id: Uuid::now_v7(),
            runtime,
            config,
            options,
            filters,
            cancel,
            tx: Some(tx),
            state: SessionState::Initializing,
            sources: SelectAll::new(),
            active: 0,
        };
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        log::info!(
            "Log session {} started (include: {:?}, exclude: {:?})",
            self.id,
            self.filters.include_patterns,
            self.filters.exclude_patterns
        );

        let setup = {
            let cancel = self.cancel.clone();
            let watch = self.tx.clone();
            tokio::select! {
                result = self.initialize() => result,
                _ = cancel.cancelled() => Err(CloseReason::Shutdown),
                _ = client_gone(&watch) => Err(CloseReason::ClientDisconnected),
            }
        };

        let reason = match setup {
            Ok(()) => self.stream().await,
            Err(reason) => reason,
        };
        self.close(reason);
    }

    async fn initialize(&mut self) -> Result<(), CloseReason> {
        if self.filters.include_patterns.is_empty() {
            log::warn!("Log session {} rejected: no include patterns", self.id);
            self.send_event(LogEvent::error(None, MISSING_INCLUDE_MESSAGE))
                .await;
            return Err(CloseReason::SetupFailed);
        }

        let containers = match list_running_containers(self.runtime.as_ref()).await {
            Ok(containers) => containers,
            Err(e) => {
                log::error!("Log session {} could not list containers: {}", self.id, e);
                self.send_event(LogEvent::error(None, &e)).await;
                return Err(CloseReason::SetupFailed);
            }
        };

        let selected = filter_containers(containers, &self.filters);
        if selected.is_empty() {
            self.send_event(LogEvent::info(NO_MATCHES_MESSAGE)).await;
        }

        let opened = future::join_all(
            selected
                .iter()
                .map(|container| open_container(self.runtime.as_ref(), container, &self.options)),
        )
        .await;

        for (container, result) in selected.iter().zip(opened) {
            match result {
                Ok(handles) => handles.into_iter().for_each(|h| self.attach(h)),
                Err(e) => {
                    log::warn!(
                        "Log session {} could not open logs of {}: {}",
                        self.id,
                        container.name,
                        e
                    );
                    self.send_event(LogEvent::error(Some(container.name.as_str()), &e))
                        .await;
                }
            }
        }

        if !selected.is_empty() && self.active == 0 {
            return Err(CloseReason::SourcesEnded);
        }

        self.state = SessionState::Streaming;
        log::info!(
            "Log session {} streaming {} sources from {} containers",
            self.id,
            self.active,
            selected.len()
        );
        Ok(())
    }

    fn attach(&mut self, handle: ActiveStreamHandle) {
        log::debug!(
            "Log session {} attached {} ({})",
            self.id,
            handle.label,
            handle.container_id
        );
        self.active += 1;
        self.sources.push(handle.into_events());
    }

    async fn stream(&mut self) -> CloseReason {
        let period = self.config.heartbeat;
        let mut heartbeat = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return CloseReason::Shutdown,
                _ = client_gone(&self.tx) => return CloseReason::ClientDisconnected,
                _ = heartbeat.tick() => {
                    if !self.send(StreamFrame::Heartbeat).await {
                        return CloseReason::ClientDisconnected;
                    }
                }
                event = self.sources.next(), if !self.sources.is_empty() => {
                    let Some(event) = event else {
                        return CloseReason::SourcesEnded;
                    };
                    if let Some(reason) = self.handle_source_event(event).await {
                        return reason;
                    }
                }
            }
        }
    }

    async fn handle_source_event(&mut self, event: SourceEvent) -> Option<CloseReason> {
        match event {
            SourceEvent::Chunk {
                container,
                origin,
                bytes,
            } => {
                let event = LogEvent::log(&container, origin, &bytes, self.config.max_chunk_bytes);
                if !self.send_event(event).await {
                    return Some(CloseReason::ClientDisconnected);
                }
            }
            SourceEvent::Failed {
                container,
                label,
                error,
            } => {
                log::warn!("Log session {}: {} failed: {}", self.id, label, error);
                if !self.send_event(LogEvent::error(Some(&*container), &error)).await {
                    return Some(CloseReason::ClientDisconnected);
                }
            }
            SourceEvent::Ended { label } => {
                log::debug!("Log session {}: {} ended", self.id, label);
                self.active = self.active.saturating_sub(1);
                if self.active == 0 {
                    return Some(CloseReason::SourcesEnded);
                }
            }
        }
        None
    }

    async fn send_event(&mut self, event: LogEvent) -> bool {
        self.send(StreamFrame::Event(event)).await
    }

    /// Returns false once nothing more can be delivered.
    ///
    /// Borrows mutably: `sources` is not `Sync`, so a shared borrow held
    /// across the await would make the session future `!Send`.
    async fn send(&mut self, frame: StreamFrame) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        tokio::select! {
            result = tx.send(frame) => result.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Releases every handle and the outbound stream. Only the first call has
    /// any effect; it returns whether this call performed the teardown.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;

        let released = self.sources.len();
        self.sources.clear();
        self.active = 0;
        self.tx = None;

        log::info!(
            "Log session {} closed: {} ({} sources released)",
            self.id,
            reason,
            released
        );
        true
    }
}
