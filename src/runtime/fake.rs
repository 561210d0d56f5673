//! In-memory runtime for tests.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::{ContainerRuntime, ContainerSummary, LogByteStream, RuntimeError};
use crate::logs::query::StreamRequestOptions;

/// Counts how many wrapped streams have been dropped.
#[derive(Debug, Clone, Default)]
pub struct DropProbe(Arc<AtomicUsize>);

impl DropProbe {
    pub fn wrap<S: Stream>(&self, inner: S) -> Probed<S> {
        Probed {
            inner: Box::pin(inner),
            counter: Arc::clone(&self.0),
        }
    }

    pub fn dropped(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Probed<S> {
    inner: Pin<Box<S>>,
    counter: Arc<AtomicUsize>,
}

impl<S: Stream> Stream for Probed<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<S> Drop for Probed<S> {
    fn drop(&mut self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeLogs {
    pub tty: bool,
    /// Raw chunks in wire format; `Err` items surface as stream errors.
    pub chunks: Vec<Result<Bytes, String>>,
    /// Keep the stream pending after the chunks, like `follow=true`.
    pub keep_open: bool,
    pub fail_open: bool,
}

#[derive(Default)]
pub struct FakeRuntime {
    containers: Vec<ContainerSummary>,
    logs: HashMap<String, FakeLogs>,
    unavailable: bool,
    pub probe: DropProbe,
    opened: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(mut self, summary: ContainerSummary) -> Self {
        self.containers.push(summary);
        self
    }

    pub fn with_logs(mut self, container_id: &str, logs: FakeLogs) -> Self {
        self.logs.insert(container_id.to_string(), logs);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Number of log streams handed out.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_running_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        if self.unavailable {
            return Err(RuntimeError::Unavailable(
                "connect ENOENT /var/run/docker.sock".to_string(),
            ));
        }
        Ok(self.containers.clone())
    }

    async fn is_tty(&self, container_id: &str) -> Result<bool, RuntimeError> {
        Ok(self.logs.get(container_id).is_some_and(|logs| logs.tty))
    }

    async fn container_logs(
        &self,
        container_id: &str,
        _options: &StreamRequestOptions,
    ) -> Result<LogByteStream, RuntimeError> {
        let logs = self.logs.get(container_id).cloned().unwrap_or_default();
        if logs.fail_open {
            return Err(RuntimeError::Stream(format!(
                "no such container: {container_id}"
            )));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let chunks = futures_util::stream::iter(
            logs.chunks
                .into_iter()
                .map(|chunk| chunk.map_err(RuntimeError::Stream)),
        );
        let stream: LogByteStream = if logs.keep_open {
            Box::pin(self.probe.wrap(chunks.chain(futures_util::stream::pending())))
        } else {
            Box::pin(self.probe.wrap(chunks))
        };
        Ok(stream)
    }
}
