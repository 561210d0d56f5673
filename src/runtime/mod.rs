//! Container runtime control plane.
//!
//! The log streaming core only needs three things from a runtime: the list of
//! running containers, a raw log stream per container, and whether a container
//! was started with a TTY. [`ContainerRuntime`] captures exactly that so the
//! Docker implementation can be swapped for an in-memory one in tests.

use std::{collections::HashMap, pin::Pin};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::logs::query::StreamRequestOptions;

pub mod docker;
#[cfg(test)]
pub mod fake;

pub use docker::DockerRuntime;

/// Raw log bytes exactly as the runtime delivers them: plain text for TTY
/// containers, multiplexed frames otherwise.
pub type LogByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RuntimeError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("Log stream error: {0}")]
    Stream(String),
}

/// Metadata reported by the runtime for a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub labels: HashMap<String, String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists containers that have not exited.
    async fn list_running_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Whether the container was created with a pseudo-terminal.
    async fn is_tty(&self, container_id: &str) -> Result<bool, RuntimeError>;

    /// Opens the combined stdout+stderr log stream of a container.
    async fn container_logs(
        &self,
        container_id: &str,
        options: &StreamRequestOptions,
    ) -> Result<LogByteStream, RuntimeError>;
}
