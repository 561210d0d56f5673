//! Docker implementation of [`ContainerRuntime`] using bollard.
//!
//! One client is created at startup and shared by every request. bollard
//! already splits the multiplexed log protocol into [`LogOutput`] items; the
//! adapter writes them back out in wire format so TTY detection and frame
//! parsing happen in one place regardless of the runtime behind the trait.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::query_parameters::{
    InspectContainerOptions, InspectContainerOptionsBuilder, ListContainersOptions,
    ListContainersOptionsBuilder, LogsOptions, LogsOptionsBuilder,
};
use bytes::Bytes;
use futures_util::StreamExt;

use super::{ContainerRuntime, ContainerSummary, LogByteStream, RuntimeError};
use crate::logs::demux::{Origin, encode_frame};
use crate::logs::query::{StreamRequestOptions, TailLines};

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using the default method for the platform
    /// (Unix socket on Linux/macOS, named pipe on Windows, or `DOCKER_HOST`).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Checks the daemon answers before the server starts accepting requests.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }
}

/// Errors that never reached the daemon mean the socket itself is the problem.
fn classify(error: bollard::errors::Error) -> RuntimeError {
    match error {
        e @ bollard::errors::Error::DockerResponseServerError { .. } => RuntimeError::Docker(e),
        e => RuntimeError::Unavailable(e.to_string()),
    }
}

fn logs_options(options: &StreamRequestOptions) -> LogsOptions {
    let mut builder = LogsOptionsBuilder::new()
        .follow(options.follow_logs)
        .stdout(true)
        .stderr(true)
        .timestamps(options.include_timestamps);

    if let Some(since) = options.since_timestamp {
        // The engine API takes a 32-bit timestamp.
        let since = i32::try_from(since).unwrap_or(if since < 0 { 0 } else { i32::MAX });
        builder = builder.since(since);
    }

    match options.tail_lines {
        Some(TailLines::Count(count)) => builder = builder.tail(&count.to_string()),
        Some(TailLines::All) => builder = builder.tail("all"),
        None => {}
    }

    builder.build()
}

fn into_wire_bytes(output: LogOutput) -> Bytes {
    match output {
        LogOutput::StdErr { message } => encode_frame(Origin::Stderr, &message),
        LogOutput::StdOut { message } | LogOutput::StdIn { message } => {
            encode_frame(Origin::Stdout, &message)
        }
        // TTY output is not framed by the daemon.
        LogOutput::Console { message } => message,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options: ListContainersOptions = ListContainersOptionsBuilder::new().all(false).build();

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .inspect_err(|e| log::error!("Failed to list containers: {}", e))
            .map_err(classify)?;

        Ok(containers
            .into_iter()
            .filter_map(|container| {
                Some(ContainerSummary {
                    id: container.id?,
                    names: container.names.unwrap_or_default(),
                    labels: container.labels.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn is_tty(&self, container_id: &str) -> Result<bool, RuntimeError> {
        let options: InspectContainerOptions = InspectContainerOptionsBuilder::new().build();

        let info = self
            .docker
            .inspect_container(container_id, Some(options))
            .await
            .map_err(classify)?;

        Ok(info.config.and_then(|c| c.tty).unwrap_or(false))
    }

    async fn container_logs(
        &self,
        container_id: &str,
        options: &StreamRequestOptions,
    ) -> Result<LogByteStream, RuntimeError> {
        let stream = self
            .docker
            .logs(container_id, Some(logs_options(options)))
            .map(|item| {
                item.map(into_wire_bytes)
                    .map_err(|e| RuntimeError::Stream(e.to_string()))
            });
        Ok(Box::pin(stream))
    }
}
