//! Container discovery and include/exclude selection.

use crate::runtime::{ContainerRuntime, ContainerSummary, RuntimeError};

use super::query::ContainerFilters;

/// Label set by docker compose on every service container.
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub id: String,
    pub name: String,
    /// Empty when the container was not started by compose.
    pub service_label: String,
}

impl From<ContainerSummary> for ContainerDescriptor {
    fn from(summary: ContainerSummary) -> Self {
        let name = summary
            .names
            .first()
            .map(|name| name.strip_prefix('/').unwrap_or(name).to_string())
            .unwrap_or_else(|| summary.id.clone());
        let service_label = summary
            .labels
            .get(COMPOSE_SERVICE_LABEL)
            .cloned()
            .unwrap_or_default();
        Self {
            id: summary.id,
            name,
            service_label,
        }
    }
}

impl ContainerDescriptor {
    /// Case-insensitive substring match of any pattern against the name or service label.
    /// Patterns are expected to be lower-cased already.
    pub fn matches_any(&self, patterns: &[String]) -> bool {
        let name = self.name.to_lowercase();
        let service = self.service_label.to_lowercase();
        patterns.iter().any(|pattern| {
            name.contains(pattern.as_str())
                || (!service.is_empty() && service.contains(pattern.as_str()))
        })
    }

    pub fn is_selected(&self, filters: &ContainerFilters) -> bool {
        self.matches_any(&filters.include_patterns)
            && (filters.exclude_patterns.is_empty()
                || !self.matches_any(&filters.exclude_patterns))
    }
}

/// Snapshot of running containers. Nothing is cached between requests.
pub async fn list_running_containers(
    runtime: &dyn ContainerRuntime,
) -> Result<Vec<ContainerDescriptor>, RuntimeError> {
    let containers = runtime.list_running_containers().await?;
    Ok(containers.into_iter().map(ContainerDescriptor::from).collect())
}

pub fn filter_containers(
    containers: Vec<ContainerDescriptor>,
    filters: &ContainerFilters,
) -> Vec<ContainerDescriptor> {
    containers
        .into_iter()
        .filter(|container| container.is_selected(filters))
        .collect()
}
