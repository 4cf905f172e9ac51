//! Shared per-run context handed to every task.

use crate::cloud::Cloud;
use crate::engine::value::TaskRef;
use crate::error::TaskError;
use crate::target::{Target, TargetKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tag key identifying the owning cluster on every tagged resource.
pub const CLUSTER_TAG: &str = "KubernetesCluster";

/// Cluster-wide settings visible to tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSettings {
    /// Cluster name.
    pub name: String,
    /// Tags applied to every resource.
    pub tags: BTreeMap<String, String>,
}

impl ClusterSettings {
    /// Creates settings for the named cluster.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
        }
    }

    /// Adds a cluster-wide tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Tags for a resource: cluster tags, then `Name` and the cluster tag,
    /// then the resource's own tags, later entries winning.
    #[must_use]
    pub fn build_tags(
        &self,
        resource_name: &str,
        own: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        tags.insert(String::from("Name"), resource_name.to_string());
        tags.insert(CLUSTER_TAG.to_string(), self.name.clone());
        tags.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
        tags
    }
}

// ============================================================================
// Identifier registry
// ============================================================================

#[derive(Debug, Default)]
struct IdMaps {
    by_name: HashMap<String, String>,
    by_id: HashMap<String, String>,
}

/// Bidirectional map between task names and provider identifiers.
///
/// Filled as tasks are observed or created, so that later tasks can turn
/// symbolic references into provider IDs and observed IDs back into names.
#[derive(Debug, Clone, Default)]
pub struct IdRegistry {
    inner: Arc<RwLock<IdMaps>>,
}

impl IdRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the provider ID of a task.
    pub async fn record(&self, name: &str, id: &str) {
        let mut maps = self.inner.write().await;
        if let Some(previous) = maps.by_name.insert(name.to_string(), id.to_string()) {
            maps.by_id.remove(&previous);
        }
        maps.by_id.insert(id.to_string(), name.to_string());
    }

    /// Provider ID of a task, if known.
    pub async fn id_of(&self, name: &str) -> Option<String> {
        self.inner.read().await.by_name.get(name).cloned()
    }

    /// Task name owning a provider ID, if known.
    pub async fn name_of(&self, id: &str) -> Option<String> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    /// Resolves a reference to the provider ID of its task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::UnresolvedReference`] if the task has no ID yet.
    pub async fn resolve(&self, reference: &TaskRef) -> Result<String, TaskError> {
        self.id_of(reference.name())
            .await
            .ok_or_else(|| TaskError::UnresolvedReference {
                reference: reference.name().to_string(),
            })
    }

    /// Maps a provider ID to a reference of the given kind. IDs owned by no
    /// known task are kept verbatim as the reference name.
    pub async fn reference_for(&self, kind: &str, id: &str) -> TaskRef {
        let name = self.name_of(id).await.unwrap_or_else(|| id.to_string());
        TaskRef::new(kind, name)
    }
}

// ============================================================================
// Context
// ============================================================================

/// Everything a task may touch during a run.
#[derive(Debug, Clone)]
pub struct Context {
    target: Arc<dyn Target>,
    cloud: Arc<dyn Cloud>,
    cluster: ClusterSettings,
    ids: IdRegistry,
}

impl Context {
    /// Creates a context for one run.
    #[must_use]
    pub fn new(target: Arc<dyn Target>, cloud: Arc<dyn Cloud>, cluster: ClusterSettings) -> Self {
        Self {
            target,
            cloud,
            cluster,
            ids: IdRegistry::new(),
        }
    }

    /// The active target.
    #[must_use]
    pub fn target(&self) -> &dyn Target {
        self.target.as_ref()
    }

    /// Kind of the active target.
    #[must_use]
    pub fn target_kind(&self) -> TargetKind {
        self.target.kind()
    }

    /// Cloud capability handle used for observation.
    #[must_use]
    pub fn cloud(&self) -> &dyn Cloud {
        self.cloud.as_ref()
    }

    /// Cluster settings.
    #[must_use]
    pub const fn cluster(&self) -> &ClusterSettings {
        &self.cluster
    }

    /// Name to provider ID registry.
    #[must_use]
    pub const fn ids(&self) -> &IdRegistry {
        &self.ids
    }
}
