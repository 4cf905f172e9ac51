//! In-process cloud with a call log and fault injection.

use crate::cloud::{Cloud, CloudResource, CreateRequest};
use crate::error::CloudError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Cloud primitive names, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudOperation {
    /// Lookup by kind and name.
    Describe,
    /// Lookup by ID.
    DescribeId,
    /// Listing.
    List,
    /// Creation.
    Create,
    /// Attribute update.
    Update,
    /// Tag replacement.
    Tag,
    /// Deletion.
    Delete,
}

impl CloudOperation {
    /// Returns true for operations that change provider state.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Tag | Self::Delete)
    }
}

impl fmt::Display for CloudOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Describe => "describe",
            Self::DescribeId => "describe_id",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Tag => "tag",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloudCall {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    /// Operation invoked.
    pub operation: CloudOperation,
    /// Resource kind, when known.
    pub kind: Option<String>,
    /// Resource name or ID the call addressed.
    pub subject: String,
    /// When the call was made.
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct Fault {
    operation: CloudOperation,
    kind: Option<String>,
    remaining: u32,
    error: CloudError,
}

#[derive(Debug, Default)]
struct MemoryState {
    resources: BTreeMap<String, CloudResource>,
    calls: Vec<CloudCall>,
    faults: Vec<Fault>,
}

impl MemoryState {
    fn record(&mut self, operation: CloudOperation, kind: Option<&str>, subject: &str) {
        let seq = self.calls.len() as u64 + 1;
        self.calls.push(CloudCall {
            seq,
            operation,
            kind: kind.map(ToString::to_string),
            subject: subject.to_string(),
            at: Utc::now(),
        });
    }

    fn take_fault(&mut self, operation: CloudOperation, kind: Option<&str>) -> Option<CloudError> {
        let index = self.faults.iter().position(|f| {
            f.operation == operation
                && f.remaining > 0
                && f.kind.as_deref().is_none_or(|k| Some(k) == kind)
        })?;
        let fault = &mut self.faults[index];
        fault.remaining -= 1;
        let error = fault.error.clone();
        if fault.remaining == 0 {
            self.faults.remove(index);
        }
        Some(error)
    }

    fn kind_of(&self, id: &str) -> Option<String> {
        self.resources.get(id).map(|r| r.kind.clone())
    }

    fn find_named(&self, kind: &str, name: &str) -> Option<&CloudResource> {
        self.resources
            .values()
            .find(|r| r.kind == kind && r.name == name)
    }
}

/// In-memory cloud.
///
/// Every call is logged with a sequence number. Faults queued with
/// [`MemoryCloud::fail_next`] are returned before the call takes effect.
#[derive(Debug, Default)]
pub struct MemoryCloud {
    state: Mutex<MemoryState>,
}

impl MemoryCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cloud pre-populated with resources.
    #[must_use]
    pub fn from_resources(resources: impl IntoIterator<Item = CloudResource>) -> Self {
        let state = MemoryState {
            resources: resources.into_iter().map(|r| (r.id.clone(), r)).collect(),
            ..MemoryState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Inserts or replaces a resource without logging a call.
    pub async fn seed(&self, resource: CloudResource) {
        self.state
            .lock()
            .await
            .resources
            .insert(resource.id.clone(), resource);
    }

    /// Makes the next `times` calls of `operation` fail with `error`.
    ///
    /// With `kind` set, only calls addressing that resource kind fail.
    pub async fn fail_next(
        &self,
        operation: CloudOperation,
        kind: Option<&str>,
        times: u32,
        error: CloudError,
    ) {
        self.state.lock().await.faults.push(Fault {
            operation,
            kind: kind.map(ToString::to_string),
            remaining: times,
            error,
        });
    }

    /// Full call log.
    pub async fn calls(&self) -> Vec<CloudCall> {
        self.state.lock().await.calls.clone()
    }

    /// Calls that changed provider state.
    pub async fn mutating_calls(&self) -> Vec<CloudCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.operation.is_mutating())
            .cloned()
            .collect()
    }

    /// Snapshot of all resources, ordered by ID.
    pub async fn resources(&self) -> Vec<CloudResource> {
        self.state.lock().await.resources.values().cloned().collect()
    }

    fn generate_id(kind: &str) -> String {
        let prefix: String = kind
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(6)
            .collect::<String>()
            .to_lowercase();
        let simple = Uuid::new_v4().simple().to_string();
        format!("{prefix}-{}", &simple[..12])
    }
}

#[async_trait]
impl Cloud for MemoryCloud {
    fn provider(&self) -> &'static str {
        "memory"
    }

    async fn describe(&self, kind: &str, name: &str) -> Result<Option<CloudResource>, CloudError> {
        let mut state = self.state.lock().await;
        state.record(CloudOperation::Describe, Some(kind), name);
        if let Some(err) = state.take_fault(CloudOperation::Describe, Some(kind)) {
            return Err(err);
        }
        Ok(state.find_named(kind, name).cloned())
    }

    async fn describe_id(&self, id: &str) -> Result<Option<CloudResource>, CloudError> {
        let mut state = self.state.lock().await;
        let kind = state.kind_of(id);
        state.record(CloudOperation::DescribeId, kind.as_deref(), id);
        if let Some(err) = state.take_fault(CloudOperation::DescribeId, kind.as_deref()) {
            return Err(err);
        }
        Ok(state.resources.get(id).cloned())
    }

    async fn list(&self, kind: &str) -> Result<Vec<CloudResource>, CloudError> {
        let mut state = self.state.lock().await;
        state.record(CloudOperation::List, Some(kind), kind);
        if let Some(err) = state.take_fault(CloudOperation::List, Some(kind)) {
            return Err(err);
        }
        Ok(state
            .resources
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect())
    }

    async fn create(&self, request: CreateRequest) -> Result<CloudResource, CloudError> {
        let mut state = self.state.lock().await;
        state.record(CloudOperation::Create, Some(&request.kind), &request.name);
        if let Some(err) = state.take_fault(CloudOperation::Create, Some(&request.kind)) {
            return Err(err);
        }
        if state.find_named(&request.kind, &request.name).is_some() {
            return Err(CloudError::Conflict {
                message: format!("{} '{}' already exists", request.kind, request.name),
            });
        }

        let id = Self::generate_id(&request.kind);
        let addresses = if request.allocate_address {
            vec![format!("{}-{}.memory.internal", request.name, &id[id.len() - 6..])]
        } else {
            Vec::new()
        };
        let resource = CloudResource {
            id: id.clone(),
            kind: request.kind,
            name: request.name,
            attributes: request.attributes,
            tags: request.tags,
            addresses,
        };
        debug!("Created {} {} ({id})", resource.kind, resource.name);
        state.resources.insert(id, resource.clone());
        Ok(resource)
    }

    async fn update(
        &self,
        id: &str,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Result<CloudResource, CloudError> {
        let mut state = self.state.lock().await;
        let kind = state.kind_of(id);
        state.record(CloudOperation::Update, kind.as_deref(), id);
        if let Some(err) = state.take_fault(CloudOperation::Update, kind.as_deref()) {
            return Err(err);
        }
        let resource = state
            .resources
            .get_mut(id)
            .ok_or_else(|| CloudError::NotFound { id: id.to_string() })?;
        resource.attributes.extend(attributes);
        Ok(resource.clone())
    }

    async fn tag(&self, id: &str, tags: BTreeMap<String, String>) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        let kind = state.kind_of(id);
        state.record(CloudOperation::Tag, kind.as_deref(), id);
        if let Some(err) = state.take_fault(CloudOperation::Tag, kind.as_deref()) {
            return Err(err);
        }
        let resource = state
            .resources
            .get_mut(id)
            .ok_or_else(|| CloudError::NotFound { id: id.to_string() })?;
        resource.tags = tags;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        let kind = state.kind_of(id);
        state.record(CloudOperation::Delete, kind.as_deref(), id);
        if let Some(err) = state.take_fault(CloudOperation::Delete, kind.as_deref()) {
            return Err(err);
        }
        state
            .resources
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound { id: id.to_string() })
    }
}
