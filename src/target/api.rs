//! Live target: renders changes as cloud API calls.

use crate::cloud::{Cloud, CloudResource, CreateRequest};
use crate::engine::Context;
use crate::error::{TargetError, TaskError};
use crate::target::{Target, TargetKind, TargetOutput, TargetType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::info;

/// Kind of mutation issued by the live target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    /// Resource creation.
    Create,
    /// Attribute update.
    Update,
    /// Tag replacement.
    Tag,
}

/// One mutation issued against the cloud.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedOperation {
    /// Task that issued it.
    pub task: String,
    /// Resource kind.
    pub kind: String,
    /// What was done.
    pub action: OperationAction,
    /// Provider ID of the resource.
    pub resource_id: String,
    /// When it completed.
    pub at: DateTime<Utc>,
}

/// Target that mutates the cloud directly.
#[derive(Debug)]
pub struct ApiTarget {
    cloud: Arc<dyn Cloud>,
    operations: Mutex<Vec<AppliedOperation>>,
    finalized: AtomicBool,
}

impl ApiTarget {
    /// Creates a live target over a cloud handle.
    #[must_use]
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self {
            cloud,
            operations: Mutex::new(Vec::new()),
            finalized: AtomicBool::new(false),
        }
    }

    /// The cloud this target mutates.
    #[must_use]
    pub fn cloud(&self) -> &dyn Cloud {
        self.cloud.as_ref()
    }

    /// Creates a resource and records its ID against the task name.
    ///
    /// # Errors
    ///
    /// Returns the cloud error, or `AlreadyFinalized`.
    pub async fn create(
        &self,
        ctx: &Context,
        task: &str,
        request: CreateRequest,
    ) -> Result<CloudResource, TaskError> {
        self.ensure_open()?;
        let kind = request.kind.clone();
        let resource = self.cloud.create(request).await?;
        ctx.ids().record(task, &resource.id).await;
        info!("Created {kind} {task} ({})", resource.id);
        self.record(task, &kind, OperationAction::Create, &resource.id)
            .await;
        Ok(resource)
    }

    /// Merges attributes into an existing resource.
    ///
    /// # Errors
    ///
    /// Returns the cloud error, or `AlreadyFinalized`.
    pub async fn update(
        &self,
        task: &str,
        kind: &str,
        id: &str,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Result<CloudResource, TaskError> {
        self.ensure_open()?;
        let resource = self.cloud.update(id, attributes).await?;
        info!("Updated {kind} {task} ({id})");
        self.record(task, kind, OperationAction::Update, id).await;
        Ok(resource)
    }

    /// Replaces the tags of an existing resource.
    ///
    /// # Errors
    ///
    /// Returns the cloud error, or `AlreadyFinalized`.
    pub async fn tag(
        &self,
        task: &str,
        kind: &str,
        id: &str,
        tags: BTreeMap<String, String>,
    ) -> Result<(), TaskError> {
        self.ensure_open()?;
        self.cloud.tag(id, tags).await?;
        info!("Tagged {kind} {task} ({id})");
        self.record(task, kind, OperationAction::Tag, id).await;
        Ok(())
    }

    /// Operations issued so far.
    pub async fn operations(&self) -> Vec<AppliedOperation> {
        self.operations.lock().await.clone()
    }

    fn ensure_open(&self) -> Result<(), TargetError> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(TargetError::AlreadyFinalized);
        }
        Ok(())
    }

    async fn record(&self, task: &str, kind: &str, action: OperationAction, id: &str) {
        self.operations.lock().await.push(AppliedOperation {
            task: task.to_string(),
            kind: kind.to_string(),
            action,
            resource_id: id.to_string(),
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl Target for ApiTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::Api
    }

    async fn finalize(&self) -> Result<TargetOutput, TargetError> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Err(TargetError::AlreadyFinalized);
        }
        let operations = self.operations.lock().await.clone();
        info!("Applied {} cloud operations via {}", operations.len(), self.cloud.provider());
        Ok(TargetOutput::Applied { operations })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TargetType for ApiTarget {
    const KIND: TargetKind = TargetKind::Api;
}
