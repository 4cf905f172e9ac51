//! Terraform JSON document target.
//!
//! Every task renders exactly one resource block. Cross-task references are
//! emitted as symbolic interpolations (`${aws_vpc.main.id}`). The only
//! literal provider IDs are those of tasks the document does not own.

use crate::engine::Context;
use crate::error::TargetError;
use crate::target::{Target, TargetKind, TargetOutput, TargetType};
use async_trait::async_trait;
use serde_json::{Map, Value as Json, json};
use std::any::Any;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

/// File name written into the output directory.
pub const TERRAFORM_FILE: &str = "kubernetes.tf.json";

/// Target that accumulates a Terraform JSON document.
#[derive(Debug)]
pub struct TerraformTarget {
    cluster_name: String,
    out_dir: Option<PathBuf>,
    resources: Mutex<BTreeMap<String, BTreeMap<String, Json>>>,
    finalized: AtomicBool,
}

impl TerraformTarget {
    /// Creates a target for the named cluster.
    #[must_use]
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            out_dir: None,
            resources: Mutex::new(BTreeMap::new()),
            finalized: AtomicBool::new(false),
        }
    }

    /// Writes the document into `dir` on finalize.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    /// Sanitizes a task name into a Terraform resource name.
    #[must_use]
    pub fn sanitize(name: &str) -> String {
        let mut out: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
            .collect();
        if out.chars().next().is_none_or(|c| c.is_ascii_digit()) {
            out.insert(0, '_');
        }
        out
    }

    /// Symbolic reference to an attribute of another rendered resource.
    #[must_use]
    pub fn link(resource_type: &str, name: &str, attribute: &str) -> Json {
        Json::String(format!(
            "${{{resource_type}.{}.{attribute}}}",
            Self::sanitize(name)
        ))
    }

    /// The `id` of a referenced task: a link when the task is emitted, its
    /// literal provider ID when it is not.
    pub async fn link_id(ctx: &Context, resource_type: &str, name: &str) -> Json {
        match ctx.ids().id_of(name).await {
            Some(id) => Json::String(id),
            None => Self::link(resource_type, name, "id"),
        }
    }

    /// Converts a tag map to the Terraform representation.
    #[must_use]
    pub fn tags(tags: &BTreeMap<String, String>) -> Json {
        Json::Object(
            tags.iter()
                .map(|(k, v)| (k.clone(), Json::String(v.clone())))
                .collect::<Map<_, _>>(),
        )
    }

    /// Adds one resource block.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateResource` if the block already exists, or
    /// `AlreadyFinalized`.
    pub async fn render_resource(
        &self,
        resource_type: &str,
        name: &str,
        body: Json,
    ) -> Result<(), TargetError> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(TargetError::AlreadyFinalized);
        }
        let sanitized = Self::sanitize(name);
        let mut resources = self.resources.lock().await;
        let blocks = resources.entry(resource_type.to_string()).or_default();
        if blocks.contains_key(&sanitized) {
            return Err(TargetError::DuplicateResource {
                resource_type: resource_type.to_string(),
                name: sanitized,
            });
        }
        blocks.insert(sanitized, body);
        Ok(())
    }

    async fn document(&self) -> Json {
        let resources = self.resources.lock().await;
        json!({
            "locals": { "cluster_name": self.cluster_name },
            "resource": &*resources,
            "terraform": { "required_version": ">= 0.15.0" },
        })
    }
}

#[async_trait]
impl Target for TerraformTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::Terraform
    }

    async fn finalize(&self) -> Result<TargetOutput, TargetError> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Err(TargetError::AlreadyFinalized);
        }
        let contents = serde_json::to_string_pretty(&self.document().await)
            .map_err(|e| TargetError::serialization(e.to_string()))?;

        let path = match &self.out_dir {
            Some(dir) => {
                let path = dir.join(TERRAFORM_FILE);
                let io_err = |e: std::io::Error| TargetError::Io {
                    path: path.clone(),
                    message: e.to_string(),
                };
                fs::create_dir_all(dir).await.map_err(io_err)?;
                fs::write(&path, &contents).await.map_err(io_err)?;
                info!("Terraform written to {}", path.display());
                Some(path)
            }
            None => None,
        };

        Ok(TargetOutput::Document {
            format: TargetKind::Terraform,
            path,
            contents,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TargetType for TerraformTarget {
    const KIND: TargetKind = TargetKind::Terraform;
}
