//! Network (VPC) task.

use crate::cloud::{CloudResource, CreateRequest};
use crate::engine::{Changes, Context, FieldSet, Lifecycle, Task, TaskType, validate_changes};
use crate::error::TaskError;
use crate::target::{ApiTarget, CloudFormationTarget, Render, TerraformTarget};
use async_trait::async_trait;
use serde_json::json;
use std::any::Any;
use std::collections::BTreeMap;

const REQUIRED: &[&str] = &["CIDR"];
const IMMUTABLE: &[&str] = &["ID", "CIDR"];

/// Terraform resource type.
pub const TERRAFORM_TYPE: &str = "aws_vpc";
/// CloudFormation resource type.
pub const CLOUDFORMATION_TYPE: &str = "AWS::EC2::VPC";

/// A cluster network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// Task name.
    pub name: String,
    /// Lifecycle policy.
    pub lifecycle: Lifecycle,
    /// Provider ID. Set on observed state, or to pin an existing network.
    pub id: Option<String>,
    /// Address range.
    pub cidr: Option<String>,
    /// Whether DNS resolution and hostnames are enabled.
    pub enable_dns: Option<bool>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Extra dependencies.
    pub depends_on: Vec<String>,
}

impl Network {
    /// Creates a network task with nothing set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Sync,
            id: None,
            cidr: None,
            enable_dns: None,
            tags: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Sets the address range.
    #[must_use]
    pub fn with_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = Some(cidr.into());
        self
    }

    /// Enables or disables DNS.
    #[must_use]
    pub const fn with_dns(mut self, enabled: bool) -> Self {
        self.enable_dns = Some(enabled);
        self
    }

    /// Pins the provider ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the lifecycle.
    #[must_use]
    pub const fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    fn observed(&self, resource: &CloudResource) -> Self {
        Self {
            name: self.name.clone(),
            lifecycle: self.lifecycle,
            id: Some(resource.id.clone()),
            cidr: resource.attr_str("cidr"),
            enable_dns: resource.attr_bool("enable_dns"),
            tags: resource.tags.clone(),
            depends_on: Vec::new(),
        }
    }

    fn attributes(&self) -> BTreeMap<String, serde_json::Value> {
        let mut attributes = BTreeMap::new();
        if let Some(cidr) = &self.cidr {
            attributes.insert(String::from("cidr"), json!(cidr));
        }
        if let Some(enable_dns) = self.enable_dns {
            attributes.insert(String::from("enable_dns"), json!(enable_dns));
        }
        attributes
    }
}

#[async_trait]
impl Task for Network {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn fields(&self) -> FieldSet {
        FieldSet::new()
            .with("ID", self.id.clone())
            .set("Name", self.name.as_str())
            .with("CIDR", self.cidr.clone())
            .with("EnableDNS", self.enable_dns)
            .map("Tags", &self.tags)
    }

    async fn find(&self, ctx: &Context) -> Result<Option<Box<dyn Task>>, TaskError> {
        // A pinned ID is adopted whatever the provider-side name.
        let found = match &self.id {
            Some(id) => {
                let found = ctx
                    .cloud()
                    .describe_id(id)
                    .await?
                    .filter(|r| r.kind == Self::KIND);
                if found.is_none() {
                    return Err(TaskError::NotFound {
                        kind: Self::KIND.to_string(),
                        name: format!("{} ({id})", self.name),
                    });
                }
                found
            }
            None => ctx.cloud().describe(Self::KIND, &self.name).await?,
        };
        Ok(found.map(|r| Box::new(self.observed(&r)) as Box<dyn Task>))
    }

    fn check_changes(&self, actual: Option<&dyn Task>, changes: &Changes) -> Result<(), TaskError> {
        validate_changes(actual.is_some(), &self.fields(), changes, REQUIRED, IMMUTABLE)
    }

    fn dependencies(&self) -> Vec<String> {
        self.depends_on.clone()
    }

    fn compare_with_id(&self) -> Option<String> {
        self.id.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TaskType for Network {
    const KIND: &'static str = "Network";
}

#[async_trait]
impl Render<ApiTarget> for Network {
    async fn render(
        &self,
        target: &ApiTarget,
        ctx: &Context,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<(), TaskError> {
        let tags = self.tags.clone();
        let Some(actual) = actual else {
            let request = CreateRequest::new(Self::KIND, &self.name)
                .with_attributes(self.attributes())
                .with_tags(tags);
            target.create(ctx, &self.name, request).await?;
            return Ok(());
        };

        let id = actual
            .id
            .clone()
            .ok_or_else(|| TaskError::Failed(format!("observed network {} has no ID", self.name)))?;
        if changes.is_changed("EnableDNS") {
            let mut attributes = BTreeMap::new();
            attributes.insert(String::from("enable_dns"), json!(self.enable_dns));
            target.update(&self.name, Self::KIND, &id, attributes).await?;
        }
        if changes.is_changed("Tags") {
            target.tag(&self.name, Self::KIND, &id, tags).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Render<TerraformTarget> for Network {
    async fn render(
        &self,
        target: &TerraformTarget,
        _ctx: &Context,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<(), TaskError> {
        let dns = self.enable_dns.unwrap_or(false);
        let body = json!({
            "cidr_block": self.cidr,
            "enable_dns_hostnames": dns,
            "enable_dns_support": dns,
            "tags": TerraformTarget::tags(&self.tags),
        });
        target.render_resource(TERRAFORM_TYPE, &self.name, body).await?;
        Ok(())
    }
}

#[async_trait]
impl Render<CloudFormationTarget> for Network {
    async fn render(
        &self,
        target: &CloudFormationTarget,
        _ctx: &Context,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<(), TaskError> {
        let dns = self.enable_dns.unwrap_or(false);
        let properties = json!({
            "CidrBlock": self.cidr,
            "EnableDnsHostnames": dns,
            "EnableDnsSupport": dns,
            "Tags": CloudFormationTarget::tags(&self.tags),
        });
        target
            .render_resource(CLOUDFORMATION_TYPE, &self.name, properties)
            .await?;
        Ok(())
    }
}
