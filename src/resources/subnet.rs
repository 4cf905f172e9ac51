//! Subnet task.

use crate::cloud::{CloudResource, CreateRequest};
use crate::engine::{
    Changes, Context, FieldSet, Lifecycle, Task, TaskRef, TaskType, validate_changes,
};
use crate::error::TaskError;
use crate::resources::network::{self, Network};
use crate::target::{ApiTarget, CloudFormationTarget, Render, TerraformTarget};
use async_trait::async_trait;
use serde_json::json;
use std::any::Any;
use std::collections::BTreeMap;

const REQUIRED: &[&str] = &["Network", "CIDR", "Zone"];
const IMMUTABLE: &[&str] = &["ID", "Network", "CIDR", "Zone"];

/// Terraform resource type.
pub const TERRAFORM_TYPE: &str = "aws_subnet";
/// CloudFormation resource type.
pub const CLOUDFORMATION_TYPE: &str = "AWS::EC2::Subnet";

/// A subnet inside a cluster network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    /// Task name.
    pub name: String,
    /// Lifecycle policy.
    pub lifecycle: Lifecycle,
    /// Provider ID.
    pub id: Option<String>,
    /// Owning network.
    pub network: Option<TaskRef>,
    /// Address range.
    pub cidr: Option<String>,
    /// Availability zone.
    pub zone: Option<String>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Extra dependencies.
    pub depends_on: Vec<String>,
}

impl Subnet {
    /// Creates a subnet task with nothing set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Sync,
            id: None,
            network: None,
            cidr: None,
            zone: None,
            tags: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Places the subnet in a network.
    #[must_use]
    pub fn in_network(mut self, network: &str) -> Self {
        self.network = Some(TaskRef::new(Network::KIND, network));
        self
    }

    /// Sets the address range.
    #[must_use]
    pub fn with_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = Some(cidr.into());
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
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

    async fn observed(&self, ctx: &Context, resource: &CloudResource) -> Self {
        let network = match resource.attr_str("network_id") {
            Some(id) => Some(ctx.ids().reference_for(Network::KIND, &id).await),
            None => None,
        };
        Self {
            name: self.name.clone(),
            lifecycle: self.lifecycle,
            id: Some(resource.id.clone()),
            network,
            cidr: resource.attr_str("cidr"),
            zone: resource.attr_str("zone"),
            tags: resource.tags.clone(),
            depends_on: Vec::new(),
        }
    }

    fn network_ref(&self) -> Result<&TaskRef, TaskError> {
        self.network.as_ref().ok_or_else(|| TaskError::required("Network"))
    }
}

#[async_trait]
impl Task for Subnet {
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
            .with("Network", self.network.clone())
            .with("CIDR", self.cidr.clone())
            .with("Zone", self.zone.clone())
            .map("Tags", &self.tags)
    }

    async fn find(&self, ctx: &Context) -> Result<Option<Box<dyn Task>>, TaskError> {
        match ctx.cloud().describe(Self::KIND, &self.name).await? {
            Some(resource) => Ok(Some(Box::new(self.observed(ctx, &resource).await))),
            None => Ok(None),
        }
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

impl TaskType for Subnet {
    const KIND: &'static str = "Subnet";
}

#[async_trait]
impl Render<ApiTarget> for Subnet {
    async fn render(
        &self,
        target: &ApiTarget,
        ctx: &Context,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<(), TaskError> {
        let Some(actual) = actual else {
            let network_id = ctx.ids().resolve(self.network_ref()?).await?;
            let request = CreateRequest::new(Self::KIND, &self.name)
                .with_attribute("network_id", json!(network_id))
                .with_attribute("cidr", json!(self.cidr))
                .with_attribute("zone", json!(self.zone))
                .with_tags(self.tags.clone());
            target.create(ctx, &self.name, request).await?;
            return Ok(());
        };

        if changes.is_changed("Tags") {
            let id = actual
                .id
                .as_deref()
                .ok_or_else(|| TaskError::Failed(format!("observed subnet {} has no ID", self.name)))?;
            target
                .tag(&self.name, Self::KIND, id, self.tags.clone())
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Render<TerraformTarget> for Subnet {
    async fn render(
        &self,
        target: &TerraformTarget,
        ctx: &Context,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<(), TaskError> {
        let network = self.network_ref()?;
        let body = json!({
            "vpc_id": TerraformTarget::link_id(ctx, network::TERRAFORM_TYPE, network.name()).await,
            "cidr_block": self.cidr,
            "availability_zone": self.zone,
            "tags": TerraformTarget::tags(&self.tags),
        });
        target.render_resource(TERRAFORM_TYPE, &self.name, body).await?;
        Ok(())
    }
}

#[async_trait]
impl Render<CloudFormationTarget> for Subnet {
    async fn render(
        &self,
        target: &CloudFormationTarget,
        ctx: &Context,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<(), TaskError> {
        let network = self.network_ref()?;
        let properties = json!({
            "VpcId": CloudFormationTarget::reference_id(ctx, network::CLOUDFORMATION_TYPE, network.name())
                .await,
            "CidrBlock": self.cidr,
            "AvailabilityZone": self.zone,
            "Tags": CloudFormationTarget::tags(&self.tags),
        });
        target
            .render_resource(CLOUDFORMATION_TYPE, &self.name, properties)
            .await?;
        Ok(())
    }
}
