//! Load balancer task.
//!
//! Fronts the cluster API servers. Listeners are compared as a set of
//! `{Port, Protocol}` maps, subnets as a set of references, so declaration
//! order never shows up as drift.

use crate::cloud::{CloudResource, CreateRequest};
use crate::engine::{
    Changes, Context, FieldSet, HasAddress, Lifecycle, Task, TaskRef, TaskType, Value,
    validate_changes,
};
use crate::error::TaskError;
use crate::resources::subnet::{self, Subnet};
use crate::target::{ApiTarget, CloudFormationTarget, Render, TerraformTarget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::collections::BTreeMap;

const REQUIRED: &[&str] = &["Subnets", "Listeners"];
const IMMUTABLE: &[&str] = &["ID", "Scheme"];

/// Terraform resource type.
pub const TERRAFORM_TYPE: &str = "aws_elb";
/// CloudFormation resource type.
pub const CLOUDFORMATION_TYPE: &str = "AWS::ElasticLoadBalancing::LoadBalancer";

/// Scheme of an internal load balancer.
pub const SCHEME_INTERNAL: &str = "internal";

/// A port forwarded by the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Listener {
    /// Port on both the balancer and the instances.
    pub port: u16,
    /// Protocol, e.g. `TCP`.
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    String::from("TCP")
}

impl Listener {
    /// Creates a listener.
    #[must_use]
    pub fn new(port: u16, protocol: impl Into<String>) -> Self {
        Self {
            port,
            protocol: protocol.into(),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert(String::from("Port"), Value::from(self.port));
        map.insert(String::from("Protocol"), Value::from(self.protocol.as_str()));
        Value::Map(map)
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// A cluster load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    /// Task name.
    pub name: String,
    /// Lifecycle policy.
    pub lifecycle: Lifecycle,
    /// Provider ID.
    pub id: Option<String>,
    /// Subnets the balancer is attached to.
    pub subnets: Vec<TaskRef>,
    /// Forwarded ports.
    pub listeners: Vec<Listener>,
    /// `internal` or `internet-facing`.
    pub scheme: Option<String>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Extra dependencies.
    pub depends_on: Vec<String>,
}

impl LoadBalancer {
    /// Creates a load balancer task with nothing set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Lifecycle::Sync,
            id: None,
            subnets: Vec::new(),
            listeners: Vec::new(),
            scheme: None,
            tags: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Attaches a subnet.
    #[must_use]
    pub fn with_subnet(mut self, subnet: &str) -> Self {
        self.subnets.push(TaskRef::new(Subnet::KIND, subnet));
        self
    }

    /// Adds a listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Sets the scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
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
        let mut subnets = Vec::new();
        for id in resource.attr_strings("subnet_ids") {
            subnets.push(ctx.ids().reference_for(Subnet::KIND, &id).await);
        }
        let listeners = resource
            .attributes
            .get("listeners")
            .and_then(serde_json::Value::as_array)
            .map(|items| items.iter().filter_map(Listener::from_json).collect())
            .unwrap_or_default();
        Self {
            name: self.name.clone(),
            lifecycle: self.lifecycle,
            id: Some(resource.id.clone()),
            subnets,
            listeners,
            scheme: resource.attr_str("scheme"),
            tags: resource.tags.clone(),
            depends_on: Vec::new(),
        }
    }

    async fn subnet_ids(&self, ctx: &Context) -> Result<Vec<String>, TaskError> {
        let mut ids = Vec::with_capacity(self.subnets.len());
        for subnet in &self.subnets {
            ids.push(ctx.ids().resolve(subnet).await?);
        }
        ids.sort();
        Ok(ids)
    }

    fn sorted_listeners(&self) -> Vec<Listener> {
        let mut listeners = self.listeners.clone();
        listeners.sort();
        listeners.dedup();
        listeners
    }

    fn sorted_subnet_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.subnets.iter().map(TaskRef::name).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    fn is_internal(&self) -> bool {
        self.scheme.as_deref() == Some(SCHEME_INTERNAL)
    }
}

#[async_trait]
impl Task for LoadBalancer {
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
            .set_of("Subnets", self.subnets.iter().cloned().map(Value::Ref))
            .set_of("Listeners", self.listeners.iter().map(Listener::to_value))
            .with("Scheme", self.scheme.clone())
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

    fn as_address_source(&self) -> Option<&dyn HasAddress> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TaskType for LoadBalancer {
    const KIND: &'static str = "LoadBalancer";
}

#[async_trait]
impl HasAddress for LoadBalancer {
    async fn find_addresses(&self, ctx: &Context) -> Result<Vec<String>, TaskError> {
        let found = ctx.cloud().describe(Self::KIND, &self.name).await?;
        Ok(found.map(|r| r.addresses).unwrap_or_default())
    }
}

#[async_trait]
impl Render<ApiTarget> for LoadBalancer {
    async fn render(
        &self,
        target: &ApiTarget,
        ctx: &Context,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<(), TaskError> {
        let Some(actual) = actual else {
            let mut request = CreateRequest::new(Self::KIND, &self.name)
                .with_attribute("subnet_ids", json!(self.subnet_ids(ctx).await?))
                .with_attribute("listeners", json!(self.sorted_listeners()))
                .with_tags(self.tags.clone())
                .with_address();
            if let Some(scheme) = &self.scheme {
                request = request.with_attribute("scheme", json!(scheme));
            }
            target.create(ctx, &self.name, request).await?;
            return Ok(());
        };

        let id = actual.id.clone().ok_or_else(|| {
            TaskError::Failed(format!("observed load balancer {} has no ID", self.name))
        })?;
        let mut attributes = BTreeMap::new();
        if changes.is_changed("Subnets") {
            attributes.insert(String::from("subnet_ids"), json!(self.subnet_ids(ctx).await?));
        }
        if changes.is_changed("Listeners") {
            attributes.insert(String::from("listeners"), json!(self.sorted_listeners()));
        }
        if !attributes.is_empty() {
            target.update(&self.name, Self::KIND, &id, attributes).await?;
        }
        if changes.is_changed("Tags") {
            target
                .tag(&self.name, Self::KIND, &id, self.tags.clone())
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Render<TerraformTarget> for LoadBalancer {
    async fn render(
        &self,
        target: &TerraformTarget,
        ctx: &Context,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<(), TaskError> {
        let mut subnets = Vec::new();
        for name in self.sorted_subnet_names() {
            subnets.push(TerraformTarget::link_id(ctx, subnet::TERRAFORM_TYPE, name).await);
        }
        let listeners: Vec<_> = self
            .sorted_listeners()
            .iter()
            .map(|l| {
                json!({
                    "instance_port": l.port,
                    "instance_protocol": l.protocol,
                    "lb_port": l.port,
                    "lb_protocol": l.protocol,
                })
            })
            .collect();
        let body = json!({
            "name": self.name,
            "internal": self.is_internal(),
            "subnets": subnets,
            "listener": listeners,
            "tags": TerraformTarget::tags(&self.tags),
        });
        target.render_resource(TERRAFORM_TYPE, &self.name, body).await?;
        Ok(())
    }
}

#[async_trait]
impl Render<CloudFormationTarget> for LoadBalancer {
    async fn render(
        &self,
        target: &CloudFormationTarget,
        ctx: &Context,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<(), TaskError> {
        let mut subnets = Vec::new();
        for name in self.sorted_subnet_names() {
            subnets.push(
                CloudFormationTarget::reference_id(ctx, subnet::CLOUDFORMATION_TYPE, name).await,
            );
        }
        let listeners: Vec<_> = self
            .sorted_listeners()
            .iter()
            .map(|l| {
                json!({
                    "InstancePort": l.port.to_string(),
                    "InstanceProtocol": l.protocol,
                    "LoadBalancerPort": l.port.to_string(),
                    "Protocol": l.protocol,
                })
            })
            .collect();
        let mut properties = json!({
            "LoadBalancerName": self.name,
            "Subnets": subnets,
            "Listeners": listeners,
            "Tags": CloudFormationTarget::tags(&self.tags),
        });
        if let Some(scheme) = &self.scheme {
            properties["Scheme"] = json!(scheme);
        }
        target
            .render_resource(CLOUDFORMATION_TYPE, &self.name, properties)
            .await?;
        Ok(())
    }
}
