//! Cloud capability handles.
//!
//! Tasks observe through [`Cloud`] and the live target mutates through it.
//! Two providers ship with the crate: [`MemoryCloud`], an in-process cloud
//! with fault injection and a call log, and [`LocalCloud`], which persists
//! the same model as a JSON snapshot.

pub mod local;
pub mod memory;

pub use local::LocalCloud;
pub use memory::{CloudCall, CloudOperation, MemoryCloud};

use crate::error::CloudError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A provider-side resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudResource {
    /// Provider-assigned identifier.
    pub id: String,
    /// Resource kind (matches the task kind).
    pub kind: String,
    /// Resource name.
    pub name: String,
    /// Kind-specific attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Provider tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Network addresses assigned by the provider.
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl CloudResource {
    /// Creates a resource with no attributes.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
            addresses: Vec::new(),
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Sets a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// String attribute.
    #[must_use]
    pub fn attr_str(&self, key: &str) -> Option<String> {
        self.attributes
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
    }

    /// Boolean attribute.
    #[must_use]
    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attributes.get(key).and_then(serde_json::Value::as_bool)
    }

    /// List-of-strings attribute. Non-string items are skipped.
    #[must_use]
    pub fn attr_strings(&self, key: &str) -> Vec<String> {
        self.attributes
            .get(key)
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parameters for creating a resource.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateRequest {
    /// Resource kind.
    pub kind: String,
    /// Resource name.
    pub name: String,
    /// Kind-specific attributes.
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Tags to apply at creation.
    pub tags: BTreeMap<String, String>,
    /// Whether the provider should assign a network address.
    pub allocate_address: bool,
}

impl CreateRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Sets all attributes at once.
    #[must_use]
    pub fn with_attributes(mut self, attributes: BTreeMap<String, serde_json::Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    /// Requests an address allocation.
    #[must_use]
    pub const fn with_address(mut self) -> Self {
        self.allocate_address = true;
        self
    }
}

/// Provider primitives used by tasks and the live target.
#[async_trait]
pub trait Cloud: fmt::Debug + Send + Sync {
    /// Short provider name for logs.
    fn provider(&self) -> &'static str;

    /// Looks up a resource by kind and name.
    async fn describe(&self, kind: &str, name: &str) -> Result<Option<CloudResource>, CloudError>;

    /// Looks up a resource by provider ID.
    async fn describe_id(&self, id: &str) -> Result<Option<CloudResource>, CloudError>;

    /// Lists all resources of a kind.
    async fn list(&self, kind: &str) -> Result<Vec<CloudResource>, CloudError>;

    /// Creates a resource and returns it with its assigned ID.
    async fn create(&self, request: CreateRequest) -> Result<CloudResource, CloudError>;

    /// Merges attributes into an existing resource.
    async fn update(
        &self,
        id: &str,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Result<CloudResource, CloudError>;

    /// Replaces the tags of a resource.
    async fn tag(&self, id: &str, tags: BTreeMap<String, String>) -> Result<(), CloudError>;

    /// Deletes a resource.
    async fn delete(&self, id: &str) -> Result<(), CloudError>;
}
