//! Test fixtures shared by engine and target tests.

use crate::cloud::CreateRequest;
use crate::engine::{
    Changes, Context, FieldSet, Lifecycle, Task, TaskRef, TaskType, Value, validate_changes,
};
use crate::error::TaskError;
use crate::target::{ApiTarget, Render};
use async_trait::async_trait;
use serde_json::json;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Tracks how many `find` calls overlap.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    finds: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    async fn observe(&self, hold: Duration) {
        self.finds.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(hold).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Minimal task backed by `Stub` resources in the cloud.
#[derive(Debug, Clone)]
pub struct StubTask {
    name: String,
    lifecycle: Lifecycle,
    id: Option<String>,
    refs: Vec<String>,
    deps: Vec<String>,
    fields: Vec<(&'static str, String)>,
    required: Vec<&'static str>,
    immutable: Vec<&'static str>,
    gauge: Option<Arc<ConcurrencyGauge>>,
    panics: bool,
}

impl StubTask {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lifecycle: Lifecycle::Sync,
            id: None,
            refs: Vec::new(),
            deps: Vec::new(),
            fields: Vec::new(),
            required: Vec::new(),
            immutable: vec!["ID"],
            gauge: None,
            panics: false,
        }
    }

    pub fn with_ref(mut self, name: &str) -> Self {
        self.refs.push(name.to_string());
        self
    }

    pub fn with_dependency(mut self, name: &str) -> Self {
        self.deps.push(name.to_string());
        self
    }

    pub fn with_field(mut self, field: &'static str, value: &str) -> Self {
        self.fields.push((field, value.to_string()));
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub const fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn requiring(mut self, field: &'static str) -> Self {
        self.required.push(field);
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Makes `find` panic.
    pub const fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    fn attributes(&self) -> BTreeMap<String, serde_json::Value> {
        self.fields
            .iter()
            .map(|(f, v)| ((*f).to_string(), json!(v)))
            .collect()
    }
}

#[async_trait]
impl Task for StubTask {
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
        let mut fields = FieldSet::new()
            .with("ID", self.id.clone())
            .set("Name", self.name.as_str())
            .set_of(
                "Refs",
                self.refs
                    .iter()
                    .map(|r| Value::Ref(TaskRef::new(Self::KIND, r.as_str()))),
            );
        for (field, value) in &self.fields {
            fields = fields.set(*field, value.as_str());
        }
        fields
    }

    async fn find(&self, ctx: &Context) -> Result<Option<Box<dyn Task>>, TaskError> {
        assert!(!self.panics, "find panicked for {}", self.name);
        if let Some(gauge) = &self.gauge {
            gauge.observe(Duration::from_millis(20)).await;
        }
        let Some(resource) = ctx.cloud().describe(Self::KIND, &self.name).await? else {
            return Ok(None);
        };
        let mut actual = Self::new(&self.name);
        actual.lifecycle = self.lifecycle;
        actual.id = Some(resource.id.clone());
        actual.refs = self.refs.clone();
        actual.fields = self
            .fields
            .iter()
            .filter_map(|(f, _)| resource.attr_str(f).map(|v| (*f, v)))
            .collect();
        Ok(Some(Box::new(actual)))
    }

    fn check_changes(
        &self,
        actual: Option<&dyn Task>,
        changes: &Changes,
    ) -> Result<(), TaskError> {
        validate_changes(
            actual.is_some(),
            &self.fields(),
            changes,
            &self.required,
            &self.immutable,
        )
    }

    fn dependencies(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn compare_with_id(&self) -> Option<String> {
        self.id.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TaskType for StubTask {
    const KIND: &'static str = "Stub";
}

#[async_trait]
impl Render<ApiTarget> for StubTask {
    async fn render(
        &self,
        target: &ApiTarget,
        ctx: &Context,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<(), TaskError> {
        match actual.and_then(|a| a.id.clone()) {
            None => {
                let request =
                    CreateRequest::new(Self::KIND, &self.name).with_attributes(self.attributes());
                target.create(ctx, &self.name, request).await?;
            }
            Some(id) => {
                target
                    .update(&self.name, Self::KIND, &id, self.attributes())
                    .await?;
            }
        }
        Ok(())
    }
}
