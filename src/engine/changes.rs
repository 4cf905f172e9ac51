//! Field-level diff between observed and desired task state.
//!
//! A [`FieldSet`] lists every comparable attribute of a task. An attribute
//! that is `None` is unset: the task does not manage it, which is different
//! from managing it at a zero value. [`Changes`] is sparse: a field that is
//! absent from it is unchanged.

use crate::engine::value::{TaskRef, Value};
use crate::error::TaskError;
use serde::Serialize;
use std::collections::BTreeMap;

// ============================================================================
// Field set
// ============================================================================

/// The comparable attributes of a task, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    fields: Vec<(&'static str, Option<Value>)>,
}

impl FieldSet {
    /// Creates an empty field set.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Adds an optional attribute.
    #[must_use]
    pub fn with<V: Into<Value>>(mut self, name: &'static str, value: Option<V>) -> Self {
        self.fields.push((name, value.map(Into::into)));
        self
    }

    /// Adds an attribute that is always set.
    #[must_use]
    pub fn set(mut self, name: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((name, Some(value.into())));
        self
    }

    /// Adds a set-valued attribute. An empty collection leaves it unset.
    #[must_use]
    pub fn set_of(mut self, name: &'static str, items: impl IntoIterator<Item = Value>) -> Self {
        let value = Value::set(items);
        let value = match &value {
            Value::List(items) if items.is_empty() => None,
            _ => Some(value),
        };
        self.fields.push((name, value));
        self
    }

    /// Adds a string map attribute. An empty map leaves it unset.
    #[must_use]
    pub fn map(mut self, name: &'static str, map: &BTreeMap<String, String>) -> Self {
        let value = (!map.is_empty()).then(|| Value::string_map(map));
        self.fields.push((name, value));
        self
    }

    /// Returns the value of a field, if it is set.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    /// Returns true if the field is declared and set.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over all declared fields.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&Value>)> + '_ {
        self.fields.iter().map(|(n, v)| (*n, v.as_ref()))
    }

    /// Returns every task reference held by any field.
    #[must_use]
    pub fn references(&self) -> Vec<&TaskRef> {
        let mut refs = Vec::new();
        for value in self.fields.iter().filter_map(|(_, v)| v.as_ref()) {
            value.collect_refs(&mut refs);
        }
        refs
    }
}

// ============================================================================
// Changes
// ============================================================================

/// Old and new value of a changed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// Observed value, `None` when the field was unset or the resource is new.
    pub old: Option<Value>,
    /// Desired value.
    pub new: Value,
}

/// State of a single field inside [`Changes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta<'a> {
    /// The field does not need to change.
    Unchanged,
    /// The field moves from `old` to `new`.
    Changed(&'a FieldChange),
}

/// Sparse record of fields that differ between actual and expected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    changed: Vec<(&'static str, FieldChange)>,
    creating: bool,
}

impl Changes {
    /// Computes the delta that takes `actual` to `expected`.
    ///
    /// With no actual state every set field of `expected` is a change. Fields
    /// unset in `expected` are never reported.
    #[must_use]
    pub fn compute(actual: Option<&FieldSet>, expected: &FieldSet) -> Self {
        let mut changed = Vec::new();
        for (name, desired) in expected.iter() {
            let Some(desired) = desired else { continue };
            let observed = actual.and_then(|a| a.get(name));
            if observed != Some(desired) {
                changed.push((
                    name,
                    FieldChange {
                        old: observed.cloned(),
                        new: desired.clone(),
                    },
                ));
            }
        }
        Self {
            changed,
            creating: actual.is_none(),
        }
    }

    /// Returns true if no field needs to change.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// Number of changed fields.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.changed.len()
    }

    /// Returns true if these changes describe a creation.
    #[must_use]
    pub const fn is_creation(&self) -> bool {
        self.creating
    }

    /// Returns the delta of a single field.
    #[must_use]
    pub fn field(&self, name: &str) -> Delta<'_> {
        self.changed
            .iter()
            .find(|(n, _)| *n == name)
            .map_or(Delta::Unchanged, |(_, c)| Delta::Changed(c))
    }

    /// Returns true if the field changes.
    #[must_use]
    pub fn is_changed(&self, name: &str) -> bool {
        matches!(self.field(name), Delta::Changed(_))
    }

    /// Iterates over the changed fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldChange)> + '_ {
        self.changed.iter().map(|(n, c)| (*n, c))
    }

    /// Names of the changed fields.
    #[must_use]
    pub fn field_names(&self) -> Vec<String> {
        self.changed.iter().map(|(n, _)| (*n).to_string()).collect()
    }

    /// Fails with `CannotChangeField` on the first immutable field that changes.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::CannotChangeField`] naming the offending field.
    pub fn ensure_unchanged(&self, immutable: &[&str]) -> Result<(), TaskError> {
        match immutable.iter().find(|f| self.is_changed(f)) {
            Some(field) => Err(TaskError::cannot_change(*field)),
            None => Ok(()),
        }
    }
}

/// Standard `check_changes` validation shared by resource tasks.
///
/// On creation every `required` field must be set in `expected`. On update
/// no `immutable` field may change.
///
/// # Errors
///
/// Returns [`TaskError::RequiredField`] or [`TaskError::CannotChangeField`].
pub fn validate_changes(
    exists: bool,
    expected: &FieldSet,
    changes: &Changes,
    required: &[&str],
    immutable: &[&str],
) -> Result<(), TaskError> {
    if exists {
        return changes.ensure_unchanged(immutable);
    }
    match required.iter().find(|f| !expected.is_set(f)) {
        Some(field) => Err(TaskError::required(*field)),
        None => Ok(()),
    }
}
