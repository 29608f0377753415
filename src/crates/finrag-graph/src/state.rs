//! State schema and reducers.
//!
//! Every field of the shared state declares how writes to it are combined.
//! Nodes return partial states ("patches"); the executor folds the patches of
//! one superstep into the state through the field's [`Reducer`].
//!
//! ```text
//!            superstep N
//!   ┌──────────┐   ┌──────────┐   ┌──────────┐
//!   │ task A   │   │ task B   │   │ task C   │
//!   └────┬─────┘   └────┬─────┘   └────┬─────┘
//!        │ patch        │ patch        │ patch
//!        ▼              ▼              ▼
//!   ┌──────────────────────────────────────────┐
//!   │ StateSchema::merge_superstep             │
//!   │  overwrite          one writer only      │
//!   │  append-list        concatenate          │
//!   │  union-set          union, first seen    │
//!   │  keep-first-non-empty                    │
//!   └──────────────────────────────────────────┘
//! ```
//!
//! Fields with no declared reducer are overwrite fields. Two tasks of the same
//! superstep writing one overwrite field is a [`GraphError::ConcurrentWrite`],
//! so fan-out branches must confine themselves to mergeable fields.

use crate::error::GraphError;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by reducers
#[derive(Error, Debug)]
pub enum StateError {
    /// State or patch is not a JSON object
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Reducer received values it cannot combine
    #[error("Reducer '{reducer}' failed on field '{field}': {reason}")]
    ReducerError {
        reducer: String,
        field: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Combines the current value of a field with an update
pub trait Reducer: Send + Sync {
    /// Merge `update` into `current` (which is `Null` when unset)
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String>;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Whether several tasks of one superstep may write the field
    fn is_mergeable(&self) -> bool {
        true
    }
}

/// Last writer wins. Forbidden under concurrent fan-out.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> std::result::Result<Value, String> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }

    fn is_mergeable(&self) -> bool {
        false
    }
}

/// Appends list updates; a scalar update is pushed as one element
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendListReducer;

impl Reducer for AppendListReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        let mut result = match current {
            Value::Null => Vec::new(),
            Value::Array(items) => items.clone(),
            other => return Err(format!("current value is not a list: {other}")),
        };
        match update {
            Value::Null => {}
            Value::Array(items) => result.extend(items.iter().cloned()),
            single => result.push(single.clone()),
        }
        Ok(Value::Array(result))
    }

    fn name(&self) -> &str {
        "append-list"
    }
}

/// Set union over JSON lists, keeping first-seen order
#[derive(Debug, Clone, Copy, Default)]
pub struct UnionSetReducer;

impl Reducer for UnionSetReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        let mut result: Vec<Value> = Vec::new();
        let incoming: Vec<&Value> = match (current, update) {
            (Value::Null | Value::Array(_), Value::Array(upd)) => upd.iter().collect(),
            (Value::Null | Value::Array(_), Value::Null) => Vec::new(),
            (Value::Null | Value::Array(_), single) => vec![single],
            (other, _) => return Err(format!("current value is not a set: {other}")),
        };
        if let Value::Array(items) = current {
            for item in items {
                if !result.contains(item) {
                    result.push(item.clone());
                }
            }
        }
        for item in incoming {
            if !result.contains(item) {
                result.push(item.clone());
            }
        }
        Ok(Value::Array(result))
    }

    fn name(&self) -> &str {
        "union-set"
    }
}

/// Keeps the first non-empty value ever written
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepFirstNonEmptyReducer;

/// `null`, `""`, `[]` and `{}` count as empty
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl Reducer for KeepFirstNonEmptyReducer {
    fn reduce(&self, current: &Value, update: &Value) -> std::result::Result<Value, String> {
        if is_empty_value(current) {
            Ok(update.clone())
        } else {
            Ok(current.clone())
        }
    }

    fn name(&self) -> &str {
        "keep-first-non-empty"
    }
}

/// Per-field reducer table
#[derive(Clone, Default)]
pub struct StateSchema {
    fields: HashMap<String, Arc<dyn Reducer>>,
}

impl std::fmt::Debug for StateSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: BTreeMap<&String, &str> =
            self.fields.iter().map(|(k, r)| (k, r.name())).collect();
        f.debug_struct("StateSchema").field("fields", &fields).finish()
    }
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the reducer for a field
    pub fn add_field(&mut self, field: impl Into<String>, reducer: impl Reducer + 'static) {
        self.fields.insert(field.into(), Arc::new(reducer));
    }

    /// Reducer for a field, overwrite when undeclared
    pub fn reducer(&self, field: &str) -> &dyn Reducer {
        self.fields
            .get(field)
            .map(|r| r.as_ref())
            .unwrap_or(&OverwriteReducer)
    }

    /// Names of the declared fields
    pub fn fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.fields.keys().cloned().collect();
        fields.sort();
        fields
    }

    /// Apply one patch written by a single writer
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<()> {
        if update.is_null() {
            return Ok(());
        }
        if state.is_null() {
            *state = Value::Object(Map::new());
        }
        let state_obj = state
            .as_object_mut()
            .ok_or_else(|| StateError::InvalidState("state must be an object".to_string()))?;
        let update_obj = update
            .as_object()
            .ok_or_else(|| StateError::InvalidState(format!("patch must be an object, got {update}")))?;

        for (field, update_value) in update_obj {
            let current = state_obj.get(field).cloned().unwrap_or(Value::Null);
            let reducer = self.reducer(field);
            let reduced = reducer
                .reduce(&current, update_value)
                .map_err(|reason| StateError::ReducerError {
                    reducer: reducer.name().to_string(),
                    field: field.clone(),
                    reason,
                })?;
            state_obj.insert(field.clone(), reduced);
        }
        Ok(())
    }

    /// Fold the patches of one superstep into `state`.
    ///
    /// `updates` pairs each patch with the task label that wrote it and must be
    /// in a deterministic task order. Fails when two tasks wrote the same
    /// overwrite field.
    pub fn merge_superstep(
        &self,
        state: &mut Value,
        updates: &[(String, Value)],
    ) -> std::result::Result<(), GraphError> {
        let mut writers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (task, update) in updates {
            if let Value::Object(map) = update {
                for field in map.keys() {
                    if !self.reducer(field).is_mergeable() {
                        writers.entry(field.as_str()).or_default().push(task.clone());
                    }
                }
            }
        }
        if let Some((field, tasks)) = writers.into_iter().find(|(_, tasks)| tasks.len() > 1) {
            return Err(GraphError::ConcurrentWrite {
                field: field.to_string(),
                writers: tasks,
            });
        }

        for (_, update) in updates {
            self.apply(state, update)?;
        }
        Ok(())
    }
}

/// Shallow overlay of `partial` on top of `base`, used for `Send` branches
pub fn overlay(base: &Value, partial: &Value) -> Value {
    let mut result = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(partial) = partial {
        for (key, value) in partial {
            result.insert(key.clone(), value.clone());
        }
    }
    Value::Object(result)
}
