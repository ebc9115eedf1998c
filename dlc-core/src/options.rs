//! Option Store: current values for the dynamic options of the selected model.
//!
//! Values are kept in four per-kind lists in server-declared order. The
//! contents are only ever replaced as a whole by [`OptionStore::reset_for_model`],
//! so values of one model never leak into another model's requests.

use thiserror::Error;

use crate::model::{ModelDescriptor, OptionKind, OptionValue};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown {kind} option {name:?}")]
pub struct UnknownOption {
    pub kind: OptionKind,
    pub name: String,
}

/// Immutable copy of every current option value, ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionSnapshot {
    pub bools: Vec<(String, bool)>,
    pub ints: Vec<(String, i32)>,
    pub floats: Vec<(String, f32)>,
    pub strings: Vec<(String, String)>,
}

impl OptionSnapshot {
    pub fn len(&self) -> usize {
        self.bools.len() + self.ints.len() + self.floats.len() + self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, kind: OptionKind, name: &str) -> Option<OptionValue> {
        match kind {
            OptionKind::Bool => lookup(&self.bools, name).map(|v| OptionValue::Bool(*v)),
            OptionKind::Int => lookup(&self.ints, name).map(|v| OptionValue::Int(*v)),
            OptionKind::Float => lookup(&self.floats, name).map(|v| OptionValue::Float(*v)),
            OptionKind::String => {
                lookup(&self.strings, name).map(|v| OptionValue::String(v.clone()))
            }
        }
    }
}

fn lookup<'a, T>(list: &'a [(String, T)], name: &str) -> Option<&'a T> {
    list.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

fn lookup_mut<'a, T>(list: &'a mut [(String, T)], name: &str) -> Option<&'a mut T> {
    list.iter_mut().find(|(n, _)| n == name).map(|(_, v)| v)
}

#[derive(Debug, Clone, Default)]
pub struct OptionStore {
    /// Descriptor the values were last reset for.
    model: Option<ModelDescriptor>,
    generation: u64,
    values: OptionSnapshot,
}

impl OptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all values with `model`'s schema defaults, in schema order.
    pub fn reset_for_model(&mut self, model: &ModelDescriptor) {
        let mut values = OptionSnapshot::default();
        for field in &model.option_schema {
            let name = field.name.clone();
            match &field.default {
                OptionValue::Bool(v) => values.bools.push((name, *v)),
                OptionValue::Int(v) => values.ints.push((name, *v)),
                OptionValue::Float(v) => values.floats.push((name, *v)),
                OptionValue::String(v) => values.strings.push((name, v.clone())),
            }
        }
        self.values = values;
        self.model = Some(model.clone());
        self.generation += 1;
    }

    /// Drop every value (no model selected).
    pub fn clear(&mut self) {
        self.values = OptionSnapshot::default();
        self.model = None;
        self.generation += 1;
    }

    /// Name of the model the store was last reset for.
    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().map(|m| m.name.as_str())
    }

    pub fn model(&self) -> Option<&ModelDescriptor> {
        self.model.as_ref()
    }

    /// True if the store holds `model`'s schema: same name, same fields
    /// and kinds in the same order, same defaults.
    pub fn is_bound_to(&self, model: &ModelDescriptor) -> bool {
        self.model
            .as_ref()
            .is_some_and(|m| m.name == model.name && m.option_schema == model.option_schema)
    }

    /// Increases on every reset; lets a UI notice that its controls are stale.
    pub fn schema_generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, kind: OptionKind, name: &str) -> Result<OptionValue, UnknownOption> {
        self.values.get(kind, name).ok_or_else(|| UnknownOption {
            kind,
            name: name.to_string(),
        })
    }

    /// Set an existing option. The kind is taken from `value`.
    pub fn set(&mut self, name: &str, value: OptionValue) -> Result<(), UnknownOption> {
        let kind = value.kind();
        let slot_found = match value {
            OptionValue::Bool(v) => lookup_mut(&mut self.values.bools, name).map(|s| *s = v),
            OptionValue::Int(v) => lookup_mut(&mut self.values.ints, name).map(|s| *s = v),
            OptionValue::Float(v) => lookup_mut(&mut self.values.floats, name).map(|s| *s = v),
            OptionValue::String(v) => lookup_mut(&mut self.values.strings, name).map(|s| *s = v),
        };
        slot_found.ok_or_else(|| UnknownOption {
            kind,
            name: name.to_string(),
        })
    }

    /// Kind of the option called `name`.
    ///
    /// Used to interpret untyped input (`name=value`). A name declared under
    /// two kinds resolves to the earlier of bool, int, float, string.
    pub fn kind_of(&self, name: &str) -> Option<OptionKind> {
        self.fields()
            .into_iter()
            .find(|(_, n)| n == name)
            .map(|(k, _)| k)
    }

    /// Visible `(kind, name)` pairs, per kind in schema order.
    pub fn fields(&self) -> Vec<(OptionKind, String)> {
        let v = &self.values;
        let mut out = Vec::with_capacity(v.len());
        out.extend(v.bools.iter().map(|(n, _)| (OptionKind::Bool, n.clone())));
        out.extend(v.ints.iter().map(|(n, _)| (OptionKind::Int, n.clone())));
        out.extend(v.floats.iter().map(|(n, _)| (OptionKind::Float, n.clone())));
        out.extend(v.strings.iter().map(|(n, _)| (OptionKind::String, n.clone())));
        out
    }

    pub fn snapshot(&self) -> OptionSnapshot {
        self.values.clone()
    }
}
