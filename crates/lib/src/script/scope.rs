use std::collections::BTreeMap;

use mlua::prelude::*;

use crate::language::PropertyValue;

/// A value bound in a [`Scope`].
#[derive(Debug, Clone)]
pub enum ScopeValue {
  Property(PropertyValue),
  Lua(LuaValue),
}

impl From<PropertyValue> for ScopeValue {
  fn from(value: PropertyValue) -> Self {
    ScopeValue::Property(value)
  }
}

impl From<LuaValue> for ScopeValue {
  fn from(value: LuaValue) -> Self {
    ScopeValue::Lua(value)
  }
}

#[derive(Debug, Clone, Default)]
pub struct ScopeLayer {
  name: String,
  entries: BTreeMap<String, ScopeValue>,
}

impl ScopeLayer {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn set(&mut self, key: impl Into<String>, value: impl Into<ScopeValue>) {
    self.entries.insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&ScopeValue> {
    self.entries.get(key)
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &ScopeValue)> {
    self.entries.iter()
  }
}

/// Layered symbol table for script evaluation.
///
/// Layers are kept in the order they were added; lookups go from the last layer to
/// the first, so later layers shadow earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Scope {
  layers: Vec<ScopeLayer>,
}

impl Scope {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the layer called `name`, appending an empty one if there is none yet.
  pub fn layer_mut(&mut self, name: &str) -> &mut ScopeLayer {
    let index = match self.layers.iter().position(|layer| layer.name == name) {
      Some(index) => index,
      None => {
        self.layers.push(ScopeLayer {
          name: name.to_string(),
          entries: BTreeMap::new(),
        });
        self.layers.len() - 1
      }
    };
    &mut self.layers[index]
  }

  pub fn layer(&self, name: &str) -> Option<&ScopeLayer> {
    self.layers.iter().find(|layer| layer.name == name)
  }

  pub fn lookup(&self, key: &str) -> Option<&ScopeValue> {
    self.layers.iter().rev().find_map(|layer| layer.get(key))
  }

  /// Every visible binding, with shadowed ones left out.
  pub fn visible(&self) -> BTreeMap<&str, &ScopeValue> {
    let mut visible = BTreeMap::new();
    for layer in &self.layers {
      for (key, value) in &layer.entries {
        visible.insert(key.as_str(), value);
      }
    }
    visible
  }
}
