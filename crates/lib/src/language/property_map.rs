//! Resolved property values and the copy-on-write property map.
//!
//! A product owns a property map; groups inherit it and may override values,
//! source artifacts inherit their group's map and never override. A map is shared
//! by pointer until someone overrides a value, at which point [`PropertyMap::set`]
//! clones it for that owner only. A map held by more than one owner is never
//! mutated in place.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::consts::{CORE_NAMESPACE, MODULES_KEY};
use crate::persist::{PersistError, Persistent, PoolReader, PoolWriter};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
  Bool(bool),
  Integer(i64),
  Number(f64),
  String(String),
  List(Vec<PropertyValue>),
  Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      PropertyValue::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      PropertyValue::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_map(&self) -> Option<&BTreeMap<String, PropertyValue>> {
    match self {
      PropertyValue::Map(map) => Some(map),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[PropertyValue]> {
    match self {
      PropertyValue::List(list) => Some(list),
      _ => None,
    }
  }

  /// Textual form used when a value lands in a process environment.
  pub fn to_plain_string(&self) -> String {
    match self {
      PropertyValue::Bool(b) => b.to_string(),
      PropertyValue::Integer(i) => i.to_string(),
      PropertyValue::Number(n) => n.to_string(),
      PropertyValue::String(s) => s.clone(),
      PropertyValue::List(list) => list.iter().map(|v| v.to_plain_string()).collect::<Vec<_>>().join(","),
      PropertyValue::Map(_) => String::new(),
    }
  }
}

impl From<&str> for PropertyValue {
  fn from(value: &str) -> Self {
    PropertyValue::String(value.to_string())
  }
}

impl From<String> for PropertyValue {
  fn from(value: String) -> Self {
    PropertyValue::String(value)
  }
}

impl From<bool> for PropertyValue {
  fn from(value: bool) -> Self {
    PropertyValue::Bool(value)
  }
}

impl From<i64> for PropertyValue {
  fn from(value: i64) -> Self {
    PropertyValue::Integer(value)
  }
}

impl From<BTreeMap<String, PropertyValue>> for PropertyValue {
  fn from(value: BTreeMap<String, PropertyValue>) -> Self {
    PropertyValue::Map(value)
  }
}

const TAG_BOOL: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_LIST: u8 = 4;
const TAG_MAP: u8 = 5;

impl Persistent for PropertyValue {
  fn store(&self, pool: &mut PoolWriter) {
    match self {
      PropertyValue::Bool(b) => {
        pool.write_u8(TAG_BOOL);
        pool.write_bool(*b);
      }
      PropertyValue::Integer(i) => {
        pool.write_u8(TAG_INTEGER);
        pool.write_i64(*i);
      }
      PropertyValue::Number(n) => {
        pool.write_u8(TAG_NUMBER);
        pool.write_f64(*n);
      }
      PropertyValue::String(s) => {
        pool.write_u8(TAG_STRING);
        pool.store_string(s);
      }
      PropertyValue::List(list) => {
        pool.write_u8(TAG_LIST);
        pool.store_values(list);
      }
      PropertyValue::Map(map) => {
        pool.write_u8(TAG_MAP);
        store_value_map(map, pool);
      }
    }
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(match pool.read_u8()? {
      TAG_BOOL => PropertyValue::Bool(pool.read_bool()?),
      TAG_INTEGER => PropertyValue::Integer(pool.read_i64()?),
      TAG_NUMBER => PropertyValue::Number(pool.read_f64()?),
      TAG_STRING => PropertyValue::String(pool.load_string()?),
      TAG_LIST => PropertyValue::List(pool.load_values()?),
      TAG_MAP => PropertyValue::Map(load_value_map(pool)?),
      tag => return Err(PersistError::InvalidTag { what: "property value", tag }),
    })
  }
}

pub(crate) fn store_value_map(map: &BTreeMap<String, PropertyValue>, pool: &mut PoolWriter) {
  pool.write_len(map.len());
  for (key, value) in map {
    pool.store_string(key);
    value.store(pool);
  }
}

pub(crate) fn load_value_map(pool: &mut PoolReader<'_>) -> Result<BTreeMap<String, PropertyValue>, PersistError> {
  let count = pool.read_len()?;
  let mut map = BTreeMap::new();
  for _ in 0..count {
    let key = pool.load_string()?;
    map.insert(key, PropertyValue::load(pool)?);
  }
  Ok(map)
}

pub type PropertyMapPtr = Arc<PropertyMap>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PropertyMap {
  value: BTreeMap<String, PropertyValue>,
}

impl PropertyMap {
  pub fn new(value: BTreeMap<String, PropertyValue>) -> Self {
    Self { value }
  }

  pub fn shared(value: BTreeMap<String, PropertyValue>) -> PropertyMapPtr {
    Arc::new(Self::new(value))
  }

  pub fn value(&self) -> &BTreeMap<String, PropertyValue> {
    &self.value
  }

  /// Looks up a value along a path of nested map keys.
  pub fn property(&self, path: &[&str]) -> Option<&PropertyValue> {
    let (first, rest) = path.split_first()?;
    let mut current = self.value.get(*first)?;
    for key in rest {
      current = current.as_map()?.get(*key)?;
    }
    Some(current)
  }

  /// A property of the build tool's own namespace (`quarry.<key>`).
  pub fn core_property(&self, key: &str) -> Option<&PropertyValue> {
    self.property(&[CORE_NAMESPACE, key])
  }

  /// The configuration of one module as seen by the owning product.
  pub fn module_properties(&self, module: &str) -> Option<&BTreeMap<String, PropertyValue>> {
    self.property(&[MODULES_KEY, module])?.as_map()
  }

  /// Sets `path` to `value`, cloning the map first if anyone else holds it.
  ///
  /// Intermediate maps are created as needed; a non-map value on the path is replaced.
  pub fn set(map: &mut PropertyMapPtr, path: &[&str], value: PropertyValue) {
    insert_at_path(&mut Arc::make_mut(map).value, path, value);
  }

  /// Renders the map as an indented Lua table literal.
  pub fn to_literal(&self) -> String {
    let mut out = String::from("{\n");
    write_literal_map(&mut out, &self.value, 1);
    out.push('}');
    out
  }
}

/// Inserts `value` at a nested key path, creating or replacing intermediate maps.
pub(crate) fn insert_at_path(map: &mut BTreeMap<String, PropertyValue>, path: &[&str], value: PropertyValue) {
  let Some((last, parents)) = path.split_last() else {
    return;
  };
  let mut current = map;
  for key in parents {
    let entry = current
      .entry(key.to_string())
      .or_insert_with(|| PropertyValue::Map(BTreeMap::new()));
    if !matches!(entry, PropertyValue::Map(_)) {
      *entry = PropertyValue::Map(BTreeMap::new());
    }
    let PropertyValue::Map(next) = entry else {
      return;
    };
    current = next;
  }
  current.insert(last.to_string(), value);
}

fn write_literal_map(out: &mut String, map: &BTreeMap<String, PropertyValue>, level: usize) {
  let indent = "    ".repeat(level);
  for (key, value) in map {
    if is_identifier(key) {
      let _ = write!(out, "{}{} = ", indent, key);
    } else {
      let _ = write!(out, "{}[{}] = ", indent, quote(key));
    }
    write_literal_value(out, value, level);
    out.push_str(",\n");
  }
}

fn write_literal_value(out: &mut String, value: &PropertyValue, level: usize) {
  match value {
    PropertyValue::Bool(b) => out.push_str(&b.to_string()),
    PropertyValue::Integer(i) => out.push_str(&i.to_string()),
    PropertyValue::Number(n) => {
      let _ = write!(out, "{:?}", n);
    }
    PropertyValue::String(s) => out.push_str(&quote(s)),
    PropertyValue::List(list) => {
      out.push('{');
      for (i, item) in list.iter().enumerate() {
        if i > 0 {
          out.push_str(", ");
        }
        write_literal_value(out, item, level);
      }
      out.push('}');
    }
    PropertyValue::Map(map) => {
      out.push_str("{\n");
      write_literal_map(out, map, level + 1);
      out.push_str(&"    ".repeat(level));
      out.push('}');
    }
  }
}

fn is_identifier(key: &str) -> bool {
  let mut chars = key.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quote(s: &str) -> String {
  let mut out = String::with_capacity(s.len() + 2);
  out.push('"');
  for c in s.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      c => out.push(c),
    }
  }
  out.push('"');
  out
}

impl Persistent for PropertyMap {
  fn store(&self, pool: &mut PoolWriter) {
    store_value_map(&self.value, pool);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      value: load_value_map(pool)?,
    })
  }
}
