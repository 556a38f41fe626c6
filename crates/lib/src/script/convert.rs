//! Conversion between property values and Lua values.

use std::collections::BTreeMap;

use mlua::prelude::*;

use crate::language::PropertyValue;

/// Converts a Lua value into a property value.
///
/// Tables with a non-nil `[1]` are read as sequences of length `#t`; all other tables
/// as string-keyed maps.
pub fn lua_to_property(value: LuaValue) -> LuaResult<PropertyValue> {
  match value {
    LuaValue::String(s) => Ok(PropertyValue::String(s.to_str()?.to_string())),
    LuaValue::Integer(i) => Ok(PropertyValue::Integer(i)),
    LuaValue::Number(n) => Ok(PropertyValue::Number(n)),
    LuaValue::Boolean(b) => Ok(PropertyValue::Bool(b)),
    LuaValue::Table(t) => {
      let len = t.raw_len();
      let first: LuaValue = t.raw_get(1)?;
      if len > 0 && !first.is_nil() {
        let mut list = Vec::with_capacity(len);
        for i in 1..=len {
          let item: LuaValue = t.raw_get(i)?;
          list.push(lua_to_property(item)?);
        }
        Ok(PropertyValue::List(list))
      } else {
        let mut map = BTreeMap::new();
        for pair in t.pairs::<String, LuaValue>() {
          let (k, v) = pair?;
          map.insert(k, lua_to_property(v)?);
        }
        Ok(PropertyValue::Map(map))
      }
    }
    LuaValue::Nil => Err(LuaError::external("nil is not a property value")),
    _ => Err(LuaError::external(format!(
      "unsupported property value type: {}",
      value.type_name()
    ))),
  }
}

pub fn property_to_lua(lua: &Lua, value: &PropertyValue) -> LuaResult<LuaValue> {
  match value {
    PropertyValue::Bool(b) => Ok(LuaValue::Boolean(*b)),
    PropertyValue::Integer(i) => Ok(LuaValue::Integer(*i)),
    PropertyValue::Number(n) => Ok(LuaValue::Number(*n)),
    PropertyValue::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
    PropertyValue::List(list) => {
      let table = lua.create_table_with_capacity(list.len(), 0)?;
      for (i, item) in list.iter().enumerate() {
        table.raw_set(i + 1, property_to_lua(lua, item)?)?;
      }
      Ok(LuaValue::Table(table))
    }
    PropertyValue::Map(map) => property_map_to_lua(lua, map),
  }
}

pub fn property_map_to_lua(lua: &Lua, map: &BTreeMap<String, PropertyValue>) -> LuaResult<LuaValue> {
  let table = lua.create_table_with_capacity(0, map.len())?;
  for (k, v) in map {
    table.raw_set(k.as_str(), property_to_lua(lua, v)?)?;
  }
  Ok(LuaValue::Table(table))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tables_become_lists_or_maps() {
    let lua = Lua::new();
    let value: LuaValue = lua
      .load(r#"return { flags = { "-O2", "-g" }, debug = true, level = 3, ratio = 0.5 }"#)
      .eval()
      .unwrap();

    let PropertyValue::Map(map) = lua_to_property(value).unwrap() else {
      panic!("expected a map");
    };
    assert_eq!(
      map.get("flags"),
      Some(&PropertyValue::List(vec!["-O2".into(), "-g".into()]))
    );
    assert_eq!(map.get("debug"), Some(&PropertyValue::Bool(true)));
    assert_eq!(map.get("level"), Some(&PropertyValue::Integer(3)));
    assert_eq!(map.get("ratio"), Some(&PropertyValue::Number(0.5)));
  }

  #[test]
  fn functions_are_rejected() {
    let lua = Lua::new();
    let value: LuaValue = lua.load("return function() end").eval().unwrap();
    assert!(lua_to_property(value).is_err());
  }

  #[test]
  fn property_values_reach_lua_intact() {
    let lua = Lua::new();
    let value = PropertyValue::Map(BTreeMap::from([
      ("name".to_string(), PropertyValue::from("app")),
      ("defines".to_string(), PropertyValue::List(vec!["A".into(), "B".into()])),
    ]));
    lua.globals().set("v", property_to_lua(&lua, &value).unwrap()).unwrap();
    let joined: String = lua.load("return v.name .. ':' .. table.concat(v.defines, ',')").eval().unwrap();
    assert_eq!(joined, "app:A,B");
  }
}
