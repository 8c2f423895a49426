//! Conversion between [`Value`] and Rhai [`Dynamic`]

use hotmod_kernel::Value;
use rhai::{Array, Dynamic, Map};
use std::collections::BTreeMap;

pub fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Unit => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::Str(s) => Dynamic::from(s.clone()),
        Value::List(items) => {
            let array: Array = items.iter().map(value_to_dynamic).collect();
            Dynamic::from_array(array)
        }
        Value::Map(entries) => {
            let mut map = Map::new();
            for (k, v) in entries {
                map.insert(k.as_str().into(), value_to_dynamic(v));
            }
            Dynamic::from_map(map)
        }
    }
}

/// Convert a script value back; anything without a [`Value`] counterpart
/// becomes its display string.
pub fn dynamic_to_value(value: &Dynamic) -> Value {
    if value.is_unit() {
        Value::Unit
    } else if let Some(b) = value.clone().try_cast::<bool>() {
        Value::Bool(b)
    } else if let Some(i) = value.clone().try_cast::<i64>() {
        Value::Int(i)
    } else if let Some(f) = value.clone().try_cast::<f64>() {
        Value::Float(f)
    } else if let Some(s) = value.clone().try_cast::<String>() {
        Value::Str(s)
    } else if let Some(array) = value.clone().try_cast::<Array>() {
        Value::List(array.iter().map(dynamic_to_value).collect())
    } else if let Some(map) = value.clone().try_cast::<Map>() {
        let entries: BTreeMap<String, Value> = map
            .iter()
            .map(|(k, v)| (k.to_string(), dynamic_to_value(v)))
            .collect();
        Value::Map(entries)
    } else {
        Value::Str(value.to_string())
    }
}
