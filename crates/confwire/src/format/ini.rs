//! INI to value tree.
//!
//! Keys before the first section sit at the top level; each section
//! becomes an object. Every value is a string.

use ::ini::Ini;
use serde_json::{Map, Value};

pub(crate) fn decode(text: &str) -> Result<Value, String> {
    let document = Ini::load_from_str(text).map_err(|e| e.to_string())?;

    let mut root = Map::new();
    for (section, properties) in document.iter() {
        let entries: Map<String, Value> = properties
            .iter()
            .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
            .collect();
        match section {
            None => root.extend(entries),
            Some(name) => {
                root.insert(name.to_string(), Value::Object(entries));
            }
        }
    }
    Ok(Value::Object(root))
}
