//! XML to value tree.
//!
//! The root element becomes the top-level object. Attributes and child
//! elements become fields, repeated children become arrays, and elements
//! holding only text become strings. Text mixed with child elements is
//! dropped.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// An element whose end tag has not been seen yet.
struct Element {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self, String> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut fields = Map::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(|e| e.to_string())?;
            fields.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            fields,
            text: String::new(),
        })
    }

    fn add_child(&mut self, name: String, value: Value) {
        match self.fields.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.fields.insert(name, value);
            }
        }
    }

    fn into_value(self) -> Value {
        if self.fields.is_empty() {
            Value::String(self.text)
        } else {
            Value::Object(self.fields)
        }
    }
}

pub(crate) fn decode(text: &str) -> Result<Value, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut open: Vec<Element> = Vec::new();
    let mut root = None;
    loop {
        let closed = match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) => {
                open.push(Element::open(&start)?);
                None
            }
            Event::Empty(start) => Some(Element::open(&start)?),
            Event::End(_) => open.pop(),
            Event::Text(content) => {
                if let Some(element) = open.last_mut() {
                    element
                        .text
                        .push_str(&content.unescape().map_err(|e| e.to_string())?);
                }
                None
            }
            Event::CData(content) => {
                if let Some(element) = open.last_mut() {
                    element.text.push_str(&String::from_utf8_lossy(&content));
                }
                None
            }
            Event::Eof => break,
            _ => None,
        };

        if let Some(element) = closed {
            let name = element.name.clone();
            let value = element.into_value();
            match open.last_mut() {
                Some(parent) => parent.add_child(name, value),
                None if root.is_none() => root = Some(value),
                None => return Err("multiple root elements".into()),
            }
        }
    }

    if let Some(element) = open.last() {
        return Err(format!("element <{}> is not closed", element.name));
    }
    root.ok_or_else(|| "no root element".to_string())
}
