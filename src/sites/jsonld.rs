//! Reading schema.org metadata from `application/ld+json` scripts.

use scraper::Html;
use serde_json::Value;

use crate::dom;

/// Every JSON-LD object of the document, with top level arrays and
/// `@graph` lists flattened. Scripts that are not valid JSON are skipped.
pub fn objects(document: &Html) -> Vec<Value> {
    let mut objects = Vec::new();

    for script in dom::select_all(dom::root(document), r#"script[type="application/ld+json"]"#) {
        let source = script.text().collect::<String>();

        match serde_json::from_str::<Value>(source.trim()) {
            Ok(value) => flatten(value, &mut objects),
            Err(err) => log::debug!("Skipping invalid JSON-LD: {}", err),
        }
    }

    objects
}

fn flatten(value: Value, objects: &mut Vec<Value>) {
    match value {
        Value::Array(values) => values.into_iter().for_each(|value| flatten(value, objects)),
        Value::Object(mut object) => {
            if let Some(graph) = object.remove("@graph") {
                flatten(graph, objects);
            }

            if object.keys().any(|key| key != "@context") {
                objects.push(Value::Object(object));
            }
        }
        _ => {}
    }
}

/// The first object whose `@type` is one of `types`.
pub fn find_typed(document: &Html, types: &[&str]) -> Option<Value> {
    objects(document).into_iter().find(|object| has_type(object, types))
}

pub fn has_type(object: &Value, types: &[&str]) -> bool {
    match object.get("@type") {
        Some(Value::String(kind)) => types.contains(&kind.as_str()),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .any(|kind| types.contains(&kind)),
        _ => false,
    }
}

/// A non-empty string field.
pub fn string(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(|value| match value {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            // `"image": {"@type": "ImageObject", "url": ...}`
            Value::Object(_) => value.get("url").and_then(Value::as_str).map(|url| url.trim().to_string()),
            Value::Array(values) => values.first().and_then(Value::as_str).map(|text| text.trim().to_string()),
            _ => None,
        })
        .filter(|text| !text.is_empty())
}

/// Names of a field that may be a string, an object with a `name`, or an
/// array of either.
pub fn names(object: &Value, key: &str) -> Vec<String> {
    fn name_of(value: &Value) -> Option<String> {
        match value {
            Value::String(name) => Some(name.trim().to_string()),
            Value::Object(_) => value.get("name").and_then(Value::as_str).map(|name| name.trim().to_string()),
            _ => None,
        }
    }

    let names: Vec<String> = match object.get(key) {
        Some(Value::Array(values)) => values.iter().filter_map(name_of).collect(),
        Some(value) => name_of(value).into_iter().collect(),
        None => Vec::new(),
    };

    names.into_iter().filter(|name| !name.is_empty()).collect()
}

pub fn number(object: &Value, key: &str) -> Option<u32> {
    match object.get(key)? {
        Value::Number(number) => number.as_u64().and_then(|number| u32::try_from(number).ok()),
        Value::String(text) => dom::parse_leading_int(text),
        _ => None,
    }
}

/// All string values of a field, e.g. the urls in `sameAs`.
pub fn strings(object: &Value, key: &str) -> Vec<String> {
    match object.get(key) {
        Some(Value::String(text)) => vec![text.clone()],
        Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    }
}
