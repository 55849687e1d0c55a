// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-catalog loading and normalization.
//!
//! Tool definition files come from several generators, and two shapes are in
//! the wild for the same tool:
//!
//! ```json
//! { "type": "function", "function": { "name": "f", "description": "…", "parameters": { … } } }
//! { "type": "function", "name": "f", "description": "…", "parameters": { … } }
//! ```
//!
//! Both are accepted.  Parameter sub-schemas sometimes arrive as *strings*
//! (frequently single-quoted, Python-repr style) instead of objects, and
//! scalar schema fields arrive as `"123"`, `"true"` or `"True"`.  The loader
//! repairs all of this so downstream code only ever sees clean JSON Schema.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// A normalized tool definition: always the flat shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the argument object.
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Load a tool catalog file (JSON array) and normalize every entry.
/// Entries that cannot be normalized are skipped with a warning rather than
/// failing the whole load.
pub fn load_tool_defs(path: &Path) -> anyhow::Result<Vec<ToolDef>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading tool catalog {}", path.display()))?;
    let raw: Vec<Value> = serde_json::from_str(&text)
        .with_context(|| format!("parsing tool catalog {}", path.display()))?;

    let mut defs = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        match normalize_tool_def(entry) {
            Some(def) => defs.push(def),
            None => warn!(index = i, "skipping malformed tool definition"),
        }
    }
    debug!(count = defs.len(), path = %path.display(), "loaded tool catalog");
    Ok(defs)
}

/// Normalize one raw tool definition into [`ToolDef`].
///
/// Accepts both the nested `{type, function:{…}}` and the flat
/// `{type, name, …}` shapes; returns `None` when no name can be found.
pub fn normalize_tool_def(raw: &Value) -> Option<ToolDef> {
    let body = match raw.get("function") {
        Some(f) if f.is_object() => f,
        _ => raw,
    };
    let name = body.get("name")?.as_str()?.to_string();
    let description = body
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or("")
        .to_string();
    let parameters = body
        .get("parameters")
        .map(|p| coerce_schema(p.clone()))
        .unwrap_or_else(empty_object_schema);
    Some(ToolDef {
        name,
        description,
        parameters,
    })
}

/// Recursively repair a parameter schema:
///
/// - a schema delivered as a *string* is re-quoted (single → double) and
///   JSON-parsed;
/// - stringified scalars are coerced (`"123"` → 123, `"true"`/`"True"` →
///   true, `"false"`/`"False"` → false);
/// - nested schema positions are descended into by their shape:
///   `properties`/`patternProperties` hold a map of name → schema,
///   `items`/`not` hold a single schema, `anyOf`/`oneOf`/`allOf` hold a
///   list of schemas.  Any of these may itself arrive as a quoted string.
pub fn coerce_schema(v: Value) -> Value {
    match v {
        Value::String(s) => coerce_string(&s),
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_schema).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, val) in map {
                let coerced = match k.as_str() {
                    "properties" | "patternProperties" => coerce_schema_map(val),
                    "items" | "not" => coerce_embedded_schema(val),
                    "anyOf" | "oneOf" | "allOf" => coerce_schema_list(val),
                    _ => coerce_schema(val),
                };
                out.insert(k, coerced);
            }
            Value::Object(out)
        }
        other => other,
    }
}

/// A single schema position; unwrap a quoted string first.
fn coerce_embedded_schema(v: Value) -> Value {
    match v {
        Value::String(s) => match coerce_string(&s) {
            parsed @ (Value::Object(_) | Value::Array(_)) => coerce_schema(parsed),
            parsed => parsed,
        },
        other => coerce_schema(other),
    }
}

/// A map of name → schema (`properties`, `patternProperties`).  The map's
/// keys are parameter names, never schema keywords, so only the *values*
/// are treated as schemas.
fn coerce_schema_map(v: Value) -> Value {
    let v = match v {
        Value::String(s) => match coerce_string(&s) {
            parsed @ Value::Object(_) => parsed,
            parsed => return parsed,
        },
        other => other,
    };
    match v {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, val)| (k, coerce_embedded_schema(val)))
                .collect(),
        ),
        other => other,
    }
}

/// A list of schemas (`anyOf`, `oneOf`, `allOf`).
fn coerce_schema_list(v: Value) -> Value {
    let v = match v {
        Value::String(s) => match coerce_string(&s) {
            parsed @ Value::Array(_) => parsed,
            parsed => return parsed,
        },
        other => other,
    };
    match v {
        Value::Array(items) => {
            Value::Array(items.into_iter().map(coerce_embedded_schema).collect())
        }
        other => other,
    }
}

/// Repair a single string value.
///
/// Tries, in order: embedded-JSON parse (after single→double quote
/// replacement when the string looks like an object/array), numeric
/// coercion, boolean coercion (including Python-style `True`/`False`).
/// Anything else stays a plain string.
fn coerce_string(s: &str) -> Value {
    let t = s.trim();

    if t.starts_with('{') || t.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Value>(t) {
            return coerce_schema(v);
        }
        // Single-quoted pseudo-JSON: replace quotes and retry.  This is a
        // blunt substitution, but the strings in question are generated
        // schemas, not prose — embedded apostrophes do not occur.
        let requoted = t.replace('\'', "\"");
        if let Ok(v) = serde_json::from_str::<Value>(&requoted) {
            return coerce_schema(v);
        }
        return Value::String(s.to_string());
    }

    if let Ok(n) = t.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = t.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match t {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        _ => Value::String(s.to_string()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
