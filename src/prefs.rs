//! Preference Data Model
//!
//! A user's preferences are an opaque, deeply-nested JSON object. The engine
//! never interprets individual fields except two reserved keys: `lastUpdated`
//! (re-stamped on every mutation) and `version` (a backward-compat tag). All
//! merging is structural: nested objects merge recursively, everything else
//! is replaced wholesale, later writer wins per field.

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::{PrefsyncError, Result};

/// Reserved key holding the RFC 3339 timestamp of the last local mutation.
pub const KEY_LAST_UPDATED: &str = "lastUpdated";

/// Reserved key holding the preference schema tag.
pub const KEY_VERSION: &str = "version";

/// Format version written into every export envelope.
pub const EXPORT_VERSION: &str = "1.0.0";

/// The canonical default preference set.
///
/// Backfills any field absent from a persisted or imported record, and serves
/// as the full payload on first use. Fields added here in a later release are
/// picked up by old records automatically through merge-over-template.
static DEFAULT_TEMPLATE: Lazy<Preferences> = Lazy::new(|| {
    Preferences::from_value(json!({
        "version": "1.0.0",
        "theme": "system",
        "fontSize": "medium",
        "language": "en",
        "units": "imperial",
        "notifications": {
            "email": true,
            "push": true,
            "sms": false,
            "newMatches": true,
            "nearbySightings": true
        },
        "map": {
            "defaultZoom": 12,
            "searchRadiusMiles": 25,
            "clusterPins": true
        },
        "privacy": {
            "showContactInfo": false,
            "shareApproximateLocation": true
        }
    }))
    .expect("default template literal is an object")
});

/// Access the process-wide default template.
pub fn default_template() -> &'static Preferences {
    &DEFAULT_TEMPLATE
}

/// One user's full preference set, treated as an opaque JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preferences(Map<String, Value>);

impl Preferences {
    /// Create an empty preference object (useful as a patch builder).
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Interpret a JSON value as preferences. Returns `None` for anything
    /// that is not an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// View as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a single top-level field.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// The reserved `lastUpdated` stamp, if present.
    pub fn last_updated(&self) -> Option<&str> {
        self.0.get(KEY_LAST_UPDATED).and_then(Value::as_str)
    }

    /// Re-stamp `lastUpdated` with the current wall-clock time.
    pub fn stamp(&mut self) {
        self.0.insert(
            KEY_LAST_UPDATED.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }

    /// Deep-merge `patch` into `self`. Nested objects merge recursively;
    /// scalars and arrays are replaced. Fields only present in `self` are
    /// kept, so merging a record over the template backfills defaults.
    pub fn merge_from(&mut self, patch: &Preferences) {
        merge_maps(&mut self.0, &patch.0);
    }

    /// Return a copy of `self` with `patch` deep-merged over it.
    pub fn merged_with(&self, patch: &Preferences) -> Preferences {
        let mut out = self.clone();
        out.merge_from(patch);
        out
    }

    /// Validate an untrusted payload against `template` and strip it down to
    /// the fields the template knows about.
    ///
    /// Unknown fields are dropped. A known field whose JSON type differs from
    /// the template's fails the whole payload. The reserved keys are accepted
    /// as strings regardless of the template.
    pub fn conformed_to(&self, template: &Preferences) -> Result<Preferences> {
        let mut out = Map::new();
        conform_map(&self.0, &template.0, "$", &mut out)?;
        Ok(Preferences(out))
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_maps(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, incoming) in patch {
        match (base.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_maps(existing, nested);
            }
            _ => {
                base.insert(key.clone(), incoming.clone());
            }
        }
    }
}

fn conform_map(
    input: &Map<String, Value>,
    template: &Map<String, Value>,
    path: &str,
    out: &mut Map<String, Value>,
) -> Result<()> {
    for (key, value) in input {
        let field = format!("{path}.{key}");
        if key == KEY_LAST_UPDATED || key == KEY_VERSION {
            match value {
                Value::String(_) => {
                    out.insert(key.clone(), value.clone());
                }
                other => {
                    return Err(malformed(&field, "string", other));
                }
            }
            continue;
        }
        let Some(expected) = template.get(key) else {
            // Unknown field: ignore rather than carry foreign data forward.
            continue;
        };
        match (expected, value) {
            (Value::Object(template_nested), Value::Object(nested)) => {
                let mut nested_out = Map::new();
                conform_map(nested, template_nested, &field, &mut nested_out)?;
                out.insert(key.clone(), Value::Object(nested_out));
            }
            (t, v) if same_json_type(t, v) => {
                out.insert(key.clone(), v.clone());
            }
            (t, v) => {
                return Err(malformed(&field, json_type_name(t), v));
            }
        }
    }
    Ok(())
}

fn malformed(field: &str, expected: &str, found: &Value) -> PrefsyncError {
    PrefsyncError::MalformedImport {
        field: field.to_string(),
        expected: expected.to_string(),
        found: json_type_name(found).to_string(),
    }
}

fn same_json_type(a: &Value, b: &Value) -> bool {
    json_type_name(a) == json_type_name(b)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A full preference snapshot plus export metadata, serialized as one flat
/// JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    #[serde(flatten)]
    pub preferences: Preferences,
    /// RFC 3339 timestamp of when the export was produced.
    pub exported_at: String,
    /// Semantic version of the export format itself.
    pub export_version: String,
}

impl ExportEnvelope {
    pub fn wrap(preferences: Preferences) -> Self {
        Self {
            preferences,
            exported_at: Utc::now().to_rfc3339(),
            export_version: EXPORT_VERSION.to_string(),
        }
    }
}
