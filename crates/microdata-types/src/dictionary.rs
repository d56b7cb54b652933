//! Survey data dictionary types.
//!
//! A data dictionary is the variable-level metadata of one study as served by
//! a NADA catalog (`GET {catalog}/variables/{idno}`). Only `name` and the
//! label fields are interpreted; every other attribute is carried through
//! untouched so a stored dictionary keeps what the catalog returned.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MicrodataError;

/// A single survey variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable identifier (e.g. "s1q2")
    #[serde(default)]
    pub name: String,

    /// Label as published by NADA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labl: Option<String>,

    /// Alternative label field used by some exports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Remaining catalog attributes
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Variable {
    /// Create a variable with a `labl` label.
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labl: Some(label.into()),
            label: None,
            extra: Map::new(),
        }
    }

    /// The raw label text: `labl` when present, else `label`, else empty.
    pub fn label_text(&self) -> &str {
        self.labl
            .as_deref()
            .or(self.label.as_deref())
            .unwrap_or("")
    }
}

/// The variable metadata of one study.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataDictionary {
    /// Study identifier, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idno: Option<String>,

    /// Variables in catalog order
    #[serde(default)]
    pub variables: Vec<Variable>,

    /// Remaining payload fields (e.g. `total`, `status`)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DataDictionary {
    /// Create a dictionary from a list of variables.
    pub fn new(idno: impl Into<String>, variables: Vec<Variable>) -> Self {
        Self {
            idno: Some(idno.into()),
            variables,
            extra: Map::new(),
        }
    }

    /// Build a dictionary from a JSON value.
    ///
    /// The value must be an object. A missing `variables` key yields an empty
    /// dictionary; a `variables` key of the wrong shape is an error.
    pub fn from_value(value: Value) -> Result<Self, MicrodataError> {
        if !value.is_object() {
            return Err(MicrodataError::InvalidInput(format!(
                "data dictionary must be a JSON object, got {}",
                json_kind(&value)
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether the dictionary has no variables.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_label_prefers_labl() {
        let var: Variable = serde_json::from_value(json!({
            "name": "v1",
            "labl": "Age of respondent",
            "label": "age"
        }))
        .unwrap();
        assert_eq!(var.label_text(), "Age of respondent");
    }

    #[test]
    fn test_label_falls_back_to_label() {
        let var: Variable = serde_json::from_value(json!({"name": "v1", "label": "Income"})).unwrap();
        assert_eq!(var.label_text(), "Income");

        let var: Variable = serde_json::from_value(json!({"name": "v2"})).unwrap();
        assert_eq!(var.label_text(), "");
    }

    #[test]
    fn test_extra_fields_preserved() {
        let raw = json!({
            "total": 2,
            "variables": [
                {"name": "v1", "labl": "Age", "vid": "V1", "fid": "F1"},
                {"name": "v2", "labl": "Sex", "vid": "V2", "fid": "F1"}
            ]
        });
        let dictionary = DataDictionary::from_value(raw.clone()).unwrap();
        assert_eq!(dictionary.len(), 2);
        assert_eq!(dictionary.extra.get("total"), Some(&json!(2)));
        assert_eq!(serde_json::to_value(&dictionary).unwrap(), raw);
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        let err = DataDictionary::from_value(json!(["v1", "v2"])).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_from_value_rejects_malformed_variables() {
        let result = DataDictionary::from_value(json!({"variables": "nope"}));
        assert!(matches!(result, Err(MicrodataError::Serialization(_))));
    }

    #[test]
    fn test_missing_variables_is_empty() {
        let dictionary = DataDictionary::from_value(json!({"status": "ok"})).unwrap();
        assert!(dictionary.is_empty());
    }
}
