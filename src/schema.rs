//! Tool input schemas sent with every inference request, and the validator applied to
//! whatever the model hands back.

use crate::errors::InferenceError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Top-level `input_schema` of the structured-output tool. Always an object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, Property>,
    pub required: Vec<String>,
}

/// `{"required": [...]}` entry of an `anyOf` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequiredSet {
    pub required: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub prop_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Property>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Property>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(rename = "anyOf", skip_serializing_if = "Option::is_none")]
    pub any_of: Option<Vec<RequiredSet>>,
}

impl Property {
    fn typed(prop_type: &str, description: &str) -> Self {
        Self {
            prop_type: prop_type.to_string(),
            description: (!description.is_empty()).then(|| description.to_string()),
            enum_values: None,
            items: None,
            properties: None,
            required: None,
            any_of: None,
        }
    }

    pub fn string(description: &str) -> Self {
        Self::typed("string", description)
    }

    pub fn number(description: &str) -> Self {
        Self::typed("number", description)
    }

    pub fn integer(description: &str) -> Self {
        Self::typed("integer", description)
    }

    pub fn boolean(description: &str) -> Self {
        Self::typed("boolean", description)
    }

    pub fn array(items: Property, description: &str) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::typed("array", description)
        }
    }

    pub fn object(properties: BTreeMap<String, Property>, required: &[&str]) -> Self {
        Self {
            properties: Some(properties),
            required: Some(required.iter().map(|s| s.to_string()).collect()),
            ..Self::typed("object", "")
        }
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|s| s.to_string()).collect());
        self
    }

    /// At least one of the listed fields must be present on the object.
    pub fn any_of(mut self, fields: &[&str]) -> Self {
        self.any_of = Some(
            fields
                .iter()
                .map(|f| RequiredSet {
                    required: vec![f.to_string()],
                })
                .collect(),
        );
        self
    }
}

impl ToolSchema {
    pub fn object(properties: BTreeMap<String, Property>, required: &[&str]) -> Self {
        Self {
            schema_type: "object".to_string(),
            properties,
            required: required.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Check a structured response against this schema.
    ///
    /// Required fields must be present and non-null. Every declared property that is
    /// present must carry a value of its declared type; enum and nested array/object
    /// constraints are checked the same way. Undeclared keys are ignored.
    pub fn validate(&self, fields: &Map<String, Value>) -> Result<(), InferenceError> {
        check_object("", &self.properties, Some(&self.required), None, fields)
    }
}

fn field_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn is_present(fields: &Map<String, Value>, name: &str) -> bool {
    fields.get(name).is_some_and(|v| !v.is_null())
}

fn check_object(
    prefix: &str,
    properties: &BTreeMap<String, Property>,
    required: Option<&Vec<String>>,
    any_of: Option<&Vec<RequiredSet>>,
    fields: &Map<String, Value>,
) -> Result<(), InferenceError> {
    for name in required.into_iter().flatten() {
        if !is_present(fields, name) {
            return Err(InferenceError::SchemaValidation {
                field: field_path(prefix, name),
                reason: "required field is missing".to_string(),
            });
        }
    }

    if let Some(sets) = any_of {
        let satisfied = sets
            .iter()
            .any(|set| set.required.iter().all(|name| is_present(fields, name)));
        if !sets.is_empty() && !satisfied {
            let options: Vec<String> = sets.iter().map(|s| s.required.join("+")).collect();
            return Err(InferenceError::SchemaValidation {
                field: if prefix.is_empty() {
                    "<root>".to_string()
                } else {
                    prefix.to_string()
                },
                reason: format!("expected at least one of: {}", options.join(", ")),
            });
        }
    }

    for (name, prop) in properties {
        match fields.get(name) {
            None | Some(Value::Null) => continue,
            Some(value) => check_value(&field_path(prefix, name), prop, value)?,
        }
    }

    Ok(())
}

fn type_matches(prop_type: &str, value: &Value) -> Option<bool> {
    let matched = match prop_type {
        "string" => value.is_string(),
        "number" => value.is_number(),
        // Same rule serde applies when decoding into i64/u64
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => return None,
    };
    Some(matched)
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

fn check_value(path: &str, prop: &Property, value: &Value) -> Result<(), InferenceError> {
    if type_matches(&prop.prop_type, value) == Some(false) {
        return Err(InferenceError::SchemaValidation {
            field: path.to_string(),
            reason: format!(
                "expected {}, got {}",
                prop.prop_type,
                json_type_name(value)
            ),
        });
    }

    if let (Some(allowed), Some(s)) = (&prop.enum_values, value.as_str()) {
        if !allowed.iter().any(|a| a == s) {
            return Err(InferenceError::SchemaValidation {
                field: path.to_string(),
                reason: format!("'{}' is not one of [{}]", s, allowed.join(", ")),
            });
        }
    }

    match value {
        Value::Array(items) => {
            if let Some(item_prop) = &prop.items {
                for (i, item) in items.iter().enumerate() {
                    check_value(&format!("{}[{}]", path, i), item_prop, item)?;
                }
            }
        }
        Value::Object(map) => {
            if let Some(props) = &prop.properties {
                check_object(path, props, prop.required.as_ref(), prop.any_of.as_ref(), map)?;
            }
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capacity_like_schema() -> ToolSchema {
        ToolSchema::object(
            BTreeMap::from([
                ("available".to_string(), Property::number("open slots")),
                ("label".to_string(), Property::string("")),
            ]),
            &["available"],
        )
    }

    fn as_map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_number_field_rejects_string() {
        let schema = capacity_like_schema();
        let err = schema
            .validate(&as_map(json!({"available": "ten"})))
            .unwrap_err();
        match err {
            InferenceError::SchemaValidation { field, .. } => assert_eq!(field, "available"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_number_field_accepts_number() {
        let schema = capacity_like_schema();
        assert!(schema.validate(&as_map(json!({"available": 10}))).is_ok());
        assert!(schema.validate(&as_map(json!({"available": 2.5}))).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let schema = capacity_like_schema();
        let err = schema.validate(&as_map(json!({"label": "x"}))).unwrap_err();
        assert!(err.to_string().contains("'available'"));
    }

    #[test]
    fn test_enum_items_checked() {
        let schema = ToolSchema::object(
            BTreeMap::from([(
                "detected_categories".to_string(),
                Property::array(Property::string("").with_enum(&["CAPACITY", "CONTACT"]), ""),
            )]),
            &["detected_categories"],
        );
        assert!(schema
            .validate(&as_map(json!({"detected_categories": ["CAPACITY"]})))
            .is_ok());
        let err = schema
            .validate(&as_map(json!({"detected_categories": ["CAPACITY", "WEATHER"]})))
            .unwrap_err();
        assert!(err.to_string().contains("detected_categories[1]"));
    }

    #[test]
    fn test_any_of_on_array_items() {
        let item = Property::object(
            BTreeMap::from([
                ("name".to_string(), Property::string("")),
                ("email".to_string(), Property::string("")),
                ("phoneExtension".to_string(), Property::integer("")),
            ]),
            &[],
        )
        .any_of(&["name", "email"]);
        let schema = ToolSchema::object(
            BTreeMap::from([("contacts".to_string(), Property::array(item, ""))]),
            &["contacts"],
        );

        assert!(schema
            .validate(&as_map(json!({"contacts": [{"email": "a@b.org"}]})))
            .is_ok());
        assert!(schema
            .validate(&as_map(json!({"contacts": [{"phoneExtension": 12}]})))
            .is_err());
        assert!(schema
            .validate(&as_map(json!({"contacts": [{"name": "A", "phoneExtension": 1.5}]})))
            .is_err());
    }

    #[test]
    fn test_integer_rejects_float_literals() {
        let schema = ToolSchema::object(
            BTreeMap::from([("extension".to_string(), Property::integer(""))]),
            &["extension"],
        );

        assert!(schema.validate(&as_map(json!({"extension": 12}))).is_ok());
        let err = schema
            .validate(&as_map(json!({"extension": 12.0})))
            .unwrap_err();
        match err {
            InferenceError::SchemaValidation { field, .. } => assert_eq!(field, "extension"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_serializes_any_of_and_enum_keys() {
        let prop = Property::string("status").with_enum(&["active"]);
        let json = serde_json::to_value(&prop).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["enum"][0], "active");
        assert!(json.get("items").is_none());

        let obj = Property::object(BTreeMap::new(), &[]).any_of(&["name"]);
        let json = serde_json::to_value(&obj).unwrap();
        assert_eq!(json["anyOf"][0]["required"][0], "name");
    }
}
