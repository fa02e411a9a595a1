//! Declarative parameter schemas for tools and the strict validator that
//! turns an untyped argument payload into [`ValidatedArguments`].

use serde_json::{json, Map, Number, Value};

use crate::errors::{FieldError, ValidationErrors};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Boolean,
    /// Inclusive bounds.
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Enum(Vec<&'static str>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: Option<&'static str>,
    pub optional: bool,
    pub default: Option<Value>,
}

impl FieldSpec {
    fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            description: None,
            optional: false,
            default: None,
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn number(name: &'static str) -> Self {
        Self::new(name, FieldKind::Number { min: None, max: None })
    }

    pub fn enumeration(name: &'static str, variants: &[&'static str]) -> Self {
        Self::new(name, FieldKind::Enum(variants.to_vec()))
    }

    /// Sets inclusive bounds; only meaningful on number fields.
    pub fn range(mut self, lower: f64, upper: f64) -> Self {
        if let FieldKind::Number { min, max } = &mut self.kind {
            *min = Some(lower);
            *max = Some(upper);
        }
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = Some(description);
        self
    }

    fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        match &self.kind {
            FieldKind::String => match value {
                Value::String(_) => Ok(()),
                other => Err(format!("expected string, received {}", type_name(other))),
            },
            FieldKind::Boolean => match value {
                Value::Bool(_) => Ok(()),
                other => Err(format!("expected boolean, received {}", type_name(other))),
            },
            FieldKind::Number { min, max } => {
                let Some(number) = value.as_f64() else {
                    return Err(format!("expected number, received {}", type_name(value)));
                };
                if let Some(min) = min {
                    if number < *min {
                        return Err(format!("must be greater than or equal to {min}"));
                    }
                }
                if let Some(max) = max {
                    if number > *max {
                        return Err(format!("must be less than or equal to {max}"));
                    }
                }
                Ok(())
            }
            FieldKind::Enum(variants) => match value.as_str() {
                Some(text) if variants.iter().any(|variant| *variant == text) => Ok(()),
                _ => Err(format!("expected one of: {}", variants.join(", "))),
            },
        }
    }

    fn json_schema(&self) -> Value {
        let mut property = match &self.kind {
            FieldKind::String => json!({ "type": "string" }),
            FieldKind::Boolean => json!({ "type": "boolean" }),
            FieldKind::Number { min, max } => {
                let mut property = json!({ "type": "number" });
                if let Some(min) = min {
                    property["minimum"] = json!(min);
                }
                if let Some(max) = max {
                    property["maximum"] = json!(max);
                }
                property
            }
            FieldKind::Enum(variants) => json!({ "type": "string", "enum": variants }),
        };
        if let Some(description) = self.description {
            property["description"] = json!(description);
        }
        if let Some(default) = &self.default {
            property["default"] = default.clone();
        }
        property
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    fields: Vec<FieldSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// JSON Schema advertised to clients as a tool's `inputSchema`.
    pub fn to_json_schema(&self) -> Value {
        let properties = self
            .fields
            .iter()
            .map(|field| (field.name.to_string(), field.json_schema()))
            .collect::<Map<_, _>>();
        let required = self
            .fields
            .iter()
            .filter(|field| field.is_required())
            .map(|field| field.name)
            .collect::<Vec<_>>();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Strictly validates `raw` against this schema.
    ///
    /// A missing or `null` payload is treated as an empty object. Defaults are
    /// filled for absent fields, optional fields without a default stay absent,
    /// and unknown fields are rejected. All failures are collected before
    /// returning.
    pub fn validate(&self, raw: &Value) -> Result<ValidatedArguments, ValidationErrors> {
        let empty = Map::new();
        let input = match raw {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(ValidationErrors {
                    errors: vec![FieldError {
                        field: "arguments".to_string(),
                        message: format!("expected object, received {}", type_name(other)),
                    }],
                })
            }
        };

        let mut values = Map::new();
        let mut errors = Vec::new();

        for field in &self.fields {
            match input.get(field.name) {
                Some(value) if !value.is_null() => match field.check(value) {
                    Ok(()) => {
                        values.insert(field.name.to_string(), value.clone());
                    }
                    Err(message) => errors.push(FieldError {
                        field: field.name.to_string(),
                        message,
                    }),
                },
                _ => {
                    if let Some(default) = &field.default {
                        values.insert(field.name.to_string(), default.clone());
                    } else if !field.optional {
                        errors.push(FieldError {
                            field: field.name.to_string(),
                            message: "is required".to_string(),
                        });
                    }
                }
            }
        }

        for key in input.keys() {
            if !self.fields.iter().any(|field| field.name == key) {
                errors.push(FieldError {
                    field: key.clone(),
                    message: "is not a recognized parameter".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(ValidatedArguments { values })
        } else {
            Err(ValidationErrors { errors })
        }
    }
}

/// Arguments that passed validation, with defaults applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArguments {
    values: Map<String, Value>,
}

impl ValidatedArguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn number(&self, name: &str) -> Option<&Number> {
        match self.values.get(name) {
            Some(Value::Number(number)) => Some(number),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_like_schema() -> ParameterSchema {
        ParameterSchema::new()
            .field(FieldSpec::string("target"))
            .field(FieldSpec::string("ports").optional())
            .field(
                FieldSpec::enumeration("scanType", &["quick", "full", "version"])
                    .with_default(json!("quick")),
            )
            .field(FieldSpec::number("timing").range(0.0, 5.0).with_default(json!(3)))
            .field(FieldSpec::boolean("verbose").optional())
    }

    #[test]
    fn fills_defaults_and_leaves_optionals_absent() {
        let validated = scan_like_schema()
            .validate(&json!({ "target": "10.0.0.1" }))
            .expect("valid arguments");

        assert_eq!(validated.str("target"), Some("10.0.0.1"));
        assert_eq!(validated.str("scanType"), Some("quick"));
        assert_eq!(validated.number("timing").map(ToString::to_string), Some("3".to_string()));
        assert!(!validated.contains("ports"));
        assert!(!validated.contains("verbose"));
    }

    #[test]
    fn null_payload_is_an_empty_object() {
        let schema = ParameterSchema::new()
            .field(FieldSpec::string("name").with_default(json!("John Doe")));

        let validated = schema.validate(&Value::Null).expect("defaults apply");
        assert_eq!(validated.str("name"), Some("John Doe"));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let error = scan_like_schema()
            .validate(&json!({}))
            .expect_err("target is required");

        assert_eq!(error.fields().collect::<Vec<_>>(), vec!["target"]);
        assert_eq!(error.errors[0].message, "is required");
    }

    #[test]
    fn bounds_are_inclusive() {
        let schema = scan_like_schema();
        for timing in [0, 5] {
            schema
                .validate(&json!({ "target": "host", "timing": timing }))
                .expect("boundary value passes");
        }
        for timing in [json!(-1), json!(5.5), json!(6)] {
            let error = schema
                .validate(&json!({ "target": "host", "timing": timing }))
                .expect_err("out of range");
            assert_eq!(error.fields().collect::<Vec<_>>(), vec!["timing"]);
        }
    }

    #[test]
    fn reports_every_failing_field() {
        let error = scan_like_schema()
            .validate(&json!({
                "ports": 22,
                "scanType": "stealth",
                "timing": "fast",
                "verbose": "yes",
                "extra": true
            }))
            .expect_err("many failures");

        assert_eq!(
            error.fields().collect::<Vec<_>>(),
            vec!["target", "ports", "scanType", "timing", "verbose", "extra"]
        );
    }

    #[test]
    fn rejects_non_object_payload() {
        let error = scan_like_schema()
            .validate(&json!(["10.0.0.1"]))
            .expect_err("array payload");
        assert_eq!(error.fields().collect::<Vec<_>>(), vec!["arguments"]);
    }

    #[test]
    fn explicit_null_counts_as_absent() {
        let validated = scan_like_schema()
            .validate(&json!({ "target": "host", "ports": null, "timing": null }))
            .expect("nulls are treated as missing");
        assert!(!validated.contains("ports"));
        assert_eq!(validated.number("timing").map(ToString::to_string), Some("3".to_string()));
    }

    #[test]
    fn json_schema_lists_required_and_defaults() {
        let schema = scan_like_schema().to_json_schema();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["target"]));
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["properties"]["scanType"]["enum"], json!(["quick", "full", "version"]));
        assert_eq!(schema["properties"]["scanType"]["default"], "quick");
        assert_eq!(schema["properties"]["timing"]["minimum"], json!(0.0));
        assert_eq!(schema["properties"]["timing"]["maximum"], json!(5.0));
    }
}
