//! Schema definition and validation.
//!
//! Schemas describe the fields a collection accepts so that drafts and
//! patches can be rejected locally, before anything is sent to the remote.

use crate::{error::ValidationError, record::is_identity_field, CollectionName, Fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;

type Result<T> = std::result::Result<T, ValidationError>;

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field must be present in a draft
    pub required: bool,
    /// Reject empty (or whitespace-only) strings
    #[serde(default)]
    pub non_empty: bool,
    /// Closed set of accepted string values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    /// Value filled into drafts that omit the field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            non_empty: false,
            allowed: None,
            default: None,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    /// Reject empty strings for this field.
    pub fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }

    /// Restrict a string field to a closed set of values.
    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Fill `value` into drafts that omit this field.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(ValidationError::MissingRequiredField(self.name.clone()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) => {
                self.validate_type(v)?;
                self.validate_content(v)
            }
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(ValidationError::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }

    fn validate_content(&self, value: &Value) -> Result<()> {
        let Some(s) = value.as_str() else {
            return Ok(());
        };

        if self.non_empty && s.trim().is_empty() {
            return Err(ValidationError::EmptyField(self.name.clone()));
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|a| a == s) {
                return Err(ValidationError::InvalidEnumValue {
                    field: self.name.clone(),
                    value: s.to_string(),
                });
            }
        }

        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Schema for a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection name
    pub name: CollectionName,
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl CollectionSchema {
    /// Create a new collection schema.
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Look up a field definition.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a draft for insertion and fill in defaults.
    ///
    /// Drafts never carry identity fields; the remote assigns them.
    pub fn prepare_draft(&self, draft: Fields) -> Result<Fields> {
        self.check_keys(&draft)?;

        let mut prepared = draft;
        for field in &self.fields {
            let missing = matches!(prepared.get(&field.name), None | Some(Value::Null));
            if missing {
                if let Some(default) = &field.default {
                    prepared.insert(field.name.clone(), default.clone());
                }
            }
            field.validate(prepared.get(&field.name))?;
        }

        // Optional fields explicitly set to null carry no information.
        prepared.retain(|_, v| !v.is_null());
        Ok(prepared)
    }

    /// Validate a partial update.
    pub fn validate_patch(&self, patch: &Fields) -> Result<()> {
        if patch.is_empty() {
            return Err(ValidationError::InvalidPayload("patch is empty".into()));
        }
        self.check_keys(patch)?;

        for (key, value) in patch {
            if let Some(field) = self.field(key) {
                field.validate(Some(value))?;
            }
        }
        Ok(())
    }

    fn check_keys(&self, fields: &Fields) -> Result<()> {
        for key in fields.keys() {
            if is_identity_field(key) {
                return Err(ValidationError::ImmutableField(key.clone()));
            }
            if self.field(key).is_none() {
                return Err(ValidationError::UnknownField(key.clone()));
            }
        }
        Ok(())
    }
}
