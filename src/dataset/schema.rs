// src/dataset/schema.rs
//! Declared field schemas per dataset kind, used both to validate resolved
//! payloads and to reject structured queries that name unknown fields.

use serde::Serialize;
use serde_json::{json, Value};

use super::{DatasetKind, Record};
use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Number,
    String,
    /// Stored as a canonical `YYYY-MM-DD` string after resolution.
    Date,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Date => "date",
        }
    }

    /// `null` never matches; callers treat it as a gap.
    pub fn matches(self, v: &Value) -> bool {
        match self {
            Self::Integer => {
                v.is_i64() || v.is_u64() || v.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            Self::Number => v.is_number(),
            Self::String | Self::Date => v.is_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    pub required: bool,
}

impl FieldSpec {
    fn new(name: &str, ty: FieldType, required: bool) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn for_kind(kind: DatasetKind) -> Self {
        match kind {
            DatasetKind::Stock => Self::stock(),
            DatasetKind::Credit => Self::credit(),
            DatasetKind::Phrasebank => Self::phrasebank(),
        }
    }

    pub fn stock() -> Self {
        use FieldType::*;
        Self::new(vec![
            FieldSpec::new("Date", Date, true),
            FieldSpec::new("Close", Number, true),
            FieldSpec::new("Open", Number, true),
            FieldSpec::new("High", Number, true),
            FieldSpec::new("Low", Number, true),
            FieldSpec::new("Volume", Integer, true),
        ])
    }

    pub fn credit() -> Self {
        use FieldType::*;
        let mut fields = vec![
            FieldSpec::new("Index", Integer, false),
            FieldSpec::new("Credit Expiration", Integer, true),
            FieldSpec::new("DPD", Integer, true),
        ];
        for name in [
            "FS",
            "CDR",
            "SICR",
            "Follow Up",
            "Rescheduled",
            "Restructuring",
            "Covenant",
            "Turnover",
            "Group Reason",
        ] {
            fields.push(FieldSpec::new(name, String, false));
        }
        fields.push(FieldSpec::new("Current Stage", Integer, true));
        fields.push(FieldSpec::new("Stage As last Month", Integer, false));
        Self::new(fields)
    }

    pub fn phrasebank() -> Self {
        use FieldType::*;
        Self::new(vec![
            FieldSpec::new("Text", String, true),
            FieldSpec::new("Sentiment", String, true),
        ])
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Exact name first, then case-insensitive.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        let name = name.trim();
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn date_field(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.ty == FieldType::Date)
    }

    /// Required columns with no value in any row, in schema order.
    pub fn missing_required(&self, rows: &[Record]) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .filter(|f| {
                !rows
                    .iter()
                    .any(|r| r.get(&f.name).is_some_and(|v| !v.is_null()))
            })
            .map(|f| f.name.clone())
            .collect()
    }

    /// Type-check every declared field present in `record`. Absent and
    /// `null` cells are gaps, not errors.
    pub fn validate_record(&self, record: &Record) -> Result<(), SchemaError> {
        for f in &self.fields {
            match record.get(&f.name) {
                None | Some(Value::Null) => {}
                Some(v) if f.ty.matches(v) => {}
                Some(_) => {
                    return Err(SchemaError::WrongType {
                        field: f.name.clone(),
                        expected: f.ty.as_str(),
                    })
                }
            }
        }
        Ok(())
    }

    /// JSON-Schema rendering for LLM prompts (array of objects).
    pub fn to_json_schema(&self) -> Value {
        let mut props = serde_json::Map::new();
        for f in &self.fields {
            let ty = match f.ty {
                FieldType::Date => "string",
                other => other.as_str(),
            };
            props.insert(f.name.clone(), json!({ "type": ty }));
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "type": "array",
            "items": { "type": "object", "properties": props, "required": required }
        })
    }
}
