//! Structural type-checking of [`Value`]s against a small closed grammar.

use super::value::Value;
use crate::error::{Result, SyncLinkError};

/// Expected shape of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Any,
    Null,
    Boolean,
    Number,
    Int64,
    String,
    Bytes,
    Date,
    Id,
    Array(Box<Schema>),
    Object(Vec<FieldSchema>),
    Union(Vec<Schema>),
}

/// One declared field of an object schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub schema: Schema,
    pub optional: bool,
}

impl FieldSchema {
    pub fn required(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            optional: true,
        }
    }
}

impl Schema {
    pub fn array(item: Schema) -> Self {
        Schema::Array(Box::new(item))
    }

    pub fn object(fields: impl IntoIterator<Item = FieldSchema>) -> Self {
        Schema::Object(fields.into_iter().collect())
    }

    pub fn union(variants: impl IntoIterator<Item = Schema>) -> Self {
        Schema::Union(variants.into_iter().collect())
    }

    /// Name used in `expected` of a validation error.
    pub fn describe(&self) -> String {
        match self {
            Schema::Any => "any".to_string(),
            Schema::Null => "null".to_string(),
            Schema::Boolean => "boolean".to_string(),
            Schema::Number => "number".to_string(),
            Schema::Int64 => "int64".to_string(),
            Schema::String => "string".to_string(),
            Schema::Bytes => "bytes".to_string(),
            Schema::Date => "date".to_string(),
            Schema::Id => "id".to_string(),
            Schema::Array(item) => format!("array<{}>", item.describe()),
            Schema::Object(_) => "object".to_string(),
            Schema::Union(variants) => variants
                .iter()
                .map(Schema::describe)
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

/// Check `value` against `schema`.
///
/// Unknown object fields are allowed. Returns `SchemaValidationError` with
/// the first failing field path (`$.items[2].name`). For unions the error
/// names the whole union as expected and the deepest path reached by the
/// closest variant.
pub fn validate_with_schema(value: &Value, schema: &Schema) -> Result<()> {
    validate_at(value, schema, "$")
}

fn mismatch(schema: &Schema, value: &Value, path: &str) -> SyncLinkError {
    SyncLinkError::SchemaValidationError {
        expected: schema.describe(),
        received: value.type_name().to_string(),
        path: path.to_string(),
    }
}

fn validate_at(value: &Value, schema: &Schema, path: &str) -> Result<()> {
    if let Value::Shared(shared) = value {
        return validate_at(&shared.get(), schema, path);
    }

    match (schema, value) {
        (Schema::Any, _) => Ok(()),
        (Schema::Null, Value::Null)
        | (Schema::Boolean, Value::Bool(_))
        | (Schema::Number, Value::Float(_))
        | (Schema::Int64, Value::Int64(_))
        | (Schema::String, Value::String(_))
        | (Schema::Bytes, Value::Bytes(_))
        | (Schema::Date, Value::Timestamp(_))
        | (Schema::Id, Value::Id(_)) => Ok(()),
        (Schema::Array(item), Value::Array(items)) => {
            for (i, element) in items.iter().enumerate() {
                validate_at(element, item, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        },
        (Schema::Object(fields), Value::Object(map)) => {
            for field in fields {
                let field_path = format!("{}.{}", path, field.name);
                match map.get(&field.name) {
                    None | Some(Value::Undefined) if field.optional => {},
                    None => {
                        return Err(SyncLinkError::SchemaValidationError {
                            expected: field.schema.describe(),
                            received: "missing".to_string(),
                            path: field_path,
                        });
                    },
                    Some(v) => validate_at(v, &field.schema, &field_path)?,
                }
            }
            Ok(())
        },
        (Schema::Union(variants), _) => {
            let mut closest: Option<SyncLinkError> = None;
            for variant in variants {
                match validate_at(value, variant, path) {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        if error_depth(&err) > closest.as_ref().map(error_depth).unwrap_or(0) {
                            closest = Some(err);
                        }
                    },
                }
            }
            let nested_path = closest
                .and_then(|err| match err {
                    SyncLinkError::SchemaValidationError { path, .. } => Some(path),
                    _ => None,
                })
                .filter(|p| p.len() > path.len());
            match nested_path {
                Some(deep) => Err(SyncLinkError::SchemaValidationError {
                    expected: schema.describe(),
                    received: value.type_name().to_string(),
                    path: deep,
                }),
                None => Err(mismatch(schema, value, path)),
            }
        },
        _ => Err(mismatch(schema, value, path)),
    }
}

fn error_depth(err: &SyncLinkError) -> usize {
    match err {
        SyncLinkError::SchemaValidationError { path, .. } => path.len(),
        _ => 0,
    }
}
