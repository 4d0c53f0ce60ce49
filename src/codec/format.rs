//! Field-format templates.
//!
//! A template declares, per DML route, which named arguments the route
//! accepts and how each is typed:
//!
//! ```text
//! space_id=%space_id&index_id=%index_id&id=%ku&name=%s&score=%d&note=%os
//! ```
//!
//! | spec | meaning |
//! |---|---|
//! | `%space_id`, `%index_id` | identifying fields, checked against the allow-list |
//! | `%iter`, `%limit`, `%offset` | select controls |
//! | `%u %i %f %d %b %s %n` | value field of the given type |
//! | `%k<t>` | key field of type `<t>` |
//! | `%o<t>` | update-instruction field addressing a field of type `<t>` |
//!
//! Value, key and update fields form the target schema, in declaration order.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Template parse failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,

    #[error("segment '{segment}' must look like name=%spec")]
    MalformedSegment { segment: String },

    #[error("unknown field spec '%{spec}' for field '{name}'")]
    UnknownSpec { name: String, spec: String },

    #[error("field '{name}' is declared twice")]
    DuplicateField { name: String },

    #[error("control field '%{spec}' is declared twice")]
    DuplicateControl { spec: String },
}

/// Declared value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Unsigned,
    Int,
    Float,
    Double,
    Bool,
    String,
    /// Integer, float, boolean or string, whichever the text parses as first.
    Native,
}

impl FieldType {
    fn from_tag(tag: char) -> Option<Self> {
        Some(match tag {
            'u' => FieldType::Unsigned,
            'i' => FieldType::Int,
            'f' => FieldType::Float,
            'd' => FieldType::Double,
            'b' => FieldType::Bool,
            's' => FieldType::String,
            'n' => FieldType::Native,
            _ => return None,
        })
    }

    /// Whether arithmetic update instructions may address this type.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Unsigned
                | FieldType::Int
                | FieldType::Float
                | FieldType::Double
                | FieldType::Native
        )
    }

    /// Convert raw text to a typed JSON value.
    ///
    /// Never falls back to a default: text that does not fit the type is an
    /// error.
    pub fn coerce(self, raw: &str) -> Result<Value, String> {
        match self {
            FieldType::Unsigned => raw
                .parse::<u64>()
                .map(Value::from)
                .map_err(|_| format!("'{raw}' is not an unsigned integer")),
            FieldType::Int => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{raw}' is not an integer")),
            FieldType::Float | FieldType::Double => {
                parse_float(raw).ok_or_else(|| format!("'{raw}' is not a number"))
            }
            FieldType::Bool => {
                parse_bool(raw).map(Value::Bool).ok_or_else(|| format!("'{raw}' is not a boolean"))
            }
            FieldType::String => Ok(Value::String(raw.to_string())),
            FieldType::Native => Ok(coerce_native(raw)),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Unsigned => "unsigned",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Bool => "bool",
            FieldType::String => "string",
            FieldType::Native => "native",
        };
        f.write_str(name)
    }
}

fn parse_float(raw: &str) -> Option<Value> {
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn coerce_native(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(u) = raw.parse::<u64>() {
        return Value::from(u);
    }
    if let Some(v) = parse_float(raw) {
        return v;
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// What a field is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRole {
    SpaceId,
    IndexId,
    Iterator,
    Limit,
    Offset,
    Value,
    Key,
    Update,
}

impl FieldRole {
    /// Part of the target tuple schema.
    pub fn in_schema(self) -> bool {
        matches!(self, FieldRole::Value | FieldRole::Key | FieldRole::Update)
    }

    /// Identifying (routing) field.
    pub fn is_identifying(self) -> bool {
        matches!(self, FieldRole::SpaceId | FieldRole::IndexId)
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub role: FieldRole,
    /// Declaration position, contiguous from 0.
    pub ordinal: usize,
}

/// Parsed template. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormatTemplate {
    source: String,
    fields: Vec<FieldSpec>,
    by_name: HashMap<String, usize>,
    /// Ordinals of schema fields, in schema order.
    schema: Vec<usize>,
}

impl FormatTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut fields: Vec<FieldSpec> = Vec::new();
        let mut by_name = HashMap::new();
        let mut seen_controls = Vec::new();

        for segment in source.split('&').map(str::trim).filter(|s| !s.is_empty()) {
            let malformed = || TemplateError::MalformedSegment {
                segment: segment.to_string(),
            };
            let (name, spec) = segment.split_once('=').ok_or_else(malformed)?;
            let spec = spec.strip_prefix('%').ok_or_else(malformed)?;
            if name.is_empty() || spec.is_empty() {
                return Err(malformed());
            }

            let (role, field_type) = parse_spec(spec).ok_or_else(|| TemplateError::UnknownSpec {
                name: name.to_string(),
                spec: spec.to_string(),
            })?;

            if !role.in_schema() {
                if seen_controls.contains(&role) {
                    return Err(TemplateError::DuplicateControl {
                        spec: spec.to_string(),
                    });
                }
                seen_controls.push(role);
            }

            let ordinal = fields.len();
            if by_name.insert(name.to_string(), ordinal).is_some() {
                return Err(TemplateError::DuplicateField {
                    name: name.to_string(),
                });
            }
            fields.push(FieldSpec {
                name: name.to_string(),
                field_type,
                role,
                ordinal,
            });
        }

        if fields.is_empty() {
            return Err(TemplateError::Empty);
        }

        let schema = fields
            .iter()
            .filter(|f| f.role.in_schema())
            .map(|f| f.ordinal)
            .collect();

        Ok(Self {
            source: source.to_string(),
            fields,
            by_name,
            schema,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<&FieldSpec> {
        self.by_name.get(name).map(|&ordinal| &self.fields[ordinal])
    }

    /// The first field with the given role.
    pub fn field_with_role(&self, role: FieldRole) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.role == role)
    }

    pub fn has_role(&self, role: FieldRole) -> bool {
        self.field_with_role(role).is_some()
    }

    /// Target tuple schema: value, key and update fields in declaration order.
    pub fn schema(&self) -> impl Iterator<Item = &FieldSpec> + '_ {
        self.schema.iter().map(|&ordinal| &self.fields[ordinal])
    }

    pub fn schema_len(&self) -> usize {
        self.schema.len()
    }

    /// Declared type of the schema field at 0-based `position`.
    pub fn schema_type(&self, position: usize) -> Option<FieldType> {
        self.schema
            .get(position)
            .map(|&ordinal| self.fields[ordinal].field_type)
    }
}

fn parse_spec(spec: &str) -> Option<(FieldRole, FieldType)> {
    let control = match spec {
        "space_id" => Some((FieldRole::SpaceId, FieldType::Unsigned)),
        "index_id" => Some((FieldRole::IndexId, FieldType::Unsigned)),
        "iter" => Some((FieldRole::Iterator, FieldType::String)),
        "limit" => Some((FieldRole::Limit, FieldType::Unsigned)),
        "offset" => Some((FieldRole::Offset, FieldType::Unsigned)),
        _ => None,
    };
    if control.is_some() {
        return control;
    }

    let mut chars = spec.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(t), None, None) => FieldType::from_tag(t).map(|ty| (FieldRole::Value, ty)),
        (Some('k'), Some(t), None) => FieldType::from_tag(t).map(|ty| (FieldRole::Key, ty)),
        (Some('o'), Some(t), None) => FieldType::from_tag(t).map(|ty| (FieldRole::Update, ty)),
        _ => None,
    }
}

impl TryFrom<String> for FormatTemplate {
    type Error = TemplateError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        FormatTemplate::parse(&source)
    }
}

impl From<FormatTemplate> for String {
    fn from(template: FormatTemplate) -> Self {
        template.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_extended_template() {
        let t = FormatTemplate::parse(
            "space_id=%space_id&index_id=%index_id&key=%kn&key1=%ks&string=%os",
        )
        .unwrap();

        assert_eq!(t.len(), 5);
        assert_eq!(t.schema_len(), 3);
        let names: Vec<_> = t.schema().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["key", "key1", "string"]);
        assert_eq!(t.lookup("key1").unwrap().role, FieldRole::Key);
        assert_eq!(t.lookup("string").unwrap().field_type, FieldType::String);
        assert_eq!(t.schema_type(2), Some(FieldType::String));
        assert!(t.has_role(FieldRole::SpaceId));
    }

    #[test]
    fn test_ordinals_are_contiguous() {
        let t = FormatTemplate::parse("a=%u&b=%s&c=%space_id&d=%b").unwrap();
        for (i, f) in t.fields().iter().enumerate() {
            assert_eq!(f.ordinal, i);
        }
    }

    #[test]
    fn test_template_errors() {
        assert_eq!(FormatTemplate::parse(""), Err(TemplateError::Empty));
        assert!(matches!(
            FormatTemplate::parse("a=u"),
            Err(TemplateError::MalformedSegment { .. })
        ));
        assert!(matches!(
            FormatTemplate::parse("a=%x"),
            Err(TemplateError::UnknownSpec { .. })
        ));
        assert!(matches!(
            FormatTemplate::parse("a=%u&a=%s"),
            Err(TemplateError::DuplicateField { .. })
        ));
        assert!(matches!(
            FormatTemplate::parse("a=%limit&b=%limit"),
            Err(TemplateError::DuplicateControl { .. })
        ));
    }

    #[test]
    fn test_coercion() {
        assert_eq!(FieldType::Unsigned.coerce("42"), Ok(json!(42)));
        assert!(FieldType::Unsigned.coerce("-1").is_err());
        assert!(FieldType::Unsigned.coerce("abc").is_err());
        assert_eq!(FieldType::Int.coerce("-1000"), Ok(json!(-1000)));
        assert_eq!(FieldType::Double.coerce("3.1"), Ok(json!(3.1)));
        assert!(FieldType::Float.coerce("nan").is_err());
        assert!(FieldType::Float.coerce("").is_err());
        assert_eq!(FieldType::Bool.coerce("Yes"), Ok(json!(true)));
        assert_eq!(FieldType::Bool.coerce("0"), Ok(json!(false)));
        assert!(FieldType::Bool.coerce("maybe").is_err());
        assert_eq!(FieldType::String.coerce(""), Ok(json!("")));
    }

    #[test]
    fn test_native_variant() {
        assert_eq!(FieldType::Native.coerce("1"), Ok(json!(1)));
        assert_eq!(FieldType::Native.coerce("2.5"), Ok(json!(2.5)));
        assert_eq!(FieldType::Native.coerce("true"), Ok(json!(true)));
        assert_eq!(FieldType::Native.coerce("str"), Ok(json!("str")));
    }

    #[test]
    fn test_serde_uses_source_text() {
        let t: FormatTemplate = serde_json::from_str(r#""id=%ku&name=%s""#).unwrap();
        assert_eq!(t.schema_len(), 2);
        assert_eq!(serde_json::to_string(&t).unwrap(), r#""id=%ku&name=%s""#);
        assert!(serde_json::from_str::<FormatTemplate>(r#""id=%zz""#).is_err());
    }
}
