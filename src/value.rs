//! Field values carried by a point.

use ordered_float::OrderedFloat;

use crate::error::{Error, Result};

/// A field value in a point.
///
/// This enum covers every type line protocol can carry as a field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldValue {
    /// 64-bit floating point value.
    Float(OrderedFloat<f64>),

    /// Signed 64-bit integer.
    Integer(i64),

    /// Unsigned 64-bit integer.
    UInteger(u64),

    /// Boolean value.
    Boolean(bool),

    /// String value.
    String(String),
}

impl FieldValue {
    /// Returns the value as a f64 if it is a `Float` variant.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(f.into_inner()),
            _ => None,
        }
    }

    /// Returns the value as an i64 if it is an `Integer` variant.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a u64 if it is a `UInteger` variant.
    pub fn as_uinteger(&self) -> Option<u64> {
        match self {
            FieldValue::UInteger(u) => Some(*u),
            _ => None,
        }
    }

    /// Returns the value as a bool if it is a `Boolean` variant.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as a string reference if it is a `String` variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns false for NaN and infinite floats, which line protocol cannot
    /// represent.
    pub fn is_encodable(&self) -> bool {
        match self {
            FieldValue::Float(f) => f.is_finite(),
            _ => true,
        }
    }

    /// Convert a JSON value into a field value.
    ///
    /// `null` yields `Ok(None)` so callers can skip the field. Arrays and
    /// objects are not representable and fail with [`Error::Encoding`].
    pub fn from_json(name: &str, value: &serde_json::Value) -> Result<Option<Self>> {
        use serde_json::Value as Json;

        match value {
            Json::Null => Ok(None),
            Json::Bool(b) => Ok(Some(FieldValue::Boolean(*b))),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Some(FieldValue::Integer(i)))
                } else if let Some(u) = n.as_u64() {
                    Ok(Some(FieldValue::UInteger(u)))
                } else {
                    let f = n.as_f64().ok_or_else(|| {
                        Error::encoding(format!("number {n} of field \"{name}\" is not representable"))
                    })?;
                    Ok(Some(FieldValue::Float(OrderedFloat(f))))
                }
            }
            Json::String(s) => Ok(Some(FieldValue::String(s.clone()))),
            Json::Array(_) | Json::Object(_) => Err(Error::encoding(format!(
                "Type: \"{}\" of field: \"{}\" is not supported.",
                json_type_name(value),
                name
            ))),
        }
    }
}

pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    use serde_json::Value as Json;

    match value {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(OrderedFloat(v))
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(OrderedFloat(f64::from(v)))
    }
}

macro_rules! impl_from_int {
    ($variant:ident, $target:ty, $($t:ty),*) => {
        $(
            impl From<$t> for FieldValue {
                fn from(v: $t) -> Self {
                    FieldValue::$variant(<$target>::from(v))
                }
            }
        )*
    };
}

impl_from_int!(Integer, i64, i8, i16, i32, i64);
impl_from_int!(UInteger, u64, u8, u16, u32, u64);

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Float(d) => write!(f, "{}", d),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::UInteger(u) => write!(f, "{}", u),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::String(s) => write!(f, "{}", s),
        }
    }
}
