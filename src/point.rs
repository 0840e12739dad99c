//! Points and the record forms accepted by the write APIs.

use std::collections::BTreeMap;

use crate::date::Timestamp;
use crate::encoder::LineProtocolEncoder;
use crate::error::{Error, Result};
use crate::types::WritePrecision;
use crate::value::{FieldValue, json_type_name};

/// A single measurement with its tags, fields and optional time.
///
/// Tags and fields are kept sorted by key, which is the order they are
/// written in. Setting a key twice keeps the last value.
///
/// # Example
///
/// ```
/// use influxdb_write::{Point, WritePrecision};
///
/// let point = Point::measurement("h2o")
///     .tag("location", "europe")
///     .field("level", 2)
///     .time(123, WritePrecision::S);
///
/// assert_eq!(point.to_line_protocol().unwrap(), "h2o,location=europe level=2i 123");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    name: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    time: Option<Timestamp>,
    precision: WritePrecision,
}

impl Point {
    /// Create a new point for the given measurement.
    pub fn measurement(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            time: None,
            precision: WritePrecision::default(),
        }
    }

    /// Add a tag, replacing any existing tag with the same key.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field, replacing any existing field with the same key.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the time and the precision it is written with.
    ///
    /// The precision of a point takes precedence over the precision passed to
    /// the write call.
    pub fn time(mut self, time: impl Into<Timestamp>, precision: WritePrecision) -> Self {
        self.time = Some(time.into());
        self.precision = precision;
        self
    }

    /// Measurement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags, sorted by key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Fields, sorted by key.
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Time of the point, if any.
    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.time.as_ref()
    }

    /// Precision used to write the time.
    pub fn precision(&self) -> WritePrecision {
        self.precision
    }

    /// Add a tag only if the point does not already carry one with this key.
    pub(crate) fn default_tag(&mut self, key: &str, value: &str) {
        if !self.tags.contains_key(key) {
            self.tags.insert(key.to_string(), value.to_string());
        }
    }

    /// Encode with the default encoder.
    ///
    /// Returns an empty string when the point has no encodable field.
    pub fn to_line_protocol(&self) -> Result<String> {
        LineProtocolEncoder::default().encode(self)
    }

    /// Build a point from a JSON object of the form
    /// `{"measurement": .., "tags": {..}, "fields": {..}, "time": ..}`.
    ///
    /// `tags` and `time` are optional. Integer times are taken to be in
    /// `precision`; string times are parsed when the point is encoded. Null
    /// tags and fields are skipped; arrays and objects fail with
    /// [`Error::Encoding`].
    pub fn from_json(value: &serde_json::Value, precision: WritePrecision) -> Result<Self> {
        use serde_json::Value as Json;

        let object = value
            .as_object()
            .ok_or_else(|| Error::encoding(format!("expected a JSON object, got {}", json_type_name(value))))?;

        let name = object
            .get("measurement")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::encoding("JSON record is missing a string \"measurement\""))?;

        let mut point = Point::measurement(name);
        point.precision = precision;

        if let Some(tags) = object.get("tags") {
            let tags = tags
                .as_object()
                .ok_or_else(|| Error::encoding("\"tags\" must be a JSON object"))?;
            for (key, value) in tags {
                let value = match value {
                    Json::Null => continue,
                    Json::String(s) => s.clone(),
                    Json::Bool(_) | Json::Number(_) => value.to_string(),
                    Json::Array(_) | Json::Object(_) => {
                        return Err(Error::encoding(format!(
                            "Type: \"{}\" of tag: \"{}\" is not supported.",
                            json_type_name(value),
                            key
                        )));
                    }
                };
                point.tags.insert(key.clone(), value);
            }
        }

        let fields = object
            .get("fields")
            .and_then(Json::as_object)
            .ok_or_else(|| Error::encoding("JSON record is missing a \"fields\" object"))?;
        for (key, value) in fields {
            if let Some(value) = FieldValue::from_json(key, value)? {
                point.fields.insert(key.clone(), value);
            }
        }

        match object.get("time") {
            None | Some(Json::Null) => {}
            Some(Json::Number(n)) => {
                let epoch = n
                    .as_i64()
                    .ok_or_else(|| Error::encoding(format!("time {n} is not an integer")))?;
                point.time = Some(Timestamp::Epoch(epoch));
            }
            Some(Json::String(s)) => point.time = Some(Timestamp::Text(s.clone())),
            Some(other) => {
                return Err(Error::encoding(format!(
                    "Type: \"{}\" of time is not supported.",
                    json_type_name(other)
                )));
            }
        }

        Ok(point)
    }
}

/// Anything the write APIs accept.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// A line of line protocol, written verbatim.
    Line(String),
    /// A point, encoded with the API's encoder.
    Point(Point),
    /// A JSON object, see [`Point::from_json`].
    Json(serde_json::Value),
}

impl From<&str> for Record {
    fn from(v: &str) -> Self {
        Record::Line(v.to_string())
    }
}

impl From<String> for Record {
    fn from(v: String) -> Self {
        Record::Line(v)
    }
}

impl From<Point> for Record {
    fn from(v: Point) -> Self {
        Record::Point(v)
    }
}

impl From<serde_json::Value> for Record {
    fn from(v: serde_json::Value) -> Self {
        Record::Json(v)
    }
}
