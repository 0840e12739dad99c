//! Line protocol encoding.
//!
//! Output is `measurement[,tag=value...] field=value[,field=value...][ time]`.
//! Tags and fields are written sorted by key; that order is part of the wire
//! contract, not a formatting choice.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::date::{ChronoDateHelper, DateHelper, Timestamp};
use crate::error::{Error, Result};
use crate::point::{Point, Record};
use crate::types::WritePrecision;
use crate::value::FieldValue;

/// Characters escaped in measurement names.
const MEASUREMENT_SPECIAL: &[char] = &['\\', ',', ' ', '\n', '\t', '\r'];
/// Characters escaped in tag keys, tag values and field keys.
const KEY_SPECIAL: &[char] = &['\\', ',', '=', ' ', '\n', '\t', '\r'];

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if !special.contains(&c) {
            out.push(c);
            continue;
        }
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
}

/// Escape a measurement name.
pub fn escape_measurement(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    escape_into(&mut out, s, MEASUREMENT_SPECIAL);
    out
}

/// Escape a tag key, tag value or field key.
pub fn escape_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    escape_into(&mut out, s, KEY_SPECIAL);
    out
}

/// Escape the contents of a string field value (without the quotes).
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Encodes points into line protocol.
///
/// Date handling is delegated to the injected [`DateHelper`].
#[derive(Clone, Debug)]
pub struct LineProtocolEncoder {
    date_helper: Arc<dyn DateHelper>,
}

impl Default for LineProtocolEncoder {
    fn default() -> Self {
        Self::new(Arc::new(ChronoDateHelper::default()))
    }
}

impl LineProtocolEncoder {
    /// Create an encoder using `date_helper` for timestamp conversion.
    pub fn new(date_helper: Arc<dyn DateHelper>) -> Self {
        Self { date_helper }
    }

    /// Encode a point.
    ///
    /// Non-finite float fields are skipped. A point left with
    /// no field encodes to the empty string. Fails with [`Error::Encoding`]
    /// when the measurement is empty or the time cannot be converted.
    pub fn encode(&self, point: &Point) -> Result<String> {
        let mut fields = String::new();
        for (key, value) in point.fields() {
            if key.is_empty() || !value.is_encodable() {
                continue;
            }
            if !fields.is_empty() {
                fields.push(',');
            }
            escape_into(&mut fields, key, KEY_SPECIAL);
            fields.push('=');
            write_field_value(&mut fields, value);
        }

        if fields.is_empty() {
            return Ok(String::new());
        }

        if point.name().is_empty() {
            return Err(Error::encoding("measurement name must not be empty"));
        }

        let mut line = escape_measurement(point.name());
        for (key, value) in point.tags() {
            if key.is_empty() || value.is_empty() {
                continue;
            }
            line.push(',');
            escape_into(&mut line, key, KEY_SPECIAL);
            line.push('=');
            escape_into(&mut line, value, KEY_SPECIAL);
        }

        line.push(' ');
        line.push_str(&fields);

        if let Some(time) = point.timestamp() {
            let value = self.convert_timestamp(time, point.precision())?;
            let _ = write!(line, " {value}");
        }

        Ok(line)
    }

    /// Integer timestamp in `precision` units.
    ///
    /// [`Timestamp::Epoch`] values are assumed to already be in `precision`.
    /// Everything else goes through the date helper and is truncated.
    pub fn convert_timestamp(&self, time: &Timestamp, precision: WritePrecision) -> Result<i64> {
        self.date_helper.to_precision(time, precision)
    }

    /// Encode any record into `(precision, line)`.
    ///
    /// `default_tags` are added to points that do not already set them.
    /// Returns `None` for records that encode to nothing.
    pub fn encode_record(
        &self,
        record: Record,
        precision: WritePrecision,
        default_tags: &BTreeMap<String, String>,
    ) -> Result<Option<(WritePrecision, String)>> {
        let mut point = match record {
            Record::Line(line) => {
                return Ok((!line.is_empty()).then_some((precision, line)));
            }
            Record::Point(point) => point,
            Record::Json(value) => Point::from_json(&value, precision)?,
        };

        for (key, value) in default_tags {
            point.default_tag(key, value);
        }

        let line = self.encode(&point)?;
        Ok((!line.is_empty()).then_some((point.precision(), line)))
    }
}

fn write_field_value(out: &mut String, value: &FieldValue) {
    let _ = match value {
        FieldValue::Float(f) => write!(out, "{}", f.into_inner()),
        FieldValue::Integer(i) => write!(out, "{i}i"),
        FieldValue::UInteger(u) => write!(out, "{u}u"),
        FieldValue::Boolean(b) => write!(out, "{b}"),
        FieldValue::String(s) => write!(out, "\"{}\"", escape_string(s)),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc};

    fn encode(point: &Point) -> String {
        LineProtocolEncoder::default().encode(point).unwrap()
    }

    #[test]
    fn test_measurement_escape() {
        let point = Point::measurement("h2 o").tag("location", "europe").tag("", "warn").field("level", 2);
        assert_eq!(encode(&point), "h2\\ o,location=europe level=2i");

        let point = Point::measurement("h2,o").tag("location", "europe").field("level", 2);
        assert_eq!(encode(&point), "h2\\,o,location=europe level=2i");

        let point = Point::measurement("h=2o").tag("l=ocation", "e=urope").field("l=evel", 2);
        assert_eq!(encode(&point), "h=2o,l\\=ocation=e\\=urope l\\=evel=2i");
    }

    #[test]
    fn test_empty_tag_value_skipped() {
        let point = Point::measurement("h2o").tag("location", "europe").tag("log", "").field("level", 2);
        assert_eq!(encode(&point), "h2o,location=europe level=2i");
    }

    #[test]
    fn test_control_characters() {
        let point = Point::measurement("h\n2\ro\t_data")
            .tag("new\nline", "new\nline")
            .tag("carriage\rreturn", "carriage\nreturn")
            .tag("t\tab", "t\tab")
            .field("level", 2);

        assert_eq!(
            encode(&point),
            "h\\n2\\ro\\t_data,carriage\\rreturn=carriage\\nreturn,new\\nline=new\\nline,t\\tab=t\\tab level=2i"
        );
    }

    #[test]
    fn test_backslash_tag_value() {
        let point = Point::measurement("test")
            .tag("backslash_tag", "C:\\")
            .tag("string_tag", "hello")
            .field("v", true);
        assert_eq!(encode(&point), "test,backslash_tag=C:\\\\,string_tag=hello v=true");
    }

    #[test]
    fn test_field_types_sorted() {
        let point = Point::measurement("h2o")
            .tag("location", "europe")
            .field("long", 1i64)
            .field("double", 250.69)
            .field("float", 35.0)
            .field("ulong", 10u64)
            .field("boolean", false)
            .field("string", "string value");

        assert_eq!(
            encode(&point),
            "h2o,location=europe boolean=false,double=250.69,float=35,long=1i,\
             string=\"string value\",ulong=10u"
        );
    }

    #[test]
    fn test_string_field_escape() {
        let point = Point::measurement("h2o").field("level", "string esc\\ape value");
        assert_eq!(encode(&point), "h2o level=\"string esc\\\\ape value\"");

        let point = Point::measurement("h2o").field("level", "string esc\"ape value");
        assert_eq!(encode(&point), "h2o level=\"string esc\\\"ape value\"");
    }

    #[test]
    fn test_non_finite_skipped() {
        let point = Point::measurement("h2o")
            .tag("location", "europe")
            .field("inf", f64::INFINITY)
            .field("nan", f64::NAN)
            .field("level", 2);
        assert_eq!(encode(&point), "h2o,location=europe level=2i");

        let only = Point::measurement("h2o").field("inf", f64::NEG_INFINITY).field("nan", f64::NAN);
        assert_eq!(encode(&only), "");
    }

    #[test]
    fn test_empty_measurement_rejected() {
        let point = Point::measurement("").field("v", 1);
        assert!(LineProtocolEncoder::default().encode(&point).unwrap_err().is_encoding());
    }

    #[test]
    fn test_time_precisions() {
        let dt = Utc.with_ymd_and_hms(2009, 11, 10, 23, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456);

        let point = Point::measurement("weather")
            .tag("location", "Přerov")
            .tag("sid", "12345")
            .field("temperature", 30.1)
            .field("int_field", 2)
            .field("float_field", 0)
            .time(dt, WritePrecision::Ms);
        assert_eq!(
            encode(&point),
            "weather,location=Přerov,sid=12345 float_field=0i,int_field=2i,temperature=30.1 1257894000123"
        );

        let ns = Point::measurement("A").field("val", 1).time(dt, WritePrecision::Ns);
        assert_eq!(encode(&ns), "A val=1i 1257894000123456000");

        let us = Point::measurement("A").field("val", 1).time(dt, WritePrecision::Us);
        assert_eq!(encode(&us), "A val=1i 1257894000123456");

        let s = Point::measurement("A").field("val", 1).time(dt, WritePrecision::S);
        assert_eq!(encode(&s), "A val=1i 1257894000");
    }

    #[test]
    fn test_far_future_time_at_seconds() {
        let dt = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();

        let s = Point::measurement("A").field("val", 1).time(dt, WritePrecision::S);
        assert_eq!(encode(&s), "A val=1i 10413792000");

        let ns = Point::measurement("A").field("val", 1).time(dt, WritePrecision::Ns);
        assert!(LineProtocolEncoder::default().encode(&ns).unwrap_err().is_encoding());
    }

    #[test]
    fn test_integer_time_verbatim() {
        let point = Point::measurement("h2o").field("level", 2).time(123, WritePrecision::S);
        assert_eq!(encode(&point), "h2o level=2i 123");
    }

    #[test]
    fn test_timezones() {
        let berlin = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2009, 11, 10, 23, 0, 0)
            .unwrap();
        let point = Point::measurement("h2o").field("val", 1).time(berlin, WritePrecision::S);
        assert_eq!(encode(&point), "h2o val=1i 1257890400");

        let text = Point::measurement("h2o")
            .field("val", 1)
            .time("2009-11-10T23:00:00.123456Z", WritePrecision::Ns);
        assert_eq!(encode(&text), "h2o val=1i 1257894000123456000");
    }

    #[test]
    fn test_injected_date_helper() {
        let helper = ChronoDateHelper::new(FixedOffset::east_opt(3600).unwrap());
        let encoder = LineProtocolEncoder::new(Arc::new(helper));
        let point = Point::measurement("h2o")
            .field("val", 1)
            .time("2009-11-10 23:00:00", WritePrecision::S);
        assert_eq!(encoder.encode(&point).unwrap(), "h2o val=1i 1257890400");
    }

    #[test]
    fn test_encode_record() {
        let encoder = LineProtocolEncoder::default();
        let mut defaults = BTreeMap::new();
        defaults.insert("customer".to_string(), "California Miner".to_string());

        let line = encoder
            .encode_record(Record::from("m v=1"), WritePrecision::Ms, &defaults)
            .unwrap();
        assert_eq!(line, Some((WritePrecision::Ms, "m v=1".to_string())));

        let point = Point::measurement("m").field("v", 1).time(5, WritePrecision::S);
        let line = encoder
            .encode_record(Record::from(point), WritePrecision::Ns, &defaults)
            .unwrap();
        assert_eq!(
            line,
            Some((WritePrecision::S, "m,customer=California\\ Miner v=1i 5".to_string()))
        );

        let empty = Point::measurement("m").field("nan", f64::NAN);
        assert_eq!(
            encoder
                .encode_record(Record::from(empty), WritePrecision::Ns, &defaults)
                .unwrap(),
            None
        );
    }
}
