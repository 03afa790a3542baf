//! # Runtime Value Representation
//!
//! `Value` is the owned runtime form of one column value in a tuple. Batches
//! hold rows of values, the rewriter holds them in constants, and the
//! evaluator produces them.
//!
//! ## Value Variants
//!
//! | Variant | Rust Type | Description |
//! |---------|-----------|-------------|
//! | Null | - | SQL NULL |
//! | Boolean | bool | |
//! | Integer | i32 | |
//! | Long | i64 | |
//! | Double | f64 | |
//! | Decimal | {digits, scale} | value = digits * 10^-scale |
//! | String | String | UTF-8 text |
//! | Date | i32 | days since 1970-01-01 |
//! | Timestamp | i64 | microseconds since 1970-01-01 00:00:00 |
//! | Varbinary | Vec<u8> | short binary |
//! | Clob/Blob/Xml | LobValue | large object, possibly shared by reference |
//! | Object | Vec<u8> | opaque serialized object |
//!
//! ## Comparison Semantics
//!
//! - NULL compared to anything returns None (SQL UNKNOWN)
//! - Numeric types are compared across variants (Integer vs Double promotes)
//! - Date vs Timestamp compares the date at midnight
//! - Unrelated types are incomparable (None)
//!
//! Structural equality (`PartialEq`/`Eq`/`Hash`) is exact: doubles compare by
//! bit pattern and `1.0` as a decimal of scale 1 differs from `1` of scale 0.
//! The rewriter keys its side-tables on structural equality and uses
//! [`Value::compare_sql`] wherever SQL semantics matter.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::convert::{format_date, format_decimal, format_double, format_timestamp};
use super::DataType;
use crate::buffer::LobBody;

/// Payload of a large object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LobData {
    /// Bytes held directly by the value.
    Inline(Arc<[u8]>),
    /// Bytes held as chunks in a dedicated tuple source.
    Buffered(LobBody),
}

/// A large object value as it travels through batches.
///
/// `reference_id` is minted by the owning tuple buffer the first time the value
/// is saved. `data` may be absent on a value read back from storage or copied
/// from another buffer; the owning buffer then resolves it by reference id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LobValue {
    pub reference_id: Option<String>,
    pub data: Option<LobData>,
}

impl LobValue {
    pub fn inline(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            reference_id: None,
            data: Some(LobData::Inline(bytes.into())),
        }
    }

    pub fn buffered(body: LobBody) -> Self {
        Self {
            reference_id: None,
            data: Some(LobData::Buffered(body)),
        }
    }

    /// A value carrying only its reference id.
    pub fn reference(reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: Some(reference_id.into()),
            data: None,
        }
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn inline_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            Some(LobData::Inline(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Length in bytes when known without reading a buffered body.
    pub fn length(&self) -> Option<u64> {
        match &self.data {
            Some(LobData::Inline(bytes)) => Some(bytes.len() as u64),
            Some(LobData::Buffered(body)) => Some(body.length()),
            None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    Decimal { digits: i128, scale: i16 },
    String(String),
    Date(i32),
    Timestamp(i64),
    Varbinary(Vec<u8>),
    Clob(LobValue),
    Blob(LobValue),
    Xml(LobValue),
    Object(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer(_) => DataType::Integer,
            Value::Long(_) => DataType::Long,
            Value::Double(_) => DataType::Double,
            Value::Decimal { .. } => DataType::Decimal,
            Value::String(_) => DataType::String,
            Value::Date(_) => DataType::Date,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Varbinary(_) => DataType::Varbinary,
            Value::Clob(_) => DataType::Clob,
            Value::Blob(_) => DataType::Blob,
            Value::Xml(_) => DataType::Xml,
            Value::Object(_) => DataType::Object,
        }
    }

    pub fn as_lob(&self) -> Option<&LobValue> {
        match self {
            Value::Clob(lob) | Value::Blob(lob) | Value::Xml(lob) => Some(lob),
            _ => None,
        }
    }

    pub fn as_lob_mut(&mut self) -> Option<&mut LobValue> {
        match self {
            Value::Clob(lob) | Value::Blob(lob) | Value::Xml(lob) => Some(lob),
            _ => None,
        }
    }

    /// Rebuilds a LOB value of the same kind around a new payload.
    pub fn with_lob(&self, lob: LobValue) -> Option<Value> {
        match self {
            Value::Clob(_) => Some(Value::Clob(lob)),
            Value::Blob(_) => Some(Value::Blob(lob)),
            Value::Xml(_) => Some(Value::Xml(lob)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integral value of an Integer or Long.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i as i64),
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Approximate value of any numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Long(l) => Some(*l as f64),
            Value::Double(d) => Some(*d),
            Value::Decimal { digits, scale } => Some(decimal_to_f64(*digits, *scale)),
            _ => None,
        }
    }

    /// Exact (digits, scale) form of an integral or decimal value.
    pub fn as_decimal(&self) -> Option<(i128, i16)> {
        match self {
            Value::Integer(i) => Some((*i as i128, 0)),
            Value::Long(l) => Some((*l as i128, 0)),
            Value::Decimal { digits, scale } => Some((*digits, *scale)),
            _ => None,
        }
    }

    /// Sign of a numeric value, None for non-numerics and NaN.
    pub fn signum(&self) -> Option<Ordering> {
        match self {
            Value::Integer(i) => Some(i.cmp(&0)),
            Value::Long(l) => Some(l.cmp(&0)),
            Value::Double(d) => d.partial_cmp(&0.0),
            Value::Decimal { digits, .. } => Some(digits.cmp(&0)),
            _ => None,
        }
    }

    /// SQL comparison. Returns None when either side is NULL or the types are
    /// incomparable.
    pub fn compare_sql(&self, other: &Value) -> Option<Ordering> {
        use Value::*;

        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Integer(_) | Long(_), Integer(_) | Long(_)) => {
                Some(self.as_i64()?.cmp(&other.as_i64()?))
            }
            (Double(_), _) | (_, Double(_)) => {
                if !self.data_type().is_numeric() || !other.data_type().is_numeric() {
                    return None;
                }
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Integer(_) | Long(_) | Decimal { .. }, Integer(_) | Long(_) | Decimal { .. }) => {
                let (a, a_scale) = self.as_decimal()?;
                let (b, b_scale) = other.as_decimal()?;
                match compare_decimals(a, a_scale, b, b_scale) {
                    Some(ordering) => Some(ordering),
                    None => self.as_f64()?.partial_cmp(&other.as_f64()?),
                }
            }
            (String(a), String(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Date(a), Timestamp(b)) => Some((*a as i64 * MICROS_PER_DAY).cmp(b)),
            (Timestamp(a), Date(b)) => Some(a.cmp(&(*b as i64 * MICROS_PER_DAY))),
            (Varbinary(a), Varbinary(b)) => Some(a.cmp(b)),
            (Clob(a), Clob(b)) | (Blob(a), Blob(b)) | (Xml(a), Xml(b)) => {
                Some(a.inline_bytes()?.cmp(b.inline_bytes()?))
            }
            _ => None,
        }
    }

    /// Rough in-memory footprint used for batch size estimates.
    pub fn estimated_size(&self) -> usize {
        let base = std::mem::size_of::<Value>();
        match self {
            Value::String(s) => base + s.len(),
            Value::Varbinary(b) | Value::Object(b) => base + b.len(),
            Value::Clob(lob) | Value::Blob(lob) | Value::Xml(lob) => {
                base + lob.reference_id.as_ref().map_or(0, |r| r.len())
                    + lob.inline_bytes().map_or(0, |b| b.len())
            }
            _ => base,
        }
    }
}

pub(crate) const MICROS_PER_DAY: i64 = 86_400_000_000;

fn decimal_to_f64(digits: i128, scale: i16) -> f64 {
    digits as f64 / 10f64.powi(scale as i32)
}

fn compare_decimals(a: i128, a_scale: i16, b: i128, b_scale: i16) -> Option<Ordering> {
    let scale = a_scale.max(b_scale);
    let a = rescale(a, scale - a_scale)?;
    let b = rescale(b, scale - b_scale)?;
    Some(a.cmp(&b))
}

fn rescale(digits: i128, by: i16) -> Option<i128> {
    if by < 0 {
        return None;
    }
    10i128
        .checked_pow(by as u32)
        .and_then(|factor| digits.checked_mul(factor))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;

        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (
                Decimal {
                    digits: a,
                    scale: a_scale,
                },
                Decimal {
                    digits: b,
                    scale: b_scale,
                },
            ) => a == b && a_scale == b_scale,
            (String(a), String(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Varbinary(a), Varbinary(b)) => a == b,
            (Clob(a), Clob(b)) | (Blob(a), Blob(b)) | (Xml(a), Xml(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data_type().tag().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Long(l) => l.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::Decimal { digits, scale } => {
                digits.hash(state);
                scale.hash(state);
            }
            Value::String(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Varbinary(b) | Value::Object(b) => b.hash(state),
            Value::Clob(lob) | Value::Blob(lob) | Value::Xml(lob) => lob.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}", l),
            Value::Double(d) => f.write_str(&format_double(*d)),
            Value::Decimal { digits, scale } => f.write_str(&format_decimal(*digits, *scale)),
            Value::String(s) => f.write_str(s),
            Value::Date(days) => f.write_str(&format_date(*days)),
            Value::Timestamp(micros) => f.write_str(&format_timestamp(*micros)),
            Value::Varbinary(bytes) | Value::Object(bytes) => {
                for byte in bytes {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
            Value::Clob(lob) | Value::Blob(lob) | Value::Xml(lob) => match lob.inline_bytes() {
                Some(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
                None => write!(
                    f,
                    "<lob {}>",
                    lob.reference_id.as_deref().unwrap_or("unreferenced")
                ),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_comparison_is_unknown() {
        assert_eq!(Value::Null.compare_sql(&Value::Integer(1)), None);
        assert_eq!(Value::Integer(1).compare_sql(&Value::Null), None);
    }

    #[test]
    fn numeric_comparison_crosses_variants() {
        assert_eq!(
            Value::Integer(2).compare_sql(&Value::Long(3)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Integer(2).compare_sql(&Value::Double(2.0)),
            Some(Ordering::Equal)
        );
        let one_point_five = Value::Decimal {
            digits: 15,
            scale: 1,
        };
        assert_eq!(
            one_point_five.compare_sql(&Value::Integer(1)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn incomparable_types() {
        assert_eq!(Value::from("1").compare_sql(&Value::Integer(1)), None);
        assert_eq!(Value::Boolean(true).compare_sql(&Value::Double(1.0)), None);
    }

    #[test]
    fn date_against_timestamp() {
        assert_eq!(
            Value::Date(1).compare_sql(&Value::Timestamp(MICROS_PER_DAY)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn structural_equality_is_exact() {
        assert_ne!(Value::Integer(1), Value::Long(1));
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(
            Value::Decimal {
                digits: 10,
                scale: 1
            },
            Value::Decimal {
                digits: 1,
                scale: 0
            }
        );
    }

    #[test]
    fn lob_accessors() {
        let clob = Value::Clob(LobValue::inline(b"hello".to_vec()).with_reference("7"));
        let lob = clob.as_lob().unwrap();
        assert_eq!(lob.reference_id.as_deref(), Some("7"));
        assert_eq!(lob.length(), Some(5));
        assert_eq!(clob.to_string(), "hello");
        assert_eq!(
            Value::Clob(LobValue::reference("9")).to_string(),
            "<lob 9>"
        );
    }
}
