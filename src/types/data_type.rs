//! # Column Type Hints
//!
//! `DataType` is the per-column tag passed alongside every batch read and
//! write. The batch codec uses it to pick a binary encoding, the tuple buffer
//! uses it to find LOB columns, and the rewriter uses it to decide which
//! conversions are invertible.
//!
//! ## Type Categories
//!
//! | Category | Types | Encoded Width |
//! |----------|-------|---------------|
//! | **Boolean** | Boolean | 1 byte |
//! | **Integral** | Integer, Long | 4, 8 bytes |
//! | **Approximate** | Double | 8 bytes |
//! | **Exact** | Decimal | 18 bytes (i128 digits + i16 scale) |
//! | **Date/Time** | Date, Timestamp | 4, 8 bytes |
//! | **Text** | String | Variable |
//! | **Binary** | Varbinary, Object | Variable |
//! | **LOB** | Clob, Blob, Xml | Variable (reference id only) |
//!
//! ## Discriminant Values
//!
//! Discriminants are grouped by category so that range checks stay cheap:
//! - 0: Null
//! - 1-5: Boolean and numeric
//! - 10-11: Date/time
//! - 20-21: String and binary
//! - 30-32: LOB types
//! - 40: Object

use eyre::bail;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Null = 0,
    Boolean = 1,
    Integer = 2,
    Long = 3,
    Double = 4,
    Decimal = 5,

    Date = 10,
    Timestamp = 11,

    String = 20,
    Varbinary = 21,

    Clob = 30,
    Blob = 31,
    Xml = 32,

    Object = 40,
}

impl DataType {
    /// Returns the fixed encoded size for this type, or None for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Null => Some(0),
            DataType::Boolean => Some(1),
            DataType::Integer | DataType::Date => Some(4),
            DataType::Long | DataType::Double | DataType::Timestamp => Some(8),
            DataType::Decimal => Some(18),
            DataType::String
            | DataType::Varbinary
            | DataType::Clob
            | DataType::Blob
            | DataType::Xml
            | DataType::Object => None,
        }
    }

    pub fn is_lob(&self) -> bool {
        matches!(self, DataType::Clob | DataType::Blob | DataType::Xml)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Integer | DataType::Long | DataType::Double | DataType::Decimal
        )
    }

    /// Integer-valued types, where division and exact inversion behave differently.
    pub fn is_integral(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Long)
    }

    pub fn is_datetime(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }

    pub fn tag(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Null => "null",
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Long => "long",
            DataType::Double => "double",
            DataType::Decimal => "bigdecimal",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::String => "string",
            DataType::Varbinary => "varbinary",
            DataType::Clob => "clob",
            DataType::Blob => "blob",
            DataType::Xml => "xml",
            DataType::Object => "object",
        }
    }

    /// Resolves a type name as written in CONVERT/CAST targets.
    pub fn from_name(name: &str) -> Option<DataType> {
        let lower = name.to_ascii_lowercase();
        let data_type = match lower.as_str() {
            "null" => DataType::Null,
            "boolean" | "bool" => DataType::Boolean,
            "integer" | "int" => DataType::Integer,
            "long" | "bigint" => DataType::Long,
            "double" | "float" => DataType::Double,
            "bigdecimal" | "decimal" => DataType::Decimal,
            "date" => DataType::Date,
            "timestamp" => DataType::Timestamp,
            "string" | "varchar" => DataType::String,
            "varbinary" => DataType::Varbinary,
            "clob" => DataType::Clob,
            "blob" => DataType::Blob,
            "xml" => DataType::Xml,
            "object" => DataType::Object,
            _ => return None,
        };
        Some(data_type)
    }

    pub fn from_tag(tag: u8) -> eyre::Result<DataType> {
        Ok(match tag {
            0 => DataType::Null,
            1 => DataType::Boolean,
            2 => DataType::Integer,
            3 => DataType::Long,
            4 => DataType::Double,
            5 => DataType::Decimal,
            10 => DataType::Date,
            11 => DataType::Timestamp,
            20 => DataType::String,
            21 => DataType::Varbinary,
            30 => DataType::Clob,
            31 => DataType::Blob,
            32 => DataType::Xml,
            40 => DataType::Object,
            _ => bail!("invalid DataType discriminant: {}", tag),
        })
    }
}

impl TryFrom<u8> for DataType {
    type Error = eyre::Report;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        DataType::from_tag(value)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
