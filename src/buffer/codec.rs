//! # Batch Serialization
//!
//! Binary form of a `TupleBatch` used by the file tier. Values are encoded
//! according to the column type hints supplied with every read and write, so
//! the payload carries no per-value type tags.
//!
//! ## Encoding Format
//!
//! ```text
//! Batch  := [size: i64] [begin_row: i64] [termination: u8]
//!           [row_count: u32] [column_count: u16] [Row]*
//! Row    := [Column]{column_count}
//! Column := [marker: u8] [Data]?        marker 0 = NULL (no data), 1 = value
//!
//! Data by column type:
//!   Boolean            1 byte (0/1)
//!   Integer, Date      4 bytes big-endian
//!   Long, Timestamp    8 bytes big-endian
//!   Double             8 bytes (f64 bits, big-endian)
//!   Decimal            16 + 2 bytes (digits as i128, scale as i16)
//!   String             [len: u32] [utf8 bytes]
//!   Varbinary, Object  [len: u32] [bytes]
//!   Clob, Blob, Xml    [len: u32] [reference id utf8]
//! ```
//!
//! `size` is the batch's size hint, or -1 when it has none. All integers are
//! big-endian.
//!
//! ## LOB Columns
//!
//! Only the reference id of a LOB is written. The payload handle is process
//! local; the owning tuple buffer resolves it again by reference id when the
//! batch is read back. Serializing a LOB that has no reference id is an error.
//!
//! ## Validation
//!
//! Decoding checks every length against the remaining input, rejects unknown
//! markers, invalid UTF-8, trailing bytes and begin rows below 1 or too close
//! to `i64::MAX` for the row count, and fails with
//! `BufferError::Corrupted`. A value whose type disagrees with its column hint
//! fails encoding with `BufferError::TypeMismatch`.

use eyre::{bail, Result};

use super::{BufferError, TupleBatch};
use crate::config::MAX_BATCH_ROWS;
use crate::types::{DataType, LobValue, Tuple, Value};

mod marker {
    pub const NULL: u8 = 0x00;
    pub const VALUE: u8 = 0x01;
}

/// Fixed header: size, begin_row, termination, row_count, column_count.
pub const BATCH_HEADER_SIZE: usize = 8 + 8 + 1 + 4 + 2;

pub struct BatchSerializer;

impl BatchSerializer {
    pub fn serialize(batch: &TupleBatch, types: &[DataType]) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(BATCH_HEADER_SIZE + batch.size_bytes());
        Self::serialize_into(batch, types, &mut buf)?;
        Ok(buf)
    }

    pub fn serialize_into(batch: &TupleBatch, types: &[DataType], buf: &mut Vec<u8>) -> Result<()> {
        let size = batch.size_hint().map(|s| s as i64).unwrap_or(-1);
        buf.extend_from_slice(&size.to_be_bytes());
        buf.extend_from_slice(&batch.begin_row().to_be_bytes());
        buf.push(batch.is_last() as u8);
        buf.extend_from_slice(&(batch.row_count() as u32).to_be_bytes());
        buf.extend_from_slice(&(types.len() as u16).to_be_bytes());

        for row in batch.tuples() {
            if row.len() != types.len() {
                bail!(BufferError::Corrupted(format!(
                    "row has {} values but {} column types were supplied",
                    row.len(),
                    types.len()
                )));
            }
            for (column, (value, data_type)) in row.iter().zip(types).enumerate() {
                Self::serialize_value_into(column, value, *data_type, buf)?;
            }
        }

        Ok(())
    }

    fn serialize_value_into(
        column: usize,
        value: &Value,
        data_type: DataType,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        if value.is_null() {
            buf.push(marker::NULL);
            return Ok(());
        }

        if value.data_type() != data_type {
            bail!(BufferError::TypeMismatch {
                column,
                expected: data_type,
                actual: value.data_type(),
            });
        }

        buf.push(marker::VALUE);
        match value {
            Value::Null => {}
            Value::Boolean(b) => buf.push(*b as u8),
            Value::Integer(i) => buf.extend_from_slice(&i.to_be_bytes()),
            Value::Long(l) => buf.extend_from_slice(&l.to_be_bytes()),
            Value::Double(d) => buf.extend_from_slice(&d.to_bits().to_be_bytes()),
            Value::Decimal { digits, scale } => {
                buf.extend_from_slice(&digits.to_be_bytes());
                buf.extend_from_slice(&scale.to_be_bytes());
            }
            Value::String(s) => write_bytes(s.as_bytes(), buf),
            Value::Date(days) => buf.extend_from_slice(&days.to_be_bytes()),
            Value::Timestamp(micros) => buf.extend_from_slice(&micros.to_be_bytes()),
            Value::Varbinary(bytes) | Value::Object(bytes) => write_bytes(bytes, buf),
            Value::Clob(lob) | Value::Blob(lob) | Value::Xml(lob) => {
                let Some(reference_id) = &lob.reference_id else {
                    bail!(BufferError::Corrupted(format!(
                        "LOB in column {} has no reference id",
                        column
                    )));
                };
                write_bytes(reference_id.as_bytes(), buf);
            }
        }

        Ok(())
    }

    pub fn deserialize(data: &[u8], types: &[DataType]) -> Result<TupleBatch> {
        let mut reader = Reader { data, offset: 0 };

        let size = reader.i64()?;
        let begin_row = reader.i64()?;
        let is_last = match reader.u8()? {
            0 => false,
            1 => true,
            other => bail!(BufferError::Corrupted(format!(
                "invalid termination flag {}",
                other
            ))),
        };
        let row_count = reader.u32()? as usize;
        let column_count = reader.u16()? as usize;

        if column_count != types.len() {
            bail!(BufferError::Corrupted(format!(
                "batch has {} columns but {} column types were supplied",
                column_count,
                types.len()
            )));
        }
        if begin_row < 1 || begin_row.checked_add(row_count as i64).is_none() {
            bail!(BufferError::Corrupted(format!(
                "begin row {} with {} rows is out of range",
                begin_row, row_count
            )));
        }
        if column_count == 0 && row_count > MAX_BATCH_ROWS {
            bail!(BufferError::Corrupted(format!(
                "{} zero-column rows exceed the limit of {}",
                row_count, MAX_BATCH_ROWS
            )));
        }
        if row_count.saturating_mul(column_count) > reader.remaining() {
            bail!(BufferError::Corrupted(format!(
                "{} rows of {} columns cannot fit in {} bytes",
                row_count,
                column_count,
                reader.remaining()
            )));
        }

        let mut rows = Vec::with_capacity(row_count.min(reader.remaining()));
        for _ in 0..row_count {
            let mut row: Tuple = Vec::with_capacity(column_count);
            for data_type in types {
                row.push(Self::deserialize_value(&mut reader, *data_type)?);
            }
            rows.push(row);
        }

        if reader.remaining() != 0 {
            bail!(BufferError::Corrupted(format!(
                "{} trailing bytes after batch",
                reader.remaining()
            )));
        }

        let batch = TupleBatch::new(begin_row, rows).with_termination(is_last);
        Ok(if size >= 0 {
            batch.with_size_hint(size as usize)
        } else {
            batch
        })
    }

    fn deserialize_value(reader: &mut Reader<'_>, data_type: DataType) -> Result<Value> {
        match reader.u8()? {
            marker::NULL => return Ok(Value::Null),
            marker::VALUE => {}
            other => bail!(BufferError::Corrupted(format!(
                "invalid value marker 0x{:02x}",
                other
            ))),
        }

        Ok(match data_type {
            DataType::Null => bail!(BufferError::Corrupted(
                "non-null value in a null-typed column".to_string()
            )),
            DataType::Boolean => match reader.u8()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => bail!(BufferError::Corrupted(format!(
                    "invalid boolean byte {}",
                    other
                ))),
            },
            DataType::Integer => Value::Integer(reader.i32()?),
            DataType::Long => Value::Long(reader.i64()?),
            DataType::Double => Value::Double(f64::from_bits(reader.i64()? as u64)),
            DataType::Decimal => {
                let digits = i128::from_be_bytes(reader.array::<16>()?);
                let scale = i16::from_be_bytes(reader.array::<2>()?);
                Value::Decimal { digits, scale }
            }
            DataType::String => Value::String(reader.string()?),
            DataType::Date => Value::Date(reader.i32()?),
            DataType::Timestamp => Value::Timestamp(reader.i64()?),
            DataType::Varbinary => Value::Varbinary(reader.bytes()?.to_vec()),
            DataType::Object => Value::Object(reader.bytes()?.to_vec()),
            DataType::Clob => Value::Clob(LobValue::reference(reader.string()?)),
            DataType::Blob => Value::Blob(LobValue::reference(reader.string()?)),
            DataType::Xml => Value::Xml(LobValue::reference(reader.string()?)),
        })
    }
}

fn write_bytes(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            bail!(BufferError::Corrupted(format!(
                "truncated batch: needed {} bytes at offset {}, {} left",
                len,
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String> {
        let bytes = self.bytes()?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(e) => bail!(BufferError::Corrupted(format!("invalid utf-8: {}", e))),
        }
    }
}
