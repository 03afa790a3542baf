//! Fuzz testing for the spill batch codec.
//!
//! Spill files are read back from disk, so the deserializer must reject any
//! byte sequence it did not write without panicking. Batches it does accept
//! must encode back to the same bytes.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use querybuf::buffer::BatchSerializer;
use querybuf::DataType;

#[derive(Debug, Arbitrary)]
struct CodecInput {
    column_types: Vec<FuzzDataType>,
    data: Vec<u8>,
}

#[derive(Debug, Arbitrary, Clone, Copy)]
enum FuzzDataType {
    Null,
    Boolean,
    Integer,
    Long,
    Double,
    Decimal,
    Date,
    Timestamp,
    String,
    Varbinary,
    Clob,
    Blob,
    Xml,
    Object,
}

impl From<FuzzDataType> for DataType {
    fn from(fdt: FuzzDataType) -> Self {
        match fdt {
            FuzzDataType::Null => DataType::Null,
            FuzzDataType::Boolean => DataType::Boolean,
            FuzzDataType::Integer => DataType::Integer,
            FuzzDataType::Long => DataType::Long,
            FuzzDataType::Double => DataType::Double,
            FuzzDataType::Decimal => DataType::Decimal,
            FuzzDataType::Date => DataType::Date,
            FuzzDataType::Timestamp => DataType::Timestamp,
            FuzzDataType::String => DataType::String,
            FuzzDataType::Varbinary => DataType::Varbinary,
            FuzzDataType::Clob => DataType::Clob,
            FuzzDataType::Blob => DataType::Blob,
            FuzzDataType::Xml => DataType::Xml,
            FuzzDataType::Object => DataType::Object,
        }
    }
}

fuzz_target!(|input: CodecInput| {
    if input.column_types.is_empty() || input.column_types.len() > 64 {
        return;
    }

    let column_types: Vec<DataType> = input.column_types.into_iter().map(Into::into).collect();
    let Ok(batch) = BatchSerializer::deserialize(&input.data, &column_types) else {
        return;
    };

    let encoded = BatchSerializer::serialize(&batch, &column_types)
        .expect("a decoded batch must encode");
    let decoded = BatchSerializer::deserialize(&encoded, &column_types)
        .expect("an encoded batch must decode");
    assert_eq!(decoded.begin_row(), batch.begin_row());
    assert_eq!(decoded.row_count(), batch.row_count());
    assert_eq!(decoded.is_last(), batch.is_last());
});
