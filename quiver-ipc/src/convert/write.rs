//! Serialization of schemas, batch headers and message roots.

use arrow_format::ipc;
use arrow_format::ipc::planus::Builder;
use bytes::Bytes;
use quiver_error::QuiverResult;
use quiver_schema::{
    DataType, Field, IntegerType, IntervalUnit, Metadata, Schema, TimeUnit, UnionMode,
};

use crate::compression::CompressionKind;
use crate::convert::{EXTENSION_METADATA_KEY, EXTENSION_NAME_KEY, RecordBatchHeader};
use crate::dictionary::{DictionaryFieldMapper, FieldPosition};
use crate::options::MetadataVersion;

pub(crate) fn fb_version(version: MetadataVersion) -> ipc::MetadataVersion {
    match version {
        MetadataVersion::V4 => ipc::MetadataVersion::V4,
        MetadataVersion::V5 => ipc::MetadataVersion::V5,
    }
}

fn serialize_metadata(metadata: Option<&Metadata>) -> Option<Vec<ipc::KeyValue>> {
    metadata.map(|md| {
        md.iter()
            .map(|(k, v)| ipc::KeyValue {
                key: Some(k.to_string()),
                value: Some(v.to_string()),
            })
            .collect()
    })
}

fn serialize_time_unit(unit: TimeUnit) -> ipc::TimeUnit {
    match unit {
        TimeUnit::Second => ipc::TimeUnit::Second,
        TimeUnit::Millisecond => ipc::TimeUnit::Millisecond,
        TimeUnit::Microsecond => ipc::TimeUnit::Microsecond,
        TimeUnit::Nanosecond => ipc::TimeUnit::Nanosecond,
    }
}

fn serialize_integer(int: IntegerType) -> ipc::Int {
    ipc::Int {
        bit_width: int.bit_width() as i32,
        is_signed: int.is_signed(),
    }
}

fn serialize_type(data_type: &DataType) -> ipc::Type {
    use DataType::*;
    match data_type {
        Null => ipc::Type::Null(Box::new(ipc::Null {})),
        Boolean => ipc::Type::Bool(Box::new(ipc::Bool {})),
        Int8 => ipc::Type::Int(Box::new(serialize_integer(IntegerType::Int8))),
        Int16 => ipc::Type::Int(Box::new(serialize_integer(IntegerType::Int16))),
        Int32 => ipc::Type::Int(Box::new(serialize_integer(IntegerType::Int32))),
        Int64 => ipc::Type::Int(Box::new(serialize_integer(IntegerType::Int64))),
        UInt8 => ipc::Type::Int(Box::new(serialize_integer(IntegerType::UInt8))),
        UInt16 => ipc::Type::Int(Box::new(serialize_integer(IntegerType::UInt16))),
        UInt32 => ipc::Type::Int(Box::new(serialize_integer(IntegerType::UInt32))),
        UInt64 => ipc::Type::Int(Box::new(serialize_integer(IntegerType::UInt64))),
        Float16 => ipc::Type::FloatingPoint(Box::new(ipc::FloatingPoint {
            precision: ipc::Precision::Half,
        })),
        Float32 => ipc::Type::FloatingPoint(Box::new(ipc::FloatingPoint {
            precision: ipc::Precision::Single,
        })),
        Float64 => ipc::Type::FloatingPoint(Box::new(ipc::FloatingPoint {
            precision: ipc::Precision::Double,
        })),
        Date32 => ipc::Type::Date(Box::new(ipc::Date {
            unit: ipc::DateUnit::Day,
        })),
        Date64 => ipc::Type::Date(Box::new(ipc::Date {
            unit: ipc::DateUnit::Millisecond,
        })),
        Time32(unit) => ipc::Type::Time(Box::new(ipc::Time {
            unit: serialize_time_unit(*unit),
            bit_width: 32,
        })),
        Time64(unit) => ipc::Type::Time(Box::new(ipc::Time {
            unit: serialize_time_unit(*unit),
            bit_width: 64,
        })),
        Timestamp(unit, timezone) => ipc::Type::Timestamp(Box::new(ipc::Timestamp {
            unit: serialize_time_unit(*unit),
            timezone: timezone.clone(),
        })),
        Duration(unit) => ipc::Type::Duration(Box::new(ipc::Duration {
            unit: serialize_time_unit(*unit),
        })),
        Interval(unit) => ipc::Type::Interval(Box::new(ipc::Interval {
            unit: match unit {
                IntervalUnit::YearMonth => ipc::IntervalUnit::YearMonth,
                IntervalUnit::DayTime => ipc::IntervalUnit::DayTime,
                IntervalUnit::MonthDayNano => ipc::IntervalUnit::MonthDayNano,
            },
        })),
        Decimal(precision, scale) => ipc::Type::Decimal(Box::new(ipc::Decimal {
            precision: *precision as i32,
            scale: *scale as i32,
            bit_width: 128,
        })),
        Decimal256(precision, scale) => ipc::Type::Decimal(Box::new(ipc::Decimal {
            precision: *precision as i32,
            scale: *scale as i32,
            bit_width: 256,
        })),
        Utf8 => ipc::Type::Utf8(Box::new(ipc::Utf8 {})),
        LargeUtf8 => ipc::Type::LargeUtf8(Box::new(ipc::LargeUtf8 {})),
        Binary => ipc::Type::Binary(Box::new(ipc::Binary {})),
        LargeBinary => ipc::Type::LargeBinary(Box::new(ipc::LargeBinary {})),
        FixedSizeBinary(size) => ipc::Type::FixedSizeBinary(Box::new(ipc::FixedSizeBinary {
            byte_width: *size as i32,
        })),
        List(_) => ipc::Type::List(Box::new(ipc::List {})),
        LargeList(_) => ipc::Type::LargeList(Box::new(ipc::LargeList {})),
        FixedSizeList(_, size) => ipc::Type::FixedSizeList(Box::new(ipc::FixedSizeList {
            list_size: *size as i32,
        })),
        Struct(_) => ipc::Type::Struct(Box::new(ipc::Struct {})),
        Union(_, type_ids, mode) => ipc::Type::Union(Box::new(ipc::Union {
            mode: match mode {
                UnionMode::Sparse => ipc::UnionMode::Sparse,
                UnionMode::Dense => ipc::UnionMode::Dense,
            },
            type_ids: type_ids.clone(),
        })),
        Map(_, keys_sorted) => ipc::Type::Map(Box::new(ipc::Map {
            keys_sorted: *keys_sorted,
        })),
        Dictionary(_, values, _) => serialize_type(values),
        Extension(_, storage, _) => serialize_type(storage),
    }
}

fn serialize_field(
    field: &Field,
    pos: &FieldPosition,
    mapper: &DictionaryFieldMapper,
) -> QuiverResult<ipc::Field> {
    // Extension types ride on field metadata; the serialized type is the
    // storage type.
    let mut data_type = &field.data_type;
    let mut metadata = field.metadata.clone();
    if let DataType::Extension(name, storage, extension_metadata) = data_type {
        let md = metadata.get_or_insert_default();
        md.insert(EXTENSION_NAME_KEY, name.clone());
        if let Some(extension_metadata) = extension_metadata {
            md.insert(EXTENSION_METADATA_KEY, extension_metadata.clone());
        }
        data_type = storage.as_ref();
    }

    let dictionary = if let DataType::Dictionary(index_type, _, is_ordered) = data_type {
        Some(Box::new(ipc::DictionaryEncoding {
            id: mapper.get_field_id(pos.path())?,
            index_type: Some(Box::new(serialize_integer(*index_type))),
            is_ordered: *is_ordered,
            dictionary_kind: ipc::DictionaryKind::DenseArray,
        }))
    } else {
        None
    };

    let children = data_type
        .children()
        .iter()
        .enumerate()
        .map(|(i, child)| serialize_field(child, &pos.child(i), mapper))
        .collect::<QuiverResult<Vec<_>>>()?;

    Ok(ipc::Field {
        name: Some(field.name.clone()),
        nullable: field.nullable,
        type_: Some(serialize_type(data_type)),
        dictionary,
        children: Some(children),
        custom_metadata: serialize_metadata(metadata.as_ref()),
    })
}

/// Build the flatbuffer schema table. Public so the file footer, which
/// embeds a schema directly, can reuse it.
pub fn serialize_schema(
    schema: &Schema,
    mapper: &DictionaryFieldMapper,
) -> QuiverResult<ipc::Schema> {
    let root = FieldPosition::new();
    let fields = schema
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| serialize_field(field, &root.child(i), mapper))
        .collect::<QuiverResult<Vec<_>>>()?;
    Ok(ipc::Schema {
        endianness: ipc::Endianness::Little,
        fields: Some(fields),
        custom_metadata: serialize_metadata(schema.metadata.as_ref()),
        features: None,
    })
}

fn finish_message(message: &ipc::Message) -> Bytes {
    let mut builder = Builder::new();
    Bytes::from(builder.finish(message, None).to_vec())
}

/// Schema message metadata (body length zero).
pub fn schema_message_bytes(
    schema: &Schema,
    mapper: &DictionaryFieldMapper,
    version: MetadataVersion,
) -> QuiverResult<Bytes> {
    let message = ipc::Message {
        version: fb_version(version),
        header: Some(ipc::MessageHeader::Schema(Box::new(serialize_schema(
            schema, mapper,
        )?))),
        body_length: 0,
        custom_metadata: None,
    };
    Ok(finish_message(&message))
}

fn serialize_batch_header(
    header: &RecordBatchHeader,
) -> ipc::RecordBatch {
    ipc::RecordBatch {
        length: header.length,
        nodes: Some(
            header
                .nodes
                .iter()
                .map(|n| ipc::FieldNode {
                    length: n.length,
                    null_count: n.null_count,
                })
                .collect(),
        ),
        buffers: Some(
            header
                .buffers
                .iter()
                .map(|b| ipc::Buffer {
                    offset: b.offset,
                    length: b.length,
                })
                .collect(),
        ),
        compression: header.compression.map(|kind| {
            Box::new(ipc::BodyCompression {
                codec: match kind {
                    CompressionKind::Lz4Frame => ipc::CompressionType::Lz4Frame,
                    CompressionKind::Zstd => ipc::CompressionType::Zstd,
                },
                method: ipc::BodyCompressionMethod::Buffer,
            })
        }),
    }
}

/// Record batch message metadata.
pub fn record_batch_message_bytes(
    header: &RecordBatchHeader,
    body_length: i64,
    version: MetadataVersion,
    custom_metadata: Option<&Metadata>,
) -> Bytes {
    let message = ipc::Message {
        version: fb_version(version),
        header: Some(ipc::MessageHeader::RecordBatch(Box::new(
            serialize_batch_header(header),
        ))),
        body_length,
        custom_metadata: serialize_metadata(custom_metadata),
    };
    finish_message(&message)
}

/// Dictionary batch message metadata.
pub fn dictionary_batch_message_bytes(
    id: i64,
    is_delta: bool,
    data: &RecordBatchHeader,
    body_length: i64,
    version: MetadataVersion,
) -> Bytes {
    let message = ipc::Message {
        version: fb_version(version),
        header: Some(ipc::MessageHeader::DictionaryBatch(Box::new(
            ipc::DictionaryBatch {
                id,
                data: Some(Box::new(serialize_batch_header(data))),
                is_delta,
            },
        ))),
        body_length,
        custom_metadata: None,
    };
    finish_message(&message)
}

/// An arbitrary record-batch-shaped message used by tests and splicing
/// tools to re-frame existing metadata with fresh custom metadata.
pub fn empty_record_batch_message_bytes(
    version: MetadataVersion,
    custom_metadata: Option<&Metadata>,
) -> Bytes {
    record_batch_message_bytes(
        &RecordBatchHeader {
            length: 0,
            nodes: vec![],
            buffers: vec![],
            compression: None,
        },
        0,
        version,
        custom_metadata,
    )
}
