//! Deserialization of schemas, batch headers and message roots.

use arrow_format::ipc;
use arrow_format::ipc::planus::ReadAsRoot;
use quiver_error::{QuiverResult, quiver_bail, quiver_err};
use quiver_schema::{
    DataType, Field, IntegerType, IntervalUnit, Metadata, Schema, TimeUnit, UnionMode,
};

use crate::compression::CompressionKind;
use crate::convert::{
    BufferDesc, DictionaryBatchHeader, EXTENSION_METADATA_KEY, EXTENSION_NAME_KEY, FieldNode,
    MessageKind, MessageParts, RecordBatchHeader,
};
use crate::dictionary::{DictionaryFieldMapper, DictionaryMemo, FieldPosition};
use crate::options::MetadataVersion;

fn read_version(message: &ipc::MessageRef) -> QuiverResult<MetadataVersion> {
    let version = message
        .version()
        .map_err(|e| quiver_err!(InvalidSerde: "unsupported metadata version: {}", e))?;
    match version {
        ipc::MetadataVersion::V4 => Ok(MetadataVersion::V4),
        ipc::MetadataVersion::V5 => Ok(MetadataVersion::V5),
        other => quiver_bail!("unsupported metadata version {:?}", other),
    }
}

fn root_message(metadata: &[u8]) -> QuiverResult<ipc::MessageRef<'_>> {
    ipc::MessageRef::read_as_root(metadata)
        .map_err(|e| quiver_err!(InvalidSerde: "unable to parse message metadata: {}", e))
}

/// Parse the kind, version and body length out of message metadata.
pub fn message_parts(metadata: &[u8]) -> QuiverResult<MessageParts> {
    let message = root_message(metadata)?;
    let version = read_version(&message)?;
    let kind = match message
        .header()?
        .ok_or_else(|| quiver_err!(InvalidSerde: "message has no header"))?
    {
        ipc::MessageHeaderRef::Schema(_) => MessageKind::Schema,
        ipc::MessageHeaderRef::RecordBatch(_) => MessageKind::RecordBatch,
        ipc::MessageHeaderRef::DictionaryBatch(_) => MessageKind::DictionaryBatch,
        other => quiver_bail!(InvalidSerde: "unsupported message header {:?}", other),
    };
    let body_length = message.body_length()?;
    if body_length < 0 {
        quiver_bail!(InvalidSerde: "negative body length {}", body_length);
    }
    Ok(MessageParts {
        kind,
        version,
        body_length,
    })
}

fn read_metadata_entries<'a>(
    list: Option<
        impl IntoIterator<Item = Result<ipc::KeyValueRef<'a>, ipc::planus::Error>>,
    >,
) -> QuiverResult<Option<Metadata>> {
    let Some(list) = list else {
        return Ok(None);
    };
    let mut metadata = Metadata::new();
    for kv in list {
        let kv = kv?;
        if let (Some(k), Some(v)) = (kv.key()?, kv.value()?) {
            metadata.insert(k, v);
        }
    }
    Ok(Some(metadata))
}

/// Message-level custom metadata, distinguishing absent from empty.
pub fn message_custom_metadata(metadata: &[u8]) -> QuiverResult<Option<Metadata>> {
    let message = root_message(metadata)?;
    read_metadata_entries(message.custom_metadata()?)
}

fn deserialize_integer(int: ipc::IntRef) -> QuiverResult<IntegerType> {
    Ok(match (int.bit_width()?, int.is_signed()?) {
        (8, true) => IntegerType::Int8,
        (8, false) => IntegerType::UInt8,
        (16, true) => IntegerType::Int16,
        (16, false) => IntegerType::UInt16,
        (32, true) => IntegerType::Int32,
        (32, false) => IntegerType::UInt32,
        (64, true) => IntegerType::Int64,
        (64, false) => IntegerType::UInt64,
        (width, _) => quiver_bail!(InvalidSerde: "invalid integer bit width {}", width),
    })
}

fn deserialize_time_unit(unit: ipc::TimeUnit) -> TimeUnit {
    match unit {
        ipc::TimeUnit::Second => TimeUnit::Second,
        ipc::TimeUnit::Millisecond => TimeUnit::Millisecond,
        ipc::TimeUnit::Microsecond => TimeUnit::Microsecond,
        ipc::TimeUnit::Nanosecond => TimeUnit::Nanosecond,
    }
}

fn deserialize_children(
    field: ipc::FieldRef,
    pos: &FieldPosition,
    mapper: &mut DictionaryFieldMapper,
    memo: &mut DictionaryMemo,
) -> QuiverResult<Vec<Field>> {
    let Some(children) = field.children()? else {
        return Ok(vec![]);
    };
    let mut out = Vec::with_capacity(children.len());
    for (i, child) in children.iter().enumerate() {
        out.push(deserialize_field(child?, &pos.child(i), mapper, memo)?);
    }
    Ok(out)
}

fn expect_one_child(mut children: Vec<Field>, what: &str) -> QuiverResult<Field> {
    if children.len() != 1 {
        quiver_bail!(InvalidSerde: "{} must have exactly one child, found {}", what, children.len());
    }
    Ok(children.remove(0))
}

#[allow(unreachable_patterns)]
fn deserialize_type(
    field: ipc::FieldRef,
    pos: &FieldPosition,
    mapper: &mut DictionaryFieldMapper,
    memo: &mut DictionaryMemo,
) -> QuiverResult<DataType> {
    let type_ = field
        .type_()?
        .ok_or_else(|| quiver_err!(InvalidSerde: "field is missing its type"))?;

    use ipc::TypeRef;
    Ok(match type_ {
        TypeRef::Null(_) => DataType::Null,
        TypeRef::Bool(_) => DataType::Boolean,
        TypeRef::Int(int) => deserialize_integer(int)?.into(),
        TypeRef::FloatingPoint(float) => match float.precision()? {
            ipc::Precision::Half => DataType::Float16,
            ipc::Precision::Single => DataType::Float32,
            ipc::Precision::Double => DataType::Float64,
        },
        TypeRef::Date(date) => match date.unit()? {
            ipc::DateUnit::Day => DataType::Date32,
            ipc::DateUnit::Millisecond => DataType::Date64,
        },
        TypeRef::Time(time) => {
            let unit = deserialize_time_unit(time.unit()?);
            match (time.bit_width()?, unit) {
                (32, TimeUnit::Second | TimeUnit::Millisecond) => DataType::Time32(unit),
                (64, TimeUnit::Microsecond | TimeUnit::Nanosecond) => DataType::Time64(unit),
                (bits, _) => {
                    quiver_bail!(InvalidSerde: "invalid time bit width {} for unit {:?}", bits, unit)
                }
            }
        }
        TypeRef::Timestamp(ts) => DataType::Timestamp(
            deserialize_time_unit(ts.unit()?),
            ts.timezone()?.map(|tz| tz.to_string()),
        ),
        TypeRef::Duration(duration) => {
            DataType::Duration(deserialize_time_unit(duration.unit()?))
        }
        TypeRef::Interval(interval) => DataType::Interval(match interval.unit()? {
            ipc::IntervalUnit::YearMonth => IntervalUnit::YearMonth,
            ipc::IntervalUnit::DayTime => IntervalUnit::DayTime,
            ipc::IntervalUnit::MonthDayNano => IntervalUnit::MonthDayNano,
        }),
        TypeRef::Decimal(decimal) => {
            let precision = usize::try_from(decimal.precision()?)
                .map_err(|_| quiver_err!(InvalidSerde: "negative decimal precision"))?;
            let scale = usize::try_from(decimal.scale()?)
                .map_err(|_| quiver_err!(InvalidSerde: "negative decimal scale"))?;
            match decimal.bit_width()? {
                128 => DataType::Decimal(precision, scale),
                256 => DataType::Decimal256(precision, scale),
                bits => quiver_bail!(InvalidSerde: "invalid decimal bit width {}", bits),
            }
        }
        TypeRef::Utf8(_) => DataType::Utf8,
        TypeRef::LargeUtf8(_) => DataType::LargeUtf8,
        TypeRef::Binary(_) => DataType::Binary,
        TypeRef::LargeBinary(_) => DataType::LargeBinary,
        TypeRef::FixedSizeBinary(fixed) => DataType::FixedSizeBinary(
            usize::try_from(fixed.byte_width()?)
                .map_err(|_| quiver_err!(InvalidSerde: "negative fixed size binary width"))?,
        ),
        TypeRef::List(_) => {
            let child = expect_one_child(deserialize_children(field, pos, mapper, memo)?, "a list")?;
            DataType::List(Box::new(child))
        }
        TypeRef::LargeList(_) => {
            let child = expect_one_child(deserialize_children(field, pos, mapper, memo)?, "a large list")?;
            DataType::LargeList(Box::new(child))
        }
        TypeRef::FixedSizeList(list) => {
            let size = usize::try_from(list.list_size()?)
                .map_err(|_| quiver_err!(InvalidSerde: "negative fixed size list size"))?;
            let child = expect_one_child(deserialize_children(field, pos, mapper, memo)?, "a fixed size list")?;
            DataType::FixedSizeList(Box::new(child), size)
        }
        TypeRef::Struct(_) => DataType::Struct(deserialize_children(field, pos, mapper, memo)?),
        TypeRef::Union(union) => {
            let mode = UnionMode::sparse(union.mode()? == ipc::UnionMode::Sparse);
            let type_ids = union.type_ids()?.map(|ids| ids.iter().collect());
            let children = deserialize_children(field, pos, mapper, memo)?;
            if children.is_empty() {
                quiver_bail!(InvalidSerde: "a union must have at least one child");
            }
            DataType::Union(children, type_ids, mode)
        }
        TypeRef::Map(map) => {
            let keys_sorted = map.keys_sorted()?;
            let entries = expect_one_child(deserialize_children(field, pos, mapper, memo)?, "a map")?;
            DataType::Map(Box::new(entries), keys_sorted)
        }
        other => quiver_bail!(InvalidSerde: "unsupported field type {:?}", other),
    })
}

fn deserialize_field(
    field: ipc::FieldRef,
    pos: &FieldPosition,
    mapper: &mut DictionaryFieldMapper,
    memo: &mut DictionaryMemo,
) -> QuiverResult<Field> {
    let name = field
        .name()?
        .ok_or_else(|| quiver_err!(InvalidSerde: "field is missing its name"))?
        .to_string();
    let nullable = field.nullable()?;
    let mut metadata = read_metadata_entries(field.custom_metadata()?)?;

    // Extension information rides on the metadata map; lift it back into
    // the type and strip the carrier keys.
    let extension = metadata.as_ref().and_then(|md| {
        md.get(EXTENSION_NAME_KEY).map(|name| {
            (
                name.to_string(),
                md.get(EXTENSION_METADATA_KEY).map(|m| m.to_string()),
            )
        })
    });
    if extension.is_some() {
        metadata = metadata.and_then(|md| {
            let remaining: Metadata = md
                .iter()
                .filter(|(k, _)| *k != EXTENSION_NAME_KEY && *k != EXTENSION_METADATA_KEY)
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            (!remaining.is_empty()).then_some(remaining)
        });
    }

    let mut data_type = deserialize_type(field, pos, mapper, memo)?;

    if let Some(encoding) = field.dictionary()? {
        let index_type = deserialize_integer(
            encoding
                .index_type()?
                .ok_or_else(|| quiver_err!(InvalidSerde: "dictionary encoding is missing its index type"))?,
        )?;
        let id = encoding.id()?;
        memo.add_dictionary_type(id, &data_type)?;
        mapper.add_field(id, pos.path().to_vec())?;
        data_type = DataType::Dictionary(index_type, Box::new(data_type), encoding.is_ordered()?);
    }

    if let Some((extension_name, extension_metadata)) = extension {
        data_type = DataType::Extension(extension_name, Box::new(data_type), extension_metadata);
    }

    Ok(Field {
        name,
        data_type,
        nullable,
        metadata,
    })
}

/// Deserialize a schema table, registering dictionary ids in `mapper` and
/// value types in `memo`. Public so the file footer can reuse it.
pub fn deserialize_schema_table(
    schema: ipc::SchemaRef,
    memo: &mut DictionaryMemo,
) -> QuiverResult<(Schema, DictionaryFieldMapper)> {
    match schema.endianness()? {
        ipc::Endianness::Little => {}
        other => quiver_bail!("unsupported schema endianness {:?}", other),
    }
    let mut mapper = DictionaryFieldMapper::new();
    let root = FieldPosition::new();
    let field_list = schema
        .fields()?
        .ok_or_else(|| quiver_err!(InvalidSerde: "schema is missing its fields"))?;
    let mut fields = Vec::with_capacity(field_list.len());
    for (i, field) in field_list.iter().enumerate() {
        fields.push(deserialize_field(field?, &root.child(i), &mut mapper, memo)?);
    }
    let metadata = read_metadata_entries(schema.custom_metadata()?)?;
    Ok((Schema { fields, metadata }, mapper))
}

/// Deserialize a schema message.
pub fn deserialize_schema_message(
    metadata: &[u8],
    memo: &mut DictionaryMemo,
) -> QuiverResult<(Schema, DictionaryFieldMapper)> {
    let message = root_message(metadata)?;
    read_version(&message)?;
    match message
        .header()?
        .ok_or_else(|| quiver_err!(InvalidSerde: "message has no header"))?
    {
        ipc::MessageHeaderRef::Schema(schema) => deserialize_schema_table(schema, memo),
        _ => quiver_bail!(InvalidSerde: "expected a schema message"),
    }
}

fn deserialize_batch_header(batch: ipc::RecordBatchRef) -> QuiverResult<RecordBatchHeader> {
    let nodes = batch
        .nodes()?
        .ok_or_else(|| quiver_err!(InvalidSerde: "record batch is missing its field nodes"))?
        .iter()
        .map(|node| FieldNode {
            length: node.length(),
            null_count: node.null_count(),
        })
        .collect();
    let buffers = batch
        .buffers()?
        .ok_or_else(|| quiver_err!(InvalidSerde: "record batch is missing its buffers"))?
        .iter()
        .map(|buffer| BufferDesc {
            offset: buffer.offset(),
            length: buffer.length(),
        })
        .collect();
    let compression = batch
        .compression()?
        .map(|c| {
            Ok::<_, quiver_error::QuiverError>(match c.codec()? {
                ipc::CompressionType::Lz4Frame => CompressionKind::Lz4Frame,
                ipc::CompressionType::Zstd => CompressionKind::Zstd,
            })
        })
        .transpose()?;
    Ok(RecordBatchHeader {
        length: batch.length()?,
        nodes,
        buffers,
        compression,
    })
}

/// Parse a record batch header out of message metadata.
pub fn record_batch_header(metadata: &[u8]) -> QuiverResult<RecordBatchHeader> {
    let message = root_message(metadata)?;
    read_version(&message)?;
    match message
        .header()?
        .ok_or_else(|| quiver_err!(InvalidSerde: "message has no header"))?
    {
        ipc::MessageHeaderRef::RecordBatch(batch) => deserialize_batch_header(batch),
        _ => quiver_bail!(InvalidSerde: "expected a record batch message"),
    }
}

/// Parse a dictionary batch header out of message metadata.
pub fn dictionary_batch_header(metadata: &[u8]) -> QuiverResult<DictionaryBatchHeader> {
    let message = root_message(metadata)?;
    read_version(&message)?;
    match message
        .header()?
        .ok_or_else(|| quiver_err!(InvalidSerde: "message has no header"))?
    {
        ipc::MessageHeaderRef::DictionaryBatch(batch) => Ok(DictionaryBatchHeader {
            id: batch.id()?,
            is_delta: batch.is_delta()?,
            data: deserialize_batch_header(
                batch
                    .data()?
                    .ok_or_else(|| quiver_err!(InvalidSerde: "dictionary batch has no data"))?,
            )?,
        }),
        _ => quiver_bail!(InvalidSerde: "expected a dictionary batch message"),
    }
}
