//! The file footer: schema, record-batch location blocks and custom
//! metadata, written once after all batches so readers can seek without
//! replaying the stream.

use arrow_format::ipc;
use arrow_format::ipc::planus::{Builder, ReadAsRoot};
use bytes::Bytes;
use quiver_array::SchemaRef;
use quiver_error::{QuiverResult, quiver_bail, quiver_err};
use quiver_ipc::convert::{deserialize_schema_table, serialize_schema};
use quiver_ipc::dictionary::{DictionaryFieldMapper, DictionaryMemo};
use quiver_ipc::{MetadataVersion, PayloadLocation};
use quiver_schema::{Metadata, Schema};
use std::sync::Arc;

/// Where one framed message lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBlock {
    pub offset: i64,
    /// Length of the metadata segment, prefix and padding included.
    pub metadata_length: i32,
    pub body_length: i64,
}

impl From<PayloadLocation> for FileBlock {
    fn from(location: PayloadLocation) -> Self {
        FileBlock {
            offset: location.offset as i64,
            metadata_length: location.metadata_length as i32,
            body_length: location.body_length,
        }
    }
}

fn fb_version(version: MetadataVersion) -> ipc::MetadataVersion {
    match version {
        MetadataVersion::V4 => ipc::MetadataVersion::V4,
        MetadataVersion::V5 => ipc::MetadataVersion::V5,
    }
}

fn fb_blocks(blocks: &[FileBlock]) -> Vec<ipc::Block> {
    blocks
        .iter()
        .map(|b| ipc::Block {
            offset: b.offset,
            meta_data_length: b.metadata_length,
            body_length: b.body_length,
        })
        .collect()
}

/// Serialize the footer flatbuffer.
pub(crate) fn serialize_footer(
    schema: &Schema,
    mapper: &DictionaryFieldMapper,
    dictionaries: &[FileBlock],
    record_batches: &[FileBlock],
    custom_metadata: Option<&Metadata>,
    version: MetadataVersion,
) -> QuiverResult<Bytes> {
    let footer = ipc::Footer {
        version: fb_version(version),
        schema: Some(Box::new(serialize_schema(schema, mapper)?)),
        dictionaries: Some(fb_blocks(dictionaries)),
        record_batches: Some(fb_blocks(record_batches)),
        custom_metadata: custom_metadata.map(|md| {
            md.iter()
                .map(|(k, v)| ipc::KeyValue {
                    key: Some(k.to_string()),
                    value: Some(v.to_string()),
                })
                .collect()
        }),
    };
    let mut builder = Builder::new();
    Ok(Bytes::from(builder.finish(&footer, None).to_vec()))
}

/// Everything a reader learns from the footer.
#[derive(Debug)]
pub(crate) struct FileFooterData {
    pub schema: SchemaRef,
    pub mapper: DictionaryFieldMapper,
    /// Value types pre-registered; dictionary contents load lazily.
    pub memo: DictionaryMemo,
    pub dictionaries: Vec<FileBlock>,
    pub record_batches: Vec<FileBlock>,
    pub custom_metadata: Option<Metadata>,
}

fn read_blocks<'a>(
    blocks: Option<impl IntoIterator<Item = ipc::BlockRef<'a>>>,
) -> Vec<FileBlock> {
    blocks
        .map(|blocks| {
            blocks
                .into_iter()
                .map(|b| FileBlock {
                    offset: b.offset(),
                    metadata_length: b.meta_data_length(),
                    body_length: b.body_length(),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_footer(bytes: &[u8]) -> QuiverResult<FileFooterData> {
    let footer = ipc::FooterRef::read_as_root(bytes)
        .map_err(|e| quiver_err!(InvalidSerde: "unable to parse file footer: {}", e))?;
    match footer
        .version()
        .map_err(|e| quiver_err!(InvalidSerde: "unsupported footer version: {}", e))?
    {
        ipc::MetadataVersion::V4 | ipc::MetadataVersion::V5 => {}
        other => quiver_bail!("unsupported footer version {:?}", other),
    }
    let mut memo = DictionaryMemo::new();
    let schema = footer
        .schema()?
        .ok_or_else(|| quiver_err!(InvalidSerde: "file footer is missing its schema"))?;
    let (schema, mapper) = deserialize_schema_table(schema, &mut memo)?;
    let custom_metadata = footer.custom_metadata()?.map(read_footer_metadata).transpose()?;
    Ok(FileFooterData {
        schema: Arc::new(schema),
        mapper,
        memo,
        dictionaries: read_blocks(footer.dictionaries()?),
        record_batches: read_blocks(footer.record_batches()?),
        custom_metadata,
    })
}

fn read_footer_metadata<'a>(
    entries: impl IntoIterator<Item = Result<ipc::KeyValueRef<'a>, ipc::planus::Error>>,
) -> QuiverResult<Metadata> {
    let mut metadata = Metadata::new();
    for kv in entries {
        let kv = kv?;
        if let (Some(k), Some(v)) = (kv.key()?, kv.value()?) {
            metadata.insert(k, v);
        }
    }
    Ok(metadata)
}
