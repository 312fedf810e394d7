//! Random access readers over the file container.
//!
//! Opening costs two reads (the tail probe and the footer); each batch
//! costs one metadata read plus its body reads. Under field projection
//! only the selected fields' buffer byte-ranges are fetched, with
//! physically adjacent ranges merged into single reads.

use std::ops::Range;

use bytes::Bytes;
use futures_util::Stream;
use quiver_array::{RecordBatch, SchemaRef};
use quiver_error::{QuiverResult, quiver_bail, quiver_err};
use quiver_io::{AsyncReadAt, ReadAt, merge_ranges, read_byte_ranges};
use quiver_ipc::convert::{self, RecordBatchHeader};
use quiver_ipc::layout::{
    ContiguousBody, PreloadedBody, decode_columns, load_dictionary_batch, subtree_counts,
};
use quiver_ipc::{
    CONTINUATION_MARKER, DictionaryUpdate, IpcReadOptions, ReadStats,
};
use quiver_schema::{Metadata, Schema};
use std::sync::Arc;

use crate::footer::{FileBlock, FileFooterData, parse_footer};
use crate::{MAGIC, MAGIC_PADDED_LENGTH};

/// Trailing `[footer length: u32 LE][magic]`.
const TAIL_LENGTH: usize = MAGIC.len() + size_of::<u32>();

fn footer_byte_range(file_end: u64, tail: &[u8]) -> QuiverResult<Range<u64>> {
    if tail[size_of::<u32>()..] != MAGIC {
        quiver_bail!(InvalidSerde: "not a quiver file: bad trailing magic");
    }
    let footer_length = u32::from_le_bytes(
        tail[..size_of::<u32>()]
            .try_into()
            .map_err(|_| quiver_err!(InvalidSerde: "malformed footer length"))?,
    ) as u64;
    let footer_end = file_end - TAIL_LENGTH as u64;
    if footer_length == 0 || footer_length > footer_end.saturating_sub(MAGIC_PADDED_LENGTH as u64)
    {
        quiver_bail!(InvalidSerde: "footer length {} out of bounds", footer_length);
    }
    Ok(footer_end - footer_length..footer_end)
}

fn check_file_size(file_end: u64) -> QuiverResult<()> {
    // Room for the leading magic and the epilogue: anything smaller cannot
    // carry magic bytes at both ends.
    if file_end < (MAGIC_PADDED_LENGTH + TAIL_LENGTH) as u64 {
        quiver_bail!(InvalidSerde: "file of {} bytes is too small to be a quiver file", file_end);
    }
    Ok(())
}

/// Strip the framing prefix off a metadata segment read from a block.
fn message_flatbuffer(metadata_segment: &Bytes) -> QuiverResult<Bytes> {
    if metadata_segment.len() < 4 {
        quiver_bail!(InvalidSerde: "message metadata segment of {} bytes is too short", metadata_segment.len());
    }
    let word = u32::from_le_bytes(
        metadata_segment[..4]
            .try_into()
            .map_err(|_| quiver_err!(InvalidSerde: "malformed message prefix"))?,
    );
    if word == CONTINUATION_MARKER {
        if metadata_segment.len() < 8 {
            quiver_bail!(InvalidSerde: "message metadata segment ends inside its prefix");
        }
        Ok(metadata_segment.slice(8..))
    } else {
        Ok(metadata_segment.slice(4..))
    }
}

fn block_metadata_range(block: &FileBlock) -> Range<u64> {
    block.offset as u64..block.offset as u64 + block.metadata_length as u64
}

fn block_body_start(block: &FileBlock) -> u64 {
    block.offset as u64 + block.metadata_length as u64
}

/// The buffer loads a projected batch read needs: global buffer index plus
/// the absolute byte range.
fn plan_projected_loads(
    header: &RecordBatchHeader,
    schema: &Schema,
    projection: &[usize],
    body_start: u64,
) -> QuiverResult<Vec<(usize, Range<u64>)>> {
    let mut loads = Vec::new();
    let mut buffer_index = 0usize;
    for (i, field) in schema.fields.iter().enumerate() {
        let (_, num_buffers) = subtree_counts(&field.data_type);
        if projection.contains(&i) {
            for j in buffer_index..buffer_index + num_buffers {
                let desc = header.buffers.get(j).ok_or_else(|| {
                    quiver_err!(InvalidSerde: "record batch metadata has too few buffers")
                })?;
                if desc.length > 0 {
                    let start = body_start + desc.offset as u64;
                    loads.push((j, start..start + desc.length as u64));
                }
            }
        }
        buffer_index += num_buffers;
    }
    if buffer_index != header.buffers.len() {
        quiver_bail!(
            InvalidSerde: "schema expects {} buffers, record batch metadata has {}",
            buffer_index,
            header.buffers.len()
        );
    }
    Ok(loads)
}

fn preloaded_body(
    header: &RecordBatchHeader,
    loads: Vec<(usize, Range<u64>)>,
    datas: Vec<Bytes>,
) -> PreloadedBody {
    let mut buffers: Vec<Option<Bytes>> = vec![None; header.buffers.len()];
    for ((index, _), bytes) in loads.into_iter().zip(datas) {
        buffers[index] = Some(bytes);
    }
    PreloadedBody {
        buffers,
        compression: header.compression,
    }
}

/// Random access over a completed file.
#[derive(Debug)]
pub struct FileReader<R> {
    source: R,
    footer: FileFooterData,
    options: IpcReadOptions,
    projection: Option<Vec<usize>>,
    projected_schema: SchemaRef,
    dictionaries_loaded: bool,
    stats: ReadStats,
}

impl<R: ReadAt> FileReader<R> {
    /// Open a file, reading only its tail probe and footer.
    pub fn try_new(source: R, options: IpcReadOptions) -> QuiverResult<Self> {
        let file_end = source.size()?;
        Self::try_new_at(source, file_end, options)
    }

    /// Open a file-format stream that ends at `file_end` within `source`.
    pub fn try_new_at(source: R, file_end: u64, options: IpcReadOptions) -> QuiverResult<Self> {
        check_file_size(file_end)?;
        let tail = source.read_at(file_end - TAIL_LENGTH as u64..file_end)?;
        let footer_bytes = source.read_at(footer_byte_range(file_end, &tail)?)?;
        let footer = parse_footer(&footer_bytes)?;

        let projection = options.normalized_projection(footer.schema.num_fields())?;
        let projected_schema = match &projection {
            Some(indices) => Arc::new(footer.schema.try_project(indices)?),
            None => footer.schema.clone(),
        };
        Ok(Self {
            source,
            footer,
            options,
            projection,
            projected_schema,
            dictionaries_loaded: false,
            stats: ReadStats {
                num_messages: 1,
                ..ReadStats::default()
            },
        })
    }

    pub fn num_record_batches(&self) -> usize {
        self.footer.record_batches.len()
    }

    /// The schema batches decode to: narrowed when a projection is set.
    pub fn schema(&self) -> &SchemaRef {
        &self.projected_schema
    }

    /// Custom key-value metadata from the footer.
    pub fn custom_metadata(&self) -> Option<&Metadata> {
        self.footer.custom_metadata.as_ref()
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    fn load_dictionaries(&mut self) -> QuiverResult<()> {
        if self.dictionaries_loaded {
            return Ok(());
        }
        for block in self.footer.dictionaries.clone() {
            let end = block_body_start(&block) + block.body_length as u64;
            let bytes = self.source.read_at(block.offset as u64..end)?;
            let metadata = message_flatbuffer(&bytes.slice(..block.metadata_length as usize))?;
            let header = convert::dictionary_batch_header(&metadata)?;
            let source = ContiguousBody {
                body: bytes.slice(block.metadata_length as usize..),
                compression: header.data.compression,
            };
            let update = load_dictionary_batch(
                &header,
                &source,
                &self.footer.mapper,
                &mut self.footer.memo,
                self.options.max_recursion_depth(),
            )?;
            self.stats.num_messages += 1;
            self.stats.num_dictionary_batches += 1;
            match update {
                DictionaryUpdate::New => {}
                DictionaryUpdate::Replaced => self.stats.num_replaced_dictionaries += 1,
                DictionaryUpdate::Delta => self.stats.num_dictionary_deltas += 1,
            }
        }
        self.dictionaries_loaded = true;
        Ok(())
    }

    /// Read batch `i`; batches may be read in any order, repeatedly.
    pub fn read_record_batch(&mut self, i: usize) -> QuiverResult<RecordBatch> {
        if i >= self.footer.record_batches.len() {
            quiver_bail!(
                "record batch index {} out of range: file has {} batches",
                i,
                self.footer.record_batches.len()
            );
        }
        self.load_dictionaries()?;

        let block = self.footer.record_batches[i];
        let segment = self.source.read_at(block_metadata_range(&block))?;
        let metadata = message_flatbuffer(&segment)?;
        let header = convert::record_batch_header(&metadata)?;
        self.stats.num_messages += 1;

        let body_start = block_body_start(&block);
        let columns = match &self.projection {
            None => {
                let body = self
                    .source
                    .read_at(body_start..body_start + block.body_length as u64)?;
                let source = ContiguousBody {
                    body,
                    compression: header.compression,
                };
                decode_columns(
                    &header,
                    &source,
                    &self.footer.schema,
                    &self.footer.mapper,
                    &self.footer.memo,
                    None,
                    self.options.max_recursion_depth(),
                )?
            }
            Some(projection) => {
                let loads =
                    plan_projected_loads(&header, &self.footer.schema, projection, body_start)?;
                let ranges: Vec<Range<u64>> = loads.iter().map(|(_, r)| r.clone()).collect();
                log::debug!(
                    "batch {}: reading {} buffer ranges ({} after merging)",
                    i,
                    ranges.len(),
                    merge_ranges(ranges.clone(), 0).len()
                );
                let datas = read_byte_ranges(&self.source, ranges, 0)?;
                let source = preloaded_body(&header, loads, datas);
                decode_columns(
                    &header,
                    &source,
                    &self.footer.schema,
                    &self.footer.mapper,
                    &self.footer.memo,
                    Some(projection.as_slice()),
                    self.options.max_recursion_depth(),
                )?
            }
        };
        self.stats.num_record_batches += 1;
        RecordBatch::try_new(self.projected_schema.clone(), columns)
    }
}

/// Non-blocking random access: positional reads return futures, multiple
/// reads may be outstanding at once, and [`AsyncFileReader::batch_stream`]
/// delivers batches in request order, ending with `None`.
pub struct AsyncFileReader<R> {
    source: R,
    footer: FileFooterData,
    options: IpcReadOptions,
    projection: Option<Vec<usize>>,
    projected_schema: SchemaRef,
}

impl<R: AsyncReadAt> AsyncFileReader<R> {
    /// Open a file and load its dictionaries up front, so later batch
    /// reads share nothing mutable.
    pub async fn try_new(source: R, options: IpcReadOptions) -> QuiverResult<Self> {
        let file_end = source.size_async().await?;
        check_file_size(file_end)?;
        let tail = source
            .read_at_async(file_end - TAIL_LENGTH as u64..file_end)
            .await?;
        let footer_bytes = source.read_at_async(footer_byte_range(file_end, &tail)?).await?;
        let mut footer = parse_footer(&footer_bytes)?;

        for block in footer.dictionaries.clone() {
            let end = block_body_start(&block) + block.body_length as u64;
            let bytes = source.read_at_async(block.offset as u64..end).await?;
            let metadata = message_flatbuffer(&bytes.slice(..block.metadata_length as usize))?;
            let header = convert::dictionary_batch_header(&metadata)?;
            let body = ContiguousBody {
                body: bytes.slice(block.metadata_length as usize..),
                compression: header.data.compression,
            };
            load_dictionary_batch(
                &header,
                &body,
                &footer.mapper,
                &mut footer.memo,
                options.max_recursion_depth(),
            )?;
        }

        let projection = options.normalized_projection(footer.schema.num_fields())?;
        let projected_schema = match &projection {
            Some(indices) => Arc::new(footer.schema.try_project(indices)?),
            None => footer.schema.clone(),
        };
        Ok(Self {
            source,
            footer,
            options,
            projection,
            projected_schema,
        })
    }

    pub fn num_record_batches(&self) -> usize {
        self.footer.record_batches.len()
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.projected_schema
    }

    pub fn custom_metadata(&self) -> Option<&Metadata> {
        self.footer.custom_metadata.as_ref()
    }

    /// Read batch `i`. Takes `&self`: any number of reads may be in
    /// flight concurrently.
    pub async fn read_record_batch(&self, i: usize) -> QuiverResult<RecordBatch> {
        if i >= self.footer.record_batches.len() {
            quiver_bail!(
                "record batch index {} out of range: file has {} batches",
                i,
                self.footer.record_batches.len()
            );
        }
        let block = self.footer.record_batches[i];
        let segment = self.source.read_at_async(block_metadata_range(&block)).await?;
        let metadata = message_flatbuffer(&segment)?;
        let header = convert::record_batch_header(&metadata)?;

        let body_start = block_body_start(&block);
        let columns = match &self.projection {
            None => {
                let body = self
                    .source
                    .read_at_async(body_start..body_start + block.body_length as u64)
                    .await?;
                let source = ContiguousBody {
                    body,
                    compression: header.compression,
                };
                decode_columns(
                    &header,
                    &source,
                    &self.footer.schema,
                    &self.footer.mapper,
                    &self.footer.memo,
                    None,
                    self.options.max_recursion_depth(),
                )?
            }
            Some(projection) => {
                let loads =
                    plan_projected_loads(&header, &self.footer.schema, projection, body_start)?;
                let ranges: Vec<Range<u64>> = loads.iter().map(|(_, r)| r.clone()).collect();
                let merged = merge_ranges(ranges.clone(), 0);
                let mut merged_datas = Vec::with_capacity(merged.len());
                for range in &merged {
                    merged_datas.push(self.source.read_at_async(range.clone()).await?);
                }
                let mut datas = Vec::with_capacity(ranges.len());
                for range in &ranges {
                    let idx = merged.partition_point(|mr| mr.start <= range.start) - 1;
                    let base = merged[idx].start;
                    let bytes = &merged_datas[idx];
                    datas.push(
                        bytes.slice((range.start - base) as usize..(range.end - base) as usize),
                    );
                }
                let source = preloaded_body(&header, loads, datas);
                decode_columns(
                    &header,
                    &source,
                    &self.footer.schema,
                    &self.footer.mapper,
                    &self.footer.memo,
                    Some(projection.as_slice()),
                    self.options.max_recursion_depth(),
                )?
            }
        };
        RecordBatch::try_new(self.projected_schema.clone(), columns)
    }

    /// A pull-based, in-order stream of all batches; the stream ends after
    /// the last batch.
    pub fn batch_stream(&self) -> impl Stream<Item = QuiverResult<RecordBatch>> + '_ {
        futures_util::stream::try_unfold(0usize, move |i| async move {
            if i >= self.num_record_batches() {
                return Ok(None);
            }
            let batch = self.read_record_batch(i).await?;
            Ok(Some((batch, i + 1)))
        })
    }
}
