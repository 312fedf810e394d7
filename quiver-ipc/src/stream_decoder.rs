//! A push-based stream decoder for event-driven hosts.
//!
//! [`StreamDecoder::consume`] accepts arbitrarily chunked input, down to
//! one byte at a time, buffering partial frames internally; decoded output
//! is identical no matter how the bytes were split. Progress is observable
//! through [`StreamDecoder::next_required_size`], which decreases
//! monotonically as bytes are consumed within a frame.

use std::sync::Arc;

use quiver_array::{RecordBatch, SchemaRef};
use quiver_error::{QuiverResult, quiver_bail};

use crate::convert::{self, MessageKind};
use crate::dictionary::{DictionaryFieldMapper, DictionaryMemo, DictionaryUpdate};
use crate::layout::{ContiguousBody, decode_columns, load_dictionary_batch};
use crate::messages::{Message, MessageDecoder, PollDecode};
use crate::options::IpcReadOptions;
use crate::stats::ReadStats;

/// Callbacks for decoded stream items. `Consume` calls must be serialized
/// by the caller; the decoder's buffering state is not shareable.
pub trait DecoderListener {
    fn on_schema(&mut self, _schema: &SchemaRef) -> QuiverResult<()> {
        Ok(())
    }

    fn on_record_batch(&mut self, batch: RecordBatch) -> QuiverResult<()>;

    fn on_eos(&mut self) -> QuiverResult<()> {
        Ok(())
    }
}

/// A listener that simply collects everything it is handed.
#[derive(Debug, Default)]
pub struct CollectListener {
    pub schema: Option<SchemaRef>,
    pub batches: Vec<RecordBatch>,
    pub eos: bool,
}

impl DecoderListener for CollectListener {
    fn on_schema(&mut self, schema: &SchemaRef) -> QuiverResult<()> {
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn on_record_batch(&mut self, batch: RecordBatch) -> QuiverResult<()> {
        self.batches.push(batch);
        Ok(())
    }

    fn on_eos(&mut self) -> QuiverResult<()> {
        self.eos = true;
        Ok(())
    }
}

struct SchemaState {
    schema: SchemaRef,
    projected_schema: SchemaRef,
    projection: Option<Vec<usize>>,
    mapper: DictionaryFieldMapper,
    memo: DictionaryMemo,
}

/// The incremental counterpart of [`StreamReader`][crate::StreamReader],
/// with the same dictionary and field-projection semantics.
pub struct StreamDecoder<L> {
    listener: L,
    decoder: MessageDecoder,
    options: IpcReadOptions,
    state: Option<SchemaState>,
    stats: ReadStats,
    batches_read: usize,
    finished: bool,
}

impl<L: DecoderListener> StreamDecoder<L> {
    pub fn new(listener: L, options: IpcReadOptions) -> Self {
        Self {
            listener,
            decoder: MessageDecoder::new(),
            options,
            state: None,
            stats: ReadStats::default(),
            batches_read: 0,
            finished: false,
        }
    }

    /// Feed a chunk of any size, dispatching every item it completes.
    pub fn consume(&mut self, bytes: &[u8]) -> QuiverResult<()> {
        self.decoder.push(bytes);
        loop {
            match self.decoder.poll()? {
                PollDecode::NeedMore(needed) => {
                    log::trace!("stream decoder waiting for {} more bytes", needed);
                    return Ok(());
                }
                PollDecode::Eos => {
                    if !self.finished {
                        self.finished = true;
                        self.listener.on_eos()?;
                    }
                    return Ok(());
                }
                PollDecode::Message(message) => self.handle_message(message)?,
            }
        }
    }

    /// Total bytes needed before the decoder can take its next step.
    pub fn next_required_size(&self) -> usize {
        self.decoder.next_required_size()
    }

    /// Signal that the source is exhausted. Distinguishes a truncated
    /// stream from one ending in an explicit end-of-stream marker.
    pub fn finish(&mut self) -> QuiverResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.next_required_size() > 0 && self.decoder.mid_frame() {
            quiver_bail!(InvalidSerde: "stream ended inside a message frame");
        }
        if let Some(state) = &self.state {
            let required = state.mapper.num_dicts();
            if self.batches_read == 0 && state.memo.num_loaded() < required {
                quiver_bail!(
                    "IPC stream ended without reading the expected number ({}) of dictionaries",
                    required
                );
            }
        }
        self.listener.on_eos()
    }

    pub fn schema(&self) -> Option<&SchemaRef> {
        self.state.as_ref().map(|s| &s.projected_schema)
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    fn handle_message(&mut self, message: Message) -> QuiverResult<()> {
        self.stats.num_messages += 1;
        match message.kind() {
            MessageKind::Schema => {
                if self.state.is_some() {
                    quiver_bail!(InvalidSerde: "unexpected second schema message in stream");
                }
                let mut memo = DictionaryMemo::new();
                let (schema, mapper) =
                    convert::deserialize_schema_message(message.metadata(), &mut memo)?;
                let schema = Arc::new(schema);
                let projection = self.options.normalized_projection(schema.num_fields())?;
                let projected_schema = match &projection {
                    Some(indices) => Arc::new(schema.try_project(indices)?),
                    None => schema.clone(),
                };
                self.listener.on_schema(&projected_schema)?;
                self.state = Some(SchemaState {
                    schema,
                    projected_schema,
                    projection,
                    mapper,
                    memo,
                });
                Ok(())
            }
            MessageKind::DictionaryBatch => {
                let Some(state) = self.state.as_mut() else {
                    quiver_bail!(InvalidSerde: "dictionary batch arrived before the schema");
                };
                let header = convert::dictionary_batch_header(message.metadata())?;
                let source = ContiguousBody {
                    body: message.body().clone(),
                    compression: header.data.compression,
                };
                let update = load_dictionary_batch(
                    &header,
                    &source,
                    &state.mapper,
                    &mut state.memo,
                    self.options.max_recursion_depth,
                )?;
                self.stats.num_dictionary_batches += 1;
                match update {
                    DictionaryUpdate::New => {}
                    DictionaryUpdate::Replaced => self.stats.num_replaced_dictionaries += 1,
                    DictionaryUpdate::Delta => self.stats.num_dictionary_deltas += 1,
                }
                Ok(())
            }
            MessageKind::RecordBatch => {
                let Some(state) = self.state.as_ref() else {
                    quiver_bail!(InvalidSerde: "record batch arrived before the schema");
                };
                if self.batches_read == 0 && state.memo.num_loaded() < state.mapper.num_dicts() {
                    quiver_bail!(
                        "IPC stream did not have the expected number ({}) of dictionaries at the start of the stream",
                        state.mapper.num_dicts()
                    );
                }
                let header = convert::record_batch_header(message.metadata())?;
                let source = ContiguousBody {
                    body: message.body().clone(),
                    compression: header.compression,
                };
                let columns = decode_columns(
                    &header,
                    &source,
                    &state.schema,
                    &state.mapper,
                    &state.memo,
                    state.projection.as_deref(),
                    self.options.max_recursion_depth,
                )?;
                let batch = RecordBatch::try_new(state.projected_schema.clone(), columns)?;
                self.stats.num_record_batches += 1;
                self.batches_read += 1;
                self.listener.on_record_batch(batch)
            }
        }
    }
}
