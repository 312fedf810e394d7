//! The blocking stream reader: replays dictionary state and yields fully
//! resolved record batches.

use std::io::Read;
use std::sync::Arc;

use quiver_array::{RecordBatch, SchemaRef};
use quiver_error::{QuiverResult, quiver_bail};

use crate::convert::{self, MessageKind};
use crate::dictionary::{DictionaryFieldMapper, DictionaryMemo, DictionaryUpdate};
use crate::layout::{ContiguousBody, decode_columns, load_dictionary_batch};
use crate::messages::{Message, MessageReader, reader::NextMessage};
use crate::options::IpcReadOptions;
use crate::stats::ReadStats;

/// Reads the continuous stream format: a schema message, then dictionary
/// and record batch messages until end of stream.
#[derive(Debug)]
pub struct StreamReader<R> {
    messages: MessageReader<R>,
    options: IpcReadOptions,
    schema: SchemaRef,
    projected_schema: SchemaRef,
    projection: Option<Vec<usize>>,
    mapper: DictionaryFieldMapper,
    memo: DictionaryMemo,
    stats: ReadStats,
    batches_read: usize,
    finished: bool,
}

impl<R: Read> StreamReader<R> {
    /// Open a stream: the first message must be a schema. An empty or
    /// garbled source fails here.
    pub fn try_new(reader: R, options: IpcReadOptions) -> QuiverResult<Self> {
        let mut messages = MessageReader::new(reader);
        let Some(message) = messages.read_next()? else {
            quiver_bail!(InvalidSerde: "empty IPC stream: expected a schema message");
        };
        if message.kind() != MessageKind::Schema {
            quiver_bail!(InvalidSerde: "IPC stream must begin with a schema message");
        }
        let mut memo = DictionaryMemo::new();
        let (schema, mapper) = convert::deserialize_schema_message(message.metadata(), &mut memo)?;
        let schema = Arc::new(schema);
        let projection = options.normalized_projection(schema.num_fields())?;
        let projected_schema = match &projection {
            Some(indices) => Arc::new(schema.try_project(indices)?),
            None => schema.clone(),
        };
        Ok(Self {
            messages,
            options,
            schema,
            projected_schema,
            projection,
            mapper,
            memo,
            stats: ReadStats {
                num_messages: 1,
                ..ReadStats::default()
            },
            batches_read: 0,
            finished: false,
        })
    }

    /// The schema batches decode to: narrowed when a projection is set.
    pub fn schema(&self) -> &SchemaRef {
        &self.projected_schema
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    /// The number of distinct dictionaries the schema requires before the
    /// first record batch.
    fn required_dictionaries(&self) -> usize {
        self.mapper.num_dicts()
    }

    /// The next batch, or `None` at a clean end of stream.
    pub fn read_next(&mut self) -> QuiverResult<Option<RecordBatch>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            match self.messages.read_next_detailed()? {
                NextMessage::ExplicitEos => {
                    self.finished = true;
                    return Ok(None);
                }
                NextMessage::SourceEnd => {
                    self.finished = true;
                    if self.batches_read == 0
                        && self.memo.num_loaded() < self.required_dictionaries()
                    {
                        quiver_bail!(
                            "IPC stream ended without reading the expected number ({}) of dictionaries",
                            self.required_dictionaries()
                        );
                    }
                    return Ok(None);
                }
                NextMessage::Message(message) => {
                    self.stats.num_messages += 1;
                    match message.kind() {
                        MessageKind::Schema => {
                            quiver_bail!(InvalidSerde: "unexpected second schema message in stream")
                        }
                        MessageKind::DictionaryBatch => self.read_dictionary(&message)?,
                        MessageKind::RecordBatch => {
                            if self.batches_read == 0
                                && self.memo.num_loaded() < self.required_dictionaries()
                            {
                                quiver_bail!(
                                    "IPC stream did not have the expected number ({}) of dictionaries at the start of the stream",
                                    self.required_dictionaries()
                                );
                            }
                            return self.read_batch(&message).map(Some);
                        }
                    }
                }
            }
        }
    }

    fn read_dictionary(&mut self, message: &Message) -> QuiverResult<()> {
        let header = convert::dictionary_batch_header(message.metadata())?;
        let source = ContiguousBody {
            body: message.body().clone(),
            compression: header.data.compression,
        };
        let update = load_dictionary_batch(
            &header,
            &source,
            &self.mapper,
            &mut self.memo,
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

    fn read_batch(&mut self, message: &Message) -> QuiverResult<RecordBatch> {
        let header = convert::record_batch_header(message.metadata())?;
        let source = ContiguousBody {
            body: message.body().clone(),
            compression: header.compression,
        };
        let columns = decode_columns(
            &header,
            &source,
            &self.schema,
            &self.mapper,
            &self.memo,
            self.projection.as_deref(),
            self.options.max_recursion_depth,
        )?;
        self.stats.num_record_batches += 1;
        self.batches_read += 1;
        RecordBatch::try_new(self.projected_schema.clone(), columns)
    }
}

impl<R: Read> Iterator for StreamReader<R> {
    type Item = QuiverResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
