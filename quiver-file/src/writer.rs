//! The file writer: a standard message stream bracketed by magic bytes,
//! with every record batch's location recorded for the footer.

use std::io::Write;

use quiver_array::{RecordBatch, SchemaRef};
use quiver_error::{QuiverResult, quiver_bail};
use quiver_ipc::dictionary::DictionaryFieldMapper;
use quiver_ipc::{
    DictionaryWriter, IpcPayloadWriter, IpcWriteOptions, WriteStats, check_batch_schema,
    record_batch_payload, schema_payload, unify_table_dictionaries,
};
use quiver_schema::Metadata;

use crate::footer::{FileBlock, serialize_footer};
use crate::{MAGIC, MAGIC_PADDED_LENGTH};

/// Writes the random-access file format.
///
/// The footer pins one schema and one dictionary set for the whole file, so
/// any dictionary change between batches is rejected at the offending
/// batch; tables with varying dictionaries must go through
/// `unify_dictionaries`.
pub struct FileWriter<W: Write> {
    writer: IpcPayloadWriter<W>,
    schema: SchemaRef,
    dictionaries: DictionaryWriter,
    dictionary_blocks: Vec<FileBlock>,
    record_blocks: Vec<FileBlock>,
    custom_metadata: Option<Metadata>,
    stats: WriteStats,
    finished: bool,
}

impl<W: Write> FileWriter<W> {
    /// Start a file: leading magic, then the schema message.
    pub fn try_new(sink: W, schema: SchemaRef, options: IpcWriteOptions) -> QuiverResult<Self> {
        let mapper = DictionaryFieldMapper::from_schema(&schema);
        let mut writer = IpcPayloadWriter::new(sink, options);
        writer.write_raw(&MAGIC)?;
        writer.write_raw(&[0u8; MAGIC_PADDED_LENGTH - MAGIC.len()])?;
        let payload = schema_payload(&schema, &mapper, writer.options())?;
        writer.write_payload(&payload)?;
        let dictionaries = DictionaryWriter::new(mapper, writer.options(), true);
        Ok(Self {
            writer,
            schema,
            dictionaries,
            dictionary_blocks: Vec::new(),
            record_blocks: Vec::new(),
            custom_metadata: None,
            stats: WriteStats {
                num_messages: 1,
                ..WriteStats::default()
            },
            finished: false,
        })
    }

    /// Attach custom key-value metadata to the footer.
    pub fn with_footer_metadata(mut self, metadata: Metadata) -> Self {
        self.custom_metadata = Some(metadata);
        self
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> QuiverResult<()> {
        if self.finished {
            quiver_bail!("file writer is already finished");
        }
        check_batch_schema(&self.schema, batch)?;
        let dictionary_locations =
            self.dictionaries
                .write_batch_dictionaries(batch, &mut self.writer, &mut self.stats)?;
        self.dictionary_blocks
            .extend(dictionary_locations.into_iter().map(FileBlock::from));

        let payload = record_batch_payload(batch, self.writer.options())?;
        let location = self.writer.write_payload(&payload)?;
        self.record_blocks.push(FileBlock::from(location));
        self.stats.num_messages += 1;
        self.stats.num_record_batches += 1;
        Ok(())
    }

    /// Write a sequence of batches; with `unify_dictionaries` set, one
    /// canonical dictionary per field is computed up front so the file's
    /// fixed-dictionary constraint holds even when batches disagree.
    pub fn write_table(&mut self, batches: &[RecordBatch]) -> QuiverResult<()> {
        let batches = if self.writer.options().unify_dictionaries() {
            unify_table_dictionaries(batches, self.dictionaries.mapper())?
        } else {
            batches.to_vec()
        };
        for batch in &batches {
            self.write_batch(batch)?;
        }
        Ok(())
    }

    /// Write the end-of-stream marker, the footer and the trailing
    /// `[footer length][magic]` epilogue.
    pub fn finish(&mut self) -> QuiverResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.writer.write_eos()?;

        let footer = serialize_footer(
            &self.schema,
            self.dictionaries.mapper(),
            &self.dictionary_blocks,
            &self.record_blocks,
            self.custom_metadata.as_ref(),
            self.writer.options().metadata_version(),
        )?;
        log::debug!(
            "closing file: {} record batches, {} dictionary batches, {}-byte footer",
            self.record_blocks.len(),
            self.dictionary_blocks.len(),
            footer.len()
        );
        self.writer.write_raw(&footer)?;
        self.writer.write_raw(&(footer.len() as u32).to_le_bytes())?;
        self.writer.write_raw(&MAGIC)?;
        Ok(())
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}
