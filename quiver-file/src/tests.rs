//! Round-trip and invariant tests shared across the three container
//! backends: the file format, the blocking stream reader, and the
//! incremental push decoder.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use quiver_array::{ArrayData, RecordBatch, SchemaRef};
use quiver_error::QuiverResult;
use quiver_io::InstrumentedReadAt;
use quiver_ipc::{
    CollectListener, CompressionKind, IpcPayload, IpcReadOptions, IpcWriteOptions, MessageReader,
    MetadataVersion, ReadStats, StreamDecoder, StreamReader, StreamWriter, WriteStats,
    get_record_batch_size, write_ipc_payload,
};
use quiver_schema::{DataType, Field, Metadata, Schema, TimeUnit};

use crate::{AsyncFileReader, FileReader, FileWriter};

// ---------------------------------------------------------------------
// Backends

trait RoundTripBackend {
    fn name(&self) -> &'static str;

    fn write(
        &self,
        schema: SchemaRef,
        batches: &[RecordBatch],
        options: IpcWriteOptions,
        as_table: bool,
    ) -> QuiverResult<(Vec<u8>, WriteStats)>;

    fn read(
        &self,
        bytes: &[u8],
        options: IpcReadOptions,
    ) -> QuiverResult<(SchemaRef, Vec<RecordBatch>, ReadStats)>;
}

struct FileBackend;
struct StreamBackend;
struct DecoderBackend;

impl RoundTripBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn write(
        &self,
        schema: SchemaRef,
        batches: &[RecordBatch],
        options: IpcWriteOptions,
        as_table: bool,
    ) -> QuiverResult<(Vec<u8>, WriteStats)> {
        let mut writer = FileWriter::try_new(Vec::new(), schema, options)?;
        if as_table {
            writer.write_table(batches)?;
        } else {
            for batch in batches {
                writer.write_batch(batch)?;
            }
        }
        writer.finish()?;
        let stats = writer.stats();
        Ok((writer.into_inner(), stats))
    }

    fn read(
        &self,
        bytes: &[u8],
        options: IpcReadOptions,
    ) -> QuiverResult<(SchemaRef, Vec<RecordBatch>, ReadStats)> {
        let mut reader = FileReader::try_new(Bytes::copy_from_slice(bytes), options)?;
        let mut batches = Vec::new();
        for i in 0..reader.num_record_batches() {
            batches.push(reader.read_record_batch(i)?);
        }
        Ok((reader.schema().clone(), batches, reader.stats()))
    }
}

impl RoundTripBackend for StreamBackend {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn write(
        &self,
        schema: SchemaRef,
        batches: &[RecordBatch],
        options: IpcWriteOptions,
        as_table: bool,
    ) -> QuiverResult<(Vec<u8>, WriteStats)> {
        let mut writer = StreamWriter::try_new(Vec::new(), schema, options)?;
        if as_table {
            writer.write_table(batches)?;
        } else {
            for batch in batches {
                writer.write_batch(batch)?;
            }
        }
        writer.finish()?;
        let stats = writer.stats();
        Ok((writer.into_inner(), stats))
    }

    fn read(
        &self,
        bytes: &[u8],
        options: IpcReadOptions,
    ) -> QuiverResult<(SchemaRef, Vec<RecordBatch>, ReadStats)> {
        let mut reader = StreamReader::try_new(bytes, options)?;
        let mut batches = Vec::new();
        while let Some(batch) = reader.read_next()? {
            batches.push(batch);
        }
        Ok((reader.schema().clone(), batches, reader.stats()))
    }
}

impl RoundTripBackend for DecoderBackend {
    fn name(&self) -> &'static str {
        "decoder"
    }

    fn write(
        &self,
        schema: SchemaRef,
        batches: &[RecordBatch],
        options: IpcWriteOptions,
        as_table: bool,
    ) -> QuiverResult<(Vec<u8>, WriteStats)> {
        StreamBackend.write(schema, batches, options, as_table)
    }

    fn read(
        &self,
        bytes: &[u8],
        options: IpcReadOptions,
    ) -> QuiverResult<(SchemaRef, Vec<RecordBatch>, ReadStats)> {
        // Feed in deliberately awkward chunk sizes; results must not
        // depend on chunking.
        let mut decoder = StreamDecoder::new(CollectListener::default(), options);
        for chunk in bytes.chunks(13) {
            decoder.consume(chunk)?;
        }
        decoder.finish()?;
        let stats = decoder.stats();
        let schema = decoder
            .schema()
            .cloned()
            .unwrap_or_else(|| Arc::new(Schema::new(vec![])));
        let listener = decoder.into_listener();
        Ok((schema, listener.batches, stats))
    }
}

fn backends() -> Vec<Box<dyn RoundTripBackend>> {
    vec![Box::new(FileBackend), Box::new(StreamBackend), Box::new(DecoderBackend)]
}

fn assert_round_trip_with(
    batches: &[RecordBatch],
    write_options: &IpcWriteOptions,
    read_options: &IpcReadOptions,
) {
    let schema = batches[0].schema().clone();
    for backend in backends() {
        let (bytes, write_stats) = backend
            .write(schema.clone(), batches, write_options.clone(), false)
            .unwrap();
        let (_, read, read_stats) = backend.read(&bytes, read_options.clone()).unwrap();
        assert_eq!(read.len(), batches.len(), "backend {}", backend.name());
        for (a, b) in read.iter().zip(batches) {
            assert_eq!(a, b, "backend {}", backend.name());
        }
        assert!(
            read_stats.matches(&write_stats),
            "backend {}: read stats {:#?} do not match write stats {:#?}",
            backend.name(),
            read_stats,
            write_stats
        );
    }
}

fn assert_round_trip(batches: &[RecordBatch]) {
    assert_round_trip_with(batches, &IpcWriteOptions::default(), &IpcReadOptions::default());
}

// ---------------------------------------------------------------------
// Batch fixtures

fn single(name: &str, column: ArrayData) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new(
        name,
        column.data_type().clone(),
        true,
    )]));
    RecordBatch::try_new(schema, vec![column]).unwrap()
}

fn dictionary_column(keys: Vec<Option<i8>>, values: &[&str]) -> ArrayData {
    ArrayData::try_dictionary(ArrayData::from_options(keys), ArrayData::utf8(values.iter().copied()), false)
        .unwrap()
}

fn supported_type_batches() -> Vec<(&'static str, RecordBatch)> {
    let mut cases: Vec<(&'static str, RecordBatch)> = vec![
        (
            "int32",
            single("f0", ArrayData::from_options(vec![Some(1i32), None, Some(-3), Some(4)])),
        ),
        ("uint64", single("f0", ArrayData::from_vec(vec![u64::MAX, 0, 7]))),
        (
            "float64",
            single("f0", ArrayData::from_options(vec![Some(1.5f64), None, Some(-0.25)])),
        ),
        (
            "float16",
            single(
                "f0",
                ArrayData::from_vec(vec![0x3c00u16, 0x4000, 0x0000])
                    .try_with_data_type(DataType::Float16)
                    .unwrap(),
            ),
        ),
        (
            "boolean",
            single(
                "f0",
                ArrayData::boolean_from_options(&[Some(true), None, Some(false), Some(true)]),
            ),
        ),
        ("null", single("f0", ArrayData::null_array(5))),
        (
            "utf8",
            single("f0", ArrayData::utf8_from_options(&[Some("foo"), None, Some(""), Some("quiver")])),
        ),
        ("large_utf8", single("f0", ArrayData::large_utf8(["a", "bb", "ccc"]))),
        (
            "binary",
            single(
                "f0",
                ArrayData::binary(&[Some(b"\x00\x01".as_ref()), None, Some(b"".as_ref())]),
            ),
        ),
        (
            "fixed_size_binary",
            single(
                "f0",
                ArrayData::try_fixed_size_binary(3, &[Some(b"abc".as_ref()), None, Some(b"xyz".as_ref())])
                    .unwrap(),
            ),
        ),
        (
            "decimal128",
            single(
                "f0",
                ArrayData::try_decimal(12, 3, vec![123456i128, -789, 0]).unwrap(),
            ),
        ),
        (
            "date32",
            single(
                "f0",
                ArrayData::from_vec(vec![0i32, 19000, -365])
                    .try_with_data_type(DataType::Date32)
                    .unwrap(),
            ),
        ),
        (
            "timestamp_tz",
            single(
                "f0",
                ArrayData::from_vec(vec![0i64, 1_600_000_000_000i64])
                    .try_with_data_type(DataType::Timestamp(
                        TimeUnit::Millisecond,
                        Some("UTC".to_string()),
                    ))
                    .unwrap(),
            ),
        ),
        (
            "duration",
            single(
                "f0",
                ArrayData::from_vec(vec![10i64, -20])
                    .try_with_data_type(DataType::Duration(TimeUnit::Nanosecond))
                    .unwrap(),
            ),
        ),
        (
            "interval_year_month",
            single(
                "f0",
                ArrayData::from_vec(vec![12i32, -1])
                    .try_with_data_type(DataType::Interval(
                        quiver_schema::IntervalUnit::YearMonth,
                    ))
                    .unwrap(),
            ),
        ),
    ];

    // decimal256: 32-byte little-endian values assembled by hand.
    let mut wide = vec![0u8; 64];
    wide[0] = 42;
    wide[32] = 7;
    cases.push((
        "decimal256",
        single(
            "f0",
            ArrayData::try_new(
                DataType::Decimal256(40, 2),
                2,
                None,
                vec![Bytes::from(wide)],
                vec![],
                None,
            )
            .unwrap(),
        ),
    ));

    let ints = ArrayData::from_vec(vec![1i32, 2, 3, 4, 5, 6]);
    cases.push((
        "list",
        single(
            "f0",
            ArrayData::try_list(
                Field::new("item", DataType::Int32, true),
                vec![0, 2, 2, 5, 6],
                ints.clone(),
                Some(&[true, false, true, true]),
            )
            .unwrap(),
        ),
    ));

    cases.push((
        "large_list",
        single(
            "f0",
            ArrayData::try_large_list(
                Field::new("item", DataType::Utf8, true),
                vec![0, 1, 3],
                ArrayData::utf8(["x", "y", "z"]),
                None,
            )
            .unwrap(),
        ),
    ));

    cases.push((
        "fixed_size_list",
        single(
            "f0",
            ArrayData::try_fixed_size_list(
                Field::new("item", DataType::Int32, true),
                2,
                ints.clone(),
                Some(&[true, true, false]),
            )
            .unwrap(),
        ),
    ));

    cases.push((
        "struct",
        single(
            "f0",
            ArrayData::try_struct(
                vec![
                    Field::new("a", DataType::Int32, true),
                    Field::new("b", DataType::Utf8, true),
                ],
                vec![
                    ArrayData::from_options(vec![Some(1i32), None, Some(3)]),
                    ArrayData::utf8(["x", "y", "z"]),
                ],
                Some(&[true, true, false]),
            )
            .unwrap(),
        ),
    ));

    cases.push((
        "sparse_union",
        single(
            "f0",
            ArrayData::try_sparse_union(
                vec![
                    Field::new("i", DataType::Int32, true),
                    Field::new("f", DataType::Float64, true),
                ],
                None,
                vec![0, 1, 0],
                vec![
                    ArrayData::from_vec(vec![1i32, 2, 3]),
                    ArrayData::from_vec(vec![1.5f64, 2.5, 3.5]),
                ],
            )
            .unwrap(),
        ),
    ));

    cases.push((
        "dense_union",
        single(
            "f0",
            ArrayData::try_dense_union(
                vec![
                    Field::new("i", DataType::Int32, true),
                    Field::new("f", DataType::Float64, true),
                ],
                Some(vec![0, 1]),
                vec![0, 1, 0, 0],
                vec![0, 0, 1, 2],
                vec![
                    ArrayData::from_vec(vec![10i32, 20, 30]),
                    ArrayData::from_vec(vec![0.5f64]),
                ],
            )
            .unwrap(),
        ),
    ));

    let entries = ArrayData::try_struct(
        vec![
            Field::new("key", DataType::Utf8, false),
            Field::new("value", DataType::Int32, true),
        ],
        vec![
            ArrayData::utf8(["a", "b", "c"]),
            ArrayData::from_options(vec![Some(1i32), None, Some(3)]),
        ],
        None,
    )
    .unwrap();
    cases.push((
        "map",
        single(
            "f0",
            ArrayData::try_map(
                Field::new("entries", entries.data_type().clone(), false),
                vec![0, 2, 3],
                entries,
                false,
                Some(&[true, true]),
            )
            .unwrap(),
        ),
    ));

    cases.push((
        "dictionary",
        single(
            "f0",
            dictionary_column(vec![Some(0), Some(1), None, Some(0)], &["foo", "bar"]),
        ),
    ));

    // A dictionary whose values are lists of another dictionary.
    let inner = dictionary_column(vec![Some(0), Some(1), Some(0)], &["x", "y"]);
    let values = ArrayData::try_list(
        Field::new("item", inner.data_type().clone(), true),
        vec![0, 2, 3],
        inner,
        None,
    )
    .unwrap();
    let outer = ArrayData::try_dictionary(
        ArrayData::from_vec(vec![0i32, 1, 0, 1]),
        values,
        false,
    )
    .unwrap();
    cases.push(("nested_dictionary", single("f0", outer)));

    cases.push((
        "extension",
        single(
            "f0",
            ArrayData::extension(
                "uuid",
                Some("{}".to_string()),
                ArrayData::try_fixed_size_binary(
                    16,
                    &[Some([7u8; 16].as_ref()), Some([9u8; 16].as_ref())],
                )
                .unwrap(),
            ),
        ),
    ));

    cases
}

// ---------------------------------------------------------------------
// Round trips

#[test]
fn round_trip_every_supported_type() {
    for (name, batch) in supported_type_batches() {
        for backend in backends() {
            let (bytes, _) = backend
                .write(
                    batch.schema().clone(),
                    std::slice::from_ref(&batch),
                    IpcWriteOptions::default(),
                    false,
                )
                .unwrap_or_else(|e| panic!("{name}: write failed on {}: {e}", backend.name()));
            let (_, read, _) = backend
                .read(&bytes, IpcReadOptions::default())
                .unwrap_or_else(|e| panic!("{name}: read failed on {}: {e}", backend.name()));
            assert_eq!(read.len(), 1, "{name} on {}", backend.name());
            assert_eq!(read[0], batch, "{name} on {}", backend.name());
        }
    }
}

#[test]
fn round_trip_zero_length_batches() {
    for (name, batch) in supported_type_batches() {
        if matches!(
            batch.column(0).data_type().storage_type(),
            DataType::Union(..)
        ) {
            // Zero-row unions of non-empty children rely on child pruning;
            // covered by the slice tests below.
            continue;
        }
        let empty = batch.slice(0, 0);
        for backend in backends() {
            let (bytes, _) = backend
                .write(
                    empty.schema().clone(),
                    std::slice::from_ref(&empty),
                    IpcWriteOptions::default(),
                    false,
                )
                .unwrap();
            let (_, read, _) = backend.read(&bytes, IpcReadOptions::default()).unwrap();
            assert_eq!(read[0].num_rows(), 0, "{name} on {}", backend.name());
            assert_eq!(read[0], empty, "{name} on {}", backend.name());
        }
    }
}

#[test]
fn round_trip_at_each_version_and_envelope() {
    let batch = single(
        "f0",
        ArrayData::from_options(vec![Some(1i32), None, Some(3)]),
    );
    let option_sets = vec![
        IpcWriteOptions::default(),
        IpcWriteOptions::default().with_metadata_version(MetadataVersion::V4),
        IpcWriteOptions::default()
            .with_metadata_version(MetadataVersion::V4)
            .try_with_legacy_format(true)
            .unwrap(),
        IpcWriteOptions::default().try_with_alignment(64).unwrap(),
    ];
    for options in option_sets {
        assert_round_trip_with(
            std::slice::from_ref(&batch),
            &options,
            &IpcReadOptions::default(),
        );
    }
}

#[test]
fn round_trip_compressed_bodies() {
    let batch = single(
        "f0",
        ArrayData::utf8((0..300).map(|i| format!("value-{}", i % 10))),
    );
    for kind in [CompressionKind::Lz4Frame, CompressionKind::Zstd] {
        let options = IpcWriteOptions::default()
            .try_with_compression(Some(kind))
            .unwrap();
        assert_round_trip_with(
            std::slice::from_ref(&batch),
            &options,
            &IpcReadOptions::default(),
        );
    }
}

#[test]
fn multiple_batches_round_trip() {
    let make = |start: i32| {
        single(
            "f0",
            ArrayData::from_vec((start..start + 5).collect::<Vec<i32>>()),
        )
    };
    let batches = vec![make(0), make(5), make(10)];
    assert_round_trip(&batches);
}

// ---------------------------------------------------------------------
// Slice truncation

#[test]
fn slices_serialize_truncated() {
    let columns: Vec<(&str, ArrayData)> = vec![
        ("int32", ArrayData::from_vec((0..500).collect::<Vec<i32>>())),
        (
            "utf8",
            ArrayData::utf8((0..500).map(|i| format!("value-{i}"))),
        ),
        ("boolean", ArrayData::booleans(&vec![true; 10_000])),
        (
            "list",
            ArrayData::try_list(
                Field::new("item", DataType::Int32, true),
                (0..=200).map(|i| i * 2).collect(),
                ArrayData::from_vec((0..400).collect::<Vec<i32>>()),
                None,
            )
            .unwrap(),
        ),
        (
            "struct",
            ArrayData::try_struct(
                vec![Field::new("a", DataType::Int32, true)],
                vec![ArrayData::from_vec((0..500).collect::<Vec<i32>>())],
                None,
            )
            .unwrap(),
        ),
        (
            "sparse_union",
            ArrayData::try_sparse_union(
                vec![Field::new("a", DataType::Int32, true)],
                None,
                vec![0; 500],
                vec![ArrayData::from_vec((0..500).collect::<Vec<i32>>())],
            )
            .unwrap(),
        ),
        (
            "dense_union",
            ArrayData::try_dense_union(
                vec![Field::new("a", DataType::Int32, true)],
                None,
                vec![0; 500],
                (0..500).collect(),
                vec![ArrayData::from_vec((0..500).collect::<Vec<i32>>())],
            )
            .unwrap(),
        ),
    ];

    let options = IpcWriteOptions::default();
    for (name, column) in columns {
        let batch = single("f0", column);
        let sliced = batch.slice(0, 5);
        let full_size = get_record_batch_size(&batch, &options).unwrap();
        let sliced_size = get_record_batch_size(&sliced, &options).unwrap();
        assert!(
            sliced_size < full_size,
            "{name}: {sliced_size} vs {full_size}"
        );
        assert_round_trip(std::slice::from_ref(&sliced));
    }
}

#[test]
fn slice_truncates_binary_offsets() {
    let batch = single("f0", ArrayData::utf8((0..500).map(|i| format!("value-{i}"))));
    let sliced = batch.slice(0, 5);

    let (bytes, _) = StreamBackend
        .write(
            sliced.schema().clone(),
            std::slice::from_ref(&sliced),
            IpcWriteOptions::default(),
            false,
        )
        .unwrap();
    let (_, read, _) = StreamBackend.read(&bytes, IpcReadOptions::default()).unwrap();

    // The recovered offsets buffer holds exactly (len + 1) * 4 bytes.
    assert_eq!(read[0].column(0).buffers()[0].len(), 6 * size_of::<i32>());
    assert_eq!(read[0], sliced);
}

#[test]
fn mid_stream_slices_round_trip() {
    let batch = single("f0", ArrayData::utf8((0..100).map(|i| format!("value-{i}"))));
    for (offset, len) in [(3usize, 7usize), (50, 0), (99, 1)] {
        assert_round_trip(&[batch.slice(offset, len)]);
    }
}

// ---------------------------------------------------------------------
// Dictionary scenarios

fn dict_batch_with(values: &[&str]) -> RecordBatch {
    single("f0", dictionary_column(vec![Some(0), Some(1), Some(0)], values))
}

#[test]
fn unchanged_dictionaries_are_written_once() {
    let batches = vec![
        dict_batch_with(&["foo", "bar"]),
        dict_batch_with(&["foo", "bar"]),
    ];
    let (bytes, write_stats) = StreamBackend
        .write(
            batches[0].schema().clone(),
            &batches,
            IpcWriteOptions::default(),
            false,
        )
        .unwrap();
    // Schema + one dictionary + two record batches.
    assert_eq!(write_stats.num_messages, 4);
    assert_eq!(write_stats.num_dictionary_batches, 1);
    assert_eq!(write_stats.num_replaced_dictionaries, 0);
    assert_eq!(write_stats.num_dictionary_deltas, 0);

    let (_, read, read_stats) = StreamBackend.read(&bytes, IpcReadOptions::default()).unwrap();
    assert_eq!(read, batches);
    assert!(read_stats.matches(&write_stats));
}

#[test]
fn changed_dictionaries_replace_by_default() {
    let batches = vec![
        dict_batch_with(&["a0", "b0"]),
        dict_batch_with(&["a1", "b1"]),
        dict_batch_with(&["a2", "b2"]),
        dict_batch_with(&["a3", "b3"]),
    ];
    let (bytes, write_stats) = StreamBackend
        .write(
            batches[0].schema().clone(),
            &batches,
            IpcWriteOptions::default(),
            false,
        )
        .unwrap();
    assert_eq!(write_stats.num_messages, 9);
    assert_eq!(write_stats.num_dictionary_batches, 4);
    assert_eq!(write_stats.num_replaced_dictionaries, 3);
    assert_eq!(write_stats.num_dictionary_deltas, 0);

    let (_, read, read_stats) = StreamBackend.read(&bytes, IpcReadOptions::default()).unwrap();
    assert_eq!(read, batches);
    assert!(read_stats.matches(&write_stats));
}

#[test]
fn extending_dictionaries_emit_deltas_when_enabled() {
    let batches = vec![
        dict_batch_with(&["a", "b"]),
        dict_batch_with(&["a", "b", "c"]),
        dict_batch_with(&["a", "b", "c", "d"]),
        dict_batch_with(&["x", "y"]),
    ];
    let options = IpcWriteOptions::default().with_dictionary_deltas(true);
    let (bytes, write_stats) = StreamBackend
        .write(batches[0].schema().clone(), &batches, options, false)
        .unwrap();
    assert_eq!(write_stats.num_messages, 9);
    assert_eq!(write_stats.num_dictionary_batches, 4);
    assert_eq!(write_stats.num_replaced_dictionaries, 1);
    assert_eq!(write_stats.num_dictionary_deltas, 2);

    for backend in [&StreamBackend as &dyn RoundTripBackend, &DecoderBackend] {
        let (_, read, read_stats) = backend.read(&bytes, IpcReadOptions::default()).unwrap();
        assert_eq!(read, batches, "backend {}", backend.name());
        assert!(read_stats.matches(&write_stats));
    }
}

#[test]
fn file_writer_rejects_dictionary_changes() {
    let batches = vec![dict_batch_with(&["a", "b"]), dict_batch_with(&["c", "d"])];
    let mut writer = FileWriter::try_new(
        Vec::new(),
        batches[0].schema().clone(),
        IpcWriteOptions::default(),
    )
    .unwrap();
    writer.write_batch(&batches[0]).unwrap();
    let err = writer.write_batch(&batches[1]).unwrap_err();
    assert!(err.is_invalid());
}

/// Decode a dictionary column into per-row logical values.
fn decode_rows(column: &ArrayData) -> Vec<Option<Bytes>> {
    let compact = column.compact();
    let values = compact.dictionary().unwrap();
    let width = compact.data_type().fixed_byte_width().unwrap();
    (0..compact.len())
        .map(|i| {
            if !compact.is_valid(i) {
                return None;
            }
            let raw = &compact.buffers()[0][i * width..(i + 1) * width];
            let mut index = [0u8; 8];
            index[..width].copy_from_slice(raw);
            values
                .element_bytes(usize::from_le_bytes(index))
                .unwrap()
        })
        .collect()
}

#[test]
fn unified_dictionaries_preserve_rows() {
    let batches = vec![dict_batch_with(&["a", "b"]), dict_batch_with(&["c", "d"])];
    let options = IpcWriteOptions::default().with_unify_dictionaries(true);
    let (bytes, write_stats) = FileBackend
        .write(batches[0].schema().clone(), &batches, options, true)
        .unwrap();
    // Schema + one unified dictionary + two record batches.
    assert_eq!(write_stats.num_messages, 4);
    assert_eq!(write_stats.num_dictionary_batches, 1);

    let (_, read, read_stats) = FileBackend.read(&bytes, IpcReadOptions::default()).unwrap();
    assert!(read_stats.matches(&write_stats));
    for (original, recovered) in batches.iter().zip(read.iter()) {
        assert_eq!(
            decode_rows(original.column(0)),
            decode_rows(recovered.column(0))
        );
    }
}

fn three_dictionary_batch() -> RecordBatch {
    let columns = vec![
        dictionary_column(vec![Some(0), Some(1)], &["a", "b"]),
        dictionary_column(vec![Some(1), Some(0)], &["c", "d"]),
        dictionary_column(vec![Some(0), Some(0)], &["e", "f"]),
    ];
    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .enumerate()
            .map(|(i, c)| Field::new(format!("f{i}"), c.data_type().clone(), true))
            .collect(),
    ));
    RecordBatch::try_new(schema, columns).unwrap()
}

fn splice_stream(bytes: &[u8], keep: &[usize]) -> Vec<u8> {
    let mut reader = MessageReader::new(bytes);
    let mut out = Vec::new();
    let options = IpcWriteOptions::default();
    let mut index = 0usize;
    while let Some(message) = reader.read_next().unwrap() {
        if keep.contains(&index) {
            write_ipc_payload(&IpcPayload::from_message(&message), &options, &mut out).unwrap();
        }
        index += 1;
    }
    // No end-of-stream marker: the splice ends like a truncated stream.
    out
}

#[test]
fn not_enough_dictionaries_is_descriptive() {
    let batch = three_dictionary_batch();
    let (bytes, _) = StreamBackend
        .write(
            batch.schema().clone(),
            std::slice::from_ref(&batch),
            IpcWriteOptions::default(),
            false,
        )
        .unwrap();

    // Messages: 0 schema, 1-3 dictionaries, 4 record batch.
    let truncated = splice_stream(&bytes, &[0, 1]);
    let err = StreamBackend
        .read(&truncated, IpcReadOptions::default())
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("ended without reading the expected number (3) of dictionaries"),
        "{err}"
    );

    let missing_one = splice_stream(&bytes, &[0, 1, 2, 4]);
    let err = StreamBackend
        .read(&missing_one, IpcReadOptions::default())
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("did not have the expected number (3) of dictionaries at the start"),
        "{err}"
    );
}

#[test]
fn delta_for_unseen_dictionary_is_key_error() {
    let batches = vec![
        dict_batch_with(&["a", "b"]),
        dict_batch_with(&["a", "b", "c"]),
    ];
    let options = IpcWriteOptions::default().with_dictionary_deltas(true);
    let (bytes, write_stats) = StreamBackend
        .write(batches[0].schema().clone(), &batches, options, false)
        .unwrap();
    assert_eq!(write_stats.num_dictionary_deltas, 1);

    // Messages: 0 schema, 1 full dictionary, 2 batch, 3 delta, 4 batch.
    // Dropping the full dictionary leaves the delta dangling.
    let spliced = splice_stream(&bytes, &[0, 3, 4]);
    let err = StreamBackend
        .read(&spliced, IpcReadOptions::default())
        .unwrap_err();
    assert!(err.is_key_error(), "{err}");
}

// ---------------------------------------------------------------------
// Recursion limits

fn nested_list_batch(depth: usize) -> RecordBatch {
    let mut array = ArrayData::from_vec(vec![1i32]);
    for _ in 0..depth {
        let field = Field::new("item", array.data_type().clone(), true);
        array = ArrayData::try_list(field, vec![0, 1], array, None).unwrap();
    }
    single("f0", array)
}

#[test]
fn write_fails_past_default_recursion_limit() {
    let batch = nested_list_batch(257);
    let err = StreamBackend
        .write(
            batch.schema().clone(),
            std::slice::from_ref(&batch),
            IpcWriteOptions::default(),
            false,
        )
        .unwrap_err();
    assert!(err.is_invalid());
}

#[test]
fn raised_recursion_limits_round_trip() {
    for depth in [100usize, 500] {
        let batch = nested_list_batch(depth);
        let write_options = IpcWriteOptions::default().with_max_recursion_depth(depth + 1);
        let (bytes, _) = StreamBackend
            .write(
                batch.schema().clone(),
                std::slice::from_ref(&batch),
                write_options,
                false,
            )
            .unwrap();

        // An insufficient read-side limit fails...
        let err = StreamBackend
            .read(&bytes, IpcReadOptions::default())
            .unwrap_err();
        assert!(err.is_invalid());

        // ...a sufficient one recovers the data exactly.
        let read_options = IpcReadOptions::default().with_max_recursion_depth(depth + 1);
        let (_, read, _) = StreamBackend.read(&bytes, read_options).unwrap();
        assert_eq!(read[0], batch);
    }
}

// ---------------------------------------------------------------------
// Schema handling

#[test]
fn no_record_batches_round_trips() {
    let schema = Arc::new(Schema::new(vec![Field::new("f0", DataType::Int32, true)]));
    for backend in backends() {
        let (bytes, _) = backend
            .write(schema.clone(), &[], IpcWriteOptions::default(), false)
            .unwrap();
        let (read_schema, read, _) = backend.read(&bytes, IpcReadOptions::default()).unwrap();
        assert_eq!(read_schema, schema, "backend {}", backend.name());
        assert!(read.is_empty(), "backend {}", backend.name());
    }
}

#[test]
fn writers_reject_different_schemas() {
    let schema = Arc::new(Schema::new(vec![Field::new("f0", DataType::Int32, true)]));
    let batch = single("other", ArrayData::utf8(["x"]));
    for backend in backends() {
        let err = backend
            .write(
                schema.clone(),
                std::slice::from_ref(&batch),
                IpcWriteOptions::default(),
                false,
            )
            .unwrap_err();
        assert!(err.is_invalid(), "backend {}", backend.name());
    }
}

#[test]
fn field_metadata_round_trips_absent_vs_empty() {
    let annotated = Field::new("a", DataType::Int32, true)
        .with_metadata(Metadata::from([("unit", "ms")]));
    let empty = Field::new("b", DataType::Int32, true).with_metadata(Metadata::new());
    let bare = Field::new("c", DataType::Int32, true);
    let schema = Arc::new(
        Schema::new(vec![annotated, empty, bare])
            .with_metadata(Metadata::from([("origin", "tests")])),
    );
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            ArrayData::from_vec(vec![1i32]),
            ArrayData::from_vec(vec![2i32]),
            ArrayData::from_vec(vec![3i32]),
        ],
    )
    .unwrap();

    for backend in backends() {
        let (bytes, _) = backend
            .write(
                schema.clone(),
                std::slice::from_ref(&batch),
                IpcWriteOptions::default(),
                false,
            )
            .unwrap();
        let (read_schema, _, _) = backend.read(&bytes, IpcReadOptions::default()).unwrap();
        assert_eq!(read_schema, schema, "backend {}", backend.name());
        assert_eq!(
            read_schema.fields[0].metadata.as_ref().and_then(|m| m.get("unit")),
            Some("ms")
        );
        assert_eq!(read_schema.fields[1].metadata, Some(Metadata::new()));
        assert_eq!(read_schema.fields[2].metadata, None);
    }
}

// ---------------------------------------------------------------------
// File format specifics

#[test]
fn footer_metadata_round_trips() {
    let batch = single("f0", ArrayData::from_vec(vec![1i32, 2]));
    let mut writer = FileWriter::try_new(
        Vec::new(),
        batch.schema().clone(),
        IpcWriteOptions::default(),
    )
    .unwrap()
    .with_footer_metadata(Metadata::from([("created_by", "quiver-tests")]));
    writer.write_batch(&batch).unwrap();
    writer.finish().unwrap();
    let bytes = Bytes::from(writer.into_inner());

    let reader = FileReader::try_new(bytes, IpcReadOptions::default()).unwrap();
    assert_eq!(
        reader.custom_metadata().and_then(|m| m.get("created_by")),
        Some("quiver-tests")
    );

    // And absent metadata stays absent.
    let mut writer = FileWriter::try_new(
        Vec::new(),
        batch.schema().clone(),
        IpcWriteOptions::default(),
    )
    .unwrap();
    writer.write_batch(&batch).unwrap();
    writer.finish().unwrap();
    let reader =
        FileReader::try_new(Bytes::from(writer.into_inner()), IpcReadOptions::default()).unwrap();
    assert!(reader.custom_metadata().is_none());
}

#[test]
fn batches_read_out_of_order() {
    let batches: Vec<RecordBatch> = (0..4)
        .map(|i| single("f0", ArrayData::from_vec(vec![i as i32; 3])))
        .collect();
    let (bytes, _) = FileBackend
        .write(
            batches[0].schema().clone(),
            &batches,
            IpcWriteOptions::default(),
            false,
        )
        .unwrap();
    let mut reader =
        FileReader::try_new(Bytes::copy_from_slice(&bytes), IpcReadOptions::default()).unwrap();
    assert_eq!(reader.num_record_batches(), 4);
    for i in [2usize, 0, 3, 1, 2] {
        assert_eq!(reader.read_record_batch(i).unwrap(), batches[i]);
    }
    assert!(reader.read_record_batch(4).unwrap_err().is_invalid());
}

#[test]
fn malformed_files_fail_to_open() {
    for bytes in [
        Bytes::new(),
        Bytes::from_static(b"12345678"),
        Bytes::from_static(b"0123456789abcdefghij"),
    ] {
        let err = FileReader::try_new(bytes, IpcReadOptions::default()).unwrap_err();
        assert!(err.is_invalid());
    }
}

#[test]
fn files_written_to_disk_round_trip() {
    use std::io::Write as _;

    let batch = single("f0", ArrayData::utf8(["on", "disk"]));
    let (bytes, _) = FileBackend
        .write(
            batch.schema().clone(),
            std::slice::from_ref(&batch),
            IpcWriteOptions::default(),
            false,
        )
        .unwrap();

    let mut tmp = tempfile::tempfile().unwrap();
    tmp.write_all(&bytes).unwrap();
    let mut reader = FileReader::try_new(tmp, IpcReadOptions::default()).unwrap();
    assert_eq!(reader.read_record_batch(0).unwrap(), batch);
}

// ---------------------------------------------------------------------
// Field projection and read I/O

fn bool_int32_int64_batch(num_rows: usize) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("f0", DataType::Boolean, false),
        Field::new("f1", DataType::Int32, false),
        Field::new("f2", DataType::Int64, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            ArrayData::booleans(&vec![true; num_rows]),
            ArrayData::from_vec((0..num_rows as i32).collect::<Vec<_>>()),
            ArrayData::from_vec((0..num_rows as i64).collect::<Vec<_>>()),
        ],
    )
    .unwrap()
}

fn check_projected_read_ranges(
    num_rows: usize,
    included_fields: Vec<usize>,
    expected_body_read_lengths: Vec<u64>,
) {
    let batch = bool_int32_int64_batch(num_rows);
    let (bytes, _) = FileBackend
        .write(
            batch.schema().clone(),
            std::slice::from_ref(&batch),
            IpcWriteOptions::default(),
            false,
        )
        .unwrap();

    let tracked = InstrumentedReadAt::new(Bytes::copy_from_slice(&bytes));
    let num_fields = included_fields.len();
    let options = IpcReadOptions::default().with_included_fields(included_fields);
    let mut reader = FileReader::try_new(&tracked, options).unwrap();
    let read = reader.read_record_batch(0).unwrap();

    assert_eq!(read.num_rows(), num_rows);
    assert_eq!(
        read.num_columns(),
        if num_fields == 0 { 3 } else { num_fields }
    );

    // Reads: tail probe, footer, batch metadata, then only the projected
    // body ranges.
    let ranges = tracked.read_ranges();
    assert_eq!(ranges.len(), 3 + expected_body_read_lengths.len());
    assert_eq!(ranges[0].end - ranges[0].start, 10);
    let body_lengths: Vec<u64> = ranges[3..]
        .iter()
        .map(|r| r.end - r.start)
        .collect();
    assert_eq!(body_lengths, expected_body_read_lengths);
}

#[test]
fn loading_all_fields_reads_the_entire_body() {
    // 5 bools (1 byte, padded to 8) + 5 int32 (20, padded to 24) +
    // 5 int64 (40): one contiguous read.
    check_projected_read_ranges(5, vec![], vec![8 + 24 + 40]);
}

#[rstest::rstest]
#[case(vec![0], vec![1])]
#[case(vec![1], vec![20])]
#[case(vec![2], vec![40])]
fn single_field_projections_read_minimal_ranges(
    #[case] included_fields: Vec<usize>,
    #[case] expected_body_read_lengths: Vec<u64>,
) {
    check_projected_read_ranges(5, included_fields, expected_body_read_lengths);
}

#[test]
fn skipping_the_middle_field_reads_two_ranges() {
    check_projected_read_ranges(5, vec![0, 2], vec![1, 40]);
}

#[test]
fn padded_neighbors_stay_separate_reads() {
    check_projected_read_ranges(5, vec![1, 2], vec![20, 40]);
}

#[test]
fn byte_adjacent_fields_merge_into_one_read() {
    // At 64 rows the bool bitmap fills its 8-byte slot exactly, making the
    // int32 values physically adjacent: one merged read of 8 + 256 bytes.
    check_projected_read_ranges(64, vec![0, 1], vec![8 + 64 * 4]);
}

#[test]
fn projection_is_normalized_and_validated() {
    let batch = bool_int32_int64_batch(5);
    let (bytes, _) = FileBackend
        .write(
            batch.schema().clone(),
            std::slice::from_ref(&batch),
            IpcWriteOptions::default(),
            false,
        )
        .unwrap();

    // Duplicates and unsorted input normalize.
    let options = IpcReadOptions::default().with_included_fields(vec![2, 0, 0]);
    let mut reader = FileReader::try_new(Bytes::copy_from_slice(&bytes), options).unwrap();
    let read = reader.read_record_batch(0).unwrap();
    assert_eq!(read.num_columns(), 2);
    assert_eq!(read.schema().fields[0].name, "f0");
    assert_eq!(read.schema().fields[1].name, "f2");
    assert_eq!(read.column(1), batch.column(2));

    // Out-of-range indices fail at open.
    let options = IpcReadOptions::default().with_included_fields(vec![1, 3]);
    let err = FileReader::try_new(Bytes::copy_from_slice(&bytes), options).unwrap_err();
    assert!(err.is_invalid());
}

// ---------------------------------------------------------------------
// Async reader

#[test]
fn async_reader_is_reentrant_and_ordered() {
    let batches: Vec<RecordBatch> = (0..3)
        .map(|i| single("f0", ArrayData::from_vec(vec![i as i32; 4])))
        .collect();
    let (bytes, _) = FileBackend
        .write(
            batches[0].schema().clone(),
            &batches,
            IpcWriteOptions::default(),
            false,
        )
        .unwrap();
    let bytes = Bytes::from(bytes);

    futures_executor::block_on(async {
        let reader = AsyncFileReader::try_new(bytes, IpcReadOptions::default())
            .await
            .unwrap();
        assert_eq!(reader.num_record_batches(), 3);

        // Multiple outstanding reads, issued out of order.
        let (last, first) =
            futures_util::join!(reader.read_record_batch(2), reader.read_record_batch(0));
        assert_eq!(last.unwrap(), batches[2]);
        assert_eq!(first.unwrap(), batches[0]);

        // The pull-based stream completes in order and then ends.
        let collected: Vec<_> = reader
            .batch_stream()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(collected, batches);
    });
}

#[tokio::test]
async fn async_reader_supports_projection() {
    let batch = bool_int32_int64_batch(8);
    let (bytes, _) = FileBackend
        .write(
            batch.schema().clone(),
            std::slice::from_ref(&batch),
            IpcWriteOptions::default(),
            false,
        )
        .unwrap();

    let options = IpcReadOptions::default().with_included_fields(vec![0, 2]);
    let reader = AsyncFileReader::try_new(Bytes::from(bytes), options)
        .await
        .unwrap();
    let read = reader.read_record_batch(0).await.unwrap();
    assert_eq!(read.num_columns(), 2);
    assert_eq!(read.column(0), batch.column(0));
    assert_eq!(read.column(1), batch.column(2));
}
