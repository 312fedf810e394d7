//! Dictionary identity and state tracking across a message sequence.
//!
//! Dictionaries are addressed by *field path* (the sequence of child
//! indices from the schema root) on the schema side and by numeric id on
//! the wire. The [`DictionaryFieldMapper`] owns the path→id assignment; the
//! [`DictionaryMemo`] owns per-id state as batches replay.

use std::collections::HashMap;

use itertools::Itertools;
use quiver_array::{ArrayData, RecordBatch};
use quiver_error::{QuiverResult, quiver_bail, quiver_err};
use quiver_schema::{DataType, Schema};

/// An immutable path accumulator for schema tree walks.
///
/// `child(i)` derives the position of the `i`-th child; `path()` is the key
/// used for dictionary id assignment. Purely positional, no I/O.
#[derive(Debug, Clone, Default)]
pub struct FieldPosition {
    path: Vec<usize>,
}

impl FieldPosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_path(path: Vec<usize>) -> FieldPosition {
        FieldPosition { path }
    }

    pub fn child(&self, index: usize) -> FieldPosition {
        let mut path = self.path.clone();
        path.push(index);
        FieldPosition { path }
    }

    pub fn path(&self) -> &[usize] {
        &self.path
    }
}

/// Field path → dictionary id assignment for one schema.
///
/// Built once per stream or file and read-only afterwards. Distinct paths
/// may share an id (the same dictionary used twice); one path can never
/// carry two ids.
#[derive(Debug, Clone, Default)]
pub struct DictionaryFieldMapper {
    by_path: HashMap<Vec<usize>, i64>,
}

impl DictionaryFieldMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `schema` pre-order and assign ids 0, 1, 2… at every
    /// dictionary-encoded field occurrence, descending into both container
    /// children and dictionary value types.
    pub fn from_schema(schema: &Schema) -> Self {
        let mut mapper = Self::new();
        let mut next_id = 0i64;
        let root = FieldPosition::new();
        for (i, field) in schema.fields.iter().enumerate() {
            assign_ids(&field.data_type, root.child(i), &mut mapper, &mut next_id);
        }
        mapper
    }

    pub fn add_field(&mut self, id: i64, path: Vec<usize>) -> QuiverResult<()> {
        if self.by_path.contains_key(&path) {
            quiver_bail!(KeyError: "field path {:?} already has a dictionary id", path);
        }
        self.by_path.insert(path, id);
        Ok(())
    }

    pub fn get_field_id(&self, path: &[usize]) -> QuiverResult<i64> {
        self.by_path
            .get(path)
            .copied()
            .ok_or_else(|| quiver_err!(KeyError: "no dictionary id for field path {:?}", path))
    }

    /// The number of mapped field paths.
    pub fn num_fields(&self) -> usize {
        self.by_path.len()
    }

    /// The number of distinct dictionary ids.
    pub fn num_dicts(&self) -> usize {
        self.by_path.values().unique().count()
    }

    /// Any path mapped to `id`; used to re-derive path context when
    /// decoding a dictionary batch that itself nests dictionaries.
    pub(crate) fn path_for_id(&self, id: i64) -> Option<&[usize]> {
        self.by_path
            .iter()
            .filter(|(_, v)| **v == id)
            .map(|(k, _)| k.as_slice())
            .min()
    }
}

fn assign_ids(
    data_type: &DataType,
    pos: FieldPosition,
    mapper: &mut DictionaryFieldMapper,
    next_id: &mut i64,
) {
    if data_type.is_dictionary() {
        // Paths are unique during a schema walk, so this cannot collide.
        mapper.by_path.insert(pos.path().to_vec(), *next_id);
        *next_id += 1;
    }
    for (i, child) in data_type.children().iter().enumerate() {
        assign_ids(&child.data_type, pos.child(i), mapper, next_id);
    }
}

/// Whether a dictionary *value* type nests further dictionaries. Deltas of
/// such outer dictionaries are rejected on the read path, so writers never
/// emit them.
pub(crate) fn type_contains_dictionary(data_type: &DataType) -> bool {
    data_type.is_dictionary()
        || data_type
            .children()
            .iter()
            .any(|f| type_contains_dictionary(&f.data_type))
}

/// What a dictionary batch did to the memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryUpdate {
    /// First sight of this id.
    New,
    /// Prior values were discarded wholesale.
    Replaced,
    /// Values were appended; earlier indices keep their meaning.
    Delta,
}

/// Per-id dictionary state for one reader or one write session.
#[derive(Debug, Clone, Default)]
pub struct DictionaryMemo {
    types: HashMap<i64, DataType>,
    dictionaries: HashMap<i64, ArrayData>,
}

impl DictionaryMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the value type for an id. Re-registering the same id is
    /// legal only with a structurally identical type; the same type may be
    /// registered under many ids.
    pub fn add_dictionary_type(&mut self, id: i64, value_type: &DataType) -> QuiverResult<()> {
        match self.types.get(&id) {
            Some(existing) if existing != value_type => {
                quiver_bail!(
                    KeyError: "dictionary id {} already registered with type {:?}, cannot re-register as {:?}",
                    id,
                    existing,
                    value_type
                )
            }
            Some(_) => Ok(()),
            None => {
                self.types.insert(id, value_type.clone());
                Ok(())
            }
        }
    }

    pub fn dictionary_type(&self, id: i64) -> QuiverResult<&DataType> {
        self.types
            .get(&id)
            .ok_or_else(|| quiver_err!(KeyError: "no dictionary type registered for id {}", id))
    }

    pub fn has_dictionary(&self, id: i64) -> bool {
        self.dictionaries.contains_key(&id)
    }

    pub fn dictionary(&self, id: i64) -> QuiverResult<&ArrayData> {
        self.dictionaries
            .get(&id)
            .ok_or_else(|| quiver_err!(KeyError: "no dictionary loaded for id {}", id))
    }

    /// The number of ids with loaded values.
    pub fn num_loaded(&self) -> usize {
        self.dictionaries.len()
    }

    /// Apply one dictionary batch. A delta referencing an unknown id is a
    /// `KeyError`; a delta for an id whose value type nests dictionaries is
    /// rejected outright.
    pub fn add_dictionary(
        &mut self,
        id: i64,
        values: ArrayData,
        is_delta: bool,
    ) -> QuiverResult<DictionaryUpdate> {
        if is_delta {
            let existing = self.dictionaries.get(&id).ok_or_else(|| {
                quiver_err!(KeyError: "delta dictionary batch references unknown id {}", id)
            })?;
            if type_contains_dictionary(values.data_type()) {
                quiver_bail!(
                    "delta dictionary batches are not supported for nested dictionary type {:?}",
                    values.data_type()
                );
            }
            let combined = concat_dictionary_values(existing, &values)?;
            self.dictionaries.insert(id, combined);
            return Ok(DictionaryUpdate::Delta);
        }

        let update = if self.dictionaries.contains_key(&id) {
            DictionaryUpdate::Replaced
        } else {
            DictionaryUpdate::New
        };
        self.dictionaries.insert(id, values);
        Ok(update)
    }
}

/// Append `delta`'s elements after `base`'s, preserving index meanings.
fn concat_dictionary_values(base: &ArrayData, delta: &ArrayData) -> QuiverResult<ArrayData> {
    if base.data_type() != delta.data_type() {
        quiver_bail!(
            "delta dictionary type {:?} does not match registered {:?}",
            delta.data_type(),
            base.data_type()
        );
    }
    let mut elements = Vec::with_capacity(base.len() + delta.len());
    for source in [base, delta] {
        for i in 0..source.len() {
            elements.push(source.element_bytes(i).ok_or_else(|| {
                quiver_err!(
                    NotImplemented: "delta dictionaries over value type {:?}",
                    source.data_type()
                )
            })?);
        }
    }
    ArrayData::try_from_elements(base.data_type(), &elements)
}

/// Write-side emission planning: remembers the last dictionary written per
/// id and decides whether a batch needs a full, delta or no dictionary
/// message. Comparison is by value, never by provenance.
#[derive(Debug, Default)]
pub(crate) struct DictionaryTracker {
    written: HashMap<i64, ArrayData>,
    pub(crate) emit_deltas: bool,
    /// File writes: the footer pins one dictionary set, so any change after
    /// first emission is an error.
    pub(crate) error_on_replacement: bool,
}

#[derive(Debug)]
pub(crate) enum DictionaryEmission {
    Skip,
    Full { replacement: bool, values: ArrayData },
    Delta { values: ArrayData },
}

impl DictionaryTracker {
    pub(crate) fn new(emit_deltas: bool, error_on_replacement: bool) -> Self {
        Self {
            written: HashMap::new(),
            emit_deltas,
            error_on_replacement,
        }
    }

    pub(crate) fn plan(
        &mut self,
        id: i64,
        values: &ArrayData,
    ) -> QuiverResult<DictionaryEmission> {
        let Some(previous) = self.written.get(&id) else {
            self.written.insert(id, values.clone());
            return Ok(DictionaryEmission::Full {
                replacement: false,
                values: values.clone(),
            });
        };

        if previous == values {
            return Ok(DictionaryEmission::Skip);
        }

        if self.error_on_replacement {
            quiver_bail!(
                "dictionary {} changed between batches; the file format requires a fixed dictionary set",
                id
            );
        }

        let extends = values.len() > previous.len()
            && values.slice(0, previous.len()) == *previous
            && !type_contains_dictionary(values.data_type());
        if self.emit_deltas && extends {
            let delta = values.slice(previous.len(), values.len() - previous.len());
            self.written.insert(id, values.clone());
            return Ok(DictionaryEmission::Delta { values: delta });
        }

        self.written.insert(id, values.clone());
        Ok(DictionaryEmission::Full {
            replacement: true,
            values: values.clone(),
        })
    }
}

/// Gather `(id, values)` for every dictionary occurrence in a batch, inner
/// dictionaries before the dictionaries whose values contain them (readers
/// resolve strictly by id, so dependencies must already be loaded).
pub(crate) fn collect_dictionaries(
    batch: &RecordBatch,
    mapper: &DictionaryFieldMapper,
) -> QuiverResult<Vec<(i64, ArrayData)>> {
    let mut out: Vec<(i64, ArrayData)> = Vec::new();
    let root = FieldPosition::new();
    for (i, column) in batch.columns().iter().enumerate() {
        collect_from_array(column, root.child(i), mapper, &mut out)?;
    }
    Ok(out)
}

fn collect_from_array(
    array: &ArrayData,
    pos: FieldPosition,
    mapper: &DictionaryFieldMapper,
    out: &mut Vec<(i64, ArrayData)>,
) -> QuiverResult<()> {
    if let Some(values) = array.dictionary() {
        // Inner dictionaries live inside the values array; emit them first.
        for (i, child) in values.children().iter().enumerate() {
            collect_from_array(child, pos.child(i), mapper, out)?;
        }
        let id = mapper.get_field_id(pos.path())?;
        if let Some((_, existing)) = out.iter().find(|(other, _)| *other == id) {
            if existing != values {
                quiver_bail!(
                    "dictionary id {} appears twice in one batch with different values",
                    id
                );
            }
        } else {
            out.push((id, values.clone()));
        }
        return Ok(());
    }
    for (i, child) in array.children().iter().enumerate() {
        collect_from_array(child, pos.child(i), mapper, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use quiver_schema::{Field, IntegerType};

    use super::*;

    #[test]
    fn field_position_paths() {
        let pos = FieldPosition::new();
        assert_eq!(pos.path(), &[] as &[usize]);
        let child = pos.child(6);
        assert_eq!(child.path(), &[6]);
        let grand_child = child.child(42);
        assert_eq!(grand_child.path(), &[6, 42]);
        assert_eq!(pos.child(12).path(), &[12]);
    }

    #[test]
    fn mapper_basics() {
        let mut mapper = DictionaryFieldMapper::new();
        assert_eq!(mapper.num_fields(), 0);

        mapper.add_field(42, vec![0, 1]).unwrap();
        mapper.add_field(43, vec![0, 2]).unwrap();
        mapper.add_field(44, vec![0, 1, 3]).unwrap();
        assert_eq!(mapper.num_fields(), 3);

        assert_eq!(mapper.get_field_id(&[0, 1]).unwrap(), 42);
        assert_eq!(mapper.get_field_id(&[0, 2]).unwrap(), 43);
        assert_eq!(mapper.get_field_id(&[0, 1, 3]).unwrap(), 44);
        assert!(mapper.get_field_id(&[]).unwrap_err().is_key_error());
        assert!(mapper.get_field_id(&[0]).unwrap_err().is_key_error());
        assert!(mapper.get_field_id(&[0, 1, 2]).unwrap_err().is_key_error());
        assert!(mapper.get_field_id(&[1]).unwrap_err().is_key_error());

        mapper.add_field(41, vec![]).unwrap();
        assert_eq!(mapper.num_fields(), 4);
        assert_eq!(mapper.get_field_id(&[]).unwrap(), 41);

        // Duplicated dictionary ids are allowed.
        mapper.add_field(42, vec![4, 5, 6]).unwrap();
        assert_eq!(mapper.num_fields(), 5);
        assert_eq!(mapper.num_dicts(), 4);
        assert_eq!(mapper.get_field_id(&[4, 5, 6]).unwrap(), 42);

        // Duplicated field paths are not.
        assert!(mapper.add_field(46, vec![0, 1]).unwrap_err().is_key_error());
    }

    #[test]
    fn mapper_from_schema() {
        let dict_utf8 = DataType::Dictionary(IntegerType::Int8, Box::new(DataType::Utf8), false);
        let schema = Schema::new(vec![
            Field::new("f0", DataType::Int8, true),
            Field::new(
                "f1",
                DataType::Struct(vec![
                    Field::new("a", DataType::Null, true),
                    Field::new("b", dict_utf8.clone(), true),
                ]),
                true,
            ),
            Field::new(
                "f2",
                DataType::Dictionary(
                    IntegerType::Int32,
                    Box::new(DataType::List(Box::new(Field::new(
                        "item",
                        dict_utf8,
                        true,
                    )))),
                    false,
                ),
                true,
            ),
        ]);

        let mapper = DictionaryFieldMapper::from_schema(&schema);
        assert_eq!(mapper.num_fields(), 3);
        let mut ids = vec![
            mapper.get_field_id(&[1, 1]).unwrap(),
            mapper.get_field_id(&[2]).unwrap(),
            mapper.get_field_id(&[2, 0]).unwrap(),
        ];
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn memo_type_registry() {
        let mut memo = DictionaryMemo::new();
        assert!(memo.dictionary_type(42).unwrap_err().is_key_error());

        memo.add_dictionary_type(42, &DataType::Utf8).unwrap();
        memo.add_dictionary_type(43, &DataType::LargeBinary).unwrap();
        assert_eq!(memo.dictionary_type(42).unwrap(), &DataType::Utf8);

        // Same type under a new id, and re-adding the same pair, are fine.
        memo.add_dictionary_type(44, &DataType::Utf8).unwrap();
        memo.add_dictionary_type(42, &DataType::Utf8).unwrap();

        // A different type under an existing id is not.
        let err = memo
            .add_dictionary_type(42, &DataType::LargeUtf8)
            .unwrap_err();
        assert!(err.is_key_error());
        assert_eq!(memo.dictionary_type(42).unwrap(), &DataType::Utf8);
    }

    #[test]
    fn delta_appends_without_disturbing_indices() {
        let mut memo = DictionaryMemo::new();
        memo.add_dictionary(0, ArrayData::utf8(["foo", "bar"]), false)
            .unwrap();
        let update = memo
            .add_dictionary(0, ArrayData::utf8(["baz"]), true)
            .unwrap();
        assert_eq!(update, DictionaryUpdate::Delta);
        assert_eq!(
            memo.dictionary(0).unwrap(),
            &ArrayData::utf8(["foo", "bar", "baz"])
        );
    }

    #[test]
    fn delta_for_unknown_id_is_key_error() {
        let mut memo = DictionaryMemo::new();
        let err = memo
            .add_dictionary(1, ArrayData::utf8(["baz"]), true)
            .unwrap_err();
        assert!(err.is_key_error());
    }

    #[test]
    fn replacement_discards_prior_values() {
        let mut memo = DictionaryMemo::new();
        memo.add_dictionary(0, ArrayData::utf8(["foo1", "bar1", "baz1"]), false)
            .unwrap();
        let update = memo
            .add_dictionary(0, ArrayData::utf8(["foo", "bar", "baz"]), false)
            .unwrap();
        assert_eq!(update, DictionaryUpdate::Replaced);
        assert_eq!(
            memo.dictionary(0).unwrap(),
            &ArrayData::utf8(["foo", "bar", "baz"])
        );
    }

    #[test]
    fn tracker_skips_unchanged_and_plans_deltas() {
        let mut tracker = DictionaryTracker::new(true, false);
        let first = ArrayData::utf8(["foo", "bar"]);
        assert!(matches!(
            tracker.plan(0, &first).unwrap(),
            DictionaryEmission::Full { replacement: false, .. }
        ));
        assert!(matches!(
            tracker.plan(0, &first).unwrap(),
            DictionaryEmission::Skip
        ));

        let extended = ArrayData::utf8(["foo", "bar", "baz"]);
        match tracker.plan(0, &extended).unwrap() {
            DictionaryEmission::Delta { values } => {
                assert_eq!(values, ArrayData::utf8(["baz"]));
            }
            other => panic!("expected a delta, got {other:?}"),
        }

        let unrelated = ArrayData::utf8(["qux"]);
        assert!(matches!(
            tracker.plan(0, &unrelated).unwrap(),
            DictionaryEmission::Full { replacement: true, .. }
        ));
    }

    #[test]
    fn tracker_rejects_changes_for_files() {
        let mut tracker = DictionaryTracker::new(false, true);
        tracker.plan(0, &ArrayData::utf8(["foo"])).unwrap();
        let err = tracker.plan(0, &ArrayData::utf8(["bar"])).unwrap_err();
        assert!(err.is_invalid());
    }
}
