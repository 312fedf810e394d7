use std::sync::Arc;

use quiver_error::{QuiverResult, quiver_bail};
use quiver_schema::Schema;

use crate::ArrayData;

pub type SchemaRef = Arc<Schema>;

/// A fixed-length, multi-column chunk of columnar data with one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBatch {
    schema: SchemaRef,
    columns: Vec<ArrayData>,
    num_rows: usize,
}

impl RecordBatch {
    pub fn try_new(schema: SchemaRef, columns: Vec<ArrayData>) -> QuiverResult<Self> {
        if schema.num_fields() != columns.len() {
            quiver_bail!(
                "schema has {} fields but batch has {} columns",
                schema.num_fields(),
                columns.len()
            );
        }
        let num_rows = columns.first().map(ArrayData::len).unwrap_or_default();
        for (field, column) in schema.fields.iter().zip(columns.iter()) {
            if column.len() != num_rows {
                quiver_bail!(
                    "column {:?} has {} rows, expected {}",
                    field.name,
                    column.len(),
                    num_rows
                );
            }
            if *column.data_type() != field.data_type {
                quiver_bail!(
                    "column {:?} has type {:?}, schema declares {:?}",
                    field.name,
                    column.data_type(),
                    field.data_type
                );
            }
        }
        Ok(Self {
            schema,
            columns,
            num_rows,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn columns(&self) -> &[ArrayData] {
        &self.columns
    }

    pub fn column(&self, i: usize) -> &ArrayData {
        &self.columns[i]
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// A zero-copy logical window over all columns.
    pub fn slice(&self, offset: usize, len: usize) -> RecordBatch {
        RecordBatch {
            schema: self.schema.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| c.slice(offset, len))
                .collect(),
            num_rows: len,
        }
    }

    /// Column-content equality, ignoring schema metadata. Writers preserve
    /// their original schema metadata, so round-trip comparisons use this.
    pub fn equals_data(&self, other: &RecordBatch) -> bool {
        self.num_rows == other.num_rows
            && self.schema.equals_ignoring_metadata(&other.schema)
            && self.columns == other.columns
    }
}

#[cfg(test)]
mod tests {
    use quiver_schema::{DataType, Field};

    use super::*;

    #[test]
    fn rejects_ragged_columns() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Int32, true),
        ]));
        let err = RecordBatch::try_new(
            schema,
            vec![
                ArrayData::from_vec(vec![1i32, 2]),
                ArrayData::from_vec(vec![1i32, 2, 3]),
            ],
        )
        .unwrap_err();
        assert!(err.is_invalid());
    }

    #[test]
    fn slice_windows_all_columns() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let batch =
            RecordBatch::try_new(schema, vec![ArrayData::from_vec(vec![1i32, 2, 3, 4])]).unwrap();
        let sliced = batch.slice(1, 2);
        assert_eq!(sliced.num_rows(), 2);
        assert_eq!(sliced.column(0), &ArrayData::from_vec(vec![2i32, 3]));
    }
}
