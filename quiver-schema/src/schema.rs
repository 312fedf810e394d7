use quiver_error::{QuiverResult, quiver_bail};

use crate::{Field, Metadata};

/// An ordered sequence of fields plus optional key-value metadata.
///
/// Positions are the identity: duplicate names are legal, duplicate
/// positions are not representable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub fields: Vec<Field>,
    pub metadata: Option<Metadata>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Derive a narrowed schema containing `indices` in the given order.
    /// Field identity and metadata are unchanged; only positions remap.
    pub fn try_project(&self, indices: &[usize]) -> QuiverResult<Schema> {
        let fields = indices
            .iter()
            .map(|&i| {
                if i >= self.fields.len() {
                    quiver_bail!(
                        "field index {} out of range for schema with {} fields",
                        i,
                        self.fields.len()
                    )
                }
                Ok(self.fields[i].clone())
            })
            .collect::<QuiverResult<Vec<_>>>()?;
        Ok(Schema {
            fields,
            metadata: self.metadata.clone(),
        })
    }

    /// Writer compatibility: fields equal up to metadata, in the same order.
    pub fn equals_ignoring_metadata(&self, other: &Schema) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.equals_ignoring_metadata(b))
    }
}

impl From<Vec<Field>> for Schema {
    fn from(fields: Vec<Field>) -> Self {
        Self::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;

    fn test_schema() -> Schema {
        Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Utf8, false),
            Field::new("c", DataType::Boolean, true),
        ])
    }

    #[test]
    fn project_remaps_positions() {
        let schema = test_schema();
        let projected = schema.try_project(&[2, 0]).unwrap();
        assert_eq!(projected.fields[0].name, "c");
        assert_eq!(projected.fields[1].name, "a");
    }

    #[test]
    fn project_rejects_out_of_range() {
        let err = test_schema().try_project(&[3]).unwrap_err();
        assert!(err.is_invalid());
    }

    #[test]
    fn metadata_ignored_for_writer_compatibility() {
        let a = test_schema();
        let b = test_schema().with_metadata(Metadata::from([("source", "test")]));
        assert!(a.equals_ignoring_metadata(&b));
        assert_ne!(a, b);
    }
}
