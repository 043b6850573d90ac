//! In-memory columnar table as produced by a file reader

use super::field::Field;

/// Named, typed columns read from one input file, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    fields: Vec<Field>,
}

impl RawTable {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Row count taken from the first materialized field.
    pub fn row_count(&self) -> Option<usize> {
        self.fields.iter().find_map(Field::row_count)
    }

    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }
}

impl FromIterator<Field> for RawTable {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
