//! Table images
//!
//! A [`TableImage`] is the resolved, load-ready form of one target table for
//! one input file. It knows how to describe itself in DDL (table, keys,
//! indexes) and how to turn its fields into a [`RowStream`] for bulk copy.
//!
//! Images are built fresh by the assumptions resolver for every file,
//! narrowed once by [`TableImage::normalize_precision`] and then consumed by
//! [`TableImage::into_row_stream`].

pub mod keys;
pub mod rows;

pub use keys::{ForeignKey, IndexProperty, IndexSpec, foreign_key_name, primary_key_name};
pub use rows::{CellFormat, RowColumn, RowStream};

use thiserror::Error;

use crate::models::{ColumnData, Field, ScalarType};
use crate::validation::{
    ValidationError, qualified_name, quote_identifier, validate_column_name,
    validate_schema_name, validate_table_name,
};

/// Errors from building DDL or row streams
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("Invalid identifier: {0}")]
    Validation(#[from] ValidationError),

    #[error("Field {0} has no data")]
    Unmaterialized(String),

    #[error("Column {column} has {actual} rows, expected {expected}")]
    RowCountMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Table {0} declares more than one primary key")]
    MultiplePrimaryKeys(String),

    #[error("Table {0} has no columns")]
    NoColumns(String),
}

/// Result type for table image operations
pub type TableResult<T> = Result<T, TableError>;

/// Resolved, load-ready representation of one target table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableImage {
    pub name: String,
    pub schema_name: String,
    /// Fields in declared schema order
    pub fields: Vec<Field>,
    /// Band labels; `[""]` for band-independent tables
    pub filters: Vec<String>,
    /// Field names kept at double precision
    pub doubles: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexSpec>,
    pub table_space: Option<String>,
    pub index_space: Option<String>,
}

impl TableImage {
    /// Create a band-independent image. Schema and table names are
    /// validated here, column names when DDL or rows are generated.
    pub fn new(
        schema_name: impl Into<String>,
        name: impl Into<String>,
        fields: Vec<Field>,
    ) -> TableResult<Self> {
        let schema_name = schema_name.into();
        let name = name.into();
        validate_schema_name(&schema_name)?;
        validate_table_name(&name)?;
        Ok(Self {
            name,
            schema_name,
            fields,
            filters: vec![String::new()],
            doubles: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            table_space: None,
            index_space: None,
        })
    }

    /// Band labels for a multiband table. The DDL repeats every column once
    /// per filter, but [`into_row_stream`](Self::into_row_stream) fills only
    /// the columns of the first filter; the others stay NULL.
    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        if self.filters.is_empty() {
            self.filters.push(String::new());
        }
        self
    }

    pub fn with_doubles(mut self, doubles: Vec<String>) -> Self {
        self.doubles = doubles;
        self
    }

    pub fn with_foreign_keys(mut self, foreign_keys: Vec<ForeignKey>) -> Self {
        self.foreign_keys = foreign_keys;
        self
    }

    pub fn with_indexes(mut self, indexes: Vec<IndexSpec>) -> Self {
        self.indexes = indexes;
        self
    }

    pub fn with_table_space(mut self, table_space: Option<String>) -> Self {
        self.table_space = table_space;
        self
    }

    pub fn with_index_space(mut self, index_space: Option<String>) -> Self {
        self.index_space = index_space;
        self
    }

    pub fn qualified_name(&self) -> String {
        qualified_name(&self.schema_name, &self.name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn row_count(&self) -> Option<usize> {
        self.fields.iter().find_map(Field::row_count)
    }

    /// Downcast every double precision field not listed in `doubles` to
    /// single precision. Calling this twice changes nothing the second time.
    pub fn normalize_precision(&mut self) {
        for field in &mut self.fields {
            if field.storage_type() != Some(ScalarType::Float64)
                || self.doubles.iter().any(|d| d == &field.name)
            {
                continue;
            }
            if let Some(components) = field.data.take() {
                field.data = Some(
                    components
                        .into_iter()
                        .map(ColumnData::into_single_precision)
                        .collect(),
                );
            }
        }
    }

    fn prefixed(filter: &str, member: &str) -> String {
        if filter.is_empty() {
            member.to_string()
        } else {
            format!("{}_{}", filter, member)
        }
    }

    /// `(column name, SQL type)` for every filter × exploded field member.
    pub fn column_definitions(&self) -> TableResult<Vec<(String, &'static str)>> {
        let mut columns = Vec::new();
        for filter in &self.filters {
            for field in &self.fields {
                let sql_type = field
                    .storage_type()
                    .ok_or_else(|| TableError::Unmaterialized(field.name.clone()))?
                    .sql_type();
                for member in field.member_names() {
                    let column = Self::prefixed(filter, &member);
                    validate_column_name(&column)?;
                    columns.push((column, sql_type));
                }
            }
        }
        if columns.is_empty() {
            return Err(TableError::NoColumns(self.name.clone()));
        }
        Ok(columns)
    }

    pub fn create_schema_ddl(&self) -> String {
        format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_identifier(&self.schema_name)
        )
    }

    /// CREATE TABLE statement for this image.
    pub fn definition_ddl(&self) -> TableResult<String> {
        let members: Vec<String> = self
            .column_definitions()?
            .into_iter()
            .map(|(name, sql_type)| format!("    {} {}", quote_identifier(&name), sql_type))
            .collect();

        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.qualified_name(),
            members.join(",\n")
        );
        if let Some(space) = &self.table_space {
            validate_table_name(space)?;
            ddl.push_str(&format!(" TABLESPACE {}", quote_identifier(space)));
        }
        Ok(ddl)
    }

    fn quoted_columns(columns: &[String]) -> TableResult<String> {
        let mut quoted = Vec::with_capacity(columns.len());
        for column in columns {
            validate_column_name(column)?;
            quoted.push(quote_identifier(column));
        }
        Ok(quoted.join(","))
    }

    fn primary_index(&self) -> TableResult<Option<&IndexSpec>> {
        let mut primaries = self.indexes.iter().filter(|i| i.is_primary());
        let first = primaries.next();
        if primaries.next().is_some() {
            return Err(TableError::MultiplePrimaryKeys(self.name.clone()));
        }
        Ok(first)
    }

    fn index_space_clause(&self, keyword: &str) -> TableResult<String> {
        match &self.index_space {
            Some(space) => {
                validate_table_name(space)?;
                Ok(format!(" {} {}", keyword, quote_identifier(space)))
            }
            None => Ok(String::new()),
        }
    }

    /// ADD CONSTRAINT ... PRIMARY KEY, if the table declares one.
    pub fn primary_key_ddl(&self) -> TableResult<Option<String>> {
        let Some(index) = self.primary_index()? else {
            return Ok(None);
        };
        let constraint = primary_key_name(&self.name);
        validate_column_name(&constraint)?;
        Ok(Some(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({}){}",
            self.qualified_name(),
            quote_identifier(&constraint),
            Self::quoted_columns(&index.columns)?,
            self.index_space_clause("USING INDEX TABLESPACE")?
        )))
    }

    pub fn drop_primary_key_ddl(&self) -> TableResult<Option<String>> {
        if self.primary_index()?.is_none() {
            return Ok(None);
        }
        Ok(Some(format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
            self.qualified_name(),
            quote_identifier(&primary_key_name(&self.name))
        )))
    }

    /// One ADD CONSTRAINT ... FOREIGN KEY statement per declaration.
    /// Referenced tables live in the same schema.
    pub fn foreign_key_ddls(&self) -> TableResult<Vec<String>> {
        self.foreign_keys
            .iter()
            .map(|fk| {
                let constraint = foreign_key_name(&self.name, &fk.column);
                validate_column_name(&constraint)?;
                validate_column_name(&fk.column)?;
                validate_table_name(&fk.ref_table)?;
                validate_column_name(&fk.ref_column)?;
                Ok(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    self.qualified_name(),
                    quote_identifier(&constraint),
                    quote_identifier(&fk.column),
                    qualified_name(&self.schema_name, &fk.ref_table),
                    quote_identifier(&fk.ref_column)
                ))
            })
            .collect()
    }

    pub fn drop_foreign_key_ddls(&self) -> Vec<String> {
        self.foreign_keys
            .iter()
            .map(|fk| {
                format!(
                    "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                    self.qualified_name(),
                    quote_identifier(&foreign_key_name(&self.name, &fk.column))
                )
            })
            .collect()
    }

    /// CREATE [UNIQUE] INDEX for every non-primary index declaration.
    pub fn index_ddls(&self) -> TableResult<Vec<String>> {
        let space = self.index_space_clause("TABLESPACE")?;
        self.indexes
            .iter()
            .filter(|i| !i.is_primary())
            .map(|index| {
                let name = index.index_name(&self.name);
                validate_column_name(&name)?;
                Ok(format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({}){}",
                    if index.is_unique() { "UNIQUE " } else { "" },
                    quote_identifier(&name),
                    self.qualified_name(),
                    Self::quoted_columns(&index.columns)?,
                    space
                ))
            })
            .collect()
    }

    pub fn drop_index_ddls(&self) -> Vec<String> {
        self.indexes
            .iter()
            .filter(|i| !i.is_primary())
            .map(|index| {
                format!(
                    "DROP INDEX IF EXISTS {}",
                    qualified_name(&self.schema_name, &index.index_name(&self.name))
                )
            })
            .collect()
    }

    /// All key-creation statements: primary key, foreign keys, indexes.
    pub fn create_keys_ddl(&self) -> TableResult<Vec<String>> {
        let mut statements: Vec<String> = self.primary_key_ddl()?.into_iter().collect();
        statements.extend(self.foreign_key_ddls()?);
        statements.extend(self.index_ddls()?);
        Ok(statements)
    }

    /// Drop statements in reverse dependency order: foreign keys first.
    pub fn drop_keys_ddl(&self) -> TableResult<Vec<String>> {
        let mut statements = self.drop_foreign_key_ddls();
        statements.extend(self.drop_index_ddls());
        statements.extend(self.drop_primary_key_ddl()?);
        Ok(statements)
    }

    /// Consume the image, exploding every field into physical columns.
    ///
    /// Data rows carry a single band; when the table is multiband, the first
    /// filter labels the columns.
    pub fn into_row_stream(self) -> TableResult<RowStream> {
        let prefix = self.filters.first().cloned().unwrap_or_default();
        let expected = self.row_count();
        let mut columns = Vec::new();

        for field in self.fields {
            let members = field.member_names();
            let components = field
                .data
                .ok_or_else(|| TableError::Unmaterialized(field.name.clone()))?;
            for (member, data) in members.into_iter().zip(components) {
                let name = Self::prefixed(&prefix, &member);
                validate_column_name(&name)?;
                if let Some(expected) = expected
                    && data.len() != expected
                {
                    return Err(TableError::RowCountMismatch {
                        column: name,
                        expected,
                        actual: data.len(),
                    });
                }
                columns.push(RowColumn::new(name, data));
            }
        }
        if columns.is_empty() {
            return Err(TableError::NoColumns(self.name));
        }
        Ok(RowStream::new(columns, expected.unwrap_or(0)))
    }
}
