//! Bookkeeping table: one row per loaded unit
//!
//! The table has one column per determiner and a unique constraint over all
//! of them. A unit is claimed with `INSERT ... ON CONFLICT DO NOTHING` in
//! the same transaction that copies its rows, so the constraint decides
//! which of two concurrent loaders gets to load it.

use super::{StoreError, StoreResult};
use crate::finder::DeterminerSpec;
use crate::models::{DeterminerValue, Determiners};
use crate::validation::{
    qualified_name, quote_identifier, validate_column_name, validate_schema_name,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookkeeping {
    schema: String,
    table: String,
    columns: Vec<DeterminerSpec>,
}

impl Bookkeeping {
    /// Bookkeeping for loads into `schema.target_table`, stored in
    /// `schema._ingest_<target_table>_bits`.
    pub fn new(schema: &str, target_table: &str, determiners: &[DeterminerSpec]) -> StoreResult<Self> {
        validate_schema_name(schema).map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        let table = format!("_ingest_{}_bits", target_table);
        validate_column_name(&table).map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        for spec in determiners {
            validate_column_name(&spec.name)
                .map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        }
        if determiners.is_empty() {
            return Err(StoreError::InvalidInput(
                "bookkeeping needs at least one determiner".to_string(),
            ));
        }
        Ok(Self {
            schema: schema.to_string(),
            table,
            columns: determiners.to_vec(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn quoted_columns(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_ddl(&self) -> String {
        let members: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("    {} {} NOT NULL", quote_identifier(&c.name), c.kind.sql_type()))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{},\n    UNIQUE ({})\n)",
            qualified_name(&self.schema, &self.table),
            members.join(",\n"),
            self.quoted_columns()
        )
    }

    /// Insert that affects one row when the unit was not yet recorded and
    /// none when it was.
    pub fn claim_sql(&self) -> String {
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("${}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
            qualified_name(&self.schema, &self.table),
            self.quoted_columns(),
            placeholders.join(", ")
        )
    }

    /// Parameter values for [`claim_sql`](Self::claim_sql), in column order.
    pub fn params(&self, determiners: &Determiners) -> StoreResult<Vec<DeterminerValue>> {
        if determiners.len() != self.columns.len() {
            return Err(StoreError::InvalidInput(format!(
                "bookkeeping needs {} determiners, got ({})",
                self.columns.len(),
                determiners
            )));
        }
        self.columns
            .iter()
            .zip(determiners.iter())
            .map(|(spec, (name, value))| {
                if spec.name != name || spec.kind != value.kind() {
                    return Err(StoreError::InvalidInput(format!(
                        "determiner {} does not fit bookkeeping column {}",
                        name, spec.name
                    )));
                }
                Ok(value.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finder::NamingGrammar;

    fn bookkeeping() -> Bookkeeping {
        Bookkeeping::new(
            "dc2",
            "forcedsource",
            NamingGrammar::forced_source().determiners(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_ddl() {
        let ddl = bookkeeping().create_ddl();
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS \"dc2\".\"_ingest_forcedsource_bits\" (\n    \"visit\" Bigint NOT NULL,\n    \"raft\" Text NOT NULL,\n    \"sensor\" Text NOT NULL,\n    UNIQUE (\"visit\", \"raft\", \"sensor\")\n)"
        );
    }

    #[test]
    fn test_claim_sql_and_params() {
        let b = bookkeeping();
        assert_eq!(
            b.claim_sql(),
            "INSERT INTO \"dc2\".\"_ingest_forcedsource_bits\" (\"visit\", \"raft\", \"sensor\") VALUES ($1, $2, $3) ON CONFLICT DO NOTHING"
        );
        let dets = Determiners::new()
            .with("visit", 210472)
            .with("raft", "01")
            .with("sensor", "20");
        assert_eq!(
            b.params(&dets).unwrap(),
            vec![
                DeterminerValue::Int(210472),
                DeterminerValue::Text("01".into()),
                DeterminerValue::Text("20".into())
            ]
        );
        assert!(b.params(&Determiners::new().with("visit", 1)).is_err());
    }
}
