//! Resolving raw tables against the declared schema
//!
//! Matching rules, applied to each raw field in input order after ignores
//! have been removed:
//!
//! 1. A plain or computed declaration with exactly the field's name takes
//!    it. Each declaration takes at most one field.
//! 2. Otherwise the first column group (in declared order) whose pattern
//!    fully matches the name takes it. Groups take any number of fields, so
//!    a field matching two groups always lands in the earlier one.
//! 3. Otherwise the field is reported as unknown and dropped.
//!
//! Computed declarations left without a raw field are evaluated with the
//! unit's determiners as context. Plain declarations left without one are
//! reported as missing.

use regex::Regex;
use serde_yaml::Value;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

use super::document::{AssumptionsDocument, ColumnEntry, ConstraintSpec, Precision};
use super::{AssumptionsError, AssumptionsResult};
use crate::expression::{rpn_eval, substitute};
use crate::models::{Determiners, Field, RawTable, ScalarType};
use crate::table::{ForeignKey, IndexSpec, TableImage};
use crate::validation::{validate_column_name, validate_pattern, validate_table_name};

/// One declared column, by how it finds its data.
#[derive(Debug, Clone)]
pub enum ColumnDeclaration {
    /// Takes the raw field with exactly this name
    Plain {
        name: String,
        dtype: Option<ScalarType>,
        doc: Option<String>,
        double: bool,
    },
    /// Takes every raw field whose name fully matches the pattern
    Group {
        pattern: Regex,
        dtype: Option<ScalarType>,
        doc: Option<String>,
        double: bool,
    },
    /// Takes the raw field with this name if present, otherwise evaluates
    /// the expression once per file
    Computed {
        name: String,
        dtype: ScalarType,
        doc: Option<String>,
        expression: Vec<String>,
        double: bool,
    },
}

impl ColumnDeclaration {
    /// Exact name this declaration matches, if it is not a group.
    pub fn name(&self) -> Option<&str> {
        match self {
            ColumnDeclaration::Plain { name, .. } | ColumnDeclaration::Computed { name, .. } => {
                Some(name)
            }
            ColumnDeclaration::Group { .. } => None,
        }
    }

    fn matches_group(&self, field_name: &str) -> bool {
        match self {
            ColumnDeclaration::Group { pattern, .. } => pattern.is_match(field_name),
            _ => false,
        }
    }

    fn from_entry(table: &str, entry: ColumnEntry) -> AssumptionsResult<Self> {
        let double = |p: Option<Precision>| p == Some(Precision::Double);
        match (entry.column, entry.column_group) {
            (Some(column), None) => {
                validate_column_name(&column.name)?;
                match column.compute {
                    Some(compute) => {
                        let dtype = column.dtype.ok_or_else(|| {
                            AssumptionsError::Validation(format!(
                                "{}: computed column {} needs a dtype",
                                table, column.name
                            ))
                        })?;
                        let expression = compute.tokens();
                        if expression.is_empty() {
                            return Err(AssumptionsError::Validation(format!(
                                "{}: computed column {} has an empty expression",
                                table, column.name
                            )));
                        }
                        Ok(ColumnDeclaration::Computed {
                            name: column.name,
                            dtype,
                            doc: column.doc,
                            expression,
                            double: double(column.precision),
                        })
                    }
                    None => Ok(ColumnDeclaration::Plain {
                        name: column.name,
                        dtype: column.dtype,
                        doc: column.doc,
                        double: double(column.precision),
                    }),
                }
            }
            (None, Some(group)) => Ok(ColumnDeclaration::Group {
                pattern: full_match(&group.name_re)?,
                dtype: group.dtype,
                doc: group.doc,
                double: double(group.precision),
            }),
            _ => Err(AssumptionsError::Validation(format!(
                "{}: column entry must have exactly one of 'column' or 'column_group'",
                table
            ))),
        }
    }
}

/// A declared table, checked and compiled.
#[derive(Debug, Clone)]
pub struct TableDeclaration {
    pub name: String,
    pub columns: Vec<ColumnDeclaration>,
    pub doubles: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexSpec>,
}

/// A non-fatal resolution problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A raw field matched no declaration and was dropped
    UnknownField { table: String, field: String },
    /// A declaration without `compute` found no raw field
    MissingColumn { table: String, column: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnknownField { table, field } => {
                write!(f, "field {} unknown to assumptions for table {}", field, table)
            }
            Diagnostic::MissingColumn { table, column } => {
                write!(f, "column {} of table {} not found in input", column, table)
            }
        }
    }
}

/// The tables resolved from one raw table, with any diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub tables: Vec<TableImage>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableImage> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Fail if there were any diagnostics.
    pub fn into_strict(self) -> AssumptionsResult<Vec<TableImage>> {
        if self.diagnostics.is_empty() {
            Ok(self.tables)
        } else {
            Err(AssumptionsError::Unresolved(self.diagnostics))
        }
    }
}

fn full_match(pattern: &str) -> AssumptionsResult<Regex> {
    validate_pattern(pattern).map_err(|e| {
        AssumptionsError::Validation(format!("bad pattern {:?}: {}", pattern, e))
    })?;
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
        AssumptionsError::Validation(format!("bad pattern {:?}: {}", pattern, e))
    })
}

/// Parsed, verified assumptions. Immutable once built.
#[derive(Debug, Clone)]
pub struct Assumptions {
    symbols: Vec<Value>,
    ignores: Vec<Regex>,
    tables: Vec<TableDeclaration>,
    constraints: Vec<ConstraintSpec>,
}

impl Assumptions {
    pub fn from_path(path: impl AsRef<Path>) -> AssumptionsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AssumptionsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> AssumptionsResult<Self> {
        Self::from_document(AssumptionsDocument::from_yaml_str(text)?)
    }

    /// Check identifiers, compile patterns and enforce per-table rules.
    pub fn from_document(document: AssumptionsDocument) -> AssumptionsResult<Self> {
        if document.tables.is_empty() {
            return Err(AssumptionsError::Validation("no tables declared".to_string()));
        }

        let ignores = document
            .ignores
            .iter()
            .map(|p| full_match(p))
            .collect::<AssumptionsResult<Vec<_>>>()?;

        let mut tables = Vec::with_capacity(document.tables.len());
        for entry in document.tables {
            let spec = entry.table;
            validate_table_name(&spec.name)?;

            let columns = spec
                .columns
                .into_iter()
                .map(|c| ColumnDeclaration::from_entry(&spec.name, c))
                .collect::<AssumptionsResult<Vec<_>>>()?;

            let mut seen = std::collections::HashSet::new();
            for name in columns.iter().filter_map(ColumnDeclaration::name) {
                if !seen.insert(name) {
                    return Err(AssumptionsError::Validation(format!(
                        "{}: column {} declared twice",
                        spec.name, name
                    )));
                }
            }

            if spec.index.iter().filter(|i| i.is_primary()).count() > 1 {
                return Err(AssumptionsError::Validation(format!(
                    "{}: more than one primary index",
                    spec.name
                )));
            }
            for index in &spec.index {
                if index.columns.is_empty() {
                    return Err(AssumptionsError::Validation(format!(
                        "{}: index with no columns",
                        spec.name
                    )));
                }
                for column in &index.columns {
                    validate_column_name(column)?;
                }
            }
            for fk in &spec.foreign {
                validate_column_name(&fk.column)?;
                validate_table_name(&fk.ref_table)?;
                validate_column_name(&fk.ref_column)?;
            }

            tables.push(TableDeclaration {
                name: spec.name,
                columns,
                doubles: spec.doubles,
                foreign_keys: spec.foreign,
                indexes: spec.index,
            });
        }

        for constraint in &document.constraints {
            if !tables.iter().any(|t| t.name == constraint.table) {
                warn!(
                    "Constraints for undeclared table {} will be ignored",
                    constraint.table
                );
            }
            for fk in &constraint.foreign {
                validate_column_name(&fk.column)?;
                validate_table_name(&fk.ref_table)?;
                validate_column_name(&fk.ref_column)?;
            }
        }
        if tables.len() > 1 {
            warn!(
                "{} tables declared; only {} is loaded from each input file",
                tables.len(),
                tables[0].name
            );
        }

        Ok(Self {
            symbols: document.symbols,
            ignores,
            tables,
            constraints: document.constraints,
        })
    }

    pub fn symbols(&self) -> &[Value] {
        &self.symbols
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn tables(&self) -> &[TableDeclaration] {
        &self.tables
    }

    /// The table raw files are resolved into.
    pub fn primary_table(&self) -> &TableDeclaration {
        // from_document rejects documents without tables
        &self.tables[0]
    }

    pub fn is_ignored(&self, field_name: &str) -> bool {
        self.ignores.iter().any(|p| p.is_match(field_name))
    }

    /// Foreign keys of a table, including those from the `constraints`
    /// section.
    pub fn foreign_keys_for(&self, table: &TableDeclaration) -> Vec<ForeignKey> {
        let mut keys = table.foreign_keys.clone();
        for constraint in self.constraints.iter().filter(|c| c.table == table.name) {
            for fk in &constraint.foreign {
                if !keys.contains(fk) {
                    keys.push(fk.clone());
                }
            }
        }
        keys
    }

    /// Map a raw table onto the declared schema.
    ///
    /// `context` supplies the values of `{name}` placeholders in compute
    /// expressions. The result depends only on the arguments, so resolving
    /// the same input twice gives equal images.
    pub fn resolve(
        &self,
        raw: RawTable,
        schema_name: &str,
        context: &Determiners,
    ) -> AssumptionsResult<Resolution> {
        let table = self.primary_table();
        let declared = table.columns.len();
        let mut named: Vec<Option<Field>> = vec![None; declared];
        let mut grouped: Vec<Vec<Field>> = vec![Vec::new(); declared];
        let mut diagnostics = Vec::new();

        for field in raw.into_fields() {
            if self.is_ignored(&field.name) {
                debug!("Ignoring field {}", field.name);
                continue;
            }
            let exact = (0..declared).find(|&i| {
                named[i].is_none() && table.columns[i].name() == Some(field.name.as_str())
            });
            if let Some(i) = exact {
                named[i] = Some(field);
                continue;
            }
            if let Some(i) = table.columns.iter().position(|c| c.matches_group(&field.name)) {
                grouped[i].push(field);
                continue;
            }
            warn!("Field {} unknown to assumptions for table {}", field.name, table.name);
            diagnostics.push(Diagnostic::UnknownField {
                table: table.name.clone(),
                field: field.name,
            });
        }

        let row_count = named
            .iter()
            .flatten()
            .chain(grouped.iter().flatten())
            .find_map(Field::row_count);

        let mut fields = Vec::new();
        let mut doubles = table.doubles.clone();

        for (i, declaration) in table.columns.iter().enumerate() {
            match declaration {
                ColumnDeclaration::Plain {
                    name,
                    dtype,
                    doc,
                    double,
                } => match named[i].take() {
                    Some(field) => {
                        if *double {
                            doubles.push(name.clone());
                        }
                        fields.push(finish(field, *dtype, doc.as_deref())?);
                    }
                    None => {
                        warn!("Column {} of table {} not found in input", name, table.name);
                        diagnostics.push(Diagnostic::MissingColumn {
                            table: table.name.clone(),
                            column: name.clone(),
                        });
                    }
                },
                ColumnDeclaration::Computed {
                    name,
                    dtype,
                    doc,
                    expression,
                    double,
                } => {
                    let field = match named[i].take() {
                        Some(field) => finish(field, Some(*dtype), doc.as_deref())?,
                        None => {
                            let Some(rows) = row_count else {
                                return Err(AssumptionsError::NoRowCount {
                                    table: table.name.clone(),
                                    column: name.clone(),
                                });
                            };
                            compute(name, *dtype, doc.as_deref(), expression, context, rows)?
                        }
                    };
                    if *double {
                        doubles.push(name.clone());
                    }
                    fields.push(field);
                }
                ColumnDeclaration::Group {
                    dtype, doc, double, ..
                } => {
                    for field in std::mem::take(&mut grouped[i]) {
                        if *double {
                            doubles.push(field.name.clone());
                        }
                        fields.push(finish(field, *dtype, doc.as_deref())?);
                    }
                }
            }
        }

        let image = TableImage::new(schema_name, &table.name, fields)?
            .with_doubles(doubles)
            .with_foreign_keys(self.foreign_keys_for(table))
            .with_indexes(table.indexes.clone());

        Ok(Resolution {
            tables: vec![image],
            diagnostics,
        })
    }
}

fn finish(field: Field, dtype: Option<ScalarType>, doc: Option<&str>) -> AssumptionsResult<Field> {
    let mut field = match dtype {
        Some(dtype) => field.cast(dtype)?,
        None => field,
    };
    if let Some(doc) = doc {
        field = field.with_doc(doc);
    }
    Ok(field)
}

fn compute(
    name: &str,
    dtype: ScalarType,
    doc: Option<&str>,
    expression: &[String],
    context: &Determiners,
    rows: usize,
) -> AssumptionsResult<Field> {
    let wrap = |source| AssumptionsError::Compute {
        column: name.to_string(),
        source,
    };
    let tokens = substitute(expression, context).map_err(wrap)?;
    let value = rpn_eval(&[], &tokens).map_err(wrap)?;
    let data = value.fill(dtype, rows).map_err(wrap)?;
    debug!("Computed column {} = {} for {}", name, value, context);

    let mut field = Field::scalar(name, data);
    field.compute = Some(expression.to_vec());
    if let Some(doc) = doc {
        field = field.with_doc(doc);
    }
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnData;

    const DOC: &str = r#"
ignores: ["junk_.*"]
tables:
  - table:
      name: forcedsource
      columns:
        - column: { name: objectId, dtype: int64 }
        - column_group: { name_re: "flux_.*" }
        - column_group: { name_re: "flux_g.*", dtype: float64 }
        - column:
            name: ccdVisitId
            dtype: int64
            compute: ["{visit}", "8", "zerofill(,)", "{sensor}", "prepend(,)"]
"#;

    fn raw() -> RawTable {
        RawTable::new(vec![
            Field::scalar("flux_g", ColumnData::Float64(vec![1.0, 2.0])),
            Field::scalar("objectId", ColumnData::Int64(vec![10, 11])),
            Field::scalar("junk_a", ColumnData::Int32(vec![0, 0])),
            Field::scalar("flux_r", ColumnData::Float64(vec![3.0, 4.0])),
        ])
    }

    fn context() -> Determiners {
        Determiners::new().with("visit", 1234).with("sensor", "11")
    }

    #[test]
    fn test_schema_order_and_compute() {
        let assumptions = Assumptions::from_yaml_str(DOC).unwrap();
        let resolution = assumptions.resolve(raw(), "dc2", &context()).unwrap();
        assert!(resolution.is_clean());

        let image = resolution.table("forcedsource").unwrap();
        let names: Vec<&str> = image.fields.iter().map(|f| f.name.as_str()).collect();
        // groups keep input order; first matching group wins
        assert_eq!(names, vec!["objectId", "flux_g", "flux_r", "ccdVisitId"]);

        let computed = image.field("ccdVisitId").unwrap();
        assert_eq!(
            computed.data.as_ref().unwrap()[0],
            ColumnData::Int64(vec![1100001234, 1100001234])
        );
        assert!(computed.compute.is_some());
    }

    #[test]
    fn test_unknown_and_missing_are_diagnostics() {
        let assumptions = Assumptions::from_yaml_str(DOC).unwrap();
        let raw = RawTable::new(vec![
            Field::scalar("extra", ColumnData::Int32(vec![1])),
            Field::scalar("flux_i", ColumnData::Float64(vec![1.0])),
        ]);
        let resolution = assumptions.resolve(raw, "dc2", &context()).unwrap();
        assert_eq!(
            resolution.diagnostics,
            vec![
                Diagnostic::UnknownField {
                    table: "forcedsource".into(),
                    field: "extra".into()
                },
                Diagnostic::MissingColumn {
                    table: "forcedsource".into(),
                    column: "objectId".into()
                },
            ]
        );
        let image = &resolution.tables[0];
        assert!(image.field("extra").is_none());
        assert!(image.field("ccdVisitId").is_some());

        assert!(matches!(
            resolution.into_strict(),
            Err(AssumptionsError::Unresolved(d)) if d.len() == 2
        ));
    }

    #[test]
    fn test_compute_without_row_count_fails() {
        let assumptions = Assumptions::from_yaml_str(DOC).unwrap();
        let err = assumptions
            .resolve(RawTable::default(), "dc2", &context())
            .unwrap_err();
        assert!(matches!(err, AssumptionsError::NoRowCount { .. }));
    }

    #[test]
    fn test_compute_error_names_column() {
        let assumptions = Assumptions::from_yaml_str(DOC).unwrap();
        let err = assumptions
            .resolve(raw(), "dc2", &Determiners::new().with("visit", 1))
            .unwrap_err();
        assert!(matches!(
            err,
            AssumptionsError::Compute { ref column, .. } if column == "ccdVisitId"
        ));
    }

    #[test]
    fn test_rejects_bad_declarations() {
        let two_primaries = r#"
tables:
  - table:
      name: t
      columns: [{column: {name: a}}]
      index:
        - {columns: [a], property: primary}
        - {columns: [a], property: primary}
"#;
        assert!(matches!(
            Assumptions::from_yaml_str(two_primaries),
            Err(AssumptionsError::Validation(_))
        ));

        let untyped_compute = "tables:\n  - table:\n      name: t\n      columns:\n        - column: {name: c, compute: [\"1\"]}\n";
        assert!(matches!(
            Assumptions::from_yaml_str(untyped_compute),
            Err(AssumptionsError::Validation(_))
        ));

        let bad_regex = "tables:\n  - table:\n      name: t\n      columns:\n        - column_group: {name_re: \"(\"}\n";
        assert!(matches!(
            Assumptions::from_yaml_str(bad_regex),
            Err(AssumptionsError::Validation(_))
        ));

        let empty_ignore = "ignores: [\"\"]\ntables:\n  - table:\n      name: t\n      columns: [{column: {name: a}}]\n";
        assert!(matches!(
            Assumptions::from_yaml_str(empty_ignore),
            Err(AssumptionsError::Validation(_))
        ));

        let bad_name = "tables:\n  - table:\n      name: t\n      columns:\n        - column: {name: \"a;b\"}\n";
        assert!(matches!(
            Assumptions::from_yaml_str(bad_name),
            Err(AssumptionsError::Identifier(_))
        ));

        assert!(matches!(
            Assumptions::from_yaml_str("ignores: []\n"),
            Err(AssumptionsError::Validation(_))
        ));
    }

    #[test]
    fn test_constraints_are_merged() {
        let text = r#"
tables:
  - table:
      name: forcedsource
      columns: [{column: {name: objectId}}]
      foreign:
        - {column: objectId, ref_table: object, ref_column: objectId}
constraints:
  - table: forcedsource
    foreign:
      - {column: objectId, ref_table: object, ref_column: objectId}
      - {column: ccdVisitId, ref_table: ccdvisit, ref_column: ccdVisitId}
"#;
        let assumptions = Assumptions::from_yaml_str(text).unwrap();
        let raw = RawTable::new(vec![Field::scalar("objectId", ColumnData::Int64(vec![1]))]);
        let resolution = assumptions.resolve(raw, "dc2", &Determiners::new()).unwrap();
        assert_eq!(resolution.tables[0].foreign_keys.len(), 2);
    }

    #[test]
    fn test_precision_double_exempts_field() {
        let text = r#"
tables:
  - table:
      name: t
      doubles: [ra]
      columns:
        - column: {name: ra}
        - column: {name: dec, precision: double}
        - column: {name: flux}
"#;
        let assumptions = Assumptions::from_yaml_str(text).unwrap();
        let raw = RawTable::new(vec![
            Field::scalar("ra", ColumnData::Float64(vec![1.0])),
            Field::scalar("dec", ColumnData::Float64(vec![1.0])),
            Field::scalar("flux", ColumnData::Float64(vec![1.0])),
        ]);
        let mut image = assumptions
            .resolve(raw, "dc2", &Determiners::new())
            .unwrap()
            .tables
            .remove(0);
        image.normalize_precision();
        let types: Vec<_> = image.fields.iter().map(|f| f.storage_type().unwrap()).collect();
        assert_eq!(
            types,
            vec![ScalarType::Float64, ScalarType::Float64, ScalarType::Float32]
        );
    }
}
