//! Parquet input files
//!
//! Each Arrow column becomes one [`Field`]. Fixed-size list columns are
//! compound fields; their kind comes from the column's `kind` metadata
//! (`Point`, `Covariance(Moments)`, ...) and defaults to `Array(n)`. The
//! `doc` and `unit` metadata entries are carried over.
//!
//! Unsigned integers are widened to the next signed type. Nulls in float
//! columns read as NaN; nulls anywhere else are an error.

use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use arrow::array::{Array, ArrayRef, AsArray, PrimitiveArray};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Field as ArrowField, Float32Type, Float64Type, Int8Type,
    Int16Type, Int32Type, Int64Type, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};
use std::fs::File;
use std::path::Path;
use tracing::debug;

use super::{RawTableReader, ReadError, ReadResult};
use crate::models::{ColumnData, Field, FieldKind, RawTable};

/// Reads Parquet files with the `parquet` crate's Arrow reader.
#[derive(Debug, Clone, Default)]
pub struct ParquetReader {
    batch_size: Option<usize>,
}

impl ParquetReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

impl RawTableReader for ParquetReader {
    fn read(&self, path: &Path) -> ReadResult<RawTable> {
        let format_err = |e: &dyn std::fmt::Display| ReadError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let file = File::open(path).map_err(|e| ReadError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut builder =
            ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| format_err(&e))?;
        if let Some(batch_size) = self.batch_size {
            builder = builder.with_batch_size(batch_size);
        }
        let arrow_schema = builder.schema().clone();
        let reader = builder.build().map_err(|e| format_err(&e))?;

        let mut columns: Vec<Vec<ColumnData>> = vec![Vec::new(); arrow_schema.fields().len()];
        let mut batches = 0usize;
        for batch in reader {
            let batch = batch.map_err(|e| format_err(&e))?;
            for ((arrow_field, array), components) in arrow_schema
                .fields()
                .iter()
                .zip(batch.columns())
                .zip(columns.iter_mut())
            {
                let values = read_components(arrow_field.name(), array)?;
                if components.is_empty() {
                    *components = values;
                    continue;
                }
                for (into, more) in components.iter_mut().zip(values) {
                    if !append(into, more) {
                        return Err(ReadError::Inconsistent {
                            field: arrow_field.name().clone(),
                        });
                    }
                }
            }
            batches += 1;
        }
        debug!("Read {} record batches from {}", batches, path.display());

        let mut table = RawTable::default();
        for (arrow_field, components) in arrow_schema.fields().iter().zip(columns) {
            let components = if components.is_empty() {
                empty_components(arrow_field)?
            } else {
                components
            };
            table.push(to_field(arrow_field, components)?);
        }
        Ok(table)
    }
}

fn to_field(arrow_field: &ArrowField, components: Vec<ColumnData>) -> ReadResult<Field> {
    let metadata = arrow_field.metadata();
    let kind = match metadata.get("kind") {
        Some(kind) => kind.parse::<FieldKind>().map_err(|_| ReadError::UnsupportedType {
            field: arrow_field.name().clone(),
            data_type: kind.clone(),
        })?,
        None if matches!(arrow_field.data_type(), DataType::FixedSizeList(_, _)) => {
            FieldKind::Array(components.len())
        }
        None => FieldKind::Scalar,
    };

    let mut field = Field::compound(arrow_field.name().clone(), kind, components)?;
    if let Some(doc) = metadata.get("doc") {
        field = field.with_doc(doc.as_str());
    }
    if let Some(unit) = metadata.get("unit") {
        field = field.with_unit(unit.as_str());
    }
    Ok(field)
}

/// Zero-row components for a file without record batches.
fn empty_components(arrow_field: &ArrowField) -> ReadResult<Vec<ColumnData>> {
    let (element, width) = match arrow_field.data_type() {
        DataType::FixedSizeList(inner, width) => (inner.data_type(), *width as usize),
        other => (other, 1),
    };
    let empty = arrow::array::new_empty_array(element);
    let data = scalar_values(arrow_field.name(), &empty)?;
    Ok(vec![data; width])
}

fn read_components(name: &str, array: &ArrayRef) -> ReadResult<Vec<ColumnData>> {
    match array.data_type() {
        DataType::FixedSizeList(_, width) => {
            let list = array.as_fixed_size_list();
            if list.null_count() > 0 {
                return Err(ReadError::Nulls {
                    field: name.to_string(),
                });
            }
            let width = *width as usize;
            if width == 0 {
                return Err(ReadError::UnsupportedType {
                    field: name.to_string(),
                    data_type: array.data_type().to_string(),
                });
            }
            let values = scalar_values(name, list.values())?;
            Ok(split_components(values, width))
        }
        _ => Ok(vec![scalar_values(name, array)?]),
    }
}

fn no_nulls<T: ArrowPrimitiveType>(name: &str, array: &PrimitiveArray<T>) -> ReadResult<Vec<T::Native>> {
    if array.null_count() > 0 {
        return Err(ReadError::Nulls {
            field: name.to_string(),
        });
    }
    Ok(array.values().to_vec())
}

fn scalar_values(name: &str, array: &ArrayRef) -> ReadResult<ColumnData> {
    let data = match array.data_type() {
        DataType::Boolean => {
            let values = array.as_boolean();
            if values.null_count() > 0 {
                return Err(ReadError::Nulls {
                    field: name.to_string(),
                });
            }
            ColumnData::Bool(values.values().iter().collect())
        }
        DataType::Int8 => ColumnData::Int16(
            no_nulls(name, array.as_primitive::<Int8Type>())?
                .into_iter()
                .map(i16::from)
                .collect(),
        ),
        DataType::UInt8 => ColumnData::Int16(
            no_nulls(name, array.as_primitive::<UInt8Type>())?
                .into_iter()
                .map(i16::from)
                .collect(),
        ),
        DataType::Int16 => ColumnData::Int16(no_nulls(name, array.as_primitive::<Int16Type>())?),
        DataType::UInt16 => ColumnData::Int32(
            no_nulls(name, array.as_primitive::<UInt16Type>())?
                .into_iter()
                .map(i32::from)
                .collect(),
        ),
        DataType::Int32 => ColumnData::Int32(no_nulls(name, array.as_primitive::<Int32Type>())?),
        DataType::UInt32 => ColumnData::Int64(
            no_nulls(name, array.as_primitive::<UInt32Type>())?
                .into_iter()
                .map(i64::from)
                .collect(),
        ),
        DataType::Int64 => ColumnData::Int64(no_nulls(name, array.as_primitive::<Int64Type>())?),
        DataType::UInt64 => ColumnData::Int64(
            no_nulls(name, array.as_primitive::<UInt64Type>())?
                .into_iter()
                .map(i64::try_from)
                .collect::<Result<_, _>>()
                .map_err(|_| ReadError::Overflow {
                    field: name.to_string(),
                })?,
        ),
        DataType::Float32 => ColumnData::Float32(
            array
                .as_primitive::<Float32Type>()
                .iter()
                .map(|v| v.unwrap_or(f32::NAN))
                .collect(),
        ),
        DataType::Float64 => ColumnData::Float64(
            array
                .as_primitive::<Float64Type>()
                .iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect(),
        ),
        DataType::Utf8 => text_values(name, array.as_string::<i32>().iter())?,
        DataType::LargeUtf8 => text_values(name, array.as_string::<i64>().iter())?,
        other => {
            return Err(ReadError::UnsupportedType {
                field: name.to_string(),
                data_type: other.to_string(),
            });
        }
    };
    Ok(data)
}

fn text_values<'a>(
    name: &str,
    values: impl Iterator<Item = Option<&'a str>>,
) -> ReadResult<ColumnData> {
    values
        .map(|v| {
            v.map(str::to_string).ok_or_else(|| ReadError::Nulls {
                field: name.to_string(),
            })
        })
        .collect::<ReadResult<Vec<_>>>()
        .map(ColumnData::Text)
}

/// De-interleave row-major list values into `width` component columns.
fn split_components(data: ColumnData, width: usize) -> Vec<ColumnData> {
    fn split<T: Clone>(values: Vec<T>, width: usize) -> Vec<Vec<T>> {
        (0..width)
            .map(|j| values.iter().skip(j).step_by(width).cloned().collect())
            .collect()
    }
    match data {
        ColumnData::Bool(v) => split(v, width).into_iter().map(ColumnData::Bool).collect(),
        ColumnData::Int16(v) => split(v, width).into_iter().map(ColumnData::Int16).collect(),
        ColumnData::Int32(v) => split(v, width).into_iter().map(ColumnData::Int32).collect(),
        ColumnData::Int64(v) => split(v, width).into_iter().map(ColumnData::Int64).collect(),
        ColumnData::Float32(v) => split(v, width).into_iter().map(ColumnData::Float32).collect(),
        ColumnData::Float64(v) => split(v, width).into_iter().map(ColumnData::Float64).collect(),
        ColumnData::Text(v) => split(v, width).into_iter().map(ColumnData::Text).collect(),
    }
}

/// Append `more` to `into`; false if the types differ.
fn append(into: &mut ColumnData, more: ColumnData) -> bool {
    match (into, more) {
        (ColumnData::Bool(a), ColumnData::Bool(b)) => a.extend(b),
        (ColumnData::Int16(a), ColumnData::Int16(b)) => a.extend(b),
        (ColumnData::Int32(a), ColumnData::Int32(b)) => a.extend(b),
        (ColumnData::Int64(a), ColumnData::Int64(b)) => a.extend(b),
        (ColumnData::Float32(a), ColumnData::Float32(b)) => a.extend(b),
        (ColumnData::Float64(a), ColumnData::Float64(b)) => a.extend(b),
        (ColumnData::Text(a), ColumnData::Text(b)) => a.extend(b),
        _ => return false,
    }
    true
}
