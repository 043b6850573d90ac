//! Field model: one named column of resolved data
//!
//! A field carries its semantic kind (scalar, array, point, moments, ...),
//! its documentation and, once materialized, one [`ColumnData`] per physical
//! component. Compound fields "explode" into several physical columns when a
//! table is created or loaded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Elementary storage type of one physical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    /// Boolean flag
    #[serde(alias = "boolean")]
    Bool,
    /// 16-bit signed integer
    #[serde(alias = "smallint", alias = "int8", alias = "uint8")]
    Int16,
    /// 32-bit signed integer
    #[serde(alias = "int", alias = "integer", alias = "uint16")]
    Int32,
    /// 64-bit signed integer
    #[serde(alias = "bigint", alias = "long", alias = "uint32")]
    Int64,
    /// Single precision float
    #[serde(alias = "float", alias = "real")]
    Float32,
    /// Double precision float
    #[serde(alias = "double")]
    Float64,
    /// Free text
    #[serde(alias = "string", alias = "str")]
    Text,
}

impl ScalarType {
    /// SQL column type used in CREATE TABLE statements.
    pub fn sql_type(self) -> &'static str {
        match self {
            ScalarType::Bool => "Boolean",
            ScalarType::Int16 => "Smallint",
            ScalarType::Int32 => "Integer",
            ScalarType::Int64 => "Bigint",
            ScalarType::Float32 => "Real",
            ScalarType::Float64 => "Double precision",
            ScalarType::Text => "Text",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::Float32 | ScalarType::Float64)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::Bool => "bool",
            ScalarType::Int16 => "int16",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Float32 => "float32",
            ScalarType::Float64 => "float64",
            ScalarType::Text => "text",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ScalarType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bool" | "boolean" => Ok(ScalarType::Bool),
            "int8" | "uint8" | "int16" | "smallint" => Ok(ScalarType::Int16),
            "uint16" | "int32" | "int" | "integer" => Ok(ScalarType::Int32),
            "uint32" | "int64" | "bigint" | "long" => Ok(ScalarType::Int64),
            "float32" | "float" | "real" => Ok(ScalarType::Float32),
            "float64" | "double" => Ok(ScalarType::Float64),
            "text" | "string" | "str" => Ok(ScalarType::Text),
            _ => Err(format!("Unknown scalar type: {}", s)),
        }
    }
}

/// Values of one physical column, one entry per row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int16(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float32(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ColumnData::Bool(_) => ScalarType::Bool,
            ColumnData::Int16(_) => ScalarType::Int16,
            ColumnData::Int32(_) => ScalarType::Int32,
            ColumnData::Int64(_) => ScalarType::Int64,
            ColumnData::Float32(_) => ScalarType::Float32,
            ColumnData::Float64(_) => ScalarType::Float64,
            ColumnData::Text(_) => ScalarType::Text,
        }
    }

    fn to_i64s(&self) -> Option<Vec<i64>> {
        fn integral(x: f64) -> Option<i64> {
            (x.is_finite() && x.fract() == 0.0 && x.abs() < 9.2e18).then_some(x as i64)
        }
        match self {
            ColumnData::Bool(v) => Some(v.iter().map(|b| i64::from(*b)).collect()),
            ColumnData::Int16(v) => Some(v.iter().map(|x| i64::from(*x)).collect()),
            ColumnData::Int32(v) => Some(v.iter().map(|x| i64::from(*x)).collect()),
            ColumnData::Int64(v) => Some(v.clone()),
            ColumnData::Float32(v) => v.iter().map(|x| integral(f64::from(*x))).collect(),
            ColumnData::Float64(v) => v.iter().map(|x| integral(*x)).collect(),
            ColumnData::Text(v) => v.iter().map(|s| s.trim().parse().ok()).collect(),
        }
    }

    fn to_f64s(&self) -> Option<Vec<f64>> {
        match self {
            ColumnData::Float32(v) => Some(v.iter().map(|x| f64::from(*x)).collect()),
            ColumnData::Float64(v) => Some(v.clone()),
            ColumnData::Text(v) => v.iter().map(|s| s.trim().parse().ok()).collect(),
            // i64 -> f64 may round above 2^53, same as the server would
            other => other
                .to_i64s()
                .map(|ints| ints.into_iter().map(|x| x as f64).collect()),
        }
    }

    fn to_strings(&self) -> Vec<String> {
        match self {
            ColumnData::Bool(v) => v.iter().map(ToString::to_string).collect(),
            ColumnData::Int16(v) => v.iter().map(ToString::to_string).collect(),
            ColumnData::Int32(v) => v.iter().map(ToString::to_string).collect(),
            ColumnData::Int64(v) => v.iter().map(ToString::to_string).collect(),
            ColumnData::Float32(v) => v.iter().map(ToString::to_string).collect(),
            ColumnData::Float64(v) => v.iter().map(ToString::to_string).collect(),
            ColumnData::Text(v) => v.clone(),
        }
    }

    /// Convert to another storage type.
    ///
    /// Returns `None` if any value does not fit: out-of-range integers,
    /// fractional floats cast to integers, or unparseable text.
    pub fn cast(self, target: ScalarType) -> Option<ColumnData> {
        if self.scalar_type() == target {
            return Some(self);
        }
        Some(match target {
            ScalarType::Bool => ColumnData::Bool(self.to_i64s()?.into_iter().map(|x| x != 0).collect()),
            ScalarType::Int16 => ColumnData::Int16(
                self.to_i64s()?
                    .into_iter()
                    .map(|x| i16::try_from(x).ok())
                    .collect::<Option<_>>()?,
            ),
            ScalarType::Int32 => ColumnData::Int32(
                self.to_i64s()?
                    .into_iter()
                    .map(|x| i32::try_from(x).ok())
                    .collect::<Option<_>>()?,
            ),
            ScalarType::Int64 => ColumnData::Int64(self.to_i64s()?),
            ScalarType::Float32 => {
                ColumnData::Float32(self.to_f64s()?.into_iter().map(|x| x as f32).collect())
            }
            ScalarType::Float64 => ColumnData::Float64(self.to_f64s()?),
            ScalarType::Text => ColumnData::Text(self.to_strings()),
        })
    }

    /// Narrow a double precision column to single precision.
    ///
    /// Any other column is returned unchanged, so repeated calls are no-ops.
    pub fn into_single_precision(self) -> ColumnData {
        match self {
            ColumnData::Float64(values) => {
                ColumnData::Float32(values.into_iter().map(|v| v as f32).collect())
            }
            other => other,
        }
    }
}

/// Semantic kind of a field, deciding how it explodes into physical columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Scalar,
    Angle,
    /// Fixed-length array; explodes to `name0 .. name{n-1}`
    Array(usize),
    Point,
    Moments,
    Coord,
    CovMoments,
    CovPoint,
}

impl FieldKind {
    /// Suffixes appended to the field name, one per physical column.
    pub fn member_suffixes(self) -> Vec<String> {
        let named: &[&str] = match self {
            FieldKind::Scalar | FieldKind::Angle => return vec![String::new()],
            FieldKind::Array(n) => return (0..n).map(|i| i.to_string()).collect(),
            FieldKind::Point => &["x", "y"],
            FieldKind::Moments => &["11", "22", "12"],
            FieldKind::Coord => &["ra", "dec"],
            FieldKind::CovMoments => &["11_11", "11_22", "22_22", "11_12", "22_12", "12_12"],
            FieldKind::CovPoint => &["11", "12", "22"],
        };
        named.iter().map(|m| format!("_{}", m)).collect()
    }

    /// Number of physical columns the field explodes into.
    pub fn width(self) -> usize {
        match self {
            FieldKind::Scalar | FieldKind::Angle => 1,
            FieldKind::Array(n) => n,
            FieldKind::Point | FieldKind::Coord => 2,
            FieldKind::Moments | FieldKind::CovPoint => 3,
            FieldKind::CovMoments => 6,
        }
    }
}

impl std::str::FromStr for FieldKind {
    type Err = String;

    /// Parses the kind names written by the measurement pipeline
    /// (`Scalar`, `Point`, `Covariance(Moments)`, ...). Arrays need a length
    /// and are spelled `Array(n)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "Scalar" => Ok(FieldKind::Scalar),
            "Angle" => Ok(FieldKind::Angle),
            "Point" => Ok(FieldKind::Point),
            "Moments" => Ok(FieldKind::Moments),
            "Coord" => Ok(FieldKind::Coord),
            "Covariance(Moments)" => Ok(FieldKind::CovMoments),
            "Covariance(Point)" => Ok(FieldKind::CovPoint),
            other => {
                if let Some(len) = other
                    .strip_prefix("Array(")
                    .and_then(|rest| rest.strip_suffix(')'))
                {
                    return len
                        .parse()
                        .map(FieldKind::Array)
                        .map_err(|_| format!("Bad array length in field kind: {}", other));
                }
                Err(format!("Unknown field kind: {}", other))
            }
        }
    }
}

/// Errors raised while building a field from column data
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("Field {name}: kind needs {expected} components, got {actual}")]
    ComponentCount {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Field {name}: components have different lengths")]
    RaggedComponents { name: String },
    #[error("Field {name}: values cannot be stored as {target}")]
    Cast { name: String, target: ScalarType },
}

/// One named column of resolved data.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Column name as it appears in the input file
    pub name: String,
    /// Semantic kind
    pub kind: FieldKind,
    /// Physical unit, informational
    pub unit: String,
    /// Free text documentation
    pub doc: String,
    /// One entry per physical component; `None` until materialized
    pub data: Option<Vec<ColumnData>>,
    /// Postfix expression the data was computed from, if any
    pub compute: Option<Vec<String>>,
}

impl Field {
    /// Create a scalar field holding one column.
    pub fn scalar(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar,
            unit: String::new(),
            doc: String::new(),
            data: Some(vec![data]),
            compute: None,
        }
    }

    /// Create a compound field, checking that the components fit the kind.
    pub fn compound(
        name: impl Into<String>,
        kind: FieldKind,
        components: Vec<ColumnData>,
    ) -> Result<Self, FieldError> {
        let name = name.into();
        if components.len() != kind.width() {
            return Err(FieldError::ComponentCount {
                name,
                expected: kind.width(),
                actual: components.len(),
            });
        }
        if let Some(first) = components.first()
            && components.iter().any(|c| c.len() != first.len())
        {
            return Err(FieldError::RaggedComponents { name });
        }
        Ok(Self {
            name,
            kind,
            unit: String::new(),
            doc: String::new(),
            data: Some(components),
            compute: None,
        })
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = to_safe_doc(&doc.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Convert every component to `target`.
    pub fn cast(mut self, target: ScalarType) -> Result<Self, FieldError> {
        if let Some(components) = self.data.take() {
            let cast: Option<Vec<ColumnData>> =
                components.into_iter().map(|c| c.cast(target)).collect();
            match cast {
                Some(components) => self.data = Some(components),
                None => {
                    return Err(FieldError::Cast {
                        name: self.name,
                        target,
                    });
                }
            }
        }
        Ok(self)
    }

    /// Number of rows, if the field has been materialized.
    pub fn row_count(&self) -> Option<usize> {
        self.data
            .as_ref()
            .and_then(|components| components.first())
            .map(ColumnData::len)
    }

    /// Storage type of the field's components, if materialized.
    pub fn storage_type(&self) -> Option<ScalarType> {
        self.data
            .as_ref()
            .and_then(|components| components.first())
            .map(ColumnData::scalar_type)
    }

    /// Names of the physical columns this field explodes into.
    pub fn member_names(&self) -> Vec<String> {
        self.kind
            .member_suffixes()
            .into_iter()
            .map(|suffix| format!("{}{}", self.name, suffix))
            .collect()
    }
}

/// Make a documentation string safe to embed in HTML.
pub fn to_safe_doc(doc: &str) -> String {
    let mut out = String::with_capacity(doc.len());
    for c in doc.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_names_for_compound_kinds() {
        let point = Field::compound(
            "centroid",
            FieldKind::Point,
            vec![ColumnData::Float64(vec![1.0]), ColumnData::Float64(vec![2.0])],
        )
        .unwrap();
        assert_eq!(point.member_names(), vec!["centroid_x", "centroid_y"]);

        let array = Field::compound(
            "flux",
            FieldKind::Array(3),
            vec![
                ColumnData::Float32(vec![1.0]),
                ColumnData::Float32(vec![2.0]),
                ColumnData::Float32(vec![3.0]),
            ],
        )
        .unwrap();
        assert_eq!(array.member_names(), vec!["flux0", "flux1", "flux2"]);

        let scalar = Field::scalar("objectId", ColumnData::Int64(vec![7]));
        assert_eq!(scalar.member_names(), vec!["objectId"]);
    }

    #[test]
    fn test_compound_rejects_wrong_width() {
        let err = Field::compound(
            "shape",
            FieldKind::Moments,
            vec![ColumnData::Float64(vec![1.0])],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FieldError::ComponentCount {
                expected: 3,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_compound_rejects_ragged_components() {
        let err = Field::compound(
            "pos",
            FieldKind::Coord,
            vec![
                ColumnData::Float64(vec![1.0, 2.0]),
                ColumnData::Float64(vec![1.0]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, FieldError::RaggedComponents { .. }));
    }

    #[test]
    fn test_single_precision_is_idempotent() {
        let once = ColumnData::Float64(vec![0.5, 1.25]).into_single_precision();
        assert_eq!(once, ColumnData::Float32(vec![0.5, 1.25]));
        let twice = once.clone().into_single_precision();
        assert_eq!(once, twice);
        let ints = ColumnData::Int32(vec![1]).into_single_precision();
        assert_eq!(ints.scalar_type(), ScalarType::Int32);
    }

    #[test]
    fn test_field_kind_from_str() {
        assert_eq!("Point".parse::<FieldKind>().unwrap(), FieldKind::Point);
        assert_eq!(
            "Covariance(Moments)".parse::<FieldKind>().unwrap(),
            FieldKind::CovMoments
        );
        assert_eq!(
            "Array(4)".parse::<FieldKind>().unwrap(),
            FieldKind::Array(4)
        );
        assert!("Array(x)".parse::<FieldKind>().is_err());
        assert!("Blob".parse::<FieldKind>().is_err());
    }

    #[test]
    fn test_scalar_type_names() {
        assert_eq!("double".parse::<ScalarType>().unwrap(), ScalarType::Float64);
        assert_eq!("INT".parse::<ScalarType>().unwrap(), ScalarType::Int32);
        assert_eq!(ScalarType::Float32.sql_type(), "Real");
        assert_eq!(ScalarType::Int64.sql_type(), "Bigint");
    }

    #[test]
    fn test_cast() {
        assert_eq!(
            ColumnData::Int32(vec![1, 2]).cast(ScalarType::Int64),
            Some(ColumnData::Int64(vec![1, 2]))
        );
        assert_eq!(ColumnData::Int64(vec![70000]).cast(ScalarType::Int16), None);
        assert_eq!(ColumnData::Float64(vec![1.5]).cast(ScalarType::Int32), None);
        assert_eq!(
            ColumnData::Text(vec!["3".into()]).cast(ScalarType::Float64),
            Some(ColumnData::Float64(vec![3.0]))
        );
        assert_eq!(
            ColumnData::Int16(vec![7]).cast(ScalarType::Text),
            Some(ColumnData::Text(vec!["7".into()]))
        );

        let field = Field::scalar("flags", ColumnData::Int64(vec![0, 1]));
        let cast = field.cast(ScalarType::Bool).unwrap();
        assert_eq!(cast.storage_type(), Some(ScalarType::Bool));
        let err = Field::scalar("name", ColumnData::Text(vec!["x".into()]))
            .cast(ScalarType::Int32)
            .unwrap_err();
        assert!(matches!(err, FieldError::Cast { .. }));
    }

    #[test]
    fn test_safe_doc() {
        assert_eq!(to_safe_doc("a<b & c>d"), "a&lt;b &amp; c&gt;d");
    }
}
