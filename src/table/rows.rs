//! Row-oriented load payload
//!
//! A [`RowStream`] owns the exploded physical columns of one table image and
//! encodes them into the PostgreSQL COPY text format: one line per row,
//! cells separated by tabs. Rows can be encoded all at once (buffered
//! loading) or in chunks (pipelined loading); both paths go through
//! [`RowStream::encode_rows`], so they produce identical bytes.

use bytes::Bytes;
use std::fmt;
use std::io::Write;
use std::ops::Range;

use crate::models::ColumnData;

/// How one cell of a column is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFormat {
    /// `1` / `0`
    Bool,
    /// Decimal integer
    Int,
    /// Exponent form with 8 fractional digits
    Float32,
    /// Exponent form with 16 fractional digits
    Float64,
    /// Text escaped for COPY
    Text,
}

impl CellFormat {
    pub fn for_column(data: &ColumnData) -> Self {
        match data {
            ColumnData::Bool(_) => CellFormat::Bool,
            ColumnData::Int16(_) | ColumnData::Int32(_) | ColumnData::Int64(_) => CellFormat::Int,
            ColumnData::Float32(_) => CellFormat::Float32,
            ColumnData::Float64(_) => CellFormat::Float64,
            ColumnData::Text(_) => CellFormat::Text,
        }
    }

    /// printf-style template, shown in dry-run previews.
    pub fn template(self) -> &'static str {
        match self {
            CellFormat::Bool | CellFormat::Int => "%d",
            CellFormat::Float32 => "%.8e",
            CellFormat::Float64 => "%.16e",
            CellFormat::Text => "%s",
        }
    }
}

impl fmt::Display for CellFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template())
    }
}

/// One physical column: `(name, format, data)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowColumn {
    pub name: String,
    pub format: CellFormat,
    pub data: ColumnData,
}

impl RowColumn {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            format: CellFormat::for_column(&data),
            data,
        }
    }

    fn write_cell(&self, row: usize, out: &mut Vec<u8>) {
        // Writes into a Vec<u8> cannot fail
        let _ = match &self.data {
            ColumnData::Bool(v) => write!(out, "{}", u8::from(v[row])),
            ColumnData::Int16(v) => write!(out, "{}", v[row]),
            ColumnData::Int32(v) => write!(out, "{}", v[row]),
            ColumnData::Int64(v) => write!(out, "{}", v[row]),
            ColumnData::Float32(v) => write!(out, "{:.8e}", v[row]),
            ColumnData::Float64(v) => write!(out, "{:.16e}", v[row]),
            ColumnData::Text(v) => {
                escape_copy_text(&v[row], out);
                Ok(())
            }
        };
    }
}

fn escape_copy_text(text: &str, out: &mut Vec<u8>) {
    for b in text.bytes() {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            other => out.push(other),
        }
    }
}

/// Exploded columns of one table image, ready to encode.
///
/// All columns have the same length; [`TableImage::into_row_stream`]
/// checks this before building the stream.
///
/// [`TableImage::into_row_stream`]: super::TableImage::into_row_stream
#[derive(Debug, Clone, PartialEq)]
pub struct RowStream {
    columns: Vec<RowColumn>,
    rows: usize,
}

impl RowStream {
    pub(crate) fn new(columns: Vec<RowColumn>, rows: usize) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[RowColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Tab-separated row template, e.g. `%d\t%.8e\t%s\n`.
    pub fn template(&self) -> String {
        let cells: Vec<&str> = self.columns.iter().map(|c| c.format.template()).collect();
        format!("{}\n", cells.join("\t"))
    }

    /// Encode a range of rows. Out-of-range rows are clamped away.
    pub fn encode_rows(&self, rows: Range<usize>) -> Bytes {
        let end = rows.end.min(self.rows);
        let start = rows.start.min(end);
        let mut out = Vec::with_capacity((end - start) * self.columns.len() * 12);
        for row in start..end {
            for (i, column) in self.columns.iter().enumerate() {
                if i > 0 {
                    out.push(b'\t');
                }
                column.write_cell(row, &mut out);
            }
            out.push(b'\n');
        }
        Bytes::from(out)
    }

    /// Encode every row into one buffer.
    pub fn encode_all(&self) -> Bytes {
        self.encode_rows(0..self.rows)
    }

    /// Iterate over encoded chunks of at most `chunk_rows` rows each.
    pub fn chunks(&self, chunk_rows: usize) -> impl Iterator<Item = Bytes> + '_ {
        let step = chunk_rows.max(1);
        (0..self.rows)
            .step_by(step)
            .map(move |start| self.encode_rows(start..start + step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowStream {
        RowStream::new(
            vec![
                RowColumn::new("id", ColumnData::Int64(vec![1, 2, 3])),
                RowColumn::new("flag", ColumnData::Bool(vec![true, false, true])),
                RowColumn::new("flux", ColumnData::Float32(vec![0.5, 1.0, -2.0])),
                RowColumn::new(
                    "note",
                    ColumnData::Text(vec!["a\tb".into(), "c\\d".into(), "e\nf".into()]),
                ),
            ],
            3,
        )
    }

    #[test]
    fn test_encode_formats() {
        let bytes = sample().encode_rows(0..1);
        assert_eq!(&bytes[..], b"1\t1\t5.00000000e-1\ta\\tb\n");
    }

    #[test]
    fn test_float64_uses_16_digits() {
        let stream = RowStream::new(vec![RowColumn::new("x", ColumnData::Float64(vec![1.0]))], 1);
        assert_eq!(&stream.encode_all()[..], b"1.0000000000000000e0\n");
    }

    #[test]
    fn test_chunks_match_buffer() {
        let stream = sample();
        let whole = stream.encode_all();
        for chunk_rows in [1, 2, 3, 10] {
            let joined: Vec<u8> = stream.chunks(chunk_rows).flat_map(|c| c.to_vec()).collect();
            assert_eq!(joined, whole.to_vec());
        }
    }

    #[test]
    fn test_template() {
        assert_eq!(sample().template(), "%d\t%d\t%.8e\t%s\n");
        assert_eq!(sample().column_names(), vec!["id", "flag", "flux", "note"]);
    }

    #[test]
    fn test_empty_stream() {
        let stream = RowStream::new(vec![RowColumn::new("id", ColumnData::Int64(vec![]))], 0);
        assert!(stream.encode_all().is_empty());
        assert_eq!(stream.chunks(4).count(), 0);
    }
}
