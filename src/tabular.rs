//! Delimited tabular files: the on-disk format shared by every store.
//!
//! Files are semicolon-separated UTF-8 with a leading byte-order marker and CRLF
//! record separators. Reading is lenient: rows with missing cells read as empty
//! strings and surplus cells are dropped, so a malformed row never fails a load.
//! Every rewrite goes through a temporary file in the same directory and is then
//! renamed over the original. A [`SourceTable`] rewrite re-emits the rows it did
//! not edit as their original text.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;
use tempfile::NamedTempFile;

use crate::error::StaffbookError;

pub const DELIMITER: char = ';';
const BOM: char = '\u{feff}';
const RECORD_END: &str = "\r\n";

/// One data row keyed by column name.
pub type Row = HashMap<String, String>;

/// A file's own header together with its rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Row>,
}

pub struct TabularFile;

impl TabularFile {
    /// Reads a file under its on-disk header. `Ok(None)` if the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Table>, StaffbookError> {
        Ok(Self::read_source(path)?.map(SourceTable::into_table))
    }

    /// Like [`TabularFile::read`], but keeps the source text of every row so
    /// [`TabularFile::write_source`] can re-emit untouched rows exactly.
    pub fn read_source(path: &Path) -> Result<Option<SourceTable>, StaffbookError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut records = Self::parse(&text).into_iter();
        let (header, header_text) = match records.next() {
            Some((cells, source)) => (
                cells.into_iter().map(|c| c.trim().to_owned()).collect::<Vec<_>>(),
                source.to_owned(),
            ),
            None => return Ok(Some(SourceTable::default())),
        };

        let mut rows = Vec::new();
        let mut row_text = Vec::new();
        for (index, (cells, source)) in records.enumerate() {
            if cells.len() > header.len() {
                debug!(
                    "{}: row {} has {} cells for {} columns, dropping the surplus",
                    path.display(),
                    index + 1,
                    cells.len(),
                    header.len()
                );
            }
            let mut row = Row::with_capacity(header.len());
            let mut cells = cells.into_iter();
            for column in &header {
                let value = cells.next().unwrap_or_default();
                row.entry(column.clone()).or_insert(value);
            }
            rows.push(row);
            row_text.push(source.to_owned());
        }

        Ok(Some(SourceTable {
            edited: vec![false; rows.len()],
            table: Table { header, rows },
            header_text,
            row_text,
        }))
    }

    /// Reads only the header line of a file.
    pub fn read_header(path: &Path) -> Result<Option<Vec<String>>, StaffbookError> {
        Ok(Self::read(path)?.map(|table| table.header))
    }

    /// Reads a file and normalizes every row to exactly `columns`: absent columns
    /// become empty strings and columns outside the declared set are discarded.
    pub fn read_normalized(
        path: &Path,
        columns: &[String],
    ) -> Result<Option<Vec<Row>>, StaffbookError> {
        let table = match Self::read(path)? {
            Some(table) => table,
            None => return Ok(None),
        };

        let rows = table
            .rows
            .into_iter()
            .map(|mut row| {
                columns
                    .iter()
                    .map(|column| (column.clone(), row.remove(column).unwrap_or_default()))
                    .collect()
            })
            .collect();

        Ok(Some(rows))
    }

    /// Rewrites the whole file with `columns` as the header. Row keys outside
    /// `columns` are not written; missing keys are written as empty cells.
    pub fn write(path: &Path, columns: &[String], rows: &[Row]) -> Result<(), StaffbookError> {
        let mut out = String::new();
        out.push(BOM);
        Self::push_record(&mut out, columns.iter().map(String::as_str));
        for row in rows {
            Self::push_record(
                &mut out,
                columns
                    .iter()
                    .map(|c| row.get(c).map(String::as_str).unwrap_or("")),
            );
        }

        Self::persist(path, &out)
    }

    /// Rewrites a file read with [`TabularFile::read_source`]. The header and every
    /// row that was not edited are written back as their original text; edited
    /// rows are encoded under the file's header.
    pub fn write_source(path: &Path, source: &SourceTable) -> Result<(), StaffbookError> {
        let mut out = String::new();
        out.push(BOM);
        Self::push_source(&mut out, &source.header_text);
        for (index, row) in source.table.rows.iter().enumerate() {
            if source.edited[index] {
                Self::push_record(
                    &mut out,
                    source
                        .table
                        .header
                        .iter()
                        .map(|c| row.get(c).map(String::as_str).unwrap_or("")),
                );
            } else {
                Self::push_source(&mut out, &source.row_text[index]);
            }
        }
        Self::persist(path, &out)
    }

    /// Appends one row in the column order of the file's existing header. A missing
    /// or empty file is created with `columns` as its header.
    pub fn append(path: &Path, columns: &[String], row: &Row) -> Result<(), StaffbookError> {
        let header = match Self::read_header(path)? {
            Some(header) if !header.is_empty() => header,
            _ => return Self::write(path, columns, std::slice::from_ref(row)),
        };

        let mut file = OpenOptions::new().read(true).append(true).open(path)?;

        // A file written by hand may lack the final record separator
        let mut needs_separator = false;
        if file.metadata()?.len() > 0 {
            file.seek(SeekFrom::End(-1))?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last)?;
            needs_separator = last[0] != b'\n';
        }

        let mut line = String::new();
        if needs_separator {
            line.push_str(RECORD_END);
        }
        Self::push_record(
            &mut line,
            header
                .iter()
                .map(|c| row.get(c).map(String::as_str).unwrap_or("")),
        );
        file.write_all(line.as_bytes())?;

        Ok(())
    }

    fn persist(path: &Path, contents: &str) -> Result<(), StaffbookError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StaffbookError::IoError(e.error))?;

        Ok(())
    }

    // Source text keeps its own record separator; the last record may lack one
    fn push_source(out: &mut String, text: &str) {
        out.push_str(text);
        if !text.ends_with(['\n', '\r']) {
            out.push_str(RECORD_END);
        }
    }

    fn push_record<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
        for (i, cell) in cells.enumerate() {
            if i > 0 {
                out.push(DELIMITER);
            }
            out.push_str(&Self::encode_cell(cell));
        }
        out.push_str(RECORD_END);
    }

    fn encode_cell(cell: &str) -> Cow<'_, str> {
        if cell.contains([DELIMITER, '"', '\r', '\n']) {
            Cow::Owned(format!("\"{}\"", cell.replace('"', "\"\"")))
        } else {
            Cow::Borrowed(cell)
        }
    }

    /// Splits text into records of cells, each with its source text including the
    /// record separator. Quoted cells may hold delimiters, doubled quotes and line
    /// breaks. Blank lines are skipped.
    fn parse(text: &str) -> Vec<(Vec<String>, &str)> {
        let text = text.strip_prefix(BOM).unwrap_or(text);

        let mut records = Vec::new();
        let mut record: Vec<String> = Vec::new();
        let mut cell = String::new();
        let mut in_quotes = false;
        let mut start = 0;
        let mut chars = text.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            if in_quotes {
                match c {
                    '"' if chars.peek().map(|&(_, next)| next) == Some('"') => {
                        cell.push('"');
                        chars.next();
                    }
                    '"' => in_quotes = false,
                    _ => cell.push(c),
                }
                continue;
            }

            match c {
                '"' => in_quotes = true,
                DELIMITER => record.push(std::mem::take(&mut cell)),
                '\r' if chars.peek().map(|&(_, next)| next) == Some('\n') => {}
                '\n' | '\r' => {
                    record.push(std::mem::take(&mut cell));
                    let end = pos + c.len_utf8();
                    let source = &text[start..end];
                    Self::finish_record(&mut records, std::mem::take(&mut record), source);
                    start = end;
                }
                _ => cell.push(c),
            }
        }

        if !cell.is_empty() || !record.is_empty() {
            record.push(cell);
            Self::finish_record(&mut records, record, &text[start..]);
        }

        records
    }

    fn finish_record<'t>(
        records: &mut Vec<(Vec<String>, &'t str)>,
        record: Vec<String>,
        source: &'t str,
    ) {
        let blank = record.len() == 1 && record[0].trim().is_empty();
        if !blank {
            records.push((record, source));
        }
    }
}

/// A table read together with the text it was parsed from.
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    table: Table,
    header_text: String,
    row_text: Vec<String>,
    edited: Vec<bool>,
}

impl SourceTable {
    pub fn header(&self) -> &[String] {
        &self.table.header
    }

    pub fn rows(&self) -> &[Row] {
        &self.table.rows
    }

    /// Runs `edit` on every row. Rows for which it returns true are marked as
    /// edited. Returns the number of rows marked by this call.
    pub fn edit_rows<F>(&mut self, mut edit: F) -> usize
    where
        F: FnMut(&mut Row) -> bool,
    {
        let mut changed = 0;
        for (row, edited) in self.table.rows.iter_mut().zip(self.edited.iter_mut()) {
            if edit(row) {
                *edited = true;
                changed += 1;
            }
        }
        changed
    }

    pub fn into_table(self) -> Table {
        self.table
    }
}

/// Builds a `Row` from `(column, value)` pairs.
pub fn row_of<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Row
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

pub fn columns_of(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}
