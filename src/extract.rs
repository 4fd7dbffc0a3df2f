//src/extract.rs

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::FormatError;
use crate::types::HeaderBlock;

pub type Row = Vec<String>;

/// Reads an exported text file, transparently un-gzipping `*.gz`.
///
/// Instrument software writes Latin-1 in places (`µL`), so invalid UTF-8 is
/// replaced rather than rejected.
pub fn read_export_text<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let path = path.as_ref();
    let f = File::open(path)?;
    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let mut reader: Box<dyn Read> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// True when every cell is empty after trimming (an empty row is blank too).
pub fn is_blank(row: &[String]) -> bool {
    row.iter().all(|field| field.trim().is_empty())
}

/// Index of the first non-blank row at or after `from`; `grid.len()` if none.
pub fn first_filled_row(grid: &[Row], from: usize) -> usize {
    grid.iter()
        .enumerate()
        .skip(from)
        .find(|(_, row)| !is_blank(row))
        .map(|(i, _)| i)
        .unwrap_or(grid.len())
}

/// Splits one line into cells. Quoting follows the usual CSV rules.
pub fn split_line(line: &str, delimiter: u8) -> Row {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => record.iter().map(str::to_string).collect(),
        // empty line, or a stray quote we cannot make sense of: keep the raw text
        Ok(false) => Vec::new(),
        Err(_) => vec![line.to_string()],
    }
}

/// Splits every line of `text`. Blank lines stay in place as blank rows so
/// that row offsets keep matching the file.
pub fn split_lines(text: &str, delimiter: u8) -> Vec<Row> {
    text.lines().map(|line| split_line(line, delimiter)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Outside,
    Inside,
}

/// A table lifted out of an export: header cells plus data rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RawTable {
    /// Uses row `skip_rows` of `grid` as the header and the non-blank rows after it as data.
    pub fn from_grid(grid: &[Row], skip_rows: usize) -> Result<RawTable, FormatError> {
        let header = grid
            .get(skip_rows)
            .ok_or(FormatError::NoTable { context: None })?;
        let rows: Vec<Row> = grid[skip_rows + 1..]
            .iter()
            .filter(|row| !is_blank(row))
            .cloned()
            .collect();
        if rows.is_empty() {
            return Err(FormatError::NoTable { context: None });
        }
        Ok(RawTable {
            columns: header.iter().map(|c| c.trim().to_string()).collect(),
            rows,
        })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// First column whose name starts with `prefix`; for headers whose units
    /// come out mangled by the exporter's encoding.
    pub fn column_with_prefix(&self, prefix: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.starts_with(prefix))
    }

    pub fn require(&self, name: &str, context: &str) -> Result<usize, FormatError> {
        self.column(name).ok_or_else(|| FormatError::MissingColumn {
            column: name.to_string(),
            context: context.to_string(),
        })
    }

    /// Cell text, or `""` for short rows.
    pub fn cell<'a>(row: &'a Row, idx: usize) -> &'a str {
        row.get(idx).map(String::as_str).unwrap_or("").trim()
    }
}

/// Locates the table that follows a line holding `start_flag` and stops at
/// the next blank line. With no flag the table starts on the first line.
/// The first captured row is the header.
pub fn extract_table<I, S>(lines: I, delimiter: u8, start_flag: Option<&str>) -> Result<RawTable, FormatError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut state = if start_flag.is_some() { Capture::Outside } else { Capture::Inside };
    let mut captured: Vec<Row> = Vec::new();

    for line in lines {
        let row = split_line(line.as_ref(), delimiter);
        if is_blank(&row) {
            state = Capture::Outside;
        }
        if state == Capture::Inside {
            captured.push(row);
            continue;
        }
        if let Some(flag) = start_flag {
            if row.iter().any(|cell| cell.trim() == flag) {
                state = Capture::Inside;
            }
        }
    }

    if captured.len() < 2 {
        return Err(FormatError::NoTable { context: start_flag.map(str::to_string) });
    }
    let header = captured.remove(0);
    Ok(RawTable {
        columns: header.iter().map(|c| c.trim().to_string()).collect(),
        rows: captured,
    })
}

/// Captures a metadata block for provenance.
///
/// Capture starts on the first row (no `flag`) or on the row containing
/// `flag`, and ends on the row containing `stop`, or on a blank row when no
/// `stop` is given. Each row is checked in this order: stop, then flag, then
/// append. A row holding both tokens is therefore captured and capture goes on.
pub fn extract_header(rows: &[Row], flag: Option<&str>, stop: Option<&str>) -> HeaderBlock {
    let mut state = if flag.is_some() { Capture::Outside } else { Capture::Inside };
    let mut head = Vec::new();

    for row in rows {
        let ends = match stop {
            Some(stop) => row.iter().any(|cell| cell.contains(stop)),
            None => is_blank(row),
        };
        if ends {
            state = Capture::Outside;
        }
        if let Some(flag) = flag {
            if row.iter().any(|cell| cell.contains(flag)) {
                state = Capture::Inside;
            }
        }
        if state == Capture::Inside {
            head.push(row.clone());
        }
    }
    HeaderBlock(head)
}

/// Groups raw lines into chunks separated by blank lines.
pub fn split_chunks(text: &str) -> Vec<Vec<String>> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line.to_string());
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn integer_like(cell: &str) -> bool {
    let cell = cell.trim();
    cell.parse::<i64>().is_ok() || cell.parse::<f64>().map(f64::is_finite).unwrap_or(false)
}

/// Repairs a table read at a fixed row offset whose real start drifted.
///
/// Rows whose first cell is not a well number are stray header lines: they
/// are dropped, and the last of them becomes the header.
pub fn recover_offset(table: RawTable) -> RawTable {
    let RawTable { mut columns, rows } = table;
    let mut kept = Vec::with_capacity(rows.len());
    let mut dropped = 0usize;

    for row in rows {
        if integer_like(RawTable::cell(&row, 0)) {
            kept.push(row);
        } else {
            columns = row.iter().map(|c| c.trim().to_string()).collect();
            dropped += 1;
        }
    }
    if dropped > 0 {
        log::debug!("Dropped {dropped} stray header row(s) above the results table");
    }
    RawTable { columns, rows: kept }
}
