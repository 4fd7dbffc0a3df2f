//src/parse/rotorgene.rs

use std::path::{Path, PathBuf};

use crate::config::{Division, ReporterMap, RunSettings};
use crate::error::{FormatError, MismatchError, QpcrResult};
use crate::extract::{extract_header, first_filled_row, read_export_text, split_lines, RawTable};
use crate::types::{HeaderBlock, Measurement, PartialTable, ReporterRow, WellInfo, WellKey};

use super::{parse_cq, parse_separated, ParsedRun};

/// The quantitation table header sits on this (0-based) line of every channel export.
pub const HEADER_LINE: usize = 27;
/// Metadata runs from the top of the file until this token.
pub const HEADER_STOP: &str = "Quantitative";

/// One Rotor-Gene Q channel export, read into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct RotorGeneFile {
    pub path: PathBuf,
    pub text: String,
}

impl RotorGeneFile {
    pub fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        Ok(Self { path: path.to_path_buf(), text: read_export_text(path)? })
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

/// A channel file belongs to a reporter when its name contains
/// `<channel>.csv` or `<display name>.csv`.
fn matching_reporters<'a>(file_name: &str, reporters: &'a ReporterMap) -> Vec<&'a str> {
    reporters
        .channels()
        .iter()
        .filter(|(id, name)| file_name.contains(&format!("{id}.csv")) || file_name.contains(&format!("{name}.csv")))
        .map(|(id, _)| id.as_str())
        .collect()
}

struct ChannelTable<'a> {
    file: &'a RotorGeneFile,
    grid: Vec<Vec<String>>,
    table: RawTable,
    reporter: Option<&'a str>,
}

/// Parses one export per reporter channel. Partial tables come back in the
/// order the files were selected.
pub fn parse(files: &[RotorGeneFile], reporters: &ReporterMap, settings: &RunSettings) -> QpcrResult<ParsedRun> {
    if files.len() != reporters.len() {
        return Err(MismatchError::FileCount { expected: reporters.len(), found: files.len() }.into());
    }

    let mut channels = Vec::with_capacity(files.len());
    for file in files {
        let grid = split_lines(&file.text, b',');
        // blank lines after the fixed offset are skipped, not taken as the header
        let header_row = first_filled_row(&grid, HEADER_LINE);
        let table = RawTable::from_grid(&grid, header_row).map_err(|_| FormatError::NoTable {
            context: Some(file.file_name()),
        })?;
        // only a Rotor-Gene quantitation export has a Ct column
        let context = format!("Rotor-Gene export {}", file.file_name());
        table.require("Ct", &context)?;

        let matches = matching_reporters(&file.file_name(), reporters);
        let reporter = match matches.as_slice() {
            [one] => Some(*one),
            _ => None,
        };
        channels.push(ChannelTable { file, grid, table, reporter });
    }

    // The count already matched, so compare the files actually used, by
    // identity, to catch renamed or swapped files.
    let mut selected: Vec<String> = channels.iter().map(|c| c.file.file_name()).collect();
    let mut used: Vec<String> = channels
        .iter()
        .filter(|c| c.reporter.is_some())
        .map(|c| c.file.file_name())
        .collect();
    selected.sort();
    used.sort();
    if selected != used {
        return Err(MismatchError::Files { expected: selected, found: used }.into());
    }
    let mut matched: Vec<String> = channels.iter().filter_map(|c| c.reporter.map(str::to_string)).collect();
    matched.sort();
    if matched != reporters.sorted_ids() {
        return Err(MismatchError::Reporters { expected: reporters.sorted_ids(), found: matched }.into());
    }

    let cutoff = settings.thresholds.cq_cutoff;
    let mut partials = Vec::with_capacity(channels.len());
    let mut header = HeaderBlock::default();

    for (i, channel) in channels.iter().enumerate() {
        let Some(reporter) = channel.reporter else {
            continue;
        };
        let table = &channel.table;
        let context = format!("Rotor-Gene export {}", channel.file.file_name());
        let well_col = table.require("No.", &context)?;
        let name_col = table.require("Name", &context)?;
        let ct_col = table.require("Ct", &context)?;
        let comment_col = table.column("Ct Comment");
        let copies_col = table.column("Given Conc (copies/reaction)");
        let quantity_col = match settings.division {
            Division::Hiv => Some(table.require("Quantity", &context)?),
            Division::Vhf => None,
        };

        let optional_text = |row: &Vec<String>, col: Option<usize>| {
            col.map(|c| RawTable::cell(row, c).to_string())
                .filter(|s| !s.is_empty())
        };

        let mut partial = PartialTable::new(reporter);
        for row in &table.rows {
            let raw_well = RawTable::cell(row, well_col);
            let well = WellKey::parse_number(raw_well).ok_or_else(|| FormatError::InvalidNumber {
                column: "No.".into(),
                value: raw_well.to_string(),
            })?;
            partial.rows.push(ReporterRow {
                well,
                sample_name: RawTable::cell(row, name_col).to_string(),
                info: WellInfo {
                    copies: optional_text(row, copies_col),
                    comments: optional_text(row, comment_col),
                    ..Default::default()
                },
                measurement: Measurement {
                    cq: parse_cq(RawTable::cell(row, ct_col), cutoff, "Ct")?,
                    quantity: quantity_col.map(|c| parse_separated(RawTable::cell(row, c)).unwrap_or(0.0)),
                    ..Default::default()
                },
            });
        }

        if i == 0 {
            header = extract_header(&channel.grid, None, Some(HEADER_STOP));
        }
        log::debug!("{} -> {reporter}: {} wells", channel.file.file_name(), partial.rows.len());
        partials.push(partial);
    }

    log::info!("Rotor-Gene: merged {} channel files", partials.len());
    Ok(ParsedRun { partials, header, max_signal: Default::default() })
}
