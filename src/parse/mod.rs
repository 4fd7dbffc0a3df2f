pub mod mic;
pub mod quantstudio;
pub mod rotorgene;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::{InstrumentFormat, ReporterMap, RunSettings};
use crate::error::{FormatError, MismatchError, QpcrResult};
use crate::quantify::Quantifier;
use crate::types::{HeaderBlock, MaxSignalMap, PartialTable};

/// What an instrument parser hands on to the merger.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedRun {
    /// One table per configured reporter.
    pub partials: Vec<PartialTable>,
    pub header: HeaderBlock,
    /// Only filled for instruments whose calls are gated on signal size.
    pub max_signal: MaxSignalMap,
}

/// How an export must be opened, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Spreadsheet,
}

/// `.xlsx`/`.xls`/`.xlsm`/`.xlsb`/`.ods` are spreadsheets; anything else is
/// read as text. A trailing `.gz` is looked through.
pub fn file_kind<P: AsRef<Path>>(path: P) -> FileKind {
    let path = path.as_ref();
    let inner = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        path.file_stem().map(PathBuf::from).unwrap_or_default()
    } else {
        path.to_path_buf()
    };
    let ext = inner
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => FileKind::Spreadsheet,
        _ => FileKind::Text,
    }
}

/// Loads the selected export(s) and runs the parser of the declared
/// instrument. Returns the parsed run and the path the summary is named after.
pub fn parse_selection(
    paths: &[PathBuf],
    reporters: &ReporterMap,
    settings: &RunSettings,
    quantifier: &dyn Quantifier,
) -> QpcrResult<(ParsedRun, PathBuf)> {
    log::info!("Parsing {} file(s) as {} output", paths.len(), settings.instrument);
    match settings.instrument.format() {
        InstrumentFormat::QuantStudio => {
            let path = single_path(paths)?;
            let source = quantstudio::QuantStudioSource::load(path)?;
            Ok((quantstudio::parse(&source, reporters, settings)?, path.clone()))
        }
        InstrumentFormat::RotorGene => {
            if paths.len() != reporters.len() {
                return Err(MismatchError::FileCount { expected: reporters.len(), found: paths.len() }.into());
            }
            let files = paths
                .iter()
                .map(rotorgene::RotorGeneFile::load)
                .collect::<std::io::Result<Vec<_>>>()?;
            Ok((rotorgene::parse(&files, reporters, settings)?, common_prefix(paths)))
        }
        InstrumentFormat::Mic => {
            let path = single_path(paths)?;
            let source = mic::MicSource::load(path)?;
            Ok((mic::parse(&source, reporters, settings, quantifier)?, path.clone()))
        }
    }
}

fn single_path(paths: &[PathBuf]) -> Result<&PathBuf, MismatchError> {
    match paths {
        [path] => Ok(path),
        _ => Err(MismatchError::FileCount { expected: 1, found: paths.len() }),
    }
}

/// Longest common string prefix of the paths; names the summary of a multi-file run.
pub fn common_prefix(paths: &[PathBuf]) -> PathBuf {
    let texts: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    let Some(first) = texts.first() else {
        return PathBuf::new();
    };
    let mut len = first.len();
    for other in &texts[1..] {
        len = first
            .char_indices()
            .zip(other.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map(|((i, a), _)| i + a.len_utf8())
            .unwrap_or(0)
            .min(len);
    }
    PathBuf::from(&first[..len])
}

/// Plain number; a comma anywhere makes the cell invalid.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse().ok()
}

/// For columns the instruments write with thousands separators
/// (`Delta Rn (last cycle)`, `Quantity`): strips `,` before parsing.
pub(crate) fn parse_separated(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|&c| c != ',').collect();
    cleaned.parse().ok()
}

/// Cq cell: `Undetermined` or empty means no amplification and becomes `cutoff`.
pub(crate) fn parse_cq(raw: &str, cutoff: f64, column: &str) -> Result<f64, FormatError> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("undetermined") {
        return Ok(cutoff);
    }
    parse_number(raw).ok_or_else(|| FormatError::InvalidNumber {
        column: column.to_string(),
        value: raw.to_string(),
    })
}

/// Empty is `None`; anything else must be a number.
pub(crate) fn parse_optional(raw: &str, column: &str) -> Result<Option<f64>, FormatError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    parse_number(raw).map(Some).ok_or_else(|| FormatError::InvalidNumber {
        column: column.to_string(),
        value: raw.to_string(),
    })
}

/// Like `parse_optional`, for thousands-separated columns.
pub(crate) fn parse_separated_optional(raw: &str, column: &str) -> Result<Option<f64>, FormatError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    parse_separated(raw).map(Some).ok_or_else(|| FormatError::InvalidNumber {
        column: column.to_string(),
        value: raw.to_string(),
    })
}

/// The reporters found in an export must be exactly the configured ones.
pub(crate) fn check_reporter_set<I>(found: I, reporters: &ReporterMap) -> Result<(), MismatchError>
where
    I: IntoIterator<Item = String>,
{
    let found: BTreeSet<String> = found.into_iter().collect();
    let expected: BTreeSet<String> = reporters.ids().map(str::to_string).collect();
    if found != expected {
        return Err(MismatchError::Reporters {
            expected: expected.into_iter().collect(),
            found: found.into_iter().collect(),
        });
    }
    Ok(())
}
