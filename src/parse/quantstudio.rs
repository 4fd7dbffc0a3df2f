//src/parse/quantstudio.rs

use std::path::Path;

use crate::config::{Division, ReporterMap, RunSettings};
use crate::error::QpcrResult;
use crate::extract::{extract_header, extract_table, read_export_text, recover_offset, split_lines, RawTable};
use crate::sheets::{first_columns, Workbook};
use crate::types::{MaxSignalMap, Measurement, PartialTable, ReporterRow, WellInfo, WellKey};

use super::{
    check_reporter_set, file_kind, parse_cq, parse_optional, parse_separated, parse_separated_optional, FileKind,
    ParsedRun,
};

/// Cell that precedes the results table in `.txt` exports.
pub const RESULTS_FLAG: &str = "[Results]";
/// Metadata rows start at the first row mentioning this.
pub const HEADER_FLAG: &str = "Experiment";
pub const RESULTS_SHEET: &str = "Results";
/// Spreadsheet exports put the results header on this (0-based) row.
pub const SHEET_HEADER_ROW: usize = 43;

const CONTEXT: &str = "QuantStudio results";

/// Baseline End a well needs before its delta-Rn counts toward the plate maximum.
fn baseline_threshold(is_internal_control: bool) -> f64 {
    if is_internal_control {
        5.0
    } else {
        10.0
    }
}

/// A QuantStudio 3/5 export: tab-separated text or a workbook.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantStudioSource {
    Text(String),
    Workbook(Workbook),
}

impl QuantStudioSource {
    pub fn load<P: AsRef<Path>>(path: P) -> QpcrResult<Self> {
        let path = path.as_ref();
        Ok(match file_kind(path) {
            FileKind::Text => QuantStudioSource::Text(read_export_text(path)?),
            FileKind::Spreadsheet => QuantStudioSource::Workbook(Workbook::open(path)?),
        })
    }
}

/// Splits a QuantStudio results table into one partial table per reporter and
/// records the per-reporter delta-Rn maximum used for signal gating.
pub fn parse(source: &QuantStudioSource, reporters: &ReporterMap, settings: &RunSettings) -> QpcrResult<ParsedRun> {
    let (table, header) = match source {
        QuantStudioSource::Text(text) => {
            let table = extract_table(text.lines(), b'\t', Some(RESULTS_FLAG))?;
            // the metadata block reads as comma-separated
            let header = extract_header(&split_lines(text, b','), Some(HEADER_FLAG), None);
            (table, header)
        }
        QuantStudioSource::Workbook(workbook) => {
            let grid = workbook.require_tab(RESULTS_SHEET)?;
            let table = recover_offset(RawTable::from_grid(grid, SHEET_HEADER_ROW)?);
            let header = extract_header(&first_columns(grid, 2), Some(HEADER_FLAG), None);
            (table, header)
        }
    };

    // CT only exists in QuantStudio results, so check it first: a missing CT
    // means the wrong instrument was chosen.
    let ct_col = table.require("CT", CONTEXT)?;
    let position_col = table.require("Well Position", CONTEXT)?;
    let sample_col = table.require("Sample Name", CONTEXT)?;
    let reporter_col = table.require("Reporter", CONTEXT)?;
    let conf_col = table.require("Cq Conf", CONTEXT)?;
    let baseline_col = table.require("Baseline End", CONTEXT)?;
    let drn_col = table.require("Delta Rn (last cycle)", CONTEXT)?;
    let quantity_col = match settings.division {
        Division::Hiv => Some(table.require("Quantity", CONTEXT)?),
        Division::Vhf => None,
    };

    check_reporter_set(
        table.rows.iter().map(|row| RawTable::cell(row, reporter_col).to_string()),
        reporters,
    )?;

    let cutoff = settings.thresholds.cq_cutoff;
    let mut partials: Vec<PartialTable> = reporters.ids().map(PartialTable::new).collect();
    let mut max_signal = MaxSignalMap::default();

    for row in &table.rows {
        let reporter = RawTable::cell(row, reporter_col);
        // present, the reporter set was checked above
        let Some(slot) = partials.iter_mut().find(|p| p.reporter == reporter) else {
            continue;
        };

        let cq = parse_cq(RawTable::cell(row, ct_col), cutoff, "CT")?;
        let cq_conf = parse_optional(RawTable::cell(row, conf_col), "Cq Conf")?;
        let baseline_end = parse_optional(RawTable::cell(row, baseline_col), "Baseline End")?;
        let delta_rn = parse_separated_optional(RawTable::cell(row, drn_col), "Delta Rn (last cycle)")?;
        // unparsable or empty quantities count as zero copies
        let quantity = quantity_col.map(|col| parse_separated(RawTable::cell(row, col)).unwrap_or(0.0));

        if let (Some(baseline_end), Some(delta_rn)) = (baseline_end, delta_rn) {
            if baseline_end >= baseline_threshold(reporters.is_internal_control(reporter)) {
                let max = max_signal.entry(reporter.to_string()).or_insert(delta_rn);
                *max = max.max(delta_rn);
            }
        }

        slot.rows.push(ReporterRow {
            well: WellKey::position(RawTable::cell(row, position_col)),
            sample_name: RawTable::cell(row, sample_col).to_string(),
            info: WellInfo::default(),
            measurement: Measurement { cq, cq_conf, delta_rn, quantity },
        });
    }

    for id in reporters.ids() {
        if !max_signal.contains_key(id) {
            log::warn!("No {id} well passed the baseline check; {id} cannot be called positive");
        }
    }
    log::info!(
        "QuantStudio: {} result rows across {} reporters",
        table.rows.len(),
        partials.len()
    );

    Ok(ParsedRun { partials, header, max_signal })
}
