//src/parse/mic.rs

use ahash::AHashMap;
use std::path::Path;

use crate::config::{Division, ReporterMap, RunSettings};
use crate::error::{FormatError, MismatchError, QpcrResult};
use crate::extract::{
    extract_header, extract_table, read_export_text, recover_offset, split_chunks, split_lines, RawTable,
};
use crate::quantify::Quantifier;
use crate::sheets::{first_columns, Workbook};
use crate::types::{Measurement, PartialTable, ReporterRow, WellInfo, WellKey};

use super::{check_reporter_set, file_kind, parse_cq, parse_optional, FileKind, ParsedRun};

pub const CYCLING_MARKER: &str = "Start Worksheet - Analysis - Cycling";
pub const SAMPLES_MARKER: &str = "Start Worksheet - Samples";
pub const RESULT_MARKER: &str = "Result";
/// Absolute-quantification tabs repeat the channel name but hold no raw Cq.
pub const ABSOLUTE_MARKER: &str = "Absolute";
pub const RESULTS_FLAG: &str = "Results";
pub const HEADER_STOP: &str = "Log";
pub const GENERAL_SHEET: &str = "General Information";
pub const SAMPLES_SHEET: &str = "Samples";
/// Result tabs put their header on this (0-based) row, give or take.
pub const SHEET_HEADER_ROW: usize = 32;
const CONCENTRATION_PREFIX: &str = "Standards Concentration";

/// A Mic export: chunked `.csv` text or a multi-tab workbook.
#[derive(Debug, Clone, PartialEq)]
pub enum MicSource {
    Text(String),
    Workbook(Workbook),
}

impl MicSource {
    pub fn load<P: AsRef<Path>>(path: P) -> QpcrResult<Self> {
        let path = path.as_ref();
        Ok(match file_kind(path) {
            FileKind::Text => MicSource::Text(read_export_text(path)?),
            FileKind::Spreadsheet => MicSource::Workbook(Workbook::open(path)?),
        })
    }
}

fn names_reporter(title: &str, id: &str, name: &str) -> bool {
    title.contains(id) || title.contains(name)
}

fn is_results_tab(title: &str, id: &str, name: &str) -> bool {
    title.contains(RESULT_MARKER) && !title.contains(ABSOLUTE_MARKER) && names_reporter(title, id, name)
}

fn is_results_chunk(title: &str, id: &str, name: &str) -> bool {
    title.contains(CYCLING_MARKER) && is_results_tab(title, id, name)
}

/// Results tables per reporter, in configured order, plus the sample sheet.
struct MicTables {
    results: Vec<(String, RawTable)>,
    samples: Option<RawTable>,
    header: crate::types::HeaderBlock,
}

fn text_tables(text: &str, reporters: &ReporterMap, division: Division) -> QpcrResult<MicTables> {
    let header = extract_header(&split_lines(text, b','), None, Some(HEADER_STOP));
    let chunks = split_chunks(text);

    let mut picked = Vec::new();
    for (id, name) in reporters.channels() {
        if let Some(chunk) = chunks.iter().find(|c| is_results_chunk(&c[0], id, name)) {
            log::debug!("{id}: using worksheet '{}'", chunk[0]);
            picked.push((id.clone(), chunk));
        }
    }
    check_reporter_set(picked.iter().map(|(id, _)| id.clone()), reporters)?;

    let mut results = Vec::with_capacity(picked.len());
    for (id, chunk) in picked {
        let table = extract_table(chunk.iter(), b',', Some(RESULTS_FLAG)).map_err(|_| FormatError::NoTable {
            context: Some(chunk[0].clone()),
        })?;
        results.push((id, table));
    }

    let samples = match division {
        Division::Hiv => {
            let chunk = chunks
                .iter()
                .find(|c| c[0].contains(SAMPLES_MARKER))
                .ok_or_else(|| FormatError::NoTable { context: Some(SAMPLES_MARKER.to_string()) })?;
            // the table starts on the line after the worksheet title
            Some(extract_table(chunk[1..].iter(), b',', None)?)
        }
        Division::Vhf => None,
    };
    Ok(MicTables { results, samples, header })
}

fn workbook_tables(workbook: &Workbook, reporters: &ReporterMap, division: Division) -> QpcrResult<MicTables> {
    let general = workbook.require_tab(GENERAL_SHEET)?;
    let header = extract_header(&first_columns(general, 2), None, Some(HEADER_STOP));

    let mut picked = Vec::new();
    for (id, name) in reporters.channels() {
        if let Some(tab) = workbook.tab_names().find(|t| is_results_tab(t, id, name)) {
            log::debug!("{id}: using tab '{tab}'");
            picked.push((id.clone(), tab.to_string()));
        }
    }
    check_reporter_set(picked.iter().map(|(id, _)| id.clone()), reporters)?;

    let mut results = Vec::with_capacity(picked.len());
    for (id, tab) in picked {
        let grid = workbook.require_tab(&tab)?;
        let table = RawTable::from_grid(grid, SHEET_HEADER_ROW)
            .map_err(|_| FormatError::NoTable { context: Some(tab.clone()) })?;
        results.push((id, recover_offset(table)));
    }

    let samples = match division {
        Division::Hiv => Some(RawTable::from_grid(workbook.require_tab(SAMPLES_SHEET)?, 0)?),
        Division::Vhf => None,
    };
    Ok(MicTables { results, samples, header })
}

/// well -> task and assigned standard concentration.
fn sample_info(samples: &RawTable) -> Result<AHashMap<WellKey, WellInfo>, FormatError> {
    let well_col = samples.require("Well", "Mic samples sheet")?;
    let type_col = samples.require("Type", "Mic samples sheet")?;
    let conc_col = samples.column_with_prefix(CONCENTRATION_PREFIX);

    let mut info = AHashMap::with_capacity(samples.rows.len());
    for row in &samples.rows {
        let raw_well = RawTable::cell(row, well_col);
        let well = WellKey::parse_number(raw_well).ok_or_else(|| FormatError::InvalidNumber {
            column: "Well".into(),
            value: raw_well.to_string(),
        })?;
        let assigned_quantity = match conc_col {
            Some(col) => parse_optional(RawTable::cell(row, col), CONCENTRATION_PREFIX)?,
            None => None,
        };
        info.insert(
            well,
            WellInfo {
                task: Some(RawTable::cell(row, type_col).to_string()),
                assigned_quantity,
                ..Default::default()
            },
        );
    }
    Ok(info)
}

/// Parses a Mic export. In the HIV division every reporter also gets a
/// standard curve and per-well quantities.
pub fn parse(
    source: &MicSource,
    reporters: &ReporterMap,
    settings: &RunSettings,
    quantifier: &dyn Quantifier,
) -> QpcrResult<ParsedRun> {
    let tables = match source {
        MicSource::Text(text) => text_tables(text, reporters, settings.division)?,
        MicSource::Workbook(workbook) => workbook_tables(workbook, reporters, settings.division)?,
    };
    let info = tables.samples.as_ref().map(sample_info).transpose()?;

    let cutoff = settings.thresholds.cq_cutoff;
    let mut partials = Vec::with_capacity(tables.results.len());

    for (id, table) in &tables.results {
        let context = format!("Mic {id} results");
        let well_col = table.require("Well", &context)?;
        let cq_col = table.require("Cq", &context)?;
        let sample_col = table
            .column("Sample Name")
            .or_else(|| table.column("Name"))
            .ok_or_else(|| FormatError::MissingColumn { column: "Sample Name".into(), context: context.clone() })?;

        let mut partial = PartialTable::new(id.as_str());
        for row in &table.rows {
            let raw_well = RawTable::cell(row, well_col);
            let well = WellKey::parse_number(raw_well).ok_or_else(|| FormatError::InvalidNumber {
                column: "Well".into(),
                value: raw_well.to_string(),
            })?;
            let well_info = match &info {
                Some(info) => info.get(&well).cloned().ok_or_else(|| MismatchError::Wells {
                    reporter: id.clone(),
                    missing: Vec::new(),
                    unexpected: vec![well.to_string()],
                })?,
                None => WellInfo::default(),
            };
            partial.rows.push(ReporterRow {
                well,
                sample_name: RawTable::cell(row, sample_col).to_string(),
                info: well_info,
                measurement: Measurement {
                    cq: parse_cq(RawTable::cell(row, cq_col), cutoff, "Cq")?,
                    ..Default::default()
                },
            });
        }

        if settings.division == Division::Hiv {
            let fraction = if reporters.is_internal_control(id) {
                1.0
            } else {
                settings.thresholds.drm_percentage
            };
            let curve = quantifier.fit(&partial.rows, id, fraction)?;
            for row in &mut partial.rows {
                row.measurement.quantity = Some(quantifier.quantity(row.measurement.cq, &curve));
            }
        }
        partials.push(partial);
    }

    log::info!("Mic: {} reporter tables", partials.len());
    Ok(ParsedRun { partials, header: tables.header, max_signal: Default::default() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Instrument;
    use crate::error::QpcrError;
    use crate::parse::test_support::{hiv_reporters, vhf_reporters};
    use crate::quantify::LinearRegression;

    fn results_chunk(title: &str, rows: &[(&str, &str, &str)]) -> String {
        let mut chunk = format!("{title}\nAnalysis Settings,Threshold 0.1\nResults\nWell,Sample Name,Cq,Efficiency\n");
        for (well, name, cq) in rows {
            chunk.push_str(&format!("{well},{name},{cq},0.95\n"));
        }
        chunk
    }

    fn mic_csv(chunks: &[String]) -> String {
        let mut text = String::from("Experiment Information\nRun Name,vhf 0412\nOperator,lab\n\nLog\nRun started\n\n");
        for chunk in chunks {
            text.push_str(chunk);
            text.push('\n');
        }
        text
    }

    fn vhf_text() -> String {
        let rows = [("01", "P-01", "22.1"), ("02", "N-01", "")];
        mic_csv(&[
            results_chunk("Start Worksheet - Analysis - Cycling A.Red (Cy5) - Results", &rows),
            results_chunk("Start Worksheet - Analysis - Cycling A.Green (FAM) - Absolute Results", &rows),
            results_chunk("Start Worksheet - Analysis - Cycling A.Green (FAM) - Results", &rows),
            results_chunk("Start Worksheet - Analysis - Cycling A.Yellow (HEX) - Results", &rows),
        ])
    }

    fn settings(division: Division) -> RunSettings {
        RunSettings::new(Instrument::Mic, "VHF Panel", division)
    }

    #[test]
    fn test_parse_text_chunks() {
        let source = MicSource::Text(vhf_text());
        let run = parse(&source, &vhf_reporters(), &settings(Division::Vhf), &LinearRegression::new(35.0)).unwrap();
        let ids: Vec<&str> = run.partials.iter().map(|p| p.reporter.as_str()).collect();
        assert_eq!(ids, vec!["Cy5", "FAM", "HEX"]);
        let fam = &run.partials[1];
        assert_eq!(fam.rows[0].well, WellKey::Number(1));
        assert_eq!(fam.rows[1].well, WellKey::Number(2));
        assert_eq!(fam.rows[1].measurement.cq, 35.0);
        assert_eq!(run.header.rows().len(), 4);
    }

    #[test]
    fn test_missing_channel_is_mismatch() {
        let rows = [("1", "P-01", "22.1")];
        let text = mic_csv(&[
            results_chunk("Start Worksheet - Analysis - Cycling A.Red (Cy5) - Results", &rows),
            results_chunk("Start Worksheet - Analysis - Cycling A.Green (FAM) - Results", &rows),
        ]);
        let err = parse(
            &MicSource::Text(text),
            &vhf_reporters(),
            &settings(Division::Vhf),
            &LinearRegression::new(35.0),
        )
        .unwrap_err();
        match err {
            QpcrError::Mismatch(MismatchError::Reporters { expected, found }) => {
                assert_eq!(expected, vec!["Cy5", "FAM", "HEX"]);
                assert_eq!(found, vec!["Cy5", "FAM"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    fn hiv_text() -> String {
        // HEX: 1e5 copies at Cq 20, -3.32 cycles per decade
        let hex_cq = |copies: f64| 20.0 + (5.0 - copies.log10()) * 3.32;
        // FAM standards carry 20% mutant
        let fam_cq = |copies: f64| hex_cq(copies * 0.2);
        let fmt = |v: f64| format!("{v:.4}");
        let hex_rows = vec![
            ("1", "Std 1e5".to_string(), fmt(hex_cq(1e5))),
            ("2", "Std 1e3".to_string(), fmt(hex_cq(1e3))),
            ("3", "Patient".to_string(), fmt(hex_cq(1e4))),
        ];
        let fam_rows = vec![
            ("1", "Std 1e5".to_string(), fmt(fam_cq(1e5))),
            ("2", "Std 1e3".to_string(), fmt(fam_cq(1e3))),
            ("3", "Patient".to_string(), fmt(hex_cq(500.0))),
        ];
        let as_refs = |rows: &Vec<(&'static str, String, String)>| -> String {
            let borrowed: Vec<(&str, &str, &str)> =
                rows.iter().map(|(w, n, c)| (*w, n.as_str(), c.as_str())).collect();
            results_chunk("", &borrowed)
        };
        let hex = as_refs(&hex_rows).replacen('\n', "Start Worksheet - Analysis - Cycling A.Yellow (HEX) - Results\n", 1);
        let fam = as_refs(&fam_rows).replacen('\n', "Start Worksheet - Analysis - Cycling A.Green (FAM) - Results\n", 1);
        let samples = "Start Worksheet - Samples\nWell,Colour,Name,Type,Standards Concentration (Copies/ÂµL)\n1,,Std 1e5,Standard,100000\n2,,Std 1e3,Standard,1000\n3,,Patient,Unknown,\n".to_string();
        mic_csv(&[hex, fam, samples])
    }

    #[test]
    fn test_hiv_quantities_from_standard_curve() {
        let settings = RunSettings::new(Instrument::Mic, "082AFT 084V", Division::Hiv);
        let run = parse(&MicSource::Text(hiv_text()), &hiv_reporters(), &settings, &LinearRegression::new(35.0)).unwrap();
        let hex = &run.partials[0];
        let fam = &run.partials[1];
        assert_eq!(hex.reporter, "HEX");
        assert_eq!(hex.rows[2].info.task.as_deref(), Some("Unknown"));
        assert_eq!(hex.rows[0].info.assigned_quantity, Some(100000.0));

        let patient_total = hex.rows[2].measurement.quantity.unwrap();
        let patient_mutant = fam.rows[2].measurement.quantity.unwrap();
        assert!((patient_total - 1e4).abs() / 1e4 < 1e-3, "{patient_total}");
        assert!((patient_mutant - 500.0).abs() / 500.0 < 1e-3, "{patient_mutant}");
    }

    #[test]
    fn test_hiv_well_without_sample_info() {
        let text = hiv_text().replace("3,,Patient,Unknown,\n", "");
        let settings = RunSettings::new(Instrument::Mic, "082AFT 084V", Division::Hiv);
        let err = parse(&MicSource::Text(text), &hiv_reporters(), &settings, &LinearRegression::new(35.0)).unwrap_err();
        assert!(matches!(err, QpcrError::Mismatch(MismatchError::Wells { ref unexpected, .. }) if unexpected == &["3"]));
    }

    fn tab(rows: &[(&str, &str, &str)], drift: usize) -> Vec<Vec<String>> {
        let mut grid: Vec<Vec<String>> = vec![Vec::new(); SHEET_HEADER_ROW];
        for _ in 0..drift {
            grid.push(vec!["Threshold".into(), "0.1".into()]);
        }
        grid.push(vec!["Well".into(), "Sample Name".into(), "Cq".into()]);
        for (w, n, c) in rows {
            grid.push(vec![w.to_string(), n.to_string(), c.to_string()]);
        }
        grid
    }

    #[test]
    fn test_parse_workbook_tabs() {
        let rows = [("1", "P-01", "22.1"), ("2", "N-01", "")];
        let workbook = Workbook {
            tabs: vec![
                (
                    GENERAL_SHEET.into(),
                    vec![
                        vec!["Run Name".into(), "vhf 0412".into()],
                        vec!["".into(), "".into()],
                        vec!["Log".into(), "".into()],
                    ],
                ),
                ("Cy5 Results".into(), tab(&rows, 0)),
                ("Ebola Absolute Results".into(), tab(&[], 0)),
                ("Ebola Results".into(), tab(&rows, 2)),
                ("Marburg Results".into(), tab(&rows, 1)),
            ],
        };
        let run = parse(
            &MicSource::Workbook(workbook),
            &vhf_reporters(),
            &settings(Division::Vhf),
            &LinearRegression::new(35.0),
        )
        .unwrap();
        assert!(run.partials.iter().all(|p| p.rows.len() == 2));
        assert_eq!(run.partials[1].rows[0].measurement.cq, 22.1);
        assert_eq!(run.header.rows().len(), 2);
    }

    #[test]
    fn test_workbook_without_general_information() {
        let workbook = Workbook { tabs: vec![("Cy5 Results".into(), tab(&[("1", "a", "20")], 0))] };
        let err = parse(
            &MicSource::Workbook(workbook),
            &vhf_reporters(),
            &settings(Division::Vhf),
            &LinearRegression::new(35.0),
        )
        .unwrap_err();
        assert!(matches!(err, QpcrError::Format(FormatError::MissingSheet { ref sheet }) if sheet == GENERAL_SHEET));
    }
}
