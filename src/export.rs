// src/export.rs

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::{Division, InstrumentFormat, ReporterMap, RunSettings};
use crate::error::QpcrResult;
use crate::types::{CallResult, HeaderBlock, Measurement, MergedTable, WellRecord};

/// Logical group a summary column belongs to, used when pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Fixed,
    Cq,
    CqConf,
    Drn,
    Copies,
    DrmPercentage,
    Call,
}

#[derive(Debug, Clone, PartialEq)]
struct SummaryColumn {
    name: String,
    family: Family,
    cells: Vec<String>,
}

/// The merged table renamed and rounded for presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryTable {
    columns: Vec<SummaryColumn>,
    len: usize,
}

fn fixed(digits: usize, value: Option<f64>) -> String {
    value.map(|v| format!("{v:.digits$}")).unwrap_or_default()
}

fn drm_percentage(fraction: f64) -> String {
    if fraction < 1.0 {
        format!("{:.1}%", fraction * 100.0)
    } else {
        "100.0%".to_string()
    }
}

impl SummaryTable {
    pub fn build(table: &MergedTable, reporters: &ReporterMap, settings: &RunSettings) -> SummaryTable {
        let wells = &table.wells;
        let mut columns = Vec::new();
        let mut push = |name: String, family: Family, cells: Vec<String>| {
            columns.push(SummaryColumn { name, family, cells });
        };
        let text = |f: fn(&WellRecord) -> Option<String>| -> Option<Vec<String>> {
            let cells: Vec<Option<String>> = wells.iter().map(f).collect();
            cells
                .iter()
                .any(Option::is_some)
                .then(|| cells.into_iter().map(Option::unwrap_or_default).collect())
        };

        push("Well".into(), Family::Fixed, wells.iter().map(|w| w.well.to_string()).collect());
        push("Sample Name".into(), Family::Fixed, wells.iter().map(|w| w.sample_name.clone()).collect());
        let info: [(&str, fn(&WellRecord) -> Option<String>); 4] = [
            ("Copies", |w| w.info.copies.clone()),
            ("Comments", |w| w.info.comments.clone()),
            ("Task", |w| w.info.task.clone()),
            ("Assigned Quantity", |w| w.info.assigned_quantity.map(|q| q.to_string())),
        ];
        for (name, getter) in info {
            if let Some(cells) = text(getter) {
                push(name.into(), Family::Fixed, cells);
            }
        }

        let quantstudio = settings.instrument.format() == InstrumentFormat::QuantStudio;
        for id in &table.reporters {
            let display = reporters.display_name(id).unwrap_or(id.as_str());
            let measured = |f: &dyn Fn(&Measurement) -> String| -> Vec<String> {
                wells.iter().map(|w| w.measurement(id).map(f).unwrap_or_default()).collect()
            };
            push(format!("{display} Cq"), Family::Cq, measured(&|m: &Measurement| format!("{:.1}", m.cq)));
            if quantstudio {
                push(format!("{display} Cq Conf"), Family::CqConf, measured(&|m: &Measurement| fixed(3, m.cq_conf)));
                push(format!("{display} dRn"), Family::Drn, measured(&|m: &Measurement| fixed(1, m.delta_rn)));
            }
            if settings.division == Division::Hiv {
                push(
                    format!("{display} Copies"),
                    Family::Copies,
                    measured(&|m: &Measurement| m.quantity.map(|q| format!("{}", q.round() as i64)).unwrap_or_default()),
                );
            }
        }

        match settings.division {
            Division::Vhf => push(
                "Result".into(),
                Family::Fixed,
                wells
                    .iter()
                    .map(|w| match &w.call {
                        Some(CallResult::Qualitative(call)) => call.to_string(),
                        _ => String::new(),
                    })
                    .collect(),
            ),
            Division::Hiv => {
                for (id, display) in reporters.targets() {
                    let call_of = |w: &WellRecord| match &w.call {
                        Some(CallResult::Quantitative(calls)) => {
                            calls.iter().find(|c| c.reporter == id).cloned()
                        }
                        _ => None,
                    };
                    push(
                        format!("{display} DRM Percentage"),
                        Family::DrmPercentage,
                        wells
                            .iter()
                            .map(|w| call_of(w).map(|c| drm_percentage(c.drm_fraction)).unwrap_or_default())
                            .collect(),
                    );
                    push(
                        format!("{display} Call"),
                        Family::Call,
                        wells
                            .iter()
                            .map(|w| call_of(w).map(|c| c.call.to_string()).unwrap_or_default())
                            .collect(),
                    );
                }
            }
        }

        SummaryTable { columns, len: wells.len() }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.cells.as_slice())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Keeps only the selected columns, in table order.
    ///
    /// An entry naming a family (`Cq`, `dRn`, `Call`, `DRM Percentage`) keeps
    /// that column for every reporter; any other entry is an exact column name.
    /// Unknown entries are ignored.
    pub fn prune<S: AsRef<str>>(mut self, selection: &[S]) -> SummaryTable {
        let mut families = Vec::new();
        let mut names = Vec::new();
        for entry in selection {
            let entry = entry.as_ref();
            if entry.contains("Cq") && !entry.contains("Cq Conf") {
                families.push(Family::Cq);
            } else if entry.contains("dRn") {
                families.push(Family::Drn);
            } else if entry.contains("Call") {
                families.push(Family::Call);
            } else if entry.contains("DRM Percentage") {
                families.push(Family::DrmPercentage);
            } else {
                names.push(entry);
            }
        }
        self.columns
            .retain(|c| families.contains(&c.family) || names.contains(&c.name.as_str()));
        self
    }

    /// Header block as CSV rows, a blank separator, then the table.
    pub fn write_to<W: Write>(&self, header: &HeaderBlock, out: &mut W) -> QpcrResult<()> {
        {
            let mut wtr = csv::WriterBuilder::new()
                .flexible(true)
                .terminator(csv::Terminator::CRLF)
                .from_writer(&mut *out);
            for row in header.rows() {
                wtr.write_record(row)?;
            }
            wtr.flush()?;
        }
        out.write_all(b"\n\n")?;

        let mut wtr = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(&mut *out);
        wtr.write_record(self.columns.iter().map(|c| c.name.as_str()))?;
        for i in 0..self.len {
            wtr.write_record(self.columns.iter().map(|c| c.cells[i].as_str()))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_file<P: AsRef<Path>>(&self, header: &HeaderBlock, path: P) -> QpcrResult<()> {
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(header, &mut out)?;
        out.flush()?;
        log::info!("Summary written to {}", path.as_ref().display());
        Ok(())
    }
}

/// `<source without extension> - Summary.csv`
///
/// A source naming a folder keeps its full text: with a trailing separator
/// (files sharing only their directory) the summary lands inside it.
pub fn summary_path<P: AsRef<Path>>(source: P) -> PathBuf {
    let source = source.as_ref();
    let names_folder = source.to_string_lossy().ends_with(std::path::is_separator) || source.is_dir();
    let mut name: OsString = if names_folder {
        source.as_os_str().to_owned()
    } else {
        source.with_extension("").into_os_string()
    };
    name.push(" - Summary.csv");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Instrument;
    use crate::types::{DrmCall, ReporterCall, VhfCall, WellInfo, WellKey};

    fn vhf_table() -> (MergedTable, ReporterMap) {
        let reporters = ReporterMap::new(
            vec![("Cy5".into(), "Internal Control".into()), ("FAM".into(), "Ebola".into())],
            "Cy5",
        )
        .unwrap();
        let m = |cq: f64| Measurement { cq, cq_conf: Some(0.98765), delta_rn: Some(812.345), quantity: None };
        let table = MergedTable {
            reporters: vec!["Cy5".into(), "FAM".into()],
            wells: vec![WellRecord {
                well: WellKey::position("A1"),
                sample_name: "S1".into(),
                info: WellInfo::default(),
                measurements: vec![("Cy5".into(), m(21.04)), ("FAM".into(), m(24.96))],
                call: Some(CallResult::Qualitative(VhfCall::Positive("Ebola".into()))),
            }],
        };
        (table, reporters)
    }

    fn hiv_table() -> (MergedTable, ReporterMap) {
        let reporters = ReporterMap::new(
            vec![("HEX".into(), "Internal Control".into()), ("FAM".into(), "K103N".into())],
            "HEX",
        )
        .unwrap();
        let m = |q: f64| Measurement { cq: 25.0, quantity: Some(q), ..Default::default() };
        let call = |fraction: f64, call: DrmCall| ReporterCall {
            reporter: "FAM".into(),
            display_name: "K103N".into(),
            drm_fraction: fraction,
            call,
        };
        let well = |n: u32, hex: f64, fam: f64, c: ReporterCall| WellRecord {
            well: WellKey::Number(n),
            sample_name: format!("S{n}"),
            info: WellInfo { task: Some("Unknown".into()), ..Default::default() },
            measurements: vec![("HEX".into(), m(hex)), ("FAM".into(), m(fam))],
            call: Some(CallResult::Quantitative(vec![c])),
        };
        let table = MergedTable {
            reporters: vec!["HEX".into(), "FAM".into()],
            wells: vec![
                well(1, 1000.4, 120.6, call(0.1212, DrmCall::Positive)),
                well(2, 100.0, 150.0, call(1.5, DrmCall::Positive)),
            ],
        };
        (table, reporters)
    }

    #[test]
    fn test_quantstudio_vhf_columns_and_rounding() {
        let (table, reporters) = vhf_table();
        let settings = RunSettings::new(Instrument::QuantStudio5, "VHF", Division::Vhf);
        let summary = SummaryTable::build(&table, &reporters, &settings);
        assert_eq!(
            summary.column_names(),
            vec![
                "Well",
                "Sample Name",
                "Internal Control Cq",
                "Internal Control Cq Conf",
                "Internal Control dRn",
                "Ebola Cq",
                "Ebola Cq Conf",
                "Ebola dRn",
                "Result"
            ]
        );
        assert_eq!(summary.column("Ebola Cq").unwrap(), ["25.0"]);
        assert_eq!(summary.column("Ebola Cq Conf").unwrap(), ["0.988"]);
        assert_eq!(summary.column("Ebola dRn").unwrap(), ["812.3"]);
        assert_eq!(summary.column("Result").unwrap(), ["Ebola Positive"]);
    }

    #[test]
    fn test_hiv_copies_and_capped_percentage() {
        let (table, reporters) = hiv_table();
        let settings = RunSettings::new(Instrument::Mic, "HIV", Division::Hiv);
        let summary = SummaryTable::build(&table, &reporters, &settings);
        assert_eq!(
            summary.column_names(),
            vec![
                "Well",
                "Sample Name",
                "Task",
                "Internal Control Cq",
                "Internal Control Copies",
                "K103N Cq",
                "K103N Copies",
                "K103N DRM Percentage",
                "K103N Call"
            ]
        );
        assert_eq!(summary.column("Internal Control Copies").unwrap(), ["1000", "100"]);
        assert_eq!(summary.column("K103N Copies").unwrap(), ["121", "150"]);
        assert_eq!(summary.column("K103N DRM Percentage").unwrap(), ["12.1%", "100.0%"]);
        assert_eq!(summary.column("K103N Call").unwrap(), ["Positive", "Positive"]);
    }

    #[test]
    fn test_prune_by_family_and_name() {
        let (table, reporters) = vhf_table();
        let settings = RunSettings::new(Instrument::QuantStudio3, "VHF", Division::Vhf);
        let summary = SummaryTable::build(&table, &reporters, &settings)
            .prune(&["Well", "Cq", "Result", "Ebola Cq Conf", "Nonexistent"]);
        assert_eq!(
            summary.column_names(),
            vec!["Well", "Internal Control Cq", "Ebola Cq", "Ebola Cq Conf", "Result"]
        );
    }

    #[test]
    fn test_summary_path() {
        assert_eq!(summary_path("/runs/plate 7.xlsx"), PathBuf::from("/runs/plate 7 - Summary.csv"));
        assert_eq!(summary_path("/runs/plate.txt.gz"), PathBuf::from("/runs/plate.txt - Summary.csv"));
        assert_eq!(summary_path("/runs/rg_"), PathBuf::from("/runs/rg_ - Summary.csv"));
    }

    #[test]
    fn test_summary_path_for_files_sharing_a_folder() {
        let paths = vec![
            PathBuf::from("/runs/0412/FAM.csv"),
            PathBuf::from("/runs/0412/Cy5.csv"),
            PathBuf::from("/runs/0412/HEX.csv"),
        ];
        let path = summary_path(crate::parse::common_prefix(&paths));
        assert_eq!(path, PathBuf::from("/runs/0412/ - Summary.csv"));
        assert_eq!(path.parent(), Some(Path::new("/runs/0412")));

        // an existing folder without a trailing separator
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run.0412");
        std::fs::create_dir(&run_dir).unwrap();
        let path = summary_path(&run_dir);
        assert_eq!(path, dir.path().join("run.0412 - Summary.csv"));
    }

    #[test]
    fn test_write_file_prepends_header_block() {
        let (table, reporters) = vhf_table();
        let settings = RunSettings::new(Instrument::QuantStudio5, "VHF", Division::Vhf);
        let summary = SummaryTable::build(&table, &reporters, &settings).prune(&["Well", "Result"]);
        let header = HeaderBlock(vec![
            vec!["Experiment Name".into(), "run 12".into()],
            vec!["Operator".into()],
        ]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        summary.write_file(&header, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "Experiment Name,run 12\r\nOperator\r\n\n\nWell,Result\r\nA1,Ebola Positive\r\n"
        );
    }
}
