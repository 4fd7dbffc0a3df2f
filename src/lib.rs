// src/lib.rs
pub mod types;
pub mod error;
pub mod config;
pub mod extract;
pub mod sheets;
pub mod parse;
pub mod merge;
pub mod quantify;
pub mod classify;
pub mod export;

use std::path::{Path, PathBuf};

use crate::classify::classify;
use crate::config::{AssayCatalog, ReporterMap, RunSettings};
use crate::error::QpcrResult;
use crate::export::{summary_path, SummaryTable};
use crate::merge::merge;
use crate::parse::parse_selection;
use crate::quantify::LinearRegression;
use crate::types::{HeaderBlock, MergedTable};

pub use crate::error::QpcrError;

/// Everything a finished run produces. The summary text is generated on demand.
#[derive(Debug, Clone)]
pub struct AnalysisResults {
    /// One row per well, each carrying its call.
    pub table: MergedTable,
    /// Run metadata block from the top of the export.
    pub header: HeaderBlock,
    pub reporters: ReporterMap,
    pub settings: RunSettings,
    /// Path the summary file is named after.
    pub source: PathBuf,
}

impl AnalysisResults {
    /// Presentation table with every column.
    pub fn summary(&self) -> SummaryTable {
        SummaryTable::build(&self.table, &self.reporters, &self.settings)
    }

    pub fn summary_path(&self) -> PathBuf {
        summary_path(&self.source)
    }

    /// Writes the summary next to the source export and returns its path.
    /// With no column selection every column is kept.
    pub fn export<S: AsRef<str>>(&self, columns: Option<&[S]>) -> QpcrResult<PathBuf> {
        let path = self.summary_path();
        self.export_to(columns, &path)?;
        Ok(path)
    }

    pub fn export_to<S: AsRef<str>, P: AsRef<Path>>(&self, columns: Option<&[S]>, path: P) -> QpcrResult<()> {
        let summary = match columns {
            Some(selection) => self.summary().prune(selection),
            None => self.summary(),
        };
        summary.write_file(&self.header, path)
    }
}

/// Unified entry point: parse the selected export(s), merge per-reporter
/// tables on well and attach a call to every well.
pub fn analyze_run(
    catalog: &AssayCatalog,
    settings: &RunSettings,
    paths: &[PathBuf],
) -> QpcrResult<AnalysisResults> {
    // 1. Resolve the assay
    let reporters = catalog.reporters(&settings.assay)?;
    log::info!(
        "Assay '{}' with {} reporters (internal control {})",
        settings.assay,
        reporters.len(),
        reporters.internal_control()
    );

    // 2. Parse
    let quantifier = LinearRegression::new(settings.thresholds.cq_cutoff);
    let (parsed, source) = parse_selection(paths, &reporters, settings, &quantifier)?;

    // 3. Merge
    let table = merge(parsed.partials)?;

    // 4. Classify
    let table = classify(table, &reporters, settings, &parsed.max_signal);

    Ok(AnalysisResults { table, header: parsed.header, reporters, settings: settings.clone(), source })
}
