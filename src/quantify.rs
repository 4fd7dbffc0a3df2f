//src/quantify.rs

use crate::error::FormatError;
use crate::types::ReporterRow;

/// A calibration line: `log10(quantity) = slope * cq + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardCurve {
    pub slope: f64,
    pub intercept: f64,
}

/// Turns Cq values into copy numbers. Implementations must be pure.
pub trait Quantifier {
    /// Fits the curve of `reporter` from the standards among `rows`.
    /// `target_fraction` scales the assigned standard concentration.
    fn fit(&self, rows: &[ReporterRow], reporter: &str, target_fraction: f64) -> Result<StandardCurve, FormatError>;

    fn quantity(&self, cq: f64, curve: &StandardCurve) -> f64;
}

/// Ordinary least squares over the wells marked as standards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRegression {
    /// Standards at or above this Cq did not amplify and are left out.
    pub cq_cutoff: f64,
}

impl LinearRegression {
    pub fn new(cq_cutoff: f64) -> Self {
        Self { cq_cutoff }
    }
}

fn is_standard(row: &ReporterRow) -> bool {
    row.info
        .task
        .as_deref()
        .map(|t| t.to_ascii_lowercase().contains("standard"))
        .unwrap_or(false)
}

impl Quantifier for LinearRegression {
    fn fit(&self, rows: &[ReporterRow], reporter: &str, target_fraction: f64) -> Result<StandardCurve, FormatError> {
        let points: Vec<(f64, f64)> = rows
            .iter()
            .filter(|row| is_standard(row) && row.measurement.cq < self.cq_cutoff)
            .filter_map(|row| {
                let conc = row.info.assigned_quantity? * target_fraction;
                (conc > 0.0).then(|| (row.measurement.cq, conc.log10()))
            })
            .collect();

        let fail = |reason: &str| FormatError::StandardCurve {
            reporter: reporter.to_string(),
            reason: reason.to_string(),
        };
        if points.len() < 2 {
            return Err(fail("fewer than two amplified standards with a known concentration"));
        }

        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
        let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
        let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
        if sxx == 0.0 {
            return Err(fail("all standards have the same Cq"));
        }

        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;
        log::debug!("{reporter} standard curve: slope={slope:.4}, intercept={intercept:.4} from {} standards", points.len());
        Ok(StandardCurve { slope, intercept })
    }

    fn quantity(&self, cq: f64, curve: &StandardCurve) -> f64 {
        10f64.powf(curve.slope * cq + curve.intercept)
    }
}
