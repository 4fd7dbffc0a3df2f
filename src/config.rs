//src/config.rs

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{QpcrError, QpcrResult};

/// Ordered reporter channels of one assay, plus its internal control.
#[derive(Debug, Clone, PartialEq)]
pub struct ReporterMap {
    channels: Vec<(String, String)>,
    internal_control: String,
}

impl ReporterMap {
    pub fn new(channels: Vec<(String, String)>, internal_control: impl Into<String>) -> QpcrResult<Self> {
        let internal_control = internal_control.into();
        if channels.is_empty() {
            return Err(QpcrError::InvalidConfig("assay defines no reporters".into()));
        }
        if !channels.iter().any(|(id, _)| *id == internal_control) {
            return Err(QpcrError::InvalidConfig(format!(
                "internal control '{internal_control}' is not one of the assay reporters"
            )));
        }
        Ok(Self { channels, internal_control })
    }

    /// `(channel id, display name)` in configured order.
    pub fn channels(&self) -> &[(String, String)] {
        &self.channels
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|(id, _)| id.as_str())
    }

    /// Non-control channels in configured order.
    pub fn targets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.channels
            .iter()
            .filter(|(id, _)| *id != self.internal_control)
            .map(|(id, name)| (id.as_str(), name.as_str()))
    }

    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.channels
            .iter()
            .find(|(c, _)| c == id)
            .map(|(_, name)| name.as_str())
    }

    pub fn internal_control(&self) -> &str {
        &self.internal_control
    }

    pub fn is_internal_control(&self, id: &str) -> bool {
        self.internal_control == id
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel ids sorted, for order-independent set comparison and error reports.
    pub fn sorted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids().map(str::to_string).collect();
        ids.sort();
        ids
    }
}

#[derive(Debug, Deserialize)]
struct AssayEntry {
    assay: toml::Table,
    ic: String,
}

/// All assays known to this installation, read from `assays.toml`.
///
/// ```toml
/// ["VHF Panel"]
/// assay = { Cy5 = "Internal Control", FAM = "Ebola", HEX = "Marburg" }
/// ic = "Cy5"
/// ```
#[derive(Debug, Clone)]
pub struct AssayCatalog {
    assays: toml::Table,
}

impl AssayCatalog {
    pub fn from_path<P: AsRef<Path>>(path: P) -> QpcrResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> QpcrResult<Self> {
        let assays: toml::Table = text.parse()?;
        Ok(Self { assays })
    }

    pub fn assay_names(&self) -> impl Iterator<Item = &str> {
        self.assays.keys().map(String::as_str)
    }

    pub fn reporters(&self, assay: &str) -> QpcrResult<ReporterMap> {
        let value = self
            .assays
            .get(assay)
            .ok_or_else(|| QpcrError::UnknownAssay(assay.to_string()))?;
        let entry: AssayEntry = value
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| QpcrError::InvalidConfig(format!("assay '{assay}': {e}")))?;

        let mut channels = Vec::with_capacity(entry.assay.len());
        for (id, name) in entry.assay {
            let name = name.as_str().ok_or_else(|| {
                QpcrError::InvalidConfig(format!("assay '{assay}': display name for {id} is not a string"))
            })?;
            channels.push((id, name.to_string()));
        }
        ReporterMap::new(channels, entry.ic)
    }
}

/// Which instrument produced the export. Decides the parser and whether
/// calls need delta-Rn gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Instrument {
    QuantStudio3,
    QuantStudio5,
    RotorGene,
    Mic,
}

/// Export layout family shared by one or more instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentFormat {
    QuantStudio,
    RotorGene,
    Mic,
}

impl Instrument {
    pub fn format(self) -> InstrumentFormat {
        match self {
            Instrument::QuantStudio3 | Instrument::QuantStudio5 => InstrumentFormat::QuantStudio,
            Instrument::RotorGene => InstrumentFormat::RotorGene,
            Instrument::Mic => InstrumentFormat::Mic,
        }
    }

    /// QuantStudio Cq values are not gated on signal size by the instrument itself.
    pub fn requires_signal_gating(self) -> bool {
        self.format() == InstrumentFormat::QuantStudio
    }
}

impl FromStr for Instrument {
    type Err = QpcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "QuantStudio 3" => Ok(Instrument::QuantStudio3),
            "QuantStudio 5" => Ok(Instrument::QuantStudio5),
            "Rotor-Gene" => Ok(Instrument::RotorGene),
            "Mic" => Ok(Instrument::Mic),
            other => Err(QpcrError::InvalidConfig(format!("unknown machine type '{other}'"))),
        }
    }
}

impl TryFrom<String> for Instrument {
    type Error = QpcrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Instrument::QuantStudio3 => "QuantStudio 3",
            Instrument::QuantStudio5 => "QuantStudio 5",
            Instrument::RotorGene => "Rotor-Gene",
            Instrument::Mic => "Mic",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Division {
    /// Viral hemorrhagic fever, qualitative.
    #[default]
    Vhf,
    /// HIV drug-resistance mutations, quantitative.
    Hiv,
}

impl FromStr for Division {
    type Err = QpcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vhf" => Ok(Division::Vhf),
            "hiv" => Ok(Division::Hiv),
            other => Err(QpcrError::InvalidConfig(format!("unknown division '{other}'"))),
        }
    }
}

/// Numeric knobs of a run.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Cq assigned to wells the instrument reports as not amplified.
    pub cq_cutoff: f64,
    /// VHF: a reporter is positive only below this Cq.
    pub pos_cutoff: f64,
    /// VHF, QuantStudio: minimum delta-Rn as a fraction of the plate maximum.
    pub drn_percent_cutoff: f64,
    /// HIV: mutant fraction of the standards used to fit mutant curves.
    pub drm_percentage: f64,
    pub min_drm_percent: f64,
    pub max_drm_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cq_cutoff: 35.0,
            pos_cutoff: 30.0,
            drn_percent_cutoff: 0.05,
            drm_percentage: 0.2,
            min_drm_percent: 0.05,
            max_drm_percent: 0.1,
        }
    }
}

impl Thresholds {
    pub fn from_toml_str(text: &str) -> QpcrResult<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Everything one ingestion and classification run needs besides the files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunSettings {
    pub instrument: Instrument,
    pub assay: String,
    #[serde(default)]
    pub division: Division,
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl RunSettings {
    pub fn new(instrument: Instrument, assay: impl Into<String>, division: Division) -> Self {
        Self {
            instrument,
            assay: assay.into(),
            division,
            thresholds: Thresholds::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSAYS: &str = r#"
["VHF Panel"]
assay = { Cy5 = "Internal Control", FAM = "Ebola", HEX = "Marburg", ROX = "Lassa" }
ic = "Cy5"

["082AFT 084V"]
assay = { HEX = "Internal Control", FAM = "K103N" }
ic = "HEX"

["Broken"]
assay = { FAM = "Ebola" }
ic = "Cy5"
"#;

    #[test]
    fn test_catalog_preserves_reporter_order() {
        let catalog = AssayCatalog::from_toml_str(ASSAYS).unwrap();
        let names: Vec<&str> = catalog.assay_names().collect();
        assert_eq!(names, vec!["VHF Panel", "082AFT 084V", "Broken"]);
        let map = catalog.reporters("VHF Panel").unwrap();
        let ids: Vec<&str> = map.ids().collect();
        assert_eq!(ids, vec!["Cy5", "FAM", "HEX", "ROX"]);
        assert_eq!(map.internal_control(), "Cy5");
        let targets: Vec<(&str, &str)> = map.targets().collect();
        assert_eq!(targets, vec![("FAM", "Ebola"), ("HEX", "Marburg"), ("ROX", "Lassa")]);
        assert_eq!(map.display_name("HEX"), Some("Marburg"));
        assert_eq!(map.sorted_ids(), vec!["Cy5", "FAM", "HEX", "ROX"]);
    }

    #[test]
    fn test_unknown_assay_is_configuration_error() {
        let catalog = AssayCatalog::from_toml_str(ASSAYS).unwrap();
        let err = catalog.reporters("Nope").unwrap_err();
        assert!(matches!(err, QpcrError::UnknownAssay(ref a) if a == "Nope"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_internal_control_must_be_a_reporter() {
        let catalog = AssayCatalog::from_toml_str(ASSAYS).unwrap();
        assert!(matches!(catalog.reporters("Broken"), Err(QpcrError::InvalidConfig(_))));
        assert!(ReporterMap::new(vec![], "FAM").is_err());
    }

    #[test]
    fn test_instrument_tags() {
        assert_eq!("QuantStudio 5".parse::<Instrument>().unwrap(), Instrument::QuantStudio5);
        assert_eq!("Mic".parse::<Instrument>().unwrap().format(), InstrumentFormat::Mic);
        assert!(!"Rotor-Gene".parse::<Instrument>().unwrap().requires_signal_gating());
        assert!(Instrument::QuantStudio3.requires_signal_gating());
        assert!("LightCycler".parse::<Instrument>().is_err());
        assert_eq!(Instrument::RotorGene.to_string(), "Rotor-Gene");
    }

    #[test]
    fn test_thresholds_defaults_fill_gaps() {
        let t = Thresholds::from_toml_str("pos_cutoff = 35.0\n").unwrap();
        assert_eq!(t.pos_cutoff, 35.0);
        assert_eq!(t.cq_cutoff, 35.0);
        assert_eq!(t.max_drm_percent, 0.1);
    }

    #[test]
    fn test_run_settings_from_toml() {
        let settings: RunSettings = toml::from_str(
            "instrument = \"Mic\"\nassay = \"082AFT 084V\"\ndivision = \"hiv\"\n[thresholds]\nmin_drm_percent = 0.02\n",
        )
        .unwrap();
        assert_eq!(settings.instrument, Instrument::Mic);
        assert_eq!(settings.division, Division::Hiv);
        assert_eq!(settings.thresholds.min_drm_percent, 0.02);
        assert_eq!(settings.thresholds.pos_cutoff, 30.0);
    }
}
