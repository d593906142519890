use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Pseudo-element carrying the Compton (inelastic) scatter amplitude.
pub const COMPTON_AMPLITUDE: &str = "COMPTON_AMPLITUDE";
/// Pseudo-element carrying the coherent (elastic) scatter amplitude.
pub const COHERENT_SCT_AMPLITUDE: &str = "COHERENT_SCT_AMPLITUDE";

/// ROI integration width in eV used when none is configured.
pub const DEFAULT_ROI_WIDTH_EV: f64 = 250.0;

const ELECTRON_REST_ENERGY_KEV: f64 = 511.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Shell {
    K,
    L,
    M,
}

impl Shell {
    pub fn suffix(&self) -> &'static str {
        match self {
            Shell::K => "",
            Shell::L => "_L",
            Shell::M => "_M",
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Shell::K => "K",
            Shell::L => "L",
            Shell::M => "M",
        };
        f.write_str(s)
    }
}

impl FromStr for Shell {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "K" => Ok(Shell::K),
            "L" => Ok(Shell::L),
            "M" => Ok(Shell::M),
            other => Err(format!("unknown shell '{other}'")),
        }
    }
}

/// Family of an emission line, which selects the tail coefficients used for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    KAlpha,
    KBeta,
    L,
    M,
}

impl LineKind {
    pub fn classify(shell: Shell, label: &str) -> Self {
        match shell {
            Shell::K if label.starts_with("Kb") || label.starts_with("KB") => LineKind::KBeta,
            Shell::K => LineKind::KAlpha,
            Shell::L => LineKind::L,
            Shell::M => LineKind::M,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmissionLine {
    pub label: String,
    pub kind: LineKind,
    /// keV
    pub energy: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitElementKind {
    Element { shell: Shell },
    Compton,
    Coherent,
}

/// Parsed form of a fit element name such as `Fe`, `Fe_L`, `Pb_M` or a scatter
/// pseudo-element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementName {
    Element { symbol: String, shell: Shell },
    Compton,
    Coherent,
}

impl ElementName {
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case(COMPTON_AMPLITUDE) {
            return Some(ElementName::Compton);
        }
        if name.eq_ignore_ascii_case(COHERENT_SCT_AMPLITUDE) {
            return Some(ElementName::Coherent);
        }
        let (symbol, shell) = match name.split_once('_') {
            Some((symbol, shell)) => (symbol, shell.parse::<Shell>().ok()?),
            None => (name, Shell::K),
        };
        let valid = !symbol.is_empty()
            && symbol.len() <= 3
            && symbol.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && symbol.chars().skip(1).all(|c| c.is_ascii_lowercase());
        valid.then(|| ElementName::Element {
            symbol: symbol.to_string(),
            shell,
        })
    }

    /// Canonical spelling used as the dictionary key.
    pub fn canonical(&self) -> String {
        match self {
            ElementName::Element { symbol, shell } => format!("{symbol}{}", shell.suffix()),
            ElementName::Compton => COMPTON_AMPLITUDE.to_string(),
            ElementName::Coherent => COHERENT_SCT_AMPLITUDE.to_string(),
        }
    }
}

/// One fitted element (or scatter pseudo-element) with the line data it contributes.
#[derive(Debug, Clone, PartialEq)]
pub struct FitElementMap {
    name: String,
    symbol: Option<String>,
    kind: FitElementKind,
    lines: Vec<EmissionLine>,
    custom_ratios: BTreeMap<usize, f64>,
    width_ev: f64,
}

impl FitElementMap {
    pub fn element(
        name: impl Into<String>,
        symbol: impl Into<String>,
        shell: Shell,
        lines: Vec<EmissionLine>,
    ) -> Self {
        Self {
            name: name.into(),
            symbol: Some(symbol.into()),
            kind: FitElementKind::Element { shell },
            lines,
            custom_ratios: BTreeMap::new(),
            width_ev: DEFAULT_ROI_WIDTH_EV,
        }
    }

    pub fn compton() -> Self {
        Self::scatter(COMPTON_AMPLITUDE, FitElementKind::Compton)
    }

    pub fn coherent() -> Self {
        Self::scatter(COHERENT_SCT_AMPLITUDE, FitElementKind::Coherent)
    }

    fn scatter(name: &str, kind: FitElementKind) -> Self {
        Self {
            name: name.to_string(),
            symbol: None,
            kind,
            lines: Vec::new(),
            custom_ratios: BTreeMap::new(),
            width_ev: DEFAULT_ROI_WIDTH_EV,
        }
    }

    pub fn with_width_ev(mut self, width_ev: f64) -> Self {
        self.width_ev = width_ev;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn kind(&self) -> FitElementKind {
        self.kind
    }

    pub fn is_scatter(&self) -> bool {
        !matches!(self.kind, FitElementKind::Element { .. })
    }

    pub fn width_ev(&self) -> f64 {
        self.width_ev
    }

    pub fn lines(&self) -> &[EmissionLine] {
        &self.lines
    }

    pub fn set_custom_multiply_ratio(&mut self, line_index: usize, multiplier: f64) {
        self.custom_ratios.insert(line_index, multiplier);
    }

    /// Multiplies each line ratio by the per-detector adjustment for that line.
    pub fn apply_detector_ratios(&mut self, adjustments: &[f64]) {
        for (line, adj) in self.lines.iter_mut().zip(adjustments) {
            line.ratio *= adj;
        }
    }

    /// Line ratio after custom multipliers are applied.
    pub fn effective_ratio(&self, line_index: usize) -> f64 {
        let base = self.lines.get(line_index).map_or(0.0, |l| l.ratio);
        base * self.custom_ratios.get(&line_index).copied().unwrap_or(1.0)
    }

    /// Energy of the dominant line, or `None` for scatter pseudo-elements.
    pub fn center_energy(&self) -> Option<f64> {
        self.lines
            .iter()
            .enumerate()
            .max_by(|(ia, _), (ib, _)| {
                self.effective_ratio(*ia)
                    .total_cmp(&self.effective_ratio(*ib))
                    .then(ib.cmp(ia))
            })
            .map(|(_, line)| line.energy)
    }
}

/// Fitted elements ordered by name.
pub type FitElementMapDict = BTreeMap<String, FitElementMap>;

/// Energy of a photon of `incident_energy` keV scattered inelastically through `angle_deg`.
pub fn compton_energy(incident_energy: f64, angle_deg: f64) -> f64 {
    let cos = angle_deg.to_radians().cos();
    incident_energy / (1.0 + (incident_energy / ELECTRON_REST_ENERGY_KEV) * (1.0 - cos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(label: &str, energy: f64, ratio: f64) -> EmissionLine {
        EmissionLine {
            label: label.to_string(),
            kind: LineKind::classify(Shell::K, label),
            energy,
            ratio,
        }
    }

    #[test]
    fn parse_recognizes_shells_and_scatter_names() {
        assert_eq!(
            ElementName::parse("Fe"),
            Some(ElementName::Element {
                symbol: "Fe".into(),
                shell: Shell::K
            })
        );
        assert_eq!(ElementName::parse("Pb_M").unwrap().canonical(), "Pb_M");
        assert_eq!(ElementName::parse("Compton_Amplitude"), Some(ElementName::Compton));
        assert_eq!(ElementName::parse("COHERENT_SCT_AMPLITUDE"), Some(ElementName::Coherent));
        assert_eq!(ElementName::parse("fe"), None);
        assert_eq!(ElementName::parse("Fe_X"), None);
    }

    #[test]
    fn center_energy_follows_custom_ratios() {
        let mut fe = FitElementMap::element(
            "Fe",
            "Fe",
            Shell::K,
            vec![line("Ka1", 6.404, 1.0), line("Kb1", 7.058, 0.17)],
        );
        assert_eq!(fe.center_energy(), Some(6.404));
        fe.set_custom_multiply_ratio(1, 10.0);
        assert_eq!(fe.center_energy(), Some(7.058));
        assert!(FitElementMap::compton().center_energy().is_none());
    }

    #[test]
    fn kbeta_lines_are_classified() {
        assert_eq!(LineKind::classify(Shell::K, "Kb1"), LineKind::KBeta);
        assert_eq!(LineKind::classify(Shell::K, "Ka2"), LineKind::KAlpha);
        assert_eq!(LineKind::classify(Shell::L, "Lb1"), LineKind::L);
    }

    #[test]
    fn compton_shift_lowers_energy() {
        let e = compton_energy(10.0, 90.0);
        assert!((e - 10.0 / (1.0 + 10.0 / 511.0)).abs() < 1e-12);
        assert!((compton_energy(10.0, 0.0) - 10.0).abs() < 1e-12);
    }
}
