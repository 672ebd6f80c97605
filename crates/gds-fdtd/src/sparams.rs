//! Scattering-parameter store
//!
//! Entries are appended in measurement order and never merged. Lookups by
//! label go through [`SParameters::to_map`], where a later entry with the same
//! label shadows an earlier one.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::simulation::C0_UM;

/// One S-parameter spectrum between an input and an output port/mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SParam {
    pub idx_in: u32,
    pub idx_out: u32,
    pub mode_in: usize,
    pub mode_out: usize,
    /// Frequencies in Hz
    pub freq: Vec<f64>,
    pub s: Vec<Complex64>,
}

impl SParam {
    pub fn new(
        idx_in: u32,
        idx_out: u32,
        mode_in: usize,
        mode_out: usize,
        freq: Vec<f64>,
        s: Vec<Complex64>,
    ) -> Self {
        Self {
            idx_in,
            idx_out,
            mode_in,
            mode_out,
            freq,
            s,
        }
    }

    /// `S{out}{in}_idx{mode_out}{mode_in}`
    pub fn label(&self) -> String {
        format!(
            "S{}{}_idx{}{}",
            self.idx_out, self.idx_in, self.mode_out, self.mode_in
        )
    }

    /// Wavelengths in µm
    pub fn wavelengths(&self) -> Vec<f64> {
        self.freq.iter().map(|f| C0_UM / f).collect()
    }

    /// Power transmission in dB, `10·log10(|s|²)`
    pub fn magnitude_db(&self) -> Vec<f64> {
        self.s.iter().map(|s| 10.0 * s.norm_sqr().log10()).collect()
    }

    /// Phase in radians
    pub fn phase(&self) -> Vec<f64> {
        self.s.iter().map(|s| s.arg()).collect()
    }
}

/// Append-only collection of [`SParam`] entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SParameters {
    entries: Vec<SParam>,
}

impl SParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sparam: SParam) {
        self.entries.push(sparam);
    }

    pub fn entries(&self) -> &[SParam] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries_in_mode(&self, mode_in: usize, mode_out: usize) -> Vec<&SParam> {
        self.entries
            .iter()
            .filter(|e| e.mode_in == mode_in && e.mode_out == mode_out)
            .collect()
    }

    pub fn entries_in_ports(&self, idx_in: u32, idx_out: u32) -> Vec<&SParam> {
        filter_ports(self.entries.iter(), idx_in, idx_out)
    }

    /// Label → entry; the last inserted entry wins on duplicate labels
    pub fn to_map(&self) -> BTreeMap<String, &SParam> {
        self.entries.iter().map(|e| (e.label(), e)).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

impl Extend<SParam> for SParameters {
    fn extend<T: IntoIterator<Item = SParam>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}

/// Port filter over any entry sequence, so it chains after
/// [`SParameters::entries_in_mode`]
pub fn filter_ports<'a>(
    entries: impl IntoIterator<Item = &'a SParam>,
    idx_in: u32,
    idx_out: u32,
) -> Vec<&'a SParam> {
    entries
        .into_iter()
        .filter(|e| e.idx_in == idx_in && e.idx_out == idx_out)
        .collect()
}
