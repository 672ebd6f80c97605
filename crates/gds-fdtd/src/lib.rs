//! gds-fdtd: Extrude photonic layouts into 3D devices and assemble
//! S-parameters from FDTD solver output
//!
//! This crate provides:
//! - GDSII layout access behind a layout-engine trait
//! - Structure, port and region extraction from layer-tagged shapes
//! - Component assembly with port height resolution
//! - Technology stacks parsed from YAML
//! - Ordered solver job execution and S-parameter measurement
//! - Python script generation for Tidy3D
//!
//! Layout coordinates live on an integer grid; everything past extraction is
//! in µm.

pub mod codegen;
pub mod component;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod layout;
pub mod material;
pub mod simulation;
pub mod sparams;
pub mod tech;

#[cfg(test)]
pub(crate) mod testutil;

pub use codegen::{generate_tidy3d_script, FieldAxis, ScriptConfig};
pub use component::{Component, Port, PortResolution, Region, Structure, StructureGroup};
pub use error::{Error, Result};
pub use geometry::{Direction, Vertex};
pub use layout::{load_layout, GdsLayout, LayerSpec, Layout, LayoutEngine, Shape};
pub use material::Material;
pub use simulation::{
    ExecutionReport, ResultsDirectory, SimJob, SimResults, Simulation, Solver, WavelengthSweep,
};
pub use sparams::{SParam, SParameters};
pub use tech::Technology;

use std::path::{Path, PathBuf};

use tracing::info;

/// Main entry point: read a GDSII file and extrude its top cell with `tech`
pub fn load_component(
    path: impl AsRef<Path>,
    tech: &Technology,
    top_cell: Option<&str>,
    config: &ExtractionConfig,
) -> Result<Component> {
    let layout = load_layout(path, top_cell)?;
    tech.build_component(&layout, config)
}

/// Like [`load_component`], and also write a copy of the layout with every
/// port's extension stub drawn on layer 1/0. Returns the component and the
/// path of the written layout.
pub fn load_device(
    path: impl AsRef<Path>,
    tech: &Technology,
    top_cell: Option<&str>,
    config: &ExtractionConfig,
) -> Result<(Component, PathBuf)> {
    let path = path.as_ref();
    let mut layout = load_layout(path, top_cell)?;
    let component = tech.build_component(&layout, config)?;

    extract::insert_port_extensions(&mut layout, &component.ports, config.port_extension_buffer)?;
    let out = extract::extensions_path(path);
    layout.engine().write(&out)?;
    info!("Wrote port-extended layout to {}", out.display());

    Ok((component, out))
}

/// Configuration for geometry extraction
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Simulation region height (µm)
    pub z_span: f64,
    /// Simulation region vertical center; the middle of the device-layer
    /// stack when unset
    pub z_center: Option<f64>,
    /// Growth of the device-recognition shape on every side (µm)
    pub region_extension: f64,
    /// Growth of substrate and superstrate beyond the region (µm)
    pub bounds_extension: f64,
    /// Length of the stubs drawn by [`load_device`] (µm)
    pub port_extension_buffer: f64,
    /// Max distance between a pin center and its label (µm); half a
    /// database unit when unset
    pub label_tolerance: Option<f64>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            z_span: 3.0,
            z_center: None,
            region_extension: 1.3,
            bounds_extension: 2.0,
            port_extension_buffer: 2.0,
            label_tolerance: None,
        }
    }
}

impl ExtractionConfig {
    pub fn label_tolerance(&self, dbu: f64) -> f64 {
        self.label_tolerance.unwrap_or(dbu / 2.0)
    }
}
