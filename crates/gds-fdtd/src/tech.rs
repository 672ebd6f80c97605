//! Technology description: the layer stack a layout is extruded with

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::component::{Component, StructureGroup};
use crate::error::{Error, Result};
use crate::extract::{load_ports, load_region, load_structure, load_structure_from_bounds};
use crate::layout::{LayerSpec, Layout, LayoutEngine};
use crate::material::{Material, MaterialRef};
use crate::ExtractionConfig;

fn unknown() -> String {
    "Unknown".to_string()
}

fn vertical() -> f64 {
    90.0
}

/// Top-level document: everything lives under a `technology:` key
#[derive(Debug, Clone, Deserialize)]
struct TechFile {
    technology: Technology,
}

/// A process layer stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technology {
    #[serde(default = "unknown")]
    pub name: String,
    pub substrate: SlabLayer,
    pub superstrate: SlabLayer,
    #[serde(default)]
    pub pinrec: Vec<LayerRef>,
    #[serde(default)]
    pub devrec: Vec<LayerRef>,
    #[serde(default)]
    pub device: Vec<DeviceLayer>,
}

/// Unpatterned body spanning the whole simulation region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlabLayer {
    pub z_base: f64,
    pub z_span: f64,
    pub material: MaterialRef,
}

/// Layer used only for recognition (pins, device extent)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerRef {
    pub layer: [i16; 2],
}

impl LayerRef {
    pub fn spec(&self) -> LayerSpec {
        self.layer.into()
    }
}

/// Patterned layer extruded into structures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceLayer {
    pub layer: [i16; 2],
    pub z_base: f64,
    pub z_span: f64,
    pub material: MaterialRef,
    #[serde(default = "vertical")]
    pub sidewall_angle: f64,
    /// Base name of the extracted structures; defaults to `layer{l}_{d}`
    #[serde(default)]
    pub name: Option<String>,
}

impl DeviceLayer {
    pub fn spec(&self) -> LayerSpec {
        self.layer.into()
    }

    pub fn structure_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("layer{}_{}", self.layer[0], self.layer[1]))
    }
}

impl Technology {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let file: TechFile = serde_yaml::from_str(text)?;
        Ok(file.technology)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml(&fs::read_to_string(path.as_ref())?)
    }

    pub fn pin_layer(&self) -> Result<LayerSpec> {
        self.pinrec
            .first()
            .map(LayerRef::spec)
            .ok_or(Error::MissingTechLayer("pinrec"))
    }

    pub fn devrec_layer(&self) -> Result<LayerSpec> {
        self.devrec
            .first()
            .map(LayerRef::spec)
            .ok_or(Error::MissingTechLayer("devrec"))
    }

    /// Vertical midpoint of the device-layer stack, 0 when there are none
    pub fn stack_center(&self) -> f64 {
        let (bottom, top) = self
            .device
            .iter()
            .map(|d| {
                let end = d.z_base + d.z_span;
                (d.z_base.min(end), d.z_base.max(end))
            })
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (b, t)| {
                (lo.min(b), hi.max(t))
            });
        if bottom.is_finite() && top.is_finite() {
            (bottom + top) / 2.0
        } else {
            0.0
        }
    }

    /// Extrude the layout's bound cell into a component
    pub fn build_component<E: LayoutEngine>(
        &self,
        layout: &Layout<E>,
        config: &ExtractionConfig,
    ) -> Result<Component> {
        let z_center = config.z_center.unwrap_or_else(|| self.stack_center());
        let bounds = load_region(
            layout,
            self.devrec_layer()?,
            z_center,
            config.z_span,
            config.region_extension,
        )?;

        let substrate = load_structure_from_bounds(
            &bounds,
            "Substrate",
            self.substrate.z_base,
            self.substrate.z_span,
            &Material::from_ref("substrate", &self.substrate.material)?,
            config.bounds_extension,
        );
        let superstrate = load_structure_from_bounds(
            &bounds,
            "Superstrate",
            self.superstrate.z_base,
            self.superstrate.z_span,
            &Material::from_ref("superstrate", &self.superstrate.material)?,
            config.bounds_extension,
        );

        let mut structures = vec![
            StructureGroup::Single(substrate),
            StructureGroup::Single(superstrate),
        ];
        for d in &self.device {
            let name = d.structure_name();
            let material = Material::from_ref(&name, &d.material)?;
            let layer = load_structure(
                layout,
                &name,
                d.spec(),
                d.z_base,
                d.z_span,
                &material,
                d.sidewall_angle,
            )?;
            structures.push(StructureGroup::Layer(layer));
        }

        let tolerance = config.label_tolerance(layout.dbu());
        let ports = load_ports(layout, self.pin_layer()?, tolerance)?;

        info!(
            "Technology {}: built {} with {} device layers and {} ports",
            self.name,
            layout.name,
            self.device.len(),
            ports.len()
        );
        Ok(Component::new(layout.name.clone(), structures, ports, bounds))
    }
}
