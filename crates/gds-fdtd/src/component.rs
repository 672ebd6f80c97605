//! Device model: ports, 3D structures, the simulation region and the
//! component that ties them together

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::geometry::{
    bounding_box, calculate_polygon_extension, is_point_inside_polygon, Direction, Vertex,
};
use crate::layout::{GdsLayout, LayerSpec, LayoutEngine, Shape};
use crate::material::Material;

/// Default port-stub length for [`Port::polygon_extension`]
pub const DEFAULT_EXTENSION_BUFFER: f64 = 4.0;

/// An optical port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    /// `[x, y]` in µm
    pub center: Vertex,
    /// Vertical center, unset until resolved against the structures
    pub z: Option<f64>,
    pub width: f64,
    pub direction: Direction,
    pub height: Option<f64>,
    pub material: Option<Material>,
}

impl Port {
    pub fn new(name: impl Into<String>, center: Vertex, width: f64, direction: Direction) -> Self {
        Self {
            name: name.into(),
            center,
            z: None,
            width,
            direction,
            height: None,
            material: None,
        }
    }

    pub fn x(&self) -> f64 {
        self.center[0]
    }

    pub fn y(&self) -> f64 {
        self.center[1]
    }

    pub fn z(&self) -> Option<f64> {
        self.z
    }

    /// Port index taken from the digits of its name, read back to front
    /// ("opt12" gives 21)
    pub fn idx(&self) -> Result<u32> {
        port_index(&self.name)
    }

    pub fn is_resolved(&self) -> bool {
        self.height.is_some()
    }

    pub fn polygon_extension(&self, buffer: f64) -> [Vertex; 4] {
        calculate_polygon_extension(self.center, self.width, self.direction, buffer)
    }
}

/// Index convention shared by ports and the monitors named after them
pub fn port_index(name: &str) -> Result<u32> {
    let digits: String = name.chars().rev().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(Error::PortIndex(name.to_string()));
    }
    digits
        .parse()
        .map_err(|_| Error::PortIndexOverflow(name.to_string()))
}

/// An extruded polygon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub name: String,
    pub polygon: Vec<Vertex>,
    pub z_base: f64,
    /// Thickness; negative values grow downward from `z_base`
    pub z_span: f64,
    pub material: Material,
    /// Degrees from the substrate plane
    pub sidewall_angle: f64,
}

impl Structure {
    pub fn new(
        name: impl Into<String>,
        polygon: Vec<Vertex>,
        z_base: f64,
        z_span: f64,
        material: Material,
    ) -> Self {
        Self {
            name: name.into(),
            polygon,
            z_base,
            z_span,
            material,
            sidewall_angle: 90.0,
        }
    }

    pub fn with_sidewall_angle(mut self, sidewall_angle: f64) -> Self {
        self.sidewall_angle = sidewall_angle;
        self
    }

    /// `(bottom, top)` regardless of the sign of `z_span`
    pub fn slab_bounds(&self) -> (f64, f64) {
        let end = self.z_base + self.z_span;
        (self.z_base.min(end), self.z_base.max(end))
    }
}

/// Structures as they enter a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "structures", rename_all = "snake_case")]
pub enum StructureGroup {
    /// A standalone body such as a substrate or cladding slab
    Single(Structure),
    /// All merged polygons of one device layer
    Layer(Vec<Structure>),
}

impl StructureGroup {
    pub fn structures(&self) -> &[Structure] {
        match self {
            StructureGroup::Single(s) => std::slice::from_ref(s),
            StructureGroup::Layer(layer) => layer,
        }
    }
}

/// Simulation region: a footprint plus a vertical extent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub vertices: Vec<Vertex>,
    pub z_center: f64,
    pub z_span: f64,
}

impl Region {
    pub fn new(vertices: Vec<Vertex>, z_center: f64, z_span: f64) -> Self {
        Self {
            vertices,
            z_center,
            z_span,
        }
    }

    pub fn x(&self) -> Vec<f64> {
        self.vertices.iter().map(|v| v[0]).collect()
    }

    pub fn y(&self) -> Vec<f64> {
        self.vertices.iter().map(|v| v[1]).collect()
    }

    fn bbox(&self) -> (Vertex, Vertex) {
        bounding_box(&self.vertices).unwrap_or(([0.0; 2], [0.0; 2]))
    }

    pub fn x_min(&self) -> f64 {
        self.bbox().0[0]
    }

    pub fn x_max(&self) -> f64 {
        self.bbox().1[0]
    }

    pub fn y_min(&self) -> f64 {
        self.bbox().0[1]
    }

    pub fn y_max(&self) -> f64 {
        self.bbox().1[1]
    }

    pub fn x_span(&self) -> f64 {
        (self.x_max() - self.x_min()).abs()
    }

    pub fn y_span(&self) -> f64 {
        (self.y_max() - self.y_min()).abs()
    }

    pub fn x_center(&self) -> f64 {
        (self.x_min() + self.x_max()) / 2.0
    }

    pub fn y_center(&self) -> f64 {
        (self.y_min() + self.y_max()) / 2.0
    }
}

/// Outcome of [`resolve_port_heights`]
#[derive(Debug, Clone, PartialEq)]
pub enum PortResolution {
    /// Every port landed inside a structure
    Complete(Vec<Port>),
    /// Some ports sit outside every layer structure; their names are listed
    Partial {
        ports: Vec<Port>,
        unresolved: Vec<String>,
    },
}

impl PortResolution {
    pub fn is_complete(&self) -> bool {
        matches!(self, PortResolution::Complete(_))
    }

    pub fn ports(&self) -> &[Port] {
        match self {
            PortResolution::Complete(ports) | PortResolution::Partial { ports, .. } => ports,
        }
    }

    pub fn into_ports(self) -> Vec<Port> {
        match self {
            PortResolution::Complete(ports) | PortResolution::Partial { ports, .. } => ports,
        }
    }
}

/// Give each port the vertical center, height and material of the first
/// layer structure whose footprint contains it.
///
/// Only [`StructureGroup::Layer`] entries are candidates; standalone bodies
/// such as claddings are skipped.
pub fn resolve_port_heights(ports: &[Port], structures: &[StructureGroup]) -> PortResolution {
    let mut unresolved = Vec::new();
    let resolved = ports
        .iter()
        .map(|port| {
            let mut port = port.clone();
            let owner = structures
                .iter()
                .filter_map(|group| match group {
                    StructureGroup::Layer(layer) => Some(layer),
                    StructureGroup::Single(_) => None,
                })
                .flatten()
                .find(|s| is_point_inside_polygon(port.center, &s.polygon));
            match owner {
                Some(s) => {
                    port.z = Some(s.z_base + s.z_span / 2.0);
                    port.height = Some(s.z_span);
                    port.material = Some(s.material.clone());
                }
                None => unresolved.push(port.name.clone()),
            }
            port
        })
        .collect();

    if unresolved.is_empty() {
        PortResolution::Complete(resolved)
    } else {
        PortResolution::Partial {
            ports: resolved,
            unresolved,
        }
    }
}

/// A device ready for solver setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub structures: Vec<StructureGroup>,
    pub ports: Vec<Port>,
    pub bounds: Region,
}

impl Component {
    /// Assemble a component, resolving port heights against `structures`.
    ///
    /// Ports left outside every structure only produce a warning; they keep
    /// an empty height.
    pub fn new(
        name: impl Into<String>,
        structures: Vec<StructureGroup>,
        ports: Vec<Port>,
        bounds: Region,
    ) -> Self {
        let resolution = resolve_port_heights(&ports, &structures);
        if let PortResolution::Partial { unresolved, .. } = &resolution {
            for name in unresolved {
                warn!("Cannot find height for port {name}");
            }
        }
        Self {
            name: name.into(),
            structures,
            ports: resolution.into_ports(),
            bounds,
        }
    }

    pub fn unresolved_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| !p.is_resolved())
    }

    /// Layer structures, flattened in group order
    pub fn layer_structures(&self) -> impl Iterator<Item = &Structure> {
        self.structures
            .iter()
            .filter(|g| matches!(g, StructureGroup::Layer(_)))
            .flat_map(StructureGroup::structures)
    }

    /// Write every layer polygon onto layer 1/0 of a fresh layout whose
    /// single cell carries the component's name
    pub fn export_layout(&self, dbu: f64) -> Result<GdsLayout> {
        let mut db = GdsLayout::new(self.name.clone(), dbu);
        db.create_cell(&self.name);
        for s in self.layer_structures() {
            let points = s
                .polygon
                .iter()
                .map(|v| [(v[0] / dbu).round() as i64, (v[1] / dbu).round() as i64])
                .collect();
            db.insert(&self.name, LayerSpec::new(1, 0), Shape::Polygon { points })?;
        }
        Ok(db)
    }

    /// [`Component::export_layout`] saved as GDSII
    pub fn write_layout(&self, path: &Path, dbu: f64) -> Result<()> {
        self.export_layout(dbu)?.write(path)
    }
}
