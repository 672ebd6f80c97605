//! Layout access: the layout-engine seam and its GDSII implementation
//!
//! Extractors only talk to [`LayoutEngine`]. [`GdsLayout`] implements it over
//! a `gds21` library: boundaries, boxes, paths and text become [`Shape`]s,
//! and struct/array references are flattened through an affine
//! [`Transform`]. Coordinates stay on the integer grid scaled by `dbu`.

use std::fmt;
use std::path::Path;

use gds21::{
    GdsArrayRef, GdsBoundary, GdsElement, GdsLibrary, GdsPath, GdsPoint, GdsStrans, GdsStruct,
    GdsStructRef, GdsTextElem, GdsUnits,
};
use geo::algorithm::orient::Direction as Winding;
use geo::{unary_union, Orient, Polygon};
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::geometry::to_geo_polygon;

/// A point on the layout's integer grid
pub type GridPoint = [i64; 2];

/// GDS path type for square ends extended by half the width
const PATH_TYPE_SQUARE: i16 = 2;

/// A (layer, datatype) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerSpec {
    pub layer: i16,
    pub datatype: i16,
}

impl LayerSpec {
    pub const fn new(layer: i16, datatype: i16) -> Self {
        Self { layer, datatype }
    }
}

impl From<[i16; 2]> for LayerSpec {
    fn from(pair: [i16; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.layer, self.datatype)
    }
}

/// End style of a path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PathEnds {
    /// Path ends exactly at its first and last points
    #[default]
    Flush,
    /// Path extends half its width beyond its end points
    Square,
}

/// Raw layout shape, in grid units
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Box {
        p0: GridPoint,
        p1: GridPoint,
    },
    Polygon {
        points: Vec<GridPoint>,
    },
    Path {
        points: Vec<GridPoint>,
        width: i64,
        ends: PathEnds,
    },
    Text {
        string: String,
        position: GridPoint,
    },
}

fn grid(p: &GdsPoint) -> GridPoint {
    [p.x as i64, p.y as i64]
}

fn gds_point(p: GridPoint) -> Result<GdsPoint> {
    match (i32::try_from(p[0]), i32::try_from(p[1])) {
        (Ok(x), Ok(y)) => Ok(GdsPoint::new(x, y)),
        _ => Err(Error::CoordinateOverflow { x: p[0], y: p[1] }),
    }
}

/// Boundary rings are stored closed; shapes keep them open
fn open_ring(xy: &[GdsPoint]) -> Vec<GridPoint> {
    let mut points: Vec<GridPoint> = xy.iter().map(grid).collect();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

fn closed_ring(points: &[GridPoint]) -> Result<Vec<GdsPoint>> {
    let mut xy = points.iter().map(|p| gds_point(*p)).collect::<Result<Vec<_>>>()?;
    if let Some(first) = xy.first().cloned() {
        if xy.last() != Some(&first) {
            xy.push(first);
        }
    }
    Ok(xy)
}

impl Shape {
    /// Layer and shape of a drawable GDS element. References and nodes
    /// yield `None`.
    pub fn from_gds(elem: &GdsElement) -> Option<(LayerSpec, Shape)> {
        match elem {
            GdsElement::GdsBoundary(b) => Some((
                LayerSpec::new(b.layer, b.datatype),
                Shape::Polygon {
                    points: open_ring(&b.xy),
                },
            )),
            GdsElement::GdsBox(b) => {
                let points: Vec<GridPoint> = b.xy.iter().map(grid).collect();
                let p0 = [
                    points.iter().map(|p| p[0]).min()?,
                    points.iter().map(|p| p[1]).min()?,
                ];
                let p1 = [
                    points.iter().map(|p| p[0]).max()?,
                    points.iter().map(|p| p[1]).max()?,
                ];
                Some((LayerSpec::new(b.layer, b.boxtype), Shape::Box { p0, p1 }))
            }
            GdsElement::GdsPath(p) => {
                let ends = if p.path_type == Some(PATH_TYPE_SQUARE) {
                    PathEnds::Square
                } else {
                    PathEnds::Flush
                };
                Some((
                    LayerSpec::new(p.layer, p.datatype),
                    Shape::Path {
                        points: p.xy.iter().map(grid).collect(),
                        width: p.width.unwrap_or(0).abs() as i64,
                        ends,
                    },
                ))
            }
            GdsElement::GdsTextElem(t) => Some((
                LayerSpec::new(t.layer, t.texttype),
                Shape::Text {
                    string: t.string.clone(),
                    position: grid(&t.xy),
                },
            )),
            _ => None,
        }
    }

    /// GDS element for this shape on `layer`. Boxes are written as
    /// rectangular boundaries.
    pub fn to_gds(&self, layer: LayerSpec) -> Result<GdsElement> {
        let elem = match self {
            Shape::Box { p0, p1 } => {
                let corners = [*p0, [p1[0], p0[1]], *p1, [p0[0], p1[1]]];
                GdsElement::GdsBoundary(GdsBoundary {
                    layer: layer.layer,
                    datatype: layer.datatype,
                    xy: closed_ring(&corners)?,
                    ..Default::default()
                })
            }
            Shape::Polygon { points } => GdsElement::GdsBoundary(GdsBoundary {
                layer: layer.layer,
                datatype: layer.datatype,
                xy: closed_ring(points)?,
                ..Default::default()
            }),
            Shape::Path { points, width, ends } => GdsElement::GdsPath(GdsPath {
                layer: layer.layer,
                datatype: layer.datatype,
                xy: points.iter().map(|p| gds_point(*p)).collect::<Result<_>>()?,
                width: Some(i32::try_from(*width).map_err(|_| Error::CoordinateOverflow {
                    x: *width,
                    y: 0,
                })?),
                path_type: Some(match ends {
                    PathEnds::Flush => 0,
                    PathEnds::Square => PATH_TYPE_SQUARE,
                }),
                ..Default::default()
            }),
            Shape::Text { string, position } => GdsElement::GdsTextElem(GdsTextElem {
                string: string.clone(),
                layer: layer.layer,
                texttype: layer.datatype,
                xy: gds_point(*position)?,
                ..Default::default()
            }),
        };
        Ok(elem)
    }

    /// Filled outline(s) of the shape in grid units. Text has none; a path
    /// yields one rectangle per segment.
    pub fn outlines(&self) -> Vec<Vec<[f64; 2]>> {
        match self {
            Shape::Box { p0, p1 } => {
                let (x0, x1) = (p0[0].min(p1[0]) as f64, p0[0].max(p1[0]) as f64);
                let (y0, y1) = (p0[1].min(p1[1]) as f64, p0[1].max(p1[1]) as f64);
                vec![vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]]]
            }
            Shape::Polygon { points } => {
                vec![points.iter().map(|p| [p[0] as f64, p[1] as f64]).collect()]
            }
            Shape::Path { points, width, ends } => path_outlines(points, *width as f64, *ends),
            Shape::Text { .. } => Vec::new(),
        }
    }

    fn transformed(&self, t: &Transform) -> Shape {
        match self {
            Shape::Box { p0, p1 } => {
                if t.preserves_axes() {
                    Shape::Box {
                        p0: t.apply(*p0),
                        p1: t.apply(*p1),
                    }
                } else {
                    let corners = [*p0, [p1[0], p0[1]], *p1, [p0[0], p1[1]]];
                    Shape::Polygon {
                        points: corners.iter().map(|p| t.apply(*p)).collect(),
                    }
                }
            }
            Shape::Polygon { points } => Shape::Polygon {
                points: points.iter().map(|p| t.apply(*p)).collect(),
            },
            Shape::Path { points, width, ends } => Shape::Path {
                points: points.iter().map(|p| t.apply(*p)).collect(),
                width: (*width as f64 * t.magnification).round() as i64,
                ends: *ends,
            },
            Shape::Text { string, position } => Shape::Text {
                string: string.clone(),
                position: t.apply(*position),
            },
        }
    }
}

fn path_outlines(points: &[GridPoint], width: f64, ends: PathEnds) -> Vec<Vec<[f64; 2]>> {
    let half = width / 2.0;
    let last = points.len().saturating_sub(2);
    points
        .windows(2)
        .enumerate()
        .filter_map(|(i, seg)| {
            let (a, b) = (seg[0], seg[1]);
            let (dx, dy) = ((b[0] - a[0]) as f64, (b[1] - a[1]) as f64);
            let len = dx.hypot(dy);
            if len == 0.0 {
                return None;
            }
            let (ux, uy) = (dx / len, dy / len);
            let mut start = [a[0] as f64, a[1] as f64];
            let mut end = [b[0] as f64, b[1] as f64];
            if ends == PathEnds::Square {
                if i == 0 {
                    start = [start[0] - ux * half, start[1] - uy * half];
                }
                if i == last {
                    end = [end[0] + ux * half, end[1] + uy * half];
                }
            }
            let (nx, ny) = (-uy * half, ux * half);
            Some(vec![
                [start[0] - nx, start[1] - ny],
                [end[0] - nx, end[1] - ny],
                [end[0] + nx, end[1] + ny],
                [start[0] + nx, start[1] + ny],
            ])
        })
        .collect()
}

/// Placement of one cell inside another.
///
/// Applied in GDS order: mirror about x, magnify, rotate (degrees,
/// counter-clockwise), translate to `origin`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub cell: String,
    pub origin: GridPoint,
    pub rotation: f64,
    pub mirror: bool,
    pub magnification: f64,
}

impl Instance {
    pub fn new(cell: impl Into<String>, origin: GridPoint) -> Self {
        Self {
            cell: cell.into(),
            origin,
            rotation: 0.0,
            mirror: false,
            magnification: 1.0,
        }
    }

    /// Absolute magnification and angle flags are read as relative
    fn with_strans(mut self, strans: Option<&GdsStrans>) -> Self {
        if let Some(st) = strans {
            self.mirror = st.reflected;
            self.magnification = st.mag.unwrap_or(1.0);
            self.rotation = st.angle.unwrap_or(0.0);
        }
        self
    }

    fn strans(&self) -> Option<GdsStrans> {
        let identity = !self.mirror && self.magnification == 1.0 && self.rotation == 0.0;
        (!identity).then(|| GdsStrans {
            reflected: self.mirror,
            mag: (self.magnification != 1.0).then_some(self.magnification),
            angle: (self.rotation != 0.0).then_some(self.rotation),
            ..Default::default()
        })
    }

    pub fn from_sref(sref: &GdsStructRef) -> Self {
        Instance::new(sref.name.clone(), grid(&sref.xy)).with_strans(sref.strans.as_ref())
    }

    /// One instance per array element. The two displacement points already
    /// hold the full column and row extents in the parent's frame.
    pub fn from_aref(aref: &GdsArrayRef) -> Vec<Self> {
        let origin = grid(&aref.xy[0]);
        let (cols, rows) = (aref.cols.max(0) as i64, aref.rows.max(0) as i64);
        if cols == 0 || rows == 0 {
            return Vec::new();
        }
        let col_end = grid(&aref.xy[1]);
        let row_end = grid(&aref.xy[2]);
        let step = |end: GridPoint, n: i64| {
            [
                (end[0] - origin[0]) as f64 / n as f64,
                (end[1] - origin[1]) as f64 / n as f64,
            ]
        };
        let (col_step, row_step) = (step(col_end, cols), step(row_end, rows));

        let mut out = Vec::with_capacity((cols * rows) as usize);
        for c in 0..cols {
            for r in 0..rows {
                let (c, r) = (c as f64, r as f64);
                let at = [
                    origin[0] + (c * col_step[0] + r * row_step[0]).round() as i64,
                    origin[1] + (c * col_step[1] + r * row_step[1]).round() as i64,
                ];
                out.push(Instance::new(aref.name.clone(), at).with_strans(aref.strans.as_ref()));
            }
        }
        out
    }

    pub fn to_gds(&self) -> Result<GdsStructRef> {
        Ok(GdsStructRef {
            name: self.cell.clone(),
            xy: gds_point(self.origin)?,
            strans: self.strans(),
            ..Default::default()
        })
    }
}

/// Affine grid transform accumulated down the cell hierarchy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    matrix: Matrix3<f64>,
    magnification: f64,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
            magnification: 1.0,
        }
    }

    pub fn from_instance(inst: &Instance) -> Self {
        let mirror = if inst.mirror {
            Matrix3::new_nonuniform_scaling(&Vector2::new(1.0, -1.0))
        } else {
            Matrix3::identity()
        };
        let scale = Matrix3::new_scaling(inst.magnification);
        let rotate = Matrix3::new_rotation(inst.rotation.to_radians());
        let translate = Matrix3::new_translation(&Vector2::new(
            inst.origin[0] as f64,
            inst.origin[1] as f64,
        ));
        Self {
            matrix: translate * rotate * scale * mirror,
            magnification: inst.magnification.abs(),
        }
    }

    /// Transform that applies `inner` first, then `self`
    pub fn then(&self, inner: &Transform) -> Transform {
        Transform {
            matrix: self.matrix * inner.matrix,
            magnification: self.magnification * inner.magnification,
        }
    }

    /// Map a grid point, snapping back onto the grid
    pub fn apply(&self, p: GridPoint) -> GridPoint {
        let v = self.matrix * Vector3::new(p[0] as f64, p[1] as f64, 1.0);
        [v.x.round() as i64, v.y.round() as i64]
    }

    /// True when axis-aligned rectangles stay axis-aligned
    pub fn preserves_axes(&self) -> bool {
        const EPS: f64 = 1e-9;
        let m = &self.matrix;
        (m[(0, 1)].abs() < EPS && m[(1, 0)].abs() < EPS)
            || (m[(0, 0)].abs() < EPS && m[(1, 1)].abs() < EPS)
    }
}

/// The narrow contract extraction needs from a layout database
pub trait LayoutEngine {
    /// Physical units (µm) per grid unit
    fn dbu(&self) -> f64;

    fn set_dbu(&mut self, dbu: f64);

    /// Cells that no other cell instantiates, in definition order
    fn top_cells(&self) -> Vec<String>;

    fn has_cell(&self, name: &str) -> bool;

    /// Every shape on `layer` within `cell` and its descendants, with the
    /// instance transforms applied
    fn shapes_rec(&self, cell: &str, layer: LayerSpec) -> Result<Vec<Shape>>;

    fn insert(&mut self, cell: &str, layer: LayerSpec, shape: Shape) -> Result<()>;

    fn write(&self, path: &Path) -> Result<()>;

    /// Merge box, polygon and path outlines into non-overlapping polygons
    /// (grid units). Text shapes contribute nothing.
    fn merge(&self, shapes: &[Shape]) -> Vec<Polygon<f64>> {
        let outlines: Vec<Vec<[f64; 2]>> = shapes.iter().flat_map(Shape::outlines).collect();
        merge_polygons(&outlines)
    }
}

/// Boolean union of arbitrary outlines
pub fn merge_polygons(outlines: &[Vec<[f64; 2]>]) -> Vec<Polygon<f64>> {
    let polygons: Vec<Polygon<f64>> = outlines
        .iter()
        .filter(|o| o.len() >= 3)
        .map(|o| to_geo_polygon(o).orient(Winding::Default))
        .collect();
    if polygons.is_empty() {
        return Vec::new();
    }
    unary_union(&polygons).0
}

fn gds_error(err: gds21::GdsError) -> Error {
    Error::Gds(format!("{err:?}"))
}

/// GDSII library with its grid size in µm
#[derive(Debug, Clone, PartialEq)]
pub struct GdsLayout {
    lib: GdsLibrary,
    dbu: f64,
}

impl GdsLayout {
    /// Empty library with user units of 1 µm
    pub fn new(name: impl Into<String>, dbu: f64) -> Self {
        let mut layout = Self {
            lib: GdsLibrary::new(name),
            dbu,
        };
        layout.set_dbu(dbu);
        layout
    }

    pub fn from_library(lib: GdsLibrary) -> Self {
        let dbu = lib.units.db_unit() * 1e6;
        Self { lib, dbu }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let lib = GdsLibrary::load(path).map_err(gds_error)?;
        debug!("Read {} cells from {}", lib.structs.len(), path.display());
        Ok(Self::from_library(lib))
    }

    pub fn library(&self) -> &GdsLibrary {
        &self.lib
    }

    pub fn cell(&self, name: &str) -> Option<&GdsStruct> {
        self.lib.structs.iter().find(|c| c.name == name)
    }

    fn cell_mut(&mut self, name: &str) -> Result<&mut GdsStruct> {
        self.lib
            .structs
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::UnknownCell(name.to_string()))
    }

    /// Return the named cell, creating an empty one if needed
    pub fn create_cell(&mut self, name: &str) -> &mut GdsStruct {
        let idx = match self.lib.structs.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                self.lib.structs.push(GdsStruct::new(name));
                self.lib.structs.len() - 1
            }
        };
        &mut self.lib.structs[idx]
    }

    /// Place `instance` inside `parent`
    pub fn place(&mut self, parent: &str, instance: &Instance) -> Result<()> {
        let sref = instance.to_gds()?;
        self.cell_mut(parent)?.elems.push(GdsElement::GdsStructRef(sref));
        Ok(())
    }

    fn children(def: &GdsStruct) -> impl Iterator<Item = Instance> + '_ {
        def.elems.iter().flat_map(|elem| match elem {
            GdsElement::GdsStructRef(sref) => vec![Instance::from_sref(sref)],
            GdsElement::GdsArrayRef(aref) => Instance::from_aref(aref),
            _ => Vec::new(),
        })
    }

    fn collect(
        &self,
        cell: &str,
        layer: LayerSpec,
        transform: Transform,
        stack: &mut Vec<String>,
        out: &mut Vec<Shape>,
    ) -> Result<()> {
        if stack.iter().any(|c| c == cell) {
            return Err(Error::RecursiveHierarchy(cell.to_string()));
        }
        let def = self
            .cell(cell)
            .ok_or_else(|| Error::UnknownCell(cell.to_string()))?;
        stack.push(cell.to_string());
        out.extend(
            def.elems
                .iter()
                .filter_map(Shape::from_gds)
                .filter(|(l, _)| *l == layer)
                .map(|(_, shape)| shape.transformed(&transform)),
        );
        for inst in Self::children(def) {
            let inner = transform.then(&Transform::from_instance(&inst));
            self.collect(&inst.cell, layer, inner, stack, out)?;
        }
        stack.pop();
        Ok(())
    }
}

impl LayoutEngine for GdsLayout {
    fn dbu(&self) -> f64 {
        self.dbu
    }

    fn set_dbu(&mut self, dbu: f64) {
        self.dbu = dbu;
        self.lib.units = GdsUnits::new(dbu, dbu * 1e-6);
    }

    fn top_cells(&self) -> Vec<String> {
        let referenced: Vec<String> = self
            .lib
            .structs
            .iter()
            .flat_map(|c| Self::children(c).map(|inst| inst.cell))
            .collect();
        self.lib
            .structs
            .iter()
            .filter(|c| !referenced.contains(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    fn has_cell(&self, name: &str) -> bool {
        self.cell(name).is_some()
    }

    fn shapes_rec(&self, cell: &str, layer: LayerSpec) -> Result<Vec<Shape>> {
        let mut out = Vec::new();
        self.collect(cell, layer, Transform::identity(), &mut Vec::new(), &mut out)?;
        Ok(out)
    }

    fn insert(&mut self, cell: &str, layer: LayerSpec, shape: Shape) -> Result<()> {
        let elem = shape.to_gds(layer)?;
        self.cell_mut(cell)?.elems.push(elem);
        Ok(())
    }

    fn write(&self, path: &Path) -> Result<()> {
        self.lib.save(path).map_err(gds_error)
    }
}

/// A layout engine bound to the cell under extraction
#[derive(Debug, Clone)]
pub struct Layout<E: LayoutEngine = GdsLayout> {
    /// Name of the bound cell
    pub name: String,
    engine: E,
}

impl<E: LayoutEngine> Layout<E> {
    pub fn new(name: impl Into<String>, engine: E) -> Self {
        Self {
            name: name.into(),
            engine,
        }
    }

    pub fn dbu(&self) -> f64 {
        self.engine.dbu()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Shapes on `layer` under the bound cell
    pub fn shapes(&self, layer: LayerSpec) -> Result<Vec<Shape>> {
        self.engine.shapes_rec(&self.name, layer)
    }
}

/// Bind `engine` to its only top cell, or to `top_cell` when given
pub fn select_top_cell<E: LayoutEngine>(engine: E, top_cell: Option<&str>) -> Result<Layout<E>> {
    let name = match top_cell {
        None => {
            let mut tops = engine.top_cells();
            if tops.len() > 1 {
                let err = Error::MultipleTopCells;
                error!("{err}");
                return Err(err);
            }
            tops.pop().ok_or(Error::NoTopCell)?
        }
        Some(name) => {
            if !engine.has_cell(name) {
                let err = Error::CellNotFound(name.to_string());
                error!("{err}");
                return Err(err);
            }
            name.to_string()
        }
    };
    Ok(Layout::new(name, engine))
}

/// Read a GDSII file and bind it to a top cell
pub fn load_layout(path: impl AsRef<Path>, top_cell: Option<&str>) -> Result<Layout<GdsLayout>> {
    select_top_cell(GdsLayout::open(path)?, top_cell)
}
