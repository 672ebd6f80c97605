//! Geometry extraction from a layout cell
//!
//! Structures come from merged layer polygons, ports from 2-point pin paths
//! plus their text labels, and the simulation region from the single shape on
//! the device-recognition layer. Grid coordinates are scaled by `dbu` here
//! and nowhere else.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::component::{Port, Region, Structure};
use crate::error::{Error, Result};
use crate::geometry::{dilate, to_simple_polygon, Direction, Vertex};
use crate::layout::{GridPoint, LayerSpec, Layout, LayoutEngine, Shape};
use crate::material::Material;

/// Layer receiving port-extension stubs
pub const EXTENSION_LAYER: LayerSpec = LayerSpec::new(1, 0);

/// Merge every box, polygon and path on `layer` and turn each merged polygon
/// into a structure named `{name}_{index}`.
pub fn load_structure<E: LayoutEngine>(
    layout: &Layout<E>,
    name: &str,
    layer: LayerSpec,
    z_base: f64,
    z_span: f64,
    material: &Material,
    sidewall_angle: f64,
) -> Result<Vec<Structure>> {
    let dbu = layout.dbu();
    let shapes: Vec<Shape> = layout
        .shapes(layer)?
        .into_iter()
        .filter(|s| !matches!(s, Shape::Text { .. }))
        .collect();
    let merged = layout.engine().merge(&shapes);

    let structures: Vec<Structure> = merged
        .iter()
        .enumerate()
        .map(|(idx, poly)| {
            let structure_name = format!("{name}_{idx}");
            if !poly.interiors().is_empty() {
                debug!(
                    "{structure_name}: joining {} hole(s) to the outer contour",
                    poly.interiors().len()
                );
            }
            let vertices: Vec<Vertex> = to_simple_polygon(poly)
                .iter()
                .map(|v| [v[0] * dbu, v[1] * dbu])
                .collect();
            Structure::new(structure_name, vertices, z_base, z_span, material.clone())
                .with_sidewall_angle(sidewall_angle)
        })
        .collect();

    info!(
        "Layer {layer}: {} shapes merged into {} {name} structures",
        shapes.len(),
        structures.len()
    );
    Ok(structures)
}

/// A vertical slab covering `bounds` grown by `extension` (µm); sidewalls are
/// always vertical.
pub fn load_structure_from_bounds(
    bounds: &Region,
    name: &str,
    z_base: f64,
    z_span: f64,
    material: &Material,
    extension: f64,
) -> Structure {
    Structure::new(
        name,
        dilate(&bounds.vertices, extension),
        z_base,
        z_span,
        material.clone(),
    )
}

/// Simulation region from the single box or polygon on `layer`, optionally
/// dilated by `extension`.
pub fn load_region<E: LayoutEngine>(
    layout: &Layout<E>,
    layer: LayerSpec,
    z_center: f64,
    z_span: f64,
    extension: f64,
) -> Result<Region> {
    let dbu = layout.dbu();
    let mut outlines: Vec<Vec<[f64; 2]>> = layout
        .shapes(layer)?
        .iter()
        .filter(|s| matches!(s, Shape::Box { .. } | Shape::Polygon { .. }))
        .flat_map(Shape::outlines)
        .collect();

    let outline = match outlines.len() {
        0 => return Err(Error::MissingRegion(layer.to_string())),
        1 => outlines.remove(0),
        count => {
            return Err(Error::AmbiguousRegion {
                layer: layer.to_string(),
                count,
            })
        }
    };

    let mut vertices: Vec<Vertex> = outline.iter().map(|p| [p[0] * dbu, p[1] * dbu]).collect();
    if extension != 0.0 {
        vertices = dilate(&vertices, extension);
    }
    Ok(Region::new(vertices, z_center, z_span))
}

/// Orientation of a pin path from the axis its two points share
pub fn pin_direction(points: &[GridPoint]) -> Result<Direction> {
    let [p1, p2] = points else {
        return Err(Error::MalformedPinPath(points.len()));
    };
    if p1[0] == p2[0] {
        Ok(if p1[1] > p2[1] {
            Direction::South
        } else {
            Direction::North
        })
    } else if p1[1] == p2[1] {
        Ok(if p1[0] > p2[0] {
            Direction::West
        } else {
            Direction::East
        })
    } else {
        Err(Error::SkewedPinPath {
            x1: p1[0],
            y1: p1[1],
            x2: p2[0],
            y2: p2[1],
        })
    }
}

/// Midpoint along the varying axis, fixed coordinate on the other, in µm
pub fn pin_center(p1: GridPoint, p2: GridPoint, direction: Direction, dbu: f64) -> Vertex {
    if direction.is_horizontal() {
        [dbu * (p1[0] + p2[0]) as f64 / 2.0, dbu * p1[1] as f64]
    } else {
        [dbu * p1[0] as f64, dbu * (p1[1] + p2[1]) as f64 / 2.0]
    }
}

/// Nearest label within `max_distance` of `center`
pub fn resolve_label(labels: &[(String, Vertex)], center: Vertex, max_distance: f64) -> Option<&str> {
    labels
        .iter()
        .map(|(text, pos)| (text, (pos[0] - center[0]).hypot(pos[1] - center[1])))
        .filter(|(_, d)| *d <= max_distance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(text, _)| text.as_str())
}

/// Ports from the 2-point paths on the pin layer, named by the text label
/// found within `label_tolerance` (µm) of each path's center.
pub fn load_ports<E: LayoutEngine>(
    layout: &Layout<E>,
    layer: LayerSpec,
    label_tolerance: f64,
) -> Result<Vec<Port>> {
    let dbu = layout.dbu();
    let shapes = layout.shapes(layer)?;

    let labels: Vec<(String, Vertex)> = shapes
        .iter()
        .filter_map(|s| match s {
            Shape::Text { string, position } => Some((
                string.clone(),
                [position[0] as f64 * dbu, position[1] as f64 * dbu],
            )),
            _ => None,
        })
        .collect();

    let mut ports = Vec::new();
    for shape in &shapes {
        let Shape::Path { points, width, .. } = shape else {
            continue;
        };
        let direction = pin_direction(points)?;
        let center = pin_center(points[0], points[1], direction, dbu);
        let name = resolve_label(&labels, center, label_tolerance).ok_or(Error::UnlabeledPort {
            x: center[0],
            y: center[1],
            tolerance: label_tolerance,
        })?;
        debug!("Port {name} at ({}, {}) facing {}°", center[0], center[1], direction.degrees());
        ports.push(Port::new(name, center, *width as f64 * dbu, direction));
    }

    info!("Layer {layer}: {} ports", ports.len());
    Ok(ports)
}

/// Draw each port's extension stub onto [`EXTENSION_LAYER`] of the bound cell
pub fn insert_port_extensions<E: LayoutEngine>(
    layout: &mut Layout<E>,
    ports: &[Port],
    buffer: f64,
) -> Result<()> {
    let dbu = layout.dbu();
    let cell = layout.name.clone();
    for port in ports {
        let points = port
            .polygon_extension(buffer)
            .iter()
            .map(|v| [(v[0] / dbu) as i64, (v[1] / dbu) as i64])
            .collect();
        layout
            .engine_mut()
            .insert(&cell, EXTENSION_LAYER, Shape::Polygon { points })?;
    }
    Ok(())
}

/// `dir/name.ext` becomes `dir/name_with_extensions.ext`
pub fn extensions_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{stem}_with_extensions.{}", ext.to_string_lossy()),
        None => format!("{stem}_with_extensions"),
    };
    path.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::is_point_inside_polygon;
    use crate::layout::{select_top_cell, GdsLayout};
    use crate::testutil::*;
    use pretty_assertions::assert_eq;

    fn escalator_layout() -> Layout<GdsLayout> {
        select_top_cell(escalator(), None).unwrap()
    }

    fn silicon() -> Material {
        Material::index("Si", 3.47)
    }

    #[test]
    fn test_load_structure_merges_hierarchy() {
        let layout = escalator_layout();
        let si = load_structure(&layout, "Si", SI, 0.0, 0.22, &silicon(), 85.0).unwrap();

        // The top-level box and the placed taper overlap into one polygon
        assert_eq!(si.len(), 1);
        assert_eq!(si[0].name, "Si_0");
        assert_eq!(si[0].sidewall_angle, 85.0);
        let (min, max) = crate::geometry::bounding_box(&si[0].polygon).unwrap();
        assert!((min[0] + 10.5).abs() < 1e-9 && max[0].abs() < 1e-9);
        assert!((min[1] + 0.25).abs() < 1e-9 && (max[1] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_structure_names_follow_merge_index() {
        let db = single_cell(
            "top",
            vec![
                (SI, boxed(0, 0, 1000, 1000)),
                (SI, boxed(5000, 0, 6000, 1000)),
                (SI, pin([10000, 0], [12000, 0], 500)),
            ],
        );
        let layout = select_top_cell(db, None).unwrap();

        let si = load_structure(&layout, "Si", SI, 0.0, 0.22, &silicon(), 90.0).unwrap();
        let mut names: Vec<&str> = si.iter().map(|s| s.name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["Si_0", "Si_1", "Si_2"]);
        assert!(si.iter().all(|s| s.polygon.first() != s.polygon.last()));
    }

    #[test]
    fn test_ring_keeps_its_hole() {
        // 10 x 10 µm frame, 2 µm wide, drawn as four overlapping boxes
        let db = single_cell(
            "ring",
            vec![
                (SI, boxed(0, 0, 10000, 2000)),
                (SI, boxed(0, 8000, 10000, 10000)),
                (SI, boxed(0, 0, 2000, 10000)),
                (SI, boxed(8000, 0, 10000, 10000)),
            ],
        );
        let layout = select_top_cell(db, None).unwrap();
        let si = load_structure(&layout, "Si", SI, 0.0, 0.22, &silicon(), 90.0).unwrap();

        assert_eq!(si.len(), 1);
        let ring = &si[0].polygon;
        let n = ring.len();
        let area = (0..n)
            .map(|i| {
                let (a, b) = (ring[i], ring[(i + 1) % n]);
                a[0] * b[1] - b[0] * a[1]
            })
            .sum::<f64>()
            .abs()
            / 2.0;
        assert!((area - 64.0).abs() < 1e-6, "area {area}");
        assert!(!is_point_inside_polygon([5.0, 5.0], ring));
        assert!(is_point_inside_polygon([1.0, 5.0], ring));
    }

    #[test]
    fn test_empty_layer_gives_no_structures() {
        let layout = escalator_layout();
        let none = load_structure(&layout, "M1", LayerSpec::new(9, 0), 0.0, 1.0, &silicon(), 90.0);
        assert!(none.unwrap().is_empty());
    }

    #[test]
    fn test_load_ports() {
        let layout = escalator_layout();
        let ports = load_ports(&layout, PINREC, 0.0005).unwrap();

        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name, "opt1");
        assert!((ports[0].width - 0.5).abs() < 1e-9);
        assert_eq!(ports[0].direction, Direction::West);
        assert!((ports[0].x() + 10.0).abs() < 1e-9);
        assert_eq!(ports[1].name, "opt2");
        assert_eq!(ports[1].direction, Direction::East);
        assert!((ports[1].width - 1.0).abs() < 1e-9);
        assert!(ports.iter().all(|p| p.y() == 0.0 && p.z.is_none()));
    }

    #[test]
    fn test_pin_direction() {
        assert_eq!(pin_direction(&[[0, 0], [0, 10]]).unwrap(), Direction::North);
        assert_eq!(pin_direction(&[[0, 10], [0, 0]]).unwrap(), Direction::South);
        assert_eq!(pin_direction(&[[0, 0], [10, 0]]).unwrap(), Direction::East);
        assert_eq!(pin_direction(&[[10, 0], [0, 0]]).unwrap(), Direction::West);
        assert!(matches!(
            pin_direction(&[[0, 0], [5, 0], [10, 0]]),
            Err(Error::MalformedPinPath(3))
        ));
        assert!(matches!(
            pin_direction(&[[0, 0], [5, 5]]),
            Err(Error::SkewedPinPath { .. })
        ));
    }

    #[test]
    fn test_pin_center() {
        assert_eq!(pin_center([0, 200], [0, 400], Direction::North, 0.5), [0.0, 150.0]);
        assert_eq!(pin_center([1000, 0], [3000, 0], Direction::East, 0.5), [1000.0, 0.0]);
        assert_eq!(pin_center([4, 8], [4, 2], Direction::South, 0.25), [1.0, 1.25]);
    }

    #[test]
    fn test_malformed_pin_path_is_fatal() {
        let mut db = escalator();
        db.insert(
            "si_sin_escalator",
            PINREC,
            Shape::Path {
                points: vec![[0, 0], [0, 10], [0, 20]],
                width: 500,
                ends: Default::default(),
            },
        )
        .unwrap();
        let layout = select_top_cell(db, None).unwrap();
        assert!(matches!(
            load_ports(&layout, PINREC, 0.0005),
            Err(Error::MalformedPinPath(3))
        ));
    }

    #[test]
    fn test_label_resolution_uses_tolerance() {
        let labels = vec![
            ("opt1".to_string(), [0.0, 0.0]),
            ("opt2".to_string(), [0.0004, 0.0]),
        ];
        assert_eq!(resolve_label(&labels, [0.0003, 0.0], 0.0005), Some("opt2"));
        assert_eq!(resolve_label(&labels, [0.0001, 0.0], 0.0005), Some("opt1"));
        assert_eq!(resolve_label(&labels, [5.0, 0.0], 0.0005), None);
    }

    #[test]
    fn test_unlabeled_port_is_reported() {
        let db = single_cell("top", vec![(PINREC, pin([0, 0], [20, 0], 500))]);
        let layout = select_top_cell(db, None).unwrap();
        assert!(matches!(
            load_ports(&layout, PINREC, 0.0005),
            Err(Error::UnlabeledPort { .. })
        ));
    }

    #[test]
    fn test_load_region() {
        let layout = escalator_layout();
        let region = load_region(&layout, DEVREC, 0.11, 4.0, 1.3).unwrap();
        assert_eq!(region.y_center(), 0.0);
        assert!((region.x_span() - 26.6).abs() < 1e-9);
        assert_eq!((region.z_center, region.z_span), (0.11, 4.0));

        let exact = load_region(&layout, DEVREC, 0.0, 5.0, 0.0).unwrap();
        assert_eq!(exact.vertices.len(), 4);
        assert!((exact.x_min() + 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_region_layer_errors() {
        let layout = escalator_layout();
        assert!(matches!(
            load_region(&layout, LayerSpec::new(99, 0), 0.0, 5.0, 1.3),
            Err(Error::MissingRegion(_))
        ));

        let mut db = escalator();
        db.insert("si_sin_escalator", DEVREC, boxed(0, 0, 10, 10))
            .unwrap();
        let layout = select_top_cell(db, None).unwrap();
        assert!(matches!(
            load_region(&layout, DEVREC, 0.0, 5.0, 1.3),
            Err(Error::AmbiguousRegion { count: 2, .. })
        ));
    }

    #[test]
    fn test_structure_from_bounds() {
        let layout = escalator_layout();
        let bounds = load_region(&layout, DEVREC, 0.0, 4.0, 0.0).unwrap();
        let clad = Material::index("SiO2", 1.48);
        let sub = load_structure_from_bounds(&bounds, "Substrate", 0.0, -3.0, &clad, 2.0);

        assert_eq!(sub.sidewall_angle, 90.0);
        assert_eq!(sub.name, "Substrate");
        assert!((sub.polygon[0][0] + 14.0).abs() < 1e-9);
        assert!((sub.polygon[2][1] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_insert_port_extensions() {
        let mut layout = escalator_layout();
        let ports = load_ports(&layout, PINREC, 0.0005).unwrap();
        let before = layout.shapes(EXTENSION_LAYER).unwrap().len();

        insert_port_extensions(&mut layout, &ports, 2.0).unwrap();

        let shapes = layout.shapes(EXTENSION_LAYER).unwrap();
        assert_eq!(shapes.len(), before + 2);
        // opt2 faces east: a 1 µm wide stub running 2 µm outward
        let stub = shapes
            .iter()
            .filter_map(|s| match s {
                Shape::Polygon { points } => Some(points),
                _ => None,
            })
            .find(|points| points.iter().all(|p| p[0] >= 9999))
            .unwrap();
        assert_eq!(stub.len(), 4);
        assert!((stub[1][0] - 12000).abs() <= 1);
        assert!((stub[0][1] - 500).abs() <= 1 && (stub[3][1] + 500).abs() <= 1);
    }

    #[test]
    fn test_extensions_path() {
        assert_eq!(
            extensions_path(Path::new("out/device.gds")),
            PathBuf::from("out/device_with_extensions.gds")
        );
        assert_eq!(
            extensions_path(Path::new("device")),
            PathBuf::from("device_with_extensions")
        );
    }
}
