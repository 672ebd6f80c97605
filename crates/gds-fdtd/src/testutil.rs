//! Layout fixtures shared by unit tests

use crate::layout::{GdsLayout, Instance, LayerSpec, LayoutEngine, Shape};

pub const SI: LayerSpec = LayerSpec::new(1, 0);
pub const SIN: LayerSpec = LayerSpec::new(1, 5);
pub const PINREC: LayerSpec = LayerSpec::new(1, 10);
pub const DEVREC: LayerSpec = LayerSpec::new(68, 0);

pub fn boxed(x0: i64, y0: i64, x1: i64, y1: i64) -> Shape {
    Shape::Box {
        p0: [x0, y0],
        p1: [x1, y1],
    }
}

pub fn pin(from: [i64; 2], to: [i64; 2], width: i64) -> Shape {
    Shape::Path {
        points: vec![from, to],
        width,
        ends: Default::default(),
    }
}

pub fn label(string: &str, position: [i64; 2]) -> Shape {
    Shape::Text {
        string: string.to_string(),
        position,
    }
}

/// One cell holding `shapes`, dbu = 1 nm
pub fn single_cell(name: &str, shapes: Vec<(LayerSpec, Shape)>) -> GdsLayout {
    let mut db = GdsLayout::new("lib", 0.001);
    db.create_cell(name);
    for (layer, shape) in shapes {
        db.insert(name, layer, shape).unwrap();
    }
    db
}

/// Silicon waveguide on the west half handing over to a nitride waveguide on
/// the east half; the silicon taper sits in a sub-cell and both pins lie
/// half a micron inside their waveguide. dbu = 1 nm.
pub fn escalator() -> GdsLayout {
    let mut db = single_cell("taper", vec![(SI, boxed(0, -250, 5000, 250))]);

    let top = "si_sin_escalator";
    db.create_cell(top);
    db.place(top, &Instance::new("taper", [-5000, 0])).unwrap();
    for (layer, shape) in [
        (SI, boxed(-10500, -250, -4000, 250)),
        (SIN, boxed(0, -500, 10500, 500)),
        (PINREC, pin([-9990, 0], [-10010, 0], 500)),
        (PINREC, label("opt1", [-10000, 0])),
        (PINREC, pin([9990, 0], [10010, 0], 1000)),
        (PINREC, label("opt2", [10000, 0])),
        (DEVREC, boxed(-12000, -3000, 12000, 3000)),
    ] {
        db.insert(top, layer, shape).unwrap();
    }
    db
}
