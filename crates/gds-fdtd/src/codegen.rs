//! Python code generation for Tidy3D simulations

use std::fmt;
use std::str::FromStr;

use minijinja::{context, Environment};
use nalgebra::Vector3;
use serde::Serialize;

use crate::component::Port;
use crate::error::Result;
use crate::simulation::{monitor_direction, source_direction, SimJob, Simulation, C0_UM};

const TIDY3D_TEMPLATE: &str = r##"#!/usr/bin/env python3
"""
Tidy3D FDTD simulation - {{ component }}
Job: {{ job }} (source at {{ in_port }}, mode {{ mode_index }})

Generated: {{ timestamp }}
"""

import numpy as np
import tidy3d as td
from tidy3d import web

# =============================================================================
# Simulation parameters (µm)
# =============================================================================

WAVL_MIN = {{ wavl_min }}
WAVL_MAX = {{ wavl_max }}
WAVL_PTS = {{ wavl_pts }}
WAVL_CENTER = {{ wavl_center }}
FREQS = td.C_0 / np.linspace(WAVL_MIN, WAVL_MAX, WAVL_PTS)
FREQ0 = td.C_0 / WAVL_CENTER
FWIDTH = FREQS.max() - FREQS.min()

SIM_CENTER = ({{ center }})
SIM_SIZE = ({{ size }})
RUN_TIME = {{ run_time }}
NUM_MODES = {{ num_modes }}

# Propagation direction each output monitor is read in
MONITOR_DIRECTIONS = { {{- monitor_directions -}} }


# =============================================================================
# Structures
# =============================================================================

def build_structures():
    structures = []
{% for s in structures %}

    # {{ s.name }}
    structures.append(td.Structure(
        geometry=td.PolySlab(
            vertices=[{{ s.vertices }}],
            slab_bounds=({{ s.slab_bounds }}),
            axis=2,
            sidewall_angle={{ s.sidewall_angle }},
        ),
        medium={{ s.medium }},
        name="{{ s.name }}",
    ))
{% endfor %}
    return structures


# =============================================================================
# Source and monitors
# =============================================================================

def build_source():
    return td.ModeSource(
        center=({{ source.center }}),
        size=({{ source.size }}),
        direction="{{ source.direction }}",
        source_time=td.GaussianPulse(freq0=FREQ0, fwidth=FWIDTH),
        mode_spec=td.ModeSpec(num_modes=NUM_MODES),
        mode_index={{ mode_index }},
        num_freqs=9,
    )


def build_monitors():
    monitors = []
{% for m in monitors %}
    monitors.append(td.ModeMonitor(
        center=({{ m.center }}),
        size=({{ m.size }}),
        freqs=FREQS,
        mode_spec=td.ModeSpec(num_modes=NUM_MODES),
        name="{{ m.name }}",
    ))
{% endfor %}
    monitors.append(td.FieldMonitor(
        center=SIM_CENTER,
        size=({{ field_size }}),
        freqs=[FREQ0],
        name="field",
    ))
    return monitors


# =============================================================================
# Main
# =============================================================================

def build_simulation():
    return td.Simulation(
        center=SIM_CENTER,
        size=SIM_SIZE,
        grid_spec=td.GridSpec.auto(min_steps_per_wvl={{ min_steps_per_wvl }}, wavelength=WAVL_CENTER),
        structures=build_structures(),
        sources=[build_source()],
        monitors=build_monitors(),
        run_time=RUN_TIME,
        boundary_spec=td.BoundarySpec.all_sides(boundary=td.PML()),
    )


if __name__ == "__main__":
    sim = build_simulation()
    data = web.run(sim, task_name="{{ job }}", path="{{ job }}.hdf5")
    for name, direction in MONITOR_DIRECTIONS.items():
        amps = data[name].amps.sel(direction=direction, mode_index=0).values
        print(name, np.abs(amps) ** 2)
"##;

/// Plane the field monitor is normal to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldAxis {
    X,
    Y,
    #[default]
    Z,
}

impl FromStr for FieldAxis {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "x" | "X" => Ok(FieldAxis::X),
            "y" | "Y" => Ok(FieldAxis::Y),
            "z" | "Z" => Ok(FieldAxis::Z),
            other => Err(format!("unknown axis {other:?}, expected x, y or z")),
        }
    }
}

impl fmt::Display for FieldAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldAxis::X => "x",
            FieldAxis::Y => "y",
            FieldAxis::Z => "z",
        };
        f.write_str(s)
    }
}

/// Knobs for script generation
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    /// Mode plane extends this far beyond the port width on each side (µm)
    pub mode_padding: f64,
    pub field_monitor_axis: FieldAxis,
    /// Run time in units of the time light needs to cross the largest
    /// simulation dimension
    pub run_time_factor: f64,
    pub min_steps_per_wvl: u32,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            mode_padding: 1.0,
            field_monitor_axis: FieldAxis::Z,
            run_time_factor: 50.0,
            min_steps_per_wvl: 15,
        }
    }
}

#[derive(Serialize)]
struct SlabCtx {
    name: String,
    vertices: String,
    slab_bounds: String,
    sidewall_angle: String,
    medium: String,
}

#[derive(Serialize)]
struct PlaneCtx {
    name: String,
    center: String,
    size: String,
    direction: &'static str,
}

fn triple(v: &Vector3<f64>) -> String {
    format!("{:.6}, {:.6}, {:.6}", v.x, v.y, v.z)
}

fn big(v: f64) -> String {
    if v.is_infinite() {
        "td.inf".to_string()
    } else {
        format!("{v:.6}")
    }
}

/// Mode plane through a port, normal to its direction
fn mode_plane(port: &Port, z_span: f64, padding: f64) -> (Vector3<f64>, Vector3<f64>) {
    let center = Vector3::new(port.x(), port.y(), port.z().unwrap_or(0.0));
    let across = port.width + 2.0 * padding;
    let size = if port.direction.is_horizontal() {
        Vector3::new(0.0, across, z_span)
    } else {
        Vector3::new(across, 0.0, z_span)
    };
    (center, size)
}

/// Run time in seconds for a simulation box of `size` µm
pub fn run_time(size: &Vector3<f64>, factor: f64) -> f64 {
    factor * size.max() / C0_UM
}

/// Render a Tidy3D Python script running `job` on the simulation's component
pub fn generate_tidy3d_script(
    sim: &Simulation,
    job: &SimJob,
    config: &ScriptConfig,
) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("tidy3d", TIDY3D_TEMPLATE)?;
    let template = env.get_template("tidy3d")?;

    let component = sim.component();
    let bounds = &component.bounds;
    let center = Vector3::new(bounds.x_center(), bounds.y_center(), bounds.z_center);
    let size = Vector3::new(bounds.x_span(), bounds.y_span(), bounds.z_span);

    let structures: Vec<SlabCtx> = component
        .structures
        .iter()
        .flat_map(|g| g.structures())
        .map(|s| {
            let (bottom, top) = s.slab_bounds();
            SlabCtx {
                name: s.name.clone(),
                vertices: s
                    .polygon
                    .iter()
                    .map(|v| format!("({:.6}, {:.6})", v[0], v[1]))
                    .collect::<Vec<_>>()
                    .join(", "),
                slab_bounds: format!("{bottom:.6}, {top:.6}"),
                sidewall_angle: format!("{:.6}", (90.0 - s.sidewall_angle).to_radians()),
                medium: s.material.to_tidy3d_python(),
            }
        })
        .collect();

    let in_port = sim.in_port(job);
    let (src_center, src_size) = mode_plane(in_port, bounds.z_span, config.mode_padding);
    let source = PlaneCtx {
        name: in_port.name.clone(),
        center: triple(&src_center),
        size: triple(&src_size),
        direction: source_direction(in_port).sign(),
    };

    let monitors: Vec<PlaneCtx> = component
        .ports
        .iter()
        .map(|p| {
            let (c, s) = mode_plane(p, bounds.z_span, config.mode_padding);
            PlaneCtx {
                name: p.name.clone(),
                center: triple(&c),
                size: triple(&s),
                direction: monitor_direction(p).sign(),
            }
        })
        .collect();

    let field_size = match config.field_monitor_axis {
        FieldAxis::X => [0.0, f64::INFINITY, f64::INFINITY],
        FieldAxis::Y => [f64::INFINITY, 0.0, f64::INFINITY],
        FieldAxis::Z => [f64::INFINITY, f64::INFINITY, 0.0],
    }
    .map(big)
    .join(", ");

    let monitor_directions = monitors
        .iter()
        .map(|m| format!("\"{}\": \"{}\"", m.name, m.direction))
        .collect::<Vec<_>>()
        .join(", ");

    let sweep = sim.sweep();
    let output = template.render(context! {
        component => component.name.clone(),
        job => job.name.clone(),
        in_port => in_port.name.clone(),
        mode_index => job.mode_index,
        num_modes => job.num_modes,
        timestamp => chrono::Utc::now().to_rfc3339(),
        wavl_min => format!("{:.6}", sweep.min),
        wavl_max => format!("{:.6}", sweep.max),
        wavl_pts => sweep.points,
        wavl_center => format!("{:.6}", sweep.center()),
        center => triple(&center),
        size => triple(&size),
        run_time => format!("{:.6e}", run_time(&size, config.run_time_factor)),
        min_steps_per_wvl => config.min_steps_per_wvl,
        structures => structures,
        source => source,
        monitors => monitors,
        field_size => field_size,
        monitor_directions => monitor_directions,
    })?;

    Ok(output)
}
