//! Error types for layout extraction and S-parameter assembly

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "More than one top cell found, ensure only 1 top cell exists. \
         Otherwise, specify the cell using the top_cell argument."
    )]
    MultipleTopCells,

    #[error("Top cell with name {0} not found.")]
    CellNotFound(String),

    #[error("Layout contains no top cell")]
    NoTopCell,

    #[error("Cell {0} is referenced but never defined")]
    UnknownCell(String),

    #[error("Cell {0} instantiates itself through its hierarchy")]
    RecursiveHierarchy(String),

    #[error("Point ({x}, {y}) does not fit a 32-bit GDS coordinate")]
    CoordinateOverflow { x: i64, y: i64 },

    #[error("GDS error: {0}")]
    Gds(String),

    #[error("Pin path must have exactly 2 points, found {0}")]
    MalformedPinPath(usize),

    #[error("Pin path from ({x1}, {y1}) to ({x2}, {y2}) is not axis aligned")]
    SkewedPinPath { x1: i64, y1: i64, x2: i64, y2: i64 },

    #[error("No text label within {tolerance} of port center ({x}, {y})")]
    UnlabeledPort { x: f64, y: f64, tolerance: f64 },

    #[error("Port name {0:?} contains no digits, cannot derive an index")]
    PortIndex(String),

    #[error("Port name {0:?} gives an index that does not fit in 32 bits")]
    PortIndexOverflow(String),

    #[error("No box or polygon found on region layer {0}")]
    MissingRegion(String),

    #[error("Region layer {layer} holds {count} shapes, expected exactly one")]
    AmbiguousRegion { layer: String, count: usize },

    #[error("Technology defines no {0} layer")]
    MissingTechLayer(&'static str),

    #[error("Material {name}: {reason}")]
    InvalidMaterial { name: String, reason: String },

    #[error("Ports without a resolved height cannot be simulated: {0:?}")]
    UnresolvedPorts(Vec<String>),

    #[error("Port index {index} out of range for a device with {count} ports")]
    PortOutOfRange { index: usize, count: usize },

    #[error("Solver results have no monitor named {0}")]
    MissingMonitor(String),

    #[error("Monitor {monitor} has no mode index {mode}")]
    MissingMode { monitor: String, mode: usize },

    #[error("Monitor {monitor} returned {found} samples, expected {expected}")]
    SpectrumLength {
        monitor: String,
        expected: usize,
        found: usize,
    },

    #[error("Solver failed on job {job}: {message}")]
    Solver { job: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Template(#[from] minijinja::Error),
}
