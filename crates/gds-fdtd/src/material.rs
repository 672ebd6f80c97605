//! Optical material handles and solver material mapping
//!
//! Materials are passed through extraction untouched; only the script
//! generator looks inside them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a material is defined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MaterialKind {
    /// Non-dispersive, lossless medium with refractive index `n`
    Index { n: f64 },
    /// Entry of the solver's dispersive material library
    Library { material: String, variant: String },
}

/// Named material handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub kind: MaterialKind,
}

/// Material reference as written in a technology file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRef {
    pub tidy3d_db: MaterialDb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaterialDb {
    Index { nk: f64 },
    Library { model: Vec<String> },
}

impl Material {
    pub fn index(name: impl Into<String>, n: f64) -> Self {
        Self {
            name: name.into(),
            kind: MaterialKind::Index { n },
        }
    }

    pub fn library(material: impl Into<String>, variant: impl Into<String>) -> Self {
        let material = material.into();
        let variant = variant.into();
        Self {
            name: format!("{material}_{variant}"),
            kind: MaterialKind::Library { material, variant },
        }
    }

    /// Create from a technology material reference
    pub fn from_ref(name: &str, mat_ref: &MaterialRef) -> Result<Self> {
        match &mat_ref.tidy3d_db {
            MaterialDb::Index { nk } => Ok(Self::index(name, *nk)),
            MaterialDb::Library { model } => match model.as_slice() {
                [material, variant] => Ok(Self::library(material.as_str(), variant.as_str())),
                _ => Err(Error::InvalidMaterial {
                    name: name.to_string(),
                    reason: format!("library model needs [material, variant], got {model:?}"),
                }),
            },
        }
    }

    /// Relative permittivity, for index-defined materials
    pub fn permittivity(&self) -> Option<f64> {
        match self.kind {
            MaterialKind::Index { n } => Some(n * n),
            MaterialKind::Library { .. } => None,
        }
    }

    /// Tidy3D Python expression for this material
    pub fn to_tidy3d_python(&self) -> String {
        match &self.kind {
            MaterialKind::Index { n } => format!("td.Medium(permittivity={})", n * n),
            MaterialKind::Library { material, variant } => {
                format!("td.material_library[\"{material}\"][\"{variant}\"]")
            }
        }
    }
}
