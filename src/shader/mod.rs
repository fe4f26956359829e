//! Shader programs: GLSL sources, stage compilation, linking and uniforms.
//!
//! Programs are built in three steps, each returning a `Result`:
//! [`ShaderSource`] → [`CompiledStage`] → [`Program`].

mod gpu_context;
mod program;
pub mod reflect;
mod stage;
mod uniforms;
mod wgpu_backend;

pub use gpu_context::GpuContext;
pub use program::{
    compile_and_link, Program, SamplerSlot, StageVisibility, TEXTURE_SET, UNIFORM_BINDING, UNIFORM_SET,
};
pub use stage::CompiledStage;
pub use uniforms::{UniformBlock, UniformKind, UniformSlot, UniformValue};
pub use wgpu_backend::WgpuBackend;

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Programmable stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    pub(crate) fn naga(self) -> naga::ShaderStage {
        match self {
            Stage::Vertex => naga::ShaderStage::Vertex,
            Stage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Vertex => f.write_str("vertex"),
            Stage::Fragment => f.write_str("fragment"),
        }
    }
}

/// GLSL source text for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    code: String,
    label: String,
    path: Option<PathBuf>,
}

impl ShaderSource {
    /// Source given as content. `label` names it in diagnostics.
    pub fn inline(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            label: label.into(),
            path: None,
        }
    }

    /// Reads a source file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let code = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read shader source {}", path.display()))?;
        Ok(Self {
            code,
            label: path.display().to_string(),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn label(&self) -> String {
        self.label.clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Failure to turn sources into a program. Fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("{stage} stage failed to compile: {diagnostic}")]
    StageCompile { stage: Stage, diagnostic: String },
    #[error("program failed to link: {diagnostic}")]
    Link { diagnostic: String },
}

/// Failure to write a uniform.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UniformError {
    /// No slot of that name; tolerated by the frame loop.
    #[error("program has no uniform named `{name}`")]
    Unknown { name: String },
    #[error("uniform `{name}` is {expected}, cannot write a {found}")]
    TypeMismatch {
        name: String,
        expected: UniformKind,
        found: UniformKind,
    },
    #[error("uniform `{name}` cannot read texture unit {unit}")]
    UnitOutOfRange { name: String, unit: u32 },
}
