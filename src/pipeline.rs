//! Pipeline assembly: one program, one geometry buffer and the textures they
//! read, owned together and released together.

use crate::frame::{BackendError, GeometryId, ProgramId, RenderBackend};
use crate::shader::{Program, UniformValue};
use crate::texture::{TextureError, TextureHandle, MAX_TEXTURE_UNITS};
use crate::vertex::{Geometry, Vertex};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the time uniform unless overridden.
pub const DEFAULT_TIME_UNIFORM: &str = "time";

/// Setup failure. Nothing built so far survives it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("program `{program}` does not match the vertex layout: {reason}")]
    LayoutMismatch { program: String, reason: String },
    #[error(transparent)]
    Texture(#[from] TextureError),
    #[error("failed to create {0}")]
    Backend(#[from] BackendError),
}

/// A loaded texture placed on a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub unit: u32,
    pub handle: TextureHandle,
}

/// Sampler uniform `name` reads texture unit `unit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerBinding {
    pub name: String,
    pub unit: u32,
}

/// Collects what a pipeline needs before any device resource is created.
#[derive(Debug)]
pub struct PipelineBuilder {
    program: Program,
    textures: Vec<TextureBinding>,
    samplers: Vec<SamplerBinding>,
    time_uniform: String,
    clear_color: [f64; 4],
}

impl PipelineBuilder {
    /// Hands a loaded texture to the pipeline. It is released on teardown.
    pub fn texture(mut self, unit: u32, handle: TextureHandle) -> Self {
        self.textures.push(TextureBinding { unit, handle });
        self
    }

    /// Points the sampler uniform `name` at `unit`.
    pub fn sampler(mut self, name: impl Into<String>, unit: u32) -> Self {
        self.samplers.push(SamplerBinding { name: name.into(), unit });
        self
    }

    pub fn time_uniform(mut self, name: impl Into<String>) -> Self {
        self.time_uniform = name.into();
        self
    }

    pub fn clear_color(mut self, rgba: [f64; 4]) -> Self {
        self.clear_color = rgba;
        self
    }

    /// Creates the device program and uploads `geometry`.
    ///
    /// On failure every resource created here, and every texture handed to
    /// the builder, is released before the error is returned.
    pub fn build<B: RenderBackend, V: Vertex>(
        self,
        backend: &mut B,
        geometry: &Geometry<'_, V>,
    ) -> Result<Pipeline, PipelineError> {
        match self.try_build(backend, geometry) {
            Ok(pipeline) => Ok(pipeline),
            Err((textures, err)) => {
                for binding in textures {
                    backend.release_texture(binding.handle);
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn try_build<B: RenderBackend, V: Vertex>(
        self,
        backend: &mut B,
        geometry: &Geometry<'_, V>,
    ) -> Result<Pipeline, (Vec<TextureBinding>, PipelineError)> {
        let Self {
            program,
            textures,
            samplers,
            time_uniform,
            clear_color,
        } = self;

        if let Some(bad) = textures.iter().find(|b| b.unit as usize >= MAX_TEXTURE_UNITS) {
            let err = TextureError::UnitOutOfRange { unit: bad.unit };
            return Err((textures, err.into()));
        }
        if let Some(bad) = samplers.iter().find(|b| b.unit as usize >= MAX_TEXTURE_UNITS) {
            let err = TextureError::UnitOutOfRange { unit: bad.unit };
            return Err((textures, err.into()));
        }
        if let Err(reason) = program.check_layout(&V::LAYOUT) {
            let err = PipelineError::LayoutMismatch {
                program: program.label().to_string(),
                reason,
            };
            return Err((textures, err));
        }

        let program_id = match backend.create_program(&program, &V::LAYOUT) {
            Ok(id) => id,
            Err(e) => return Err((textures, e.into())),
        };
        let geometry_id = match backend.create_geometry(&V::LAYOUT, geometry.vertex_bytes(), geometry.indices) {
            Ok(id) => id,
            Err(e) => {
                backend.release_program(program_id);
                return Err((textures, e.into()));
            }
        };

        info!(
            "Pipeline `{}` ready: {} indices, {} textures",
            program.label(),
            geometry.index_count(),
            textures.len()
        );
        Ok(Pipeline {
            program,
            program_id,
            geometry_id,
            index_count: geometry.index_count(),
            textures,
            samplers,
            time_uniform,
            clear_color,
        })
    }
}

/// A fully assembled pipeline.
///
/// Owns its device resources; [`Pipeline::teardown`] consumes it, so they are
/// released exactly once.
#[derive(Debug)]
pub struct Pipeline {
    program: Program,
    program_id: ProgramId,
    geometry_id: GeometryId,
    index_count: u32,
    textures: Vec<TextureBinding>,
    samplers: Vec<SamplerBinding>,
    time_uniform: String,
    clear_color: [f64; 4],
}

impl Pipeline {
    pub fn builder(program: Program) -> PipelineBuilder {
        PipelineBuilder {
            program,
            textures: Vec::new(),
            samplers: Vec::new(),
            time_uniform: DEFAULT_TIME_UNIFORM.to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub(crate) fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    pub fn program_id(&self) -> ProgramId {
        self.program_id
    }

    pub fn geometry_id(&self) -> GeometryId {
        self.geometry_id
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn textures(&self) -> &[TextureBinding] {
        &self.textures
    }

    pub fn samplers(&self) -> &[SamplerBinding] {
        &self.samplers
    }

    pub fn clear_color(&self) -> [f64; 4] {
        self.clear_color
    }

    /// The writes a frame at time `t` performs: time first, then samplers.
    pub fn uniform_writes(&self, t: f32) -> Vec<(String, UniformValue)> {
        std::iter::once((self.time_uniform.clone(), UniformValue::Float(t)))
            .chain(
                self.samplers
                    .iter()
                    .map(|s| (s.name.clone(), UniformValue::TextureUnit(s.unit))),
            )
            .collect()
    }

    pub fn teardown<B: RenderBackend>(self, backend: &mut B) {
        debug!("Tearing down pipeline `{}`", self.program.label());
        backend.release_program(self.program_id);
        backend.release_geometry(self.geometry_id);
        for binding in self.textures {
            backend.release_texture(binding.handle);
        }
    }
}
