//! In-memory backend recording every call, for tests that need no GPU.

use crate::frame::{BackendError, DrawCall, DrawSubmissionError, GeometryId, ProgramId, RenderBackend};
use crate::shader::Program;
use crate::texture::{TextureHandle, TextureLoader, TextureSource, WrapMode};
use crate::vertex::VertexLayout;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resource {
    Program(u32),
    Geometry(u32),
    Texture(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    CreateProgram { label: String },
    CreateGeometry { stride: u64, vertex_bytes: usize, indices: usize },
    WriteUniforms { program: ProgramId, bytes: Vec<u8> },
    Draw {
        program: ProgramId,
        geometry: GeometryId,
        index_count: u32,
        textures: Vec<(u32, TextureHandle)>,
    },
    Release(Resource),
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub ops: Vec<Op>,
    pub fail_geometry: bool,
    pub fail_next_draw: bool,
    next_id: u32,
    live: BTreeSet<Resource>,
    releases: usize,
}

impl RecordingBackend {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Stands in for a loaded texture.
    pub fn fake_texture(&mut self) -> TextureHandle {
        let id = self.next();
        self.live.insert(Resource::Texture(id));
        TextureHandle(id)
    }

    pub fn live_resources(&self) -> Vec<Resource> {
        self.live.iter().cloned().collect()
    }

    pub fn release_count(&self) -> usize {
        self.releases
    }

    pub fn draw_count(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Draw { .. })).count()
    }

    /// The first float of the last upload that preceded the most recent draw.
    pub fn uniform_time_at_last_draw(&self) -> Option<f32> {
        let draw = self.ops.iter().rposition(|op| matches!(op, Op::Draw { .. }))?;
        self.ops[..draw].iter().rev().find_map(|op| match op {
            Op::WriteUniforms { bytes, .. } => Some(bytemuck::pod_read_unaligned(&bytes[0..4])),
            _ => None,
        })
    }

    fn release(&mut self, resource: Resource) {
        assert!(self.live.remove(&resource), "{resource:?} released twice or never created");
        self.releases += 1;
        self.ops.push(Op::Release(resource));
    }
}

impl TextureLoader for RecordingBackend {
    fn load_texture(&mut self, source: &TextureSource, _wrap: WrapMode) -> anyhow::Result<TextureHandle> {
        source.pixels()?;
        Ok(self.fake_texture())
    }
}

impl RenderBackend for RecordingBackend {
    fn create_program(&mut self, program: &Program, _layout: &VertexLayout) -> Result<ProgramId, BackendError> {
        let id = self.next();
        self.live.insert(Resource::Program(id));
        self.ops.push(Op::CreateProgram {
            label: program.label().to_string(),
        });
        Ok(ProgramId(id))
    }

    fn create_geometry(
        &mut self,
        layout: &VertexLayout,
        vertices: &[u8],
        indices: &[u16],
    ) -> Result<GeometryId, BackendError> {
        if self.fail_geometry {
            return Err(BackendError::new("geometry buffer", "out of memory"));
        }
        let id = self.next();
        self.live.insert(Resource::Geometry(id));
        self.ops.push(Op::CreateGeometry {
            stride: layout.stride,
            vertex_bytes: vertices.len(),
            indices: indices.len(),
        });
        Ok(GeometryId(id))
    }

    fn write_uniforms(&mut self, program: ProgramId, bytes: &[u8]) -> Result<(), DrawSubmissionError> {
        if !self.live.contains(&Resource::Program(program.0)) {
            return Err(DrawSubmissionError::UnknownResource {
                kind: "program",
                id: program.0,
            });
        }
        self.ops.push(Op::WriteUniforms {
            program,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn submit_draw(&mut self, draw: &DrawCall<'_>) -> Result<(), DrawSubmissionError> {
        if std::mem::take(&mut self.fail_next_draw) {
            return Err(DrawSubmissionError::Device("lost".into()));
        }
        self.ops.push(Op::Draw {
            program: draw.program,
            geometry: draw.geometry,
            index_count: draw.index_count,
            textures: draw.textures.to_vec(),
        });
        Ok(())
    }

    fn release_program(&mut self, program: ProgramId) {
        self.release(Resource::Program(program.0));
    }

    fn release_geometry(&mut self, geometry: GeometryId) {
        self.release(Resource::Geometry(geometry.0));
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        self.release(Resource::Texture(texture.0));
    }
}
