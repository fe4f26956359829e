//! Per-frame state and the frame loop.
//!
//! A tick computes the frame time, writes the time and sampler uniforms into
//! the active program, uploads the uniform block and submits exactly one
//! draw. Nothing in here touches the device directly; that goes through
//! [`RenderBackend`].

use crate::pipeline::Pipeline;
use crate::shader::{Program, UniformError, UniformValue};
use crate::texture::{TextureError, TextureHandle, TextureUnits};
use crate::vertex::VertexLayout;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Backend-side handle of a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub(crate) u32);

/// Backend-side handle of an uploaded vertex/index buffer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub(crate) u32);

/// Everything a backend needs for one draw submission.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall<'a> {
    pub program: ProgramId,
    pub geometry: GeometryId,
    pub index_count: u32,
    /// `(slot, texture)` for every sampler slot of the program, in slot order.
    pub textures: &'a [(u32, TextureHandle)],
    pub clear_color: [f64; 4],
}

/// A draw that could not be submitted. The frame is dropped, the loop goes on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DrawSubmissionError {
    #[error("sampler `{name}` reads texture unit {unit}, which has no texture bound")]
    UnboundTextureUnit { name: String, unit: u32 },
    #[error("unknown {kind} handle {id}")]
    UnknownResource { kind: &'static str, id: u32 },
    #[error("surface unavailable: {0}")]
    Surface(String),
    #[error("device rejected the submission: {0}")]
    Device(String),
}

/// Resource creation failure at setup time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{what}: {reason}")]
pub struct BackendError {
    pub what: String,
    pub reason: String,
}

impl BackendError {
    pub fn new(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

/// The graphics device as seen by the pipeline.
///
/// Implementations own the device resources behind the ids they hand out and
/// must release anything still alive when dropped.
pub trait RenderBackend {
    /// Creates the device program for `program` reading vertices in `layout`.
    fn create_program(&mut self, program: &Program, layout: &VertexLayout) -> Result<ProgramId, BackendError>;

    /// Uploads an indexed triangle list.
    fn create_geometry(
        &mut self,
        layout: &VertexLayout,
        vertices: &[u8],
        indices: &[u16],
    ) -> Result<GeometryId, BackendError>;

    /// Replaces the program's uniform block contents.
    fn write_uniforms(&mut self, program: ProgramId, bytes: &[u8]) -> Result<(), DrawSubmissionError>;

    /// Clears the target and issues one indexed draw.
    fn submit_draw(&mut self, draw: &DrawCall<'_>) -> Result<(), DrawSubmissionError>;

    fn release_program(&mut self, program: ProgramId);

    fn release_geometry(&mut self, geometry: GeometryId);

    fn release_texture(&mut self, texture: TextureHandle);
}

/// Why a frame was not drawn.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FrameDrop {
    #[error("frame time {0} is not finite")]
    InvalidTime(f32),
    #[error(transparent)]
    Uniform(#[from] UniformError),
    #[error(transparent)]
    Draw(#[from] DrawSubmissionError),
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Drawn { elapsed: f32 },
    Dropped(FrameDrop),
}

impl FrameOutcome {
    pub fn is_drawn(&self) -> bool {
        matches!(self, FrameOutcome::Drawn { .. })
    }
}

/// The single live per-frame state, passed explicitly rather than held globally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameState {
    elapsed: f32,
    frame_index: u64,
    textures: TextureUnits,
}

impl FrameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current elapsed time in seconds.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Number of ticks seen so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn textures(&self) -> &TextureUnits {
        &self.textures
    }

    pub fn bind_texture(&mut self, unit: u32, handle: TextureHandle) -> Result<Option<TextureHandle>, TextureError> {
        self.textures.bind(unit, handle)
    }

    /// Advances to `elapsed`, keeping time monotonically non-decreasing.
    ///
    /// A value earlier than the current time is clamped to it.
    pub fn advance(&mut self, elapsed: f32) -> Result<f32, FrameDrop> {
        self.frame_index += 1;
        if !elapsed.is_finite() {
            return Err(FrameDrop::InvalidTime(elapsed));
        }
        if elapsed < self.elapsed {
            warn!(
                "Frame time went backwards ({} < {}); holding previous time",
                elapsed, self.elapsed
            );
        } else {
            self.elapsed = elapsed;
        }
        Ok(self.elapsed)
    }
}

/// Counters reported by the drivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub drawn: u64,
    pub dropped: u64,
}

/// Drives one pipeline, one tick at a time.
#[derive(Debug)]
pub struct FrameLoop {
    pipeline: Pipeline,
    state: FrameState,
    stats: FrameStats,
    warned: HashSet<String>,
}

impl FrameLoop {
    /// Takes ownership of `pipeline` and binds its textures to their units.
    pub fn new(pipeline: Pipeline) -> Result<Self, TextureError> {
        let mut state = FrameState::new();
        for binding in pipeline.textures() {
            state.bind_texture(binding.unit, binding.handle)?;
        }
        Ok(Self {
            pipeline,
            state,
            stats: FrameStats::default(),
            warned: HashSet::new(),
        })
    }

    pub fn state(&self) -> &FrameState {
        &self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Binds `handle` to `unit` for subsequent frames.
    pub fn bind_texture(&mut self, unit: u32, handle: TextureHandle) -> Result<Option<TextureHandle>, TextureError> {
        self.state.bind_texture(unit, handle)
    }

    /// Runs one frame at `elapsed` seconds.
    ///
    /// The uniform block is committed and uploaded before the draw is
    /// submitted. Any failure drops this frame only.
    pub fn tick<B: RenderBackend>(&mut self, backend: &mut B, elapsed: f32) -> FrameOutcome {
        match self.run_frame(backend, elapsed) {
            Ok(t) => {
                self.stats.drawn += 1;
                FrameOutcome::Drawn { elapsed: t }
            }
            Err(reason) => {
                self.stats.dropped += 1;
                warn!("Dropped frame {}: {}", self.state.frame_index(), reason);
                FrameOutcome::Dropped(reason)
            }
        }
    }

    fn run_frame<B: RenderBackend>(&mut self, backend: &mut B, elapsed: f32) -> Result<f32, FrameDrop> {
        let t = self.state.advance(elapsed)?;

        let writes = self.pipeline.uniform_writes(t);
        let borrowed: Vec<(&str, UniformValue)> = writes.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        let unknown = self.pipeline.program_mut().apply(&borrowed)?;
        for name in unknown {
            if self.warned.contains(&name) {
                continue;
            }
            warn!(
                "Program `{}` has no uniform `{}`; ignoring writes to it",
                self.pipeline.program().label(),
                name
            );
            self.warned.insert(name);
        }

        let mut textures = Vec::with_capacity(self.pipeline.program().samplers().len());
        for slot in self.pipeline.program().samplers() {
            let handle = self
                .state
                .textures()
                .get(slot.unit)
                .ok_or_else(|| DrawSubmissionError::UnboundTextureUnit {
                    name: slot.name.clone(),
                    unit: slot.unit,
                })?;
            textures.push((slot.slot, handle));
        }

        if let Some(bytes) = self.pipeline.program().uniform_bytes() {
            backend.write_uniforms(self.pipeline.program_id(), bytes)?;
        }
        backend.submit_draw(&DrawCall {
            program: self.pipeline.program_id(),
            geometry: self.pipeline.geometry_id(),
            index_count: self.pipeline.index_count(),
            textures: &textures,
            clear_color: self.pipeline.clear_color(),
        })?;
        debug!("Frame {} drawn at t={:.3}", self.state.frame_index(), t);
        Ok(t)
    }

    /// Releases every resource of the pipeline.
    pub fn teardown<B: RenderBackend>(self, backend: &mut B) {
        self.pipeline.teardown(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::PULSE_COLOR;
    use crate::pipeline::Pipeline;
    use crate::shader::{compile_and_link, ShaderSource};
    use crate::testing::{Op, RecordingBackend};
    use crate::texture::TextureHandle;
    use crate::vertex::{COLOR_SQUARE, SQUARE};

    const PULSE_VS: &str = r"#version 450
layout(location = 0) in vec3 aPos;
void main() { gl_Position = vec4(aPos, 1.0); }
";

    const PULSE_FS: &str = r"#version 450
layout(location = 0) out vec4 FragColor;
layout(std140, set = 0, binding = 0) uniform Globals { float time; } globals;
void main() {
    FragColor = vec4(sin(3.0 * globals.time + 0.5), sin(3.0 * globals.time + 1.3), sin(3.0 * globals.time + 2.5), 1.0);
}
";

    const TEXTURED_VS: &str = r"#version 450
layout(location = 0) in vec3 aPos;
layout(location = 1) in vec4 aColor;
layout(location = 0) out vec4 vColor;
void main() { vColor = aColor; gl_Position = vec4(aPos, 1.0); }
";

    const TEXTURED_FS: &str = r"#version 450
layout(location = 0) in vec4 vColor;
layout(location = 0) out vec4 FragColor;
layout(set = 1, binding = 0) uniform texture2D imageTexture1;
layout(set = 1, binding = 1) uniform sampler imageSampler1;
void main() { FragColor = texture(sampler2D(imageTexture1, imageSampler1), vColor.xy) * vColor; }
";

    fn pulse_loop(backend: &mut RecordingBackend) -> FrameLoop {
        let program = compile_and_link(
            "pulse",
            &ShaderSource::inline("pulse.vert", PULSE_VS),
            &ShaderSource::inline("pulse.frag", PULSE_FS),
        )
        .expect("links");
        let pipeline = Pipeline::builder(program).build(backend, &SQUARE).expect("pipeline");
        FrameLoop::new(pipeline).expect("frame loop")
    }

    fn textured_loop(backend: &mut RecordingBackend, bind: bool) -> FrameLoop {
        let program = compile_and_link(
            "textured",
            &ShaderSource::inline("tex.vert", TEXTURED_VS),
            &ShaderSource::inline("tex.frag", TEXTURED_FS),
        )
        .expect("links");
        let mut builder = Pipeline::builder(program).sampler("imageTexture1", 3);
        if bind {
            let texture = backend.fake_texture();
            builder = builder.texture(3, texture);
        }
        let pipeline = builder.build(backend, &COLOR_SQUARE).expect("pipeline");
        FrameLoop::new(pipeline).expect("frame loop")
    }

    #[test]
    fn tick_uploads_time_then_draws_once() {
        let mut backend = RecordingBackend::default();
        let mut frames = pulse_loop(&mut backend);
        backend.ops.clear();

        assert_eq!(frames.tick(&mut backend, 0.25), FrameOutcome::Drawn { elapsed: 0.25 });
        assert_eq!(backend.ops.len(), 2);
        match (&backend.ops[0], &backend.ops[1]) {
            (Op::WriteUniforms { bytes, .. }, Op::Draw { index_count, .. }) => {
                assert_eq!(&bytes[0..4], &0.25_f32.to_ne_bytes());
                assert_eq!(*index_count, 6);
            }
            other => panic!("unexpected ops {other:?}"),
        }
    }

    #[test]
    fn each_draw_sees_its_own_frame_time() {
        let mut backend = RecordingBackend::default();
        let mut frames = pulse_loop(&mut backend);
        for t in [0.0_f32, 0.5, 1.0, 1.5] {
            assert!(frames.tick(&mut backend, t).is_drawn());
            assert_eq!(backend.uniform_time_at_last_draw(), Some(t));
        }
        assert_eq!(frames.stats(), FrameStats { drawn: 4, dropped: 0 });
    }

    #[test]
    fn uploaded_time_reproduces_pulse_color() {
        let mut backend = RecordingBackend::default();
        let mut frames = pulse_loop(&mut backend);
        let t = std::f32::consts::PI / 6.0;
        frames.tick(&mut backend, t);
        let uploaded = backend.uniform_time_at_last_draw().expect("time uploaded");
        assert_eq!(
            PULSE_COLOR.evaluate(uploaded),
            [(3.0 * t + 0.5).sin(), (3.0 * t + 1.3).sin(), (3.0 * t + 2.5).sin(), 1.0]
        );
    }

    #[test]
    fn backwards_time_is_clamped() {
        let mut backend = RecordingBackend::default();
        let mut frames = pulse_loop(&mut backend);
        frames.tick(&mut backend, 2.0);
        assert_eq!(frames.tick(&mut backend, 1.0), FrameOutcome::Drawn { elapsed: 2.0 });
        assert_eq!(frames.state().elapsed(), 2.0);
    }

    #[test]
    fn non_finite_time_drops_frame_and_loop_continues() {
        let mut backend = RecordingBackend::default();
        let mut frames = pulse_loop(&mut backend);
        let outcome = frames.tick(&mut backend, f32::NAN);
        assert!(matches!(outcome, FrameOutcome::Dropped(FrameDrop::InvalidTime(_))));
        assert!(frames.tick(&mut backend, 1.0).is_drawn());
        assert_eq!(frames.stats(), FrameStats { drawn: 1, dropped: 1 });
    }

    #[test]
    fn failed_draw_is_isolated_to_its_frame() {
        let mut backend = RecordingBackend::default();
        let mut frames = pulse_loop(&mut backend);
        backend.fail_next_draw = true;
        let outcome = frames.tick(&mut backend, 0.1);
        assert!(matches!(outcome, FrameOutcome::Dropped(FrameDrop::Draw(DrawSubmissionError::Device(_)))));
        assert!(frames.tick(&mut backend, 0.2).is_drawn());
        assert_eq!(backend.draw_count(), 1);
    }

    #[test]
    fn sampler_reads_the_unit_it_was_assigned() {
        let mut backend = RecordingBackend::default();
        let mut frames = textured_loop(&mut backend, true);
        assert!(frames.tick(&mut backend, 0.0).is_drawn());
        let Some(Op::Draw { textures, .. }) = backend.ops.last() else {
            panic!("expected a draw");
        };
        assert_eq!(textures.len(), 1);
        assert_eq!(textures[0].0, 0);
        assert_eq!(frames.state().textures().get(3), Some(textures[0].1));
        assert_eq!(
            frames.pipeline().program().uniform("imageTexture1"),
            Some(UniformValue::TextureUnit(3))
        );
    }

    #[test]
    fn unbound_unit_drops_frame() {
        let mut backend = RecordingBackend::default();
        let mut frames = textured_loop(&mut backend, false);
        let outcome = frames.tick(&mut backend, 0.0);
        assert_eq!(
            outcome,
            FrameOutcome::Dropped(FrameDrop::Draw(DrawSubmissionError::UnboundTextureUnit {
                name: "imageTexture1".into(),
                unit: 3
            }))
        );
        assert_eq!(backend.draw_count(), 0);

        let late = TextureHandle(42);
        frames.bind_texture(3, late).expect("unit in range");
        assert!(frames.tick(&mut backend, 0.1).is_drawn());
    }

    #[test]
    fn missing_time_uniform_is_tolerated() {
        // The textured program declares no uniform block at all.
        let mut backend = RecordingBackend::default();
        let mut frames = textured_loop(&mut backend, true);
        assert!(frames.tick(&mut backend, 0.0).is_drawn());
        assert!(frames.tick(&mut backend, 0.1).is_drawn());
        assert!(!backend.ops.iter().any(|op| matches!(op, Op::WriteUniforms { .. })));
    }

    #[test]
    fn teardown_releases_everything_once() {
        let mut backend = RecordingBackend::default();
        let frames = textured_loop(&mut backend, true);
        frames.teardown(&mut backend);
        assert!(backend.live_resources().is_empty());
        assert_eq!(backend.release_count(), 3);
    }
}
