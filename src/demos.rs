//! Built-in demo catalogue and pipeline assembly from resolved settings.

use crate::config::Settings;
use crate::frame::{FrameLoop, RenderBackend};
use crate::pipeline::{Pipeline, PipelineBuilder, PipelineError};
use crate::shader::{compile_and_link, ShaderSource};
use crate::texture::{TextureLoader, TextureSource};
use crate::vertex::{COLOR_SQUARE, SQUARE, TEXTURED_SQUARE, TRIANGLE};
use anyhow::{Context, Result};
use tracing::info;

pub const DEFAULT_DEMO: &str = "pulse";

const TEAL: [f64; 4] = [0.0, 0.2, 0.2, 1.0];

/// Which vertex format and mesh a demo draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoGeometry {
    Triangle,
    Square,
    ColorSquare,
    TexturedSquare,
}

impl DemoGeometry {
    fn build<B: RenderBackend>(self, builder: PipelineBuilder, backend: &mut B) -> Result<Pipeline, PipelineError> {
        match self {
            DemoGeometry::Triangle => builder.build(backend, &TRIANGLE),
            DemoGeometry::Square => builder.build(backend, &SQUARE),
            DemoGeometry::ColorSquare => builder.build(backend, &COLOR_SQUARE),
            DemoGeometry::TexturedSquare => builder.build(backend, &TEXTURED_SQUARE),
        }
    }
}

/// Texture used for a sampler when nothing else is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultTexture {
    Solid([u8; 4]),
    Checker([u8; 4], [u8; 4]),
}

impl DefaultTexture {
    pub fn source(self) -> TextureSource {
        match self {
            DefaultTexture::Solid(rgba) => TextureSource::Solid { rgba },
            DefaultTexture::Checker(a, b) => TextureSource::checker(a, b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoSampler {
    pub name: &'static str,
    pub unit: u32,
    pub default: DefaultTexture,
}

#[derive(Debug)]
pub struct Demo {
    pub name: &'static str,
    pub summary: &'static str,
    vertex: (&'static str, &'static str),
    fragment: (&'static str, &'static str),
    pub geometry: DemoGeometry,
    pub samplers: &'static [DemoSampler],
    pub clear_color: [f64; 4],
}

impl Demo {
    pub fn vertex_source(&self) -> ShaderSource {
        ShaderSource::inline(self.vertex.0, self.vertex.1)
    }

    pub fn fragment_source(&self) -> ShaderSource {
        ShaderSource::inline(self.fragment.0, self.fragment.1)
    }
}

macro_rules! shader {
    ($file:literal) => {
        ($file, include_str!(concat!("../shaders/", $file)))
    };
}

pub static DEMOS: [Demo; 5] = [
    Demo {
        name: "triangle",
        summary: "solid orange triangle, no uniforms",
        vertex: shader!("triangle.vert"),
        fragment: shader!("triangle.frag"),
        geometry: DemoGeometry::Triangle,
        samplers: &[],
        clear_color: [0.0, 0.8, 0.8, 1.0],
    },
    Demo {
        name: "pulse",
        summary: "square whose color channels oscillate out of phase",
        vertex: shader!("triangle.vert"),
        fragment: shader!("pulse.frag"),
        geometry: DemoGeometry::Square,
        samplers: &[],
        clear_color: TEAL,
    },
    Demo {
        name: "sway",
        summary: "vertex-colored square drifting sideways and breathing in brightness",
        vertex: shader!("sway.vert"),
        fragment: shader!("color.frag"),
        geometry: DemoGeometry::ColorSquare,
        samplers: &[],
        clear_color: TEAL,
    },
    Demo {
        name: "textured",
        summary: "one texture tinted by vertex color",
        vertex: shader!("textured.vert"),
        fragment: shader!("textured.frag"),
        geometry: DemoGeometry::TexturedSquare,
        samplers: &[DemoSampler {
            name: "imageTexture1",
            unit: 0,
            default: DefaultTexture::Checker([235, 235, 235, 255], [40, 40, 40, 255]),
        }],
        clear_color: TEAL,
    },
    Demo {
        name: "blend",
        summary: "two textures mixed 80/20, then tinted by vertex color",
        vertex: shader!("textured.vert"),
        fragment: shader!("blend.frag"),
        geometry: DemoGeometry::TexturedSquare,
        samplers: &[
            DemoSampler {
                name: "imageTexture1",
                unit: 0,
                default: DefaultTexture::Checker([235, 235, 235, 255], [40, 40, 40, 255]),
            },
            DemoSampler {
                name: "imageTexture2",
                unit: 1,
                default: DefaultTexture::Solid([255, 200, 0, 255]),
            },
        ],
        clear_color: TEAL,
    },
];

pub fn find(name: &str) -> Option<&'static Demo> {
    DEMOS.iter().find(|d| d.name == name)
}

/// Compiles the program, loads textures and builds the pipeline for
/// `settings`, returning the frame loop that drives it.
///
/// Nothing survives a failure: textures loaded before the error are released.
pub fn assemble<B: RenderBackend + TextureLoader>(backend: &mut B, settings: &Settings) -> Result<FrameLoop> {
    let demo = settings.demo;
    let program = compile_and_link(demo.name, &settings.vertex, &settings.fragment)?;

    let mut loaded = Vec::with_capacity(settings.textures.len());
    for input in &settings.textures {
        match backend.load_texture(&input.source, input.wrap) {
            Ok(handle) => loaded.push((input.unit, handle)),
            Err(e) => {
                for (_, handle) in loaded {
                    backend.release_texture(handle);
                }
                return Err(e.context(format!("failed to load texture for unit {}", input.unit)));
            }
        }
    }

    let mut builder = Pipeline::builder(program)
        .clear_color(settings.clear_color)
        .time_uniform(settings.time_uniform.clone());
    for sampler in &settings.samplers {
        builder = builder.sampler(sampler.name.clone(), sampler.unit);
    }
    for (unit, handle) in loaded {
        builder = builder.texture(unit, handle);
    }

    let pipeline = demo
        .geometry
        .build(builder, backend)
        .with_context(|| format!("failed to assemble demo `{}`", demo.name))?;
    info!("Demo `{}` assembled", demo.name);
    Ok(FrameLoop::new(pipeline)?)
}
