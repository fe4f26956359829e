//! chroma-tick: time-driven shader demos.
//!
//! Compiles a GLSL vertex/fragment pair into a program, binds a vertex layout
//! and textures to it, and once per frame writes the elapsed time into the
//! program's uniforms before issuing a single draw.

pub mod animation;
pub mod config;
pub mod demos;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod shader;
pub mod texture;
pub mod utils;
pub mod vertex;

#[cfg(test)]
mod testing;
