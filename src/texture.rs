//! Texture units, handles and the CPU reference of the fragment blend.

use anyhow::{ensure, Context, Result};
use image::imageops::FilterType;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Number of texture units a frame can have bound at once.
pub const MAX_TEXTURE_UNITS: usize = 16;

/// Mix weight of the second texture in the `blend` demo.
pub const BLEND_WEIGHT: f32 = 0.2;

/// Opaque handle to a texture resource owned by a render backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u32);

impl TextureHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Addressing policy for coordinates outside `[0, 1]`. Part of the texture
/// resource, not of the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WrapMode {
    #[default]
    Repeat,
    MirrorRepeat,
    ClampToEdge,
}

impl WrapMode {
    pub fn address_mode(self) -> wgpu::AddressMode {
        match self {
            WrapMode::Repeat => wgpu::AddressMode::Repeat,
            WrapMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
            WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        }
    }
}

/// Where a texture's pixels come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TextureSource {
    /// Image file decoded by the `image` crate.
    File { path: PathBuf },
    /// Single-color 1x1 texture.
    Solid { rgba: [u8; 4] },
    /// Two-color checkerboard.
    Checker {
        size: u32,
        cells: u32,
        a: [u8; 4],
        b: [u8; 4],
    },
}

impl TextureSource {
    pub fn checker(a: [u8; 4], b: [u8; 4]) -> Self {
        TextureSource::Checker {
            size: 256,
            cells: 8,
            a,
            b,
        }
    }

    /// Human readable origin for logs.
    pub fn describe(&self) -> String {
        match self {
            TextureSource::File { path } => path.display().to_string(),
            TextureSource::Solid { rgba } => format!("solid {:?}", rgba),
            TextureSource::Checker { size, cells, .. } => format!("checker {size}px/{cells}"),
        }
    }

    /// Produces the RGBA8 pixels of the texture.
    pub fn pixels(&self) -> Result<RgbaImage> {
        match self {
            TextureSource::File { path } => {
                let image = image::open(path)
                    .with_context(|| format!("failed to decode texture {}", path.display()))?;
                Ok(image.to_rgba8())
            }
            TextureSource::Solid { rgba } => Ok(RgbaImage::from_pixel(1, 1, image::Rgba(*rgba))),
            TextureSource::Checker { size, cells, a, b } => {
                ensure!(*size > 0 && *cells > 0, "checker texture needs a non-zero size and cell count");
                let cell = (*size / *cells).max(1);
                Ok(RgbaImage::from_fn(*size, *size, |x, y| {
                    if (x / cell + y / cell) % 2 == 0 {
                        image::Rgba(*a)
                    } else {
                        image::Rgba(*b)
                    }
                }))
            }
        }
    }
}

/// Full mip chain of `base`, halving each side down to 1x1.
///
/// Level 0 is `base` itself; each later level is a triangle-filtered
/// downscale of the one before.
pub fn mip_chain(base: RgbaImage) -> Vec<RgbaImage> {
    let mut levels = vec![base];
    while let Some(last) = levels.last() {
        let (w, h) = last.dimensions();
        if w <= 1 && h <= 1 {
            break;
        }
        let next = image::imageops::resize(last, (w / 2).max(1), (h / 2).max(1), FilterType::Triangle);
        levels.push(next);
    }
    levels
}

/// Source of loaded textures. Decoding and upload live behind this trait;
/// the pipeline only ever sees the returned handle.
pub trait TextureLoader {
    fn load_texture(&mut self, source: &TextureSource, wrap: WrapMode) -> Result<TextureHandle>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextureError {
    #[error("texture unit {unit} is out of range (max {max})", max = MAX_TEXTURE_UNITS - 1)]
    UnitOutOfRange { unit: u32 },
}

/// The set of texture units bound for the current frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextureUnits {
    units: [Option<TextureHandle>; MAX_TEXTURE_UNITS],
}

impl TextureUnits {
    /// Binds `handle` to `unit`, returning the handle it replaced.
    pub fn bind(
        &mut self,
        unit: u32,
        handle: TextureHandle,
    ) -> Result<Option<TextureHandle>, TextureError> {
        let slot = self
            .units
            .get_mut(unit as usize)
            .ok_or(TextureError::UnitOutOfRange { unit })?;
        Ok(slot.replace(handle))
    }

    pub fn unbind(&mut self, unit: u32) -> Option<TextureHandle> {
        self.units.get_mut(unit as usize).and_then(Option::take)
    }

    pub fn get(&self, unit: u32) -> Option<TextureHandle> {
        self.units.get(unit as usize).copied().flatten()
    }

    pub fn bound_count(&self) -> usize {
        self.units.iter().flatten().count()
    }
}

/// Linear interpolation between two texels: `a * (1 - w) + b * w`.
pub fn mix_texels(a: [f32; 4], b: [f32; 4], weight: f32) -> [f32; 4] {
    std::array::from_fn(|i| a[i] * (1.0 - weight) + b[i] * weight)
}

/// Componentwise tint by the interpolated vertex color.
pub fn tint(color: [f32; 4], vertex_color: [f32; 4]) -> [f32; 4] {
    std::array::from_fn(|i| color[i] * vertex_color[i])
}

/// Fragment output of the `blend` demo for already-sampled texels.
pub fn blend_fragment(s1: [f32; 4], s2: [f32; 4], vertex_color: [f32; 4]) -> [f32; 4] {
    tint(mix_texels(s1, s2, BLEND_WEIGHT), vertex_color)
}
