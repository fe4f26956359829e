//! Where frames end up: a window surface or an offscreen texture.

pub mod offscreen;
pub mod window_output;

pub use offscreen::OffscreenTarget;
pub use window_output::{WindowConfig, WindowSurface};

use crate::frame::DrawSubmissionError;
use crate::shader::GpuContext;

/// The color attachment draws render into.
pub enum RenderTarget {
    Window(WindowSurface),
    Offscreen(OffscreenTarget),
}

/// One acquired frame of a [`RenderTarget`].
pub struct TargetFrame {
    pub view: wgpu::TextureView,
    surface_texture: Option<wgpu::SurfaceTexture>,
}

impl TargetFrame {
    /// Shows the frame. No-op for offscreen targets.
    pub fn present(self) {
        if let Some(texture) = self.surface_texture {
            texture.present();
        }
    }
}

impl RenderTarget {
    pub fn format(&self) -> wgpu::TextureFormat {
        match self {
            RenderTarget::Window(surface) => surface.format(),
            RenderTarget::Offscreen(_) => offscreen::OFFSCREEN_FORMAT,
        }
    }

    pub fn acquire(&mut self, gpu: &GpuContext) -> Result<TargetFrame, DrawSubmissionError> {
        match self {
            RenderTarget::Window(surface) => {
                let texture = surface.acquire(gpu)?;
                let view = texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
                Ok(TargetFrame {
                    view,
                    surface_texture: Some(texture),
                })
            }
            RenderTarget::Offscreen(target) => Ok(TargetFrame {
                view: target.view(),
                surface_texture: None,
            }),
        }
    }
}
