//! Presenting to a winit window through a wgpu surface.

use crate::frame::DrawSubmissionError;
use crate::shader::GpuContext;
use std::sync::Arc;
use tracing::{debug, warn};
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// Window settings read from the config file and CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "chroma-tick".to_string(),
            width: 1024,
            height: 768,
        }
    }
}

/// A configured surface and the window it belongs to.
pub struct WindowSurface {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    window: Arc<Window>,
}

impl WindowSurface {
    pub fn new(gpu: &GpuContext, surface: wgpu::Surface<'static>, window: Arc<Window>) -> Self {
        let size = window.inner_size();
        let caps = surface.get_capabilities(&gpu.adapter);
        // Shader outputs are written as-is, without an sRGB encode.
        let format = caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first())
            .copied()
            .unwrap_or(wgpu::TextureFormat::Bgra8Unorm);
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);
        debug!("Configured {:?} surface {}x{}", format, config.width, config.height);

        Self { surface, config, window }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn resize(&mut self, gpu: &GpuContext, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&gpu.device, &self.config);
        }
    }

    /// Next swapchain texture. A lost or outdated surface is reconfigured and
    /// this frame is reported as failed.
    pub fn acquire(&mut self, gpu: &GpuContext) -> Result<wgpu::SurfaceTexture, DrawSubmissionError> {
        match self.surface.get_current_texture() {
            Ok(texture) => Ok(texture),
            Err(err @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                warn!("Surface {err}; reconfiguring");
                self.surface.configure(&gpu.device, &self.config);
                Err(DrawSubmissionError::Surface(err.to_string()))
            }
            Err(err) => Err(DrawSubmissionError::Surface(err.to_string())),
        }
    }
}
