//! wgpu implementation of [`RenderBackend`].

use super::{GpuContext, Program, SamplerSlot, StageVisibility, TEXTURE_SET, UNIFORM_BINDING, UNIFORM_SET};
use crate::frame::{BackendError, DrawCall, DrawSubmissionError, GeometryId, ProgramId, RenderBackend};
use crate::output::{OffscreenTarget, RenderTarget};
use crate::texture::{mip_chain, TextureHandle, TextureLoader, TextureSource, WrapMode};
use crate::vertex::VertexLayout;
use anyhow::{anyhow, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

struct GpuProgram {
    label: String,
    render_pipeline: wgpu::RenderPipeline,
    uniform_buffer: Option<wgpu::Buffer>,
    /// Group 0. Present whenever the layout has a group 0, even if empty.
    uniform_group: Option<wgpu::BindGroup>,
    texture_layout: Option<wgpu::BindGroupLayout>,
    samplers: Vec<SamplerSlot>,
    /// Texture group for the last set of handles drawn with.
    texture_group: Option<(Vec<(u32, TextureHandle)>, wgpu::BindGroup)>,
}

fn shader_stages(visibility: StageVisibility) -> wgpu::ShaderStages {
    let mut stages = wgpu::ShaderStages::NONE;
    if visibility.vertex {
        stages |= wgpu::ShaderStages::VERTEX;
    }
    if visibility.fragment {
        stages |= wgpu::ShaderStages::FRAGMENT;
    }
    stages
}

struct GpuGeometry {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

/// Owns every device resource the pipeline refers to by id.
pub struct WgpuBackend {
    gpu: GpuContext,
    target: RenderTarget,
    programs: HashMap<u32, GpuProgram>,
    geometries: HashMap<u32, GpuGeometry>,
    textures: HashMap<u32, GpuTexture>,
    next_id: u32,
}

impl WgpuBackend {
    pub fn new(gpu: GpuContext, target: RenderTarget) -> Self {
        Self {
            gpu,
            target,
            programs: HashMap::new(),
            geometries: HashMap::new(),
            textures: HashMap::new(),
            next_id: 0,
        }
    }

    /// Backend drawing into an offscreen texture of the given size.
    pub fn headless(width: u32, height: u32) -> Result<Self> {
        let gpu = GpuContext::headless()?;
        let target = RenderTarget::Offscreen(OffscreenTarget::new(&gpu, width, height));
        Ok(Self::new(gpu, target))
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        if let RenderTarget::Window(surface) = &mut self.target {
            surface.resize(&self.gpu, size);
        }
    }

    pub fn request_redraw(&self) {
        if let RenderTarget::Window(surface) = &self.target {
            surface.window().request_redraw();
        }
    }

    /// Writes the offscreen target to a PNG file.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        match &self.target {
            RenderTarget::Offscreen(target) => target.save_png(&self.gpu, path),
            RenderTarget::Window(_) => Err(anyhow!("snapshots need an offscreen target")),
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn texture_bind_group(
        device: &wgpu::Device,
        textures: &HashMap<u32, GpuTexture>,
        program: &GpuProgram,
        resolved: &[(u32, TextureHandle)],
    ) -> Result<wgpu::BindGroup, DrawSubmissionError> {
        let layout = program
            .texture_layout
            .as_ref()
            .ok_or_else(|| DrawSubmissionError::Device(format!("program `{}` samples no textures", program.label)))?;
        let mut entries = Vec::with_capacity(resolved.len() * 2);
        for (slot, handle) in resolved {
            let texture = textures.get(&handle.id()).ok_or(DrawSubmissionError::UnknownResource {
                kind: "texture",
                id: handle.id(),
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: slot * 2,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: slot * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&texture.sampler),
            });
        }
        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} textures", program.label)),
            layout,
            entries: &entries,
        }))
    }
}

impl TextureLoader for WgpuBackend {
    /// Uploads a texture and returns its handle. The wrap mode is fixed on
    /// the texture's sampler.
    fn load_texture(&mut self, source: &TextureSource, wrap: WrapMode) -> Result<TextureHandle> {
        let levels = mip_chain(source.pixels()?);
        let (width, height) = levels[0].dimensions();
        let device = &self.gpu.device;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&source.describe()),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: levels.len() as u32,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        for (mip_level, level) in levels.iter().enumerate() {
            let (w, h) = level.dimensions();
            self.gpu.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: mip_level as u32,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                level.as_raw(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(w * 4),
                    rows_per_image: Some(h),
                },
                wgpu::Extent3d {
                    width: w,
                    height: h,
                    depth_or_array_layers: 1,
                },
            );
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let address_mode = wrap.address_mode();
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Texture Sampler"),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });

        let id = self.next_id();
        self.textures.insert(id, GpuTexture { texture, view, sampler });
        info!(
            "Loaded texture {} ({}x{}, {} mip levels, {:?})",
            source.describe(),
            width,
            height,
            levels.len(),
            wrap
        );
        Ok(TextureHandle(id))
    }
}

impl RenderBackend for WgpuBackend {
    /// Validation errors raised while building the pipeline come back as a
    /// [`BackendError`] instead of reaching the uncaptured-error handler.
    fn create_program(&mut self, program: &Program, layout: &VertexLayout) -> Result<ProgramId, BackendError> {
        let device = &self.gpu.device;
        let label = program.label().to_string();
        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.vertex().label()),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(program.vertex().wgsl())),
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.fragment().label()),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(program.fragment().wgsl())),
        });

        let stages = shader_stages(program.uniform_visibility());
        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = program
            .uniform_bytes()
            .map(|_| wgpu::BindGroupLayoutEntry {
                binding: UNIFORM_BINDING,
                visibility: if stages.is_empty() { wgpu::ShaderStages::VERTEX_FRAGMENT } else { stages },
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .into_iter()
            .collect();

        let mut texture_entries = Vec::with_capacity(program.samplers().len() * 2);
        for slot in program.samplers() {
            let visibility = shader_stages(slot.visibility);
            texture_entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.texture_binding(),
                visibility,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            texture_entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.sampler_binding(),
                visibility,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }

        let has_textures = !texture_entries.is_empty();
        let needs_group0 = !uniform_entries.is_empty() || has_textures;
        let uniform_layout = needs_group0.then(|| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{label} set {UNIFORM_SET}")),
                entries: &uniform_entries,
            })
        });
        let texture_layout = has_textures.then(|| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{label} set {TEXTURE_SET}")),
                entries: &texture_entries,
            })
        });
        let bind_group_layouts: Vec<&wgpu::BindGroupLayout> =
            uniform_layout.iter().chain(texture_layout.iter()).collect();

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{label} layout")),
            bind_group_layouts: &bind_group_layouts,
            immediate_size: 0,
        });

        let attributes = layout.wgpu_attributes();
        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some(program.vertex().entry_point()),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: layout.stride,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some(program.fragment().entry_point()),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.target.format(),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let uniform_buffer = program.uniform_bytes().map(|bytes| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} uniforms")),
                contents: bytes,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
        });
        let uniform_group = uniform_layout.as_ref().map(|layout| {
            let entries: Vec<wgpu::BindGroupEntry> = uniform_buffer
                .iter()
                .map(|buffer| wgpu::BindGroupEntry {
                    binding: UNIFORM_BINDING,
                    resource: buffer.as_entire_binding(),
                })
                .collect();
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{label} uniform group")),
                layout,
                entries: &entries,
            })
        });

        if let Some(err) = pollster::block_on(scope.pop()) {
            return Err(BackendError::new(format!("render pipeline `{label}`"), err.to_string()));
        }

        let id = self.next_id();
        debug!("Created render pipeline `{}` as program {}", label, id);
        self.programs.insert(
            id,
            GpuProgram {
                label,
                render_pipeline,
                uniform_buffer,
                uniform_group,
                texture_layout,
                samplers: program.samplers().to_vec(),
                texture_group: None,
            },
        );
        Ok(ProgramId(id))
    }

    fn create_geometry(
        &mut self,
        layout: &VertexLayout,
        vertices: &[u8],
        indices: &[u16],
    ) -> Result<GeometryId, BackendError> {
        if layout.stride == 0 || vertices.len() as u64 % layout.stride != 0 {
            return Err(BackendError::new(
                "geometry buffer",
                format!("{} bytes is not a whole number of {}-byte vertices", vertices.len(), layout.stride),
            ));
        }
        if indices.is_empty() {
            return Err(BackendError::new("geometry buffer", "no indices"));
        }
        let device = &self.gpu.device;
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vertex Buffer"),
            contents: vertices,
            usage: wgpu::BufferUsages::VERTEX,
        });
        // Index buffers must be a multiple of 4 bytes.
        let mut index_data: Vec<u16> = indices.to_vec();
        if index_data.len() % 2 == 1 {
            index_data.push(0);
        }
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Index Buffer"),
            contents: bytemuck::cast_slice(&index_data),
            usage: wgpu::BufferUsages::INDEX,
        });
        let id = self.next_id();
        self.geometries.insert(
            id,
            GpuGeometry {
                vertex_buffer,
                index_buffer,
            },
        );
        Ok(GeometryId(id))
    }

    fn write_uniforms(&mut self, program: ProgramId, bytes: &[u8]) -> Result<(), DrawSubmissionError> {
        let gpu_program = self.programs.get(&program.0).ok_or(DrawSubmissionError::UnknownResource {
            kind: "program",
            id: program.0,
        })?;
        if let Some(buffer) = &gpu_program.uniform_buffer {
            self.gpu.queue.write_buffer(buffer, 0, bytes);
        }
        Ok(())
    }

    fn submit_draw(&mut self, draw: &DrawCall<'_>) -> Result<(), DrawSubmissionError> {
        let geometry = self.geometries.get(&draw.geometry.0).ok_or(DrawSubmissionError::UnknownResource {
            kind: "geometry",
            id: draw.geometry.0,
        })?;
        let program = self.programs.get_mut(&draw.program.0).ok_or(DrawSubmissionError::UnknownResource {
            kind: "program",
            id: draw.program.0,
        })?;
        if draw.textures.len() != program.samplers.len() {
            return Err(DrawSubmissionError::Device(format!(
                "program `{}` has {} texture slots but {} textures were supplied",
                program.label,
                program.samplers.len(),
                draw.textures.len()
            )));
        }

        // Dropping the guard on an early return pops the scope.
        let scope = self.gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let stale = program
            .texture_group
            .as_ref()
            .is_none_or(|(handles, _)| handles.as_slice() != draw.textures);
        if !draw.textures.is_empty() && stale {
            let group = Self::texture_bind_group(&self.gpu.device, &self.textures, program, draw.textures)?;
            program.texture_group = Some((draw.textures.to_vec(), group));
        }

        let frame = self.target.acquire(&self.gpu)?;
        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });
        {
            let [r, g, b, a] = draw.clear_color;
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Frame Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            render_pass.set_pipeline(&program.render_pipeline);
            if let Some(group) = &program.uniform_group {
                render_pass.set_bind_group(UNIFORM_SET, group, &[]);
            }
            if !draw.textures.is_empty() {
                if let Some((_, group)) = &program.texture_group {
                    render_pass.set_bind_group(TEXTURE_SET, group, &[]);
                }
            }
            render_pass.set_vertex_buffer(0, geometry.vertex_buffer.slice(..));
            render_pass.set_index_buffer(geometry.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            render_pass.draw_indexed(0..draw.index_count, 0, 0..1);
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        let failed = pollster::block_on(scope.pop());
        frame.present();
        match failed {
            Some(err) => Err(DrawSubmissionError::Device(err.to_string())),
            None => Ok(()),
        }
    }

    fn release_program(&mut self, program: ProgramId) {
        match self.programs.remove(&program.0) {
            Some(released) => debug!("Released program `{}`", released.label),
            None => warn!("Release of unknown program {}", program.0),
        }
    }

    fn release_geometry(&mut self, geometry: GeometryId) {
        if self.geometries.remove(&geometry.0).is_none() {
            warn!("Release of unknown geometry {}", geometry.0);
        }
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        match self.textures.remove(&texture.id()) {
            Some(released) => released.texture.destroy(),
            None => warn!("Release of unknown texture {}", texture.id()),
        }
        for program in self.programs.values_mut() {
            if program
                .texture_group
                .as_ref()
                .is_some_and(|(handles, _)| handles.iter().any(|(_, h)| *h == texture))
            {
                program.texture_group = None;
            }
        }
    }
}
