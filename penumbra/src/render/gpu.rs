use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use wgpu::util::DeviceExt;
use wgpu::{
    vertex_attr_array, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout,
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingResource, BindingType, BlendState,
    Buffer, BufferBindingType, BufferUsages, ColorTargetState, ColorWrites,
    CommandEncoderDescriptor, CompositeAlphaMode, DeviceDescriptor, Extent3d, FragmentState,
    Instance, LoadOp, MultisampleState, Operations, Origin3d, PipelineLayoutDescriptor,
    PresentMode, PrimitiveState, RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, RequestAdapterOptions, ShaderModuleDescriptor, ShaderSource,
    SurfaceConfiguration, TexelCopyBufferLayout, TexelCopyTextureInfo, Texture, TextureAspect,
    TextureDescriptor, TextureDimension, TextureFormat, TextureSampleType, TextureUsages,
    TextureView, TextureViewDescriptor, TextureViewDimension, VertexAttribute, VertexState,
};
use winit::{dpi::PhysicalSize, window::Window};

use super::{
    BatchSlot, BlendMode, BlurKernel, ComposeInputs, DeviceInfo, RenderDevice, ResolveOptions,
    Sampled, SurfaceId, SurfaceOrigin, TextureHandle, BATCH_SIZE, BLACK, LIGHT_FALLOFF,
    VISION_PASS_LEVEL,
};
use crate::error::{LightingError, Result};
use crate::math::{Camera2D, Vec2};

/// Format of every off-screen surface and uploaded texture.
const TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// One-sided blur weights the blur shader can hold.
const MAX_BLUR_WEIGHTS: usize = 32;

const QUAD_ATTRIBUTES: [VertexAttribute; 2] = vertex_attr_array![0 => Float32x2, 1 => Float32x2];
const FILL_ATTRIBUTES: [VertexAttribute; 1] = vertex_attr_array![0 => Float32x2];

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

// Fullscreen quad in NDC; uv (0, 0) is the top-left texel.
const FULLSCREEN_QUAD: [QuadVertex; 6] = [
    QuadVertex {
        position: [-1.0, -1.0],
        uv: [0.0, 1.0],
    },
    QuadVertex {
        position: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
    QuadVertex {
        position: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
    QuadVertex {
        position: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
    QuadVertex {
        position: [1.0, 1.0],
        uv: [1.0, 0.0],
    },
    QuadVertex {
        position: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
];

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FillUniforms {
    projection: [[f32; 4]; 4],
    color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ResolveUniforms {
    size: [f32; 2],
    ray_count: f32,
    step: f32,
    taps: i32,
    attenuate: u32,
    has_mask: u32,
    falloff: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LightmapUniforms {
    colors: [[f32; 4]; BATCH_SIZE],
    placements: [[f32; 4]; BATCH_SIZE],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlitUniforms {
    origin: [f32; 2],
    flip_y: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlurUniforms {
    direction: [i32; 2],
    radius: i32,
    _pad: i32,
    weights: [[f32; 4]; MAX_BLUR_WEIGHTS / 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ComposeUniforms {
    ambient: [f32; 4],
    pass_level: f32,
    _pad: [f32; 3],
}

struct GpuTexture {
    texture: Texture,
    view: TextureView,
    size: (u32, u32),
}

struct Pass {
    pipeline: RenderPipeline,
    layout: BindGroupLayout,
}

struct Pipelines {
    fill: Pass,
    resolve: Pass,
    lightmap: Pass,
    blur: Pass,
    compose: Pass,
    blit_layout: BindGroupLayout,
    blit_replace: RenderPipeline,
    blit_alpha: RenderPipeline,
    blit_additive: RenderPipeline,
}

impl Pipelines {
    fn new(device: &wgpu::Device) -> Self {
        let fill_layout = create_layout(device, "fill", 0);
        let fill = Pass {
            pipeline: create_pipeline(
                device,
                "fill",
                include_str!("fill.wgsl"),
                &fill_layout,
                TARGET_FORMAT,
                BlendState::ALPHA_BLENDING,
                wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &FILL_ATTRIBUTES,
                },
            ),
            layout: fill_layout,
        };

        let resolve = fullscreen_pass(device, "resolve", include_str!("resolve.wgsl"), 2);
        let lightmap = fullscreen_pass(
            device,
            "lightmap",
            include_str!("lightmap.wgsl"),
            1 + BATCH_SIZE as u32,
        );
        let blur = fullscreen_pass(device, "blur", include_str!("blur.wgsl"), 1);
        let compose = fullscreen_pass(device, "compose", include_str!("compose.wgsl"), 4);

        let blit_layout = create_layout(device, "blit", 1);
        let additive = BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        };
        let blit_replace = create_blit_pipeline(device, &blit_layout, TARGET_FORMAT, BlendState::REPLACE);
        let blit_alpha =
            create_blit_pipeline(device, &blit_layout, TARGET_FORMAT, BlendState::ALPHA_BLENDING);
        let blit_additive = create_blit_pipeline(device, &blit_layout, TARGET_FORMAT, additive);

        Self {
            fill,
            resolve,
            lightmap,
            blur,
            compose,
            blit_layout,
            blit_replace,
            blit_alpha,
            blit_additive,
        }
    }

    fn blit(&self, mode: BlendMode) -> &RenderPipeline {
        match mode {
            BlendMode::Replace => &self.blit_replace,
            BlendMode::Alpha => &self.blit_alpha,
            BlendMode::Additive => &self.blit_additive,
        }
    }
}

struct WindowTarget<'window> {
    surface: wgpu::Surface<'window>,
    config: SurfaceConfiguration,
    present_mode: PresentMode,
    present: RenderPipeline,
}

/// wgpu implementation of [`RenderDevice`].
///
/// Surfaces are `Rgba8Unorm` render textures. Every operation records and
/// submits its own command buffer, so results are ordered by call order.
pub struct GpuDevice<'window> {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    window: Option<WindowTarget<'window>>,
    pipelines: Pipelines,
    quad: Buffer,
    surfaces: HashMap<SurfaceId, GpuTexture>,
    textures: HashMap<TextureHandle, GpuTexture>,
    scratch: HashMap<(u32, u32), GpuTexture>,
    white: GpuTexture,
    next_surface_id: u32,
    next_texture_id: u32,
}

impl GpuDevice<'static> {
    /// Device without a window, for off-screen rendering and readback.
    pub fn headless() -> Result<Self> {
        let instance = Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(device_error)?;
        let (device, queue) = request_device(&adapter)?;
        Ok(Self::from_parts(device, queue, adapter.get_info().name, None))
    }
}

impl<'window> GpuDevice<'window> {
    /// Device that can [`present`](Self::present) surfaces to `window`.
    pub fn for_window(window: &'window Window, vsync: bool) -> Result<Self> {
        let instance = Instance::default();
        let surface = instance.create_surface(window).map_err(device_error)?;

        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(device_error)?;
        let (device, queue) = request_device(&adapter)?;

        let size = window.inner_size();
        let capabilities = surface.get_capabilities(&adapter);
        // Surfaces already hold display values, so avoid a second sRGB encode.
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| capabilities.formats.first().copied())
            .ok_or_else(|| LightingError::Device("surface reports no formats".into()))?;

        let present_mode = choose_present_mode(&capabilities.present_modes, vsync);
        let alpha_mode = choose_alpha_mode(&capabilities.alpha_modes);

        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let mut gpu = Self::from_parts(device, queue, adapter.get_info().name, None);
        let present =
            create_blit_pipeline(&gpu.device, &gpu.pipelines.blit_layout, format, BlendState::REPLACE);
        gpu.window = Some(WindowTarget {
            surface,
            config,
            present_mode,
            present,
        });
        Ok(gpu)
    }

    fn from_parts(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_name: String,
        window: Option<WindowTarget<'window>>,
    ) -> Self {
        let pipelines = Pipelines::new(&device);
        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("fullscreen-quad"),
            contents: bytemuck::cast_slice(&FULLSCREEN_QUAD),
            usage: BufferUsages::VERTEX,
        });
        let white = upload_texture(
            &device,
            &queue,
            "white",
            &RgbaImage::from_pixel(1, 1, image::Rgba([255, 255, 255, 255])),
        );
        log::info!("penumbra gpu device on {adapter_name}");

        Self {
            device,
            queue,
            adapter_name,
            window,
            pipelines,
            quad,
            surfaces: HashMap::new(),
            textures: HashMap::new(),
            scratch: HashMap::new(),
            white,
            next_surface_id: 1,
            next_texture_id: 1,
        }
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Reconfigure the window swapchain. Zero sizes are ignored.
    pub fn resize_window(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        if let Some(target) = self.window.as_mut() {
            target.config.width = new_size.width;
            target.config.height = new_size.height;
            target.config.present_mode = target.present_mode;
            target.surface.configure(&self.device, &target.config);
        }
    }

    /// Copy `surface` to the window. Returns `false` when the swapchain was
    /// not ready this frame.
    pub fn present(&mut self, surface: SurfaceId) -> Result<bool> {
        let target = self
            .window
            .as_ref()
            .ok_or_else(|| LightingError::Device("no window attached".into()))?;

        let frame = match target.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(e) => match e {
                wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
                    target.surface.configure(&self.device, &target.config);
                    return Ok(false);
                }
                wgpu::SurfaceError::Timeout => {
                    log::warn!("swapchain timed out, dropping frame");
                    return Ok(false);
                }
                wgpu::SurfaceError::OutOfMemory => {
                    return Err(LightingError::Device("Surface ran out of memory".into()));
                }
                wgpu::SurfaceError::Other => {
                    return Err(LightingError::Device("Surface error: Other".into()));
                }
            },
        };

        let view = frame.texture.create_view(&TextureViewDescriptor::default());
        let source = self.surface(surface)?;
        let uniforms = BlitUniforms {
            origin: [0.0, 0.0],
            flip_y: 0,
            _pad: 0,
        };
        self.draw_quad(
            "present",
            &target.present,
            &self.pipelines.blit_layout,
            bytemuck::bytes_of(&uniforms),
            &[&source.view],
            &view,
            LoadOp::Clear(to_wgpu_color(BLACK)),
        );
        frame.present();
        Ok(true)
    }

    fn surface(&self, surface: SurfaceId) -> Result<&GpuTexture> {
        self.surfaces
            .get(&surface)
            .ok_or(LightingError::UnknownSurface(surface))
    }

    fn texture(&self, texture: TextureHandle) -> Result<&GpuTexture> {
        self.textures
            .get(&texture)
            .ok_or(LightingError::UnknownTexture(texture))
    }

    fn sampled_view(&self, source: Sampled) -> Result<&TextureView> {
        match source {
            Sampled::Surface(id) => Ok(&self.surface(id)?.view),
            Sampled::Texture(handle) => Ok(&self.texture(handle)?.view),
        }
    }

    /// Borrow a scratch target of `size`; hand it back with `self.scratch.insert`.
    fn take_scratch(&mut self, size: (u32, u32)) -> GpuTexture {
        match self.scratch.remove(&size) {
            Some(scratch) => scratch,
            None => create_target(&self.device, "scratch", size),
        }
    }

    fn copy_texture(&self, source: &GpuTexture, dest: &GpuTexture) {
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("copy-encoder"),
            });
        encoder.copy_texture_to_texture(
            texel_copy(&source.texture),
            texel_copy(&dest.texture),
            extent(source.size),
        );
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_quad(
        &self,
        label: &str,
        pipeline: &RenderPipeline,
        layout: &BindGroupLayout,
        uniforms: &[u8],
        views: &[&TextureView],
        target: &TextureView,
        load: LoadOp<wgpu::Color>,
    ) {
        let bind_group = self.bind_group(label, layout, uniforms, views);
        self.run_pass(label, pipeline, &bind_group, &self.quad, 6, target, load);
    }

    fn bind_group(
        &self,
        label: &str,
        layout: &BindGroupLayout,
        uniforms: &[u8],
        views: &[&TextureView],
    ) -> BindGroup {
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: uniforms,
                usage: BufferUsages::UNIFORM,
            });
        let mut entries = vec![BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        for (i, view) in views.iter().enumerate() {
            entries.push(BindGroupEntry {
                binding: i as u32 + 1,
                resource: BindingResource::TextureView(*view),
            });
        }
        self.device.create_bind_group(&BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pass(
        &self,
        label: &str,
        pipeline: &RenderPipeline,
        bind_group: &BindGroup,
        vertices: &Buffer,
        vertex_count: u32,
        target: &TextureView,
        load: LoadOp<wgpu::Color>,
    ) {
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                multiview_mask: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_vertex_buffer(0, vertices.slice(..));
            pass.draw(0..vertex_count, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn resolve_with(
        &self,
        surface: SurfaceId,
        scratch: &GpuTexture,
        options: &ResolveOptions,
    ) -> Result<()> {
        let target = self.surface(surface)?;
        let mask = match options.mask {
            Some(handle) => &self.texture(handle)?.view,
            None => &self.white.view,
        };
        self.copy_texture(target, scratch);

        let (w, h) = target.size;
        let uniforms = ResolveUniforms {
            size: [w as f32, h as f32],
            ray_count: options.quality.ray_count(w.min(h)) as f32,
            step: options.quality.march_step(),
            taps: options.quality.filter_taps(),
            attenuate: u32::from(options.attenuate),
            has_mask: u32::from(options.mask.is_some()),
            falloff: LIGHT_FALLOFF,
        };
        self.draw_quad(
            "resolve",
            &self.pipelines.resolve.pipeline,
            &self.pipelines.resolve.layout,
            bytemuck::bytes_of(&uniforms),
            &[&scratch.view, mask],
            &target.view,
            LoadOp::Load,
        );
        Ok(())
    }

    fn flip_with(&self, surface: SurfaceId, scratch: &GpuTexture) -> Result<()> {
        let target = self.surface(surface)?;
        self.copy_texture(target, scratch);
        let uniforms = BlitUniforms {
            origin: [0.0, 0.0],
            flip_y: 1,
            _pad: 0,
        };
        self.draw_quad(
            "flip",
            &self.pipelines.blit_replace,
            &self.pipelines.blit_layout,
            bytemuck::bytes_of(&uniforms),
            &[&scratch.view],
            &target.view,
            LoadOp::Load,
        );
        Ok(())
    }

    fn blur_with(&self, surface: SurfaceId, scratch: &GpuTexture, kernel: &BlurKernel) -> Result<()> {
        let target = self.surface(surface)?;
        let mut weights = [[0.0f32; 4]; MAX_BLUR_WEIGHTS / 4];
        let taps = kernel.weights().len().min(MAX_BLUR_WEIGHTS);
        if taps < kernel.weights().len() {
            log::warn!(
                "blur radius {} exceeds the shader limit, truncating to {}",
                kernel.radius(),
                MAX_BLUR_WEIGHTS - 1
            );
        }
        for (i, weight) in kernel.weights().iter().take(taps).enumerate() {
            weights[i / 4][i % 4] = *weight;
        }

        let passes: [([i32; 2], &GpuTexture, &GpuTexture); 2] =
            [([1, 0], target, scratch), ([0, 1], scratch, target)];
        for (direction, source, dest) in passes {
            let uniforms = BlurUniforms {
                direction,
                radius: taps as i32 - 1,
                _pad: 0,
                weights,
            };
            self.draw_quad(
                "blur",
                &self.pipelines.blur.pipeline,
                &self.pipelines.blur.layout,
                bytemuck::bytes_of(&uniforms),
                &[&source.view],
                &dest.view,
                LoadOp::Load,
            );
        }
        Ok(())
    }
}

impl<'window> RenderDevice for GpuDevice<'window> {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.adapter_name.clone(),
            origin: SurfaceOrigin::TopLeft,
            supports_shadows: true,
        }
    }

    fn create_surface(&mut self, label: &str, width: u32, height: u32) -> Result<SurfaceId> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > limit || height > limit {
            return Err(LightingError::InvalidSurfaceSize { width, height });
        }
        let id = SurfaceId(self.next_surface_id);
        self.next_surface_id += 1;
        self.surfaces
            .insert(id, create_target(&self.device, label, (width, height)));
        self.clear(id, BLACK)?;
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        if let Some(removed) = self.surfaces.remove(&surface) {
            if !self.surfaces.values().any(|s| s.size == removed.size) {
                self.scratch.remove(&removed.size);
            }
        }
    }

    fn surface_size(&self, surface: SurfaceId) -> Option<(u32, u32)> {
        self.surfaces.get(&surface).map(|s| s.size)
    }

    fn load_texture(&mut self, label: &str, image: &RgbaImage) -> Result<TextureHandle> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(LightingError::InvalidSurfaceSize { width, height });
        }
        let handle = TextureHandle(self.next_texture_id);
        self.next_texture_id += 1;
        self.textures
            .insert(handle, upload_texture(&self.device, &self.queue, label, image));
        Ok(handle)
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| t.size)
    }

    fn clear(&mut self, surface: SurfaceId, color: [f32; 4]) -> Result<()> {
        let target = self.surface(surface)?;
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("clear-encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("clear-pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(to_wgpu_color(color)),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                multiview_mask: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn fill_polygon(&mut self, surface: SurfaceId, points: &[Vec2], color: [f32; 4]) -> Result<()> {
        if points.len() < 3 {
            return Ok(());
        }
        let target = self.surface(surface)?;

        // Fan triangulation; occluder shapes are convex.
        let mut vertices = Vec::with_capacity((points.len() - 2) * 3);
        for i in 1..points.len() - 1 {
            for p in [points[0], points[i], points[i + 1]] {
                vertices.push([p.x, p.y]);
            }
        }
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("fill-vertices"),
                contents: bytemuck::cast_slice(&vertices),
                usage: BufferUsages::VERTEX,
            });

        let (width, height) = target.size;
        let uniforms = FillUniforms {
            projection: Camera2D::pixel_projection(width, height).to_cols_array_2d(),
            color,
        };
        let bind_group = self.bind_group(
            "fill",
            &self.pipelines.fill.layout,
            bytemuck::bytes_of(&uniforms),
            &[],
        );
        self.run_pass(
            "fill",
            &self.pipelines.fill.pipeline,
            &bind_group,
            &vertex_buffer,
            vertices.len() as u32,
            &target.view,
            LoadOp::Load,
        );
        Ok(())
    }

    fn resolve_shadows(&mut self, surface: SurfaceId, options: &ResolveOptions) -> Result<()> {
        let size = self.surface(surface)?.size;
        let scratch = self.take_scratch(size);
        let result = self.resolve_with(surface, &scratch, options);
        self.scratch.insert(size, scratch);
        result
    }

    fn light_pass(
        &mut self,
        source: SurfaceId,
        dest: SurfaceId,
        slots: &[BatchSlot; BATCH_SIZE],
    ) -> Result<()> {
        if source == dest {
            return Err(LightingError::Device(
                "lightmap pass cannot read and write the same surface".into(),
            ));
        }
        let src = self.surface(source)?;
        let dst = self.surface(dest)?;
        if src.size != dst.size {
            let (width, height) = dst.size;
            return Err(LightingError::InvalidSurfaceSize { width, height });
        }

        let mut views: Vec<&TextureView> = Vec::with_capacity(1 + BATCH_SIZE);
        views.push(&src.view);
        let mut uniforms = LightmapUniforms {
            colors: [[0.0; 4]; BATCH_SIZE],
            placements: [[0.0; 4]; BATCH_SIZE],
        };
        for (i, slot) in slots.iter().enumerate() {
            views.push(self.sampled_view(slot.texture)?);
            uniforms.colors[i] = slot.color;
            uniforms.placements[i] = slot.placement.to_array();
        }

        self.draw_quad(
            "lightmap",
            &self.pipelines.lightmap.pipeline,
            &self.pipelines.lightmap.layout,
            bytemuck::bytes_of(&uniforms),
            &views,
            &dst.view,
            LoadOp::Load,
        );
        Ok(())
    }

    fn copy_surface(&mut self, source: SurfaceId, dest: SurfaceId) -> Result<()> {
        let src = self.surface(source)?;
        let dst = self.surface(dest)?;
        if src.size != dst.size {
            let (width, height) = dst.size;
            return Err(LightingError::InvalidSurfaceSize { width, height });
        }
        self.copy_texture(src, dst);
        Ok(())
    }

    fn flip_vertical(&mut self, surface: SurfaceId) -> Result<()> {
        let size = self.surface(surface)?.size;
        let scratch = self.take_scratch(size);
        let result = self.flip_with(surface, &scratch);
        self.scratch.insert(size, scratch);
        result
    }

    fn blit(
        &mut self,
        source: SurfaceId,
        dest: SurfaceId,
        origin: (i32, i32),
        mode: BlendMode,
    ) -> Result<()> {
        if source == dest {
            return Err(LightingError::Device("cannot blit a surface onto itself".into()));
        }
        let src = self.surface(source)?;
        let dst = self.surface(dest)?;
        let uniforms = BlitUniforms {
            origin: [origin.0 as f32, origin.1 as f32],
            flip_y: 0,
            _pad: 0,
        };
        self.draw_quad(
            "blit",
            self.pipelines.blit(mode),
            &self.pipelines.blit_layout,
            bytemuck::bytes_of(&uniforms),
            &[&src.view],
            &dst.view,
            LoadOp::Load,
        );
        Ok(())
    }

    fn blur(&mut self, surface: SurfaceId, kernel: &BlurKernel) -> Result<()> {
        if kernel.radius() == 0 {
            return Ok(());
        }
        let size = self.surface(surface)?.size;
        let scratch = self.take_scratch(size);
        let result = self.blur_with(surface, &scratch, kernel);
        self.scratch.insert(size, scratch);
        result
    }

    fn compose(&mut self, target: SurfaceId, inputs: &ComposeInputs) -> Result<()> {
        let out = self.surface(target)?;
        let scene = self.surface(inputs.scene)?;
        let light = self.surface(inputs.lightmap)?;
        let vision = self.surface(inputs.vision)?;
        let out_of_view = self.texture(inputs.out_of_view)?;
        for input in [scene, light, vision] {
            if input.size != out.size {
                let (width, height) = input.size;
                return Err(LightingError::InvalidSurfaceSize { width, height });
            }
        }

        let uniforms = ComposeUniforms {
            ambient: inputs.ambient,
            pass_level: VISION_PASS_LEVEL,
            _pad: [0.0; 3],
        };
        self.draw_quad(
            "compose",
            &self.pipelines.compose.pipeline,
            &self.pipelines.compose.layout,
            bytemuck::bytes_of(&uniforms),
            &[&scene.view, &light.view, &vision.view, &out_of_view.view],
            &out.view,
            LoadOp::Load,
        );
        Ok(())
    }

    fn read_pixels(&mut self, surface: SurfaceId) -> Result<RgbaImage> {
        let source = self.surface(surface)?;
        let (width, height) = source.size;
        let unpadded_bytes_per_row = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback-buffer"),
            size: (padded_bytes_per_row * height) as u64,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            texel_copy(&source.texture),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            extent(source.size),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(device_error)?;
        rx.recv()
            .map_err(device_error)?
            .map_err(device_error)?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in 0..height {
            let start = (row * padded_bytes_per_row) as usize;
            pixels.extend_from_slice(&data[start..start + unpadded_bytes_per_row as usize]);
        }
        drop(data);
        staging_buffer.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| LightingError::Device("readback size mismatch".into()))
    }
}

fn device_error(err: impl std::fmt::Display) -> LightingError {
    LightingError::Device(err.to_string())
}

fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(adapter.request_device(&DeviceDescriptor {
        label: Some("penumbra-device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        experimental_features: Default::default(),
        memory_hints: Default::default(),
        trace: wgpu::Trace::Off,
    }))
    .map_err(device_error)
}

fn to_wgpu_color(color: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: color[0] as f64,
        g: color[1] as f64,
        b: color[2] as f64,
        a: color[3] as f64,
    }
}

fn extent((width, height): (u32, u32)) -> Extent3d {
    Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn texel_copy(texture: &Texture) -> TexelCopyTextureInfo<'_> {
    TexelCopyTextureInfo {
        texture,
        mip_level: 0,
        origin: Origin3d::ZERO,
        aspect: TextureAspect::All,
    }
}

fn create_target(device: &wgpu::Device, label: &str, size: (u32, u32)) -> GpuTexture {
    let texture = device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: TextureUsages::RENDER_ATTACHMENT
            | TextureUsages::TEXTURE_BINDING
            | TextureUsages::COPY_SRC
            | TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&TextureViewDescriptor::default());
    GpuTexture {
        texture,
        view,
        size,
    }
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    image: &RgbaImage,
) -> GpuTexture {
    let size = image.dimensions();
    let texture = device.create_texture(&TextureDescriptor {
        label: Some(label),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        texel_copy(&texture),
        image.as_raw(),
        TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * size.0),
            rows_per_image: Some(size.1),
        },
        extent(size),
    );
    let view = texture.create_view(&TextureViewDescriptor::default());
    GpuTexture {
        texture,
        view,
        size,
    }
}

/// Layout with a uniform buffer at binding 0 followed by `textures` textures.
fn create_layout(device: &wgpu::Device, label: &str, textures: u32) -> BindGroupLayout {
    let mut entries = vec![BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }];
    for binding in 1..=textures {
        entries.push(BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: false },
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    layout: &BindGroupLayout,
    format: TextureFormat,
    blend: BlendState,
    vertex_layout: wgpu::VertexBufferLayout<'_>,
) -> RenderPipeline {
    let shader = device.create_shader_module(ShaderModuleDescriptor {
        label: Some(label),
        source: ShaderSource::Wgsl(source.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        immediate_size: 0,
    });
    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[vertex_layout],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(ColorTargetState {
                format,
                blend: Some(blend),
                write_mask: ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: PrimitiveState::default(),
        depth_stencil: None,
        multisample: MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

fn quad_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &QUAD_ATTRIBUTES,
    }
}

fn fullscreen_pass(device: &wgpu::Device, label: &str, source: &str, textures: u32) -> Pass {
    let layout = create_layout(device, label, textures);
    let pipeline = create_pipeline(
        device,
        label,
        source,
        &layout,
        TARGET_FORMAT,
        BlendState::REPLACE,
        quad_layout(),
    );
    Pass { pipeline, layout }
}

fn create_blit_pipeline(
    device: &wgpu::Device,
    layout: &BindGroupLayout,
    format: TextureFormat,
    blend: BlendState,
) -> RenderPipeline {
    create_pipeline(
        device,
        "blit",
        include_str!("blit.wgsl"),
        layout,
        format,
        blend,
        quad_layout(),
    )
}

fn choose_present_mode(modes: &[PresentMode], vsync: bool) -> PresentMode {
    if vsync {
        modes
            .iter()
            .copied()
            .find(|mode| matches!(mode, PresentMode::Fifo | PresentMode::FifoRelaxed))
            .unwrap_or(PresentMode::Fifo)
    } else {
        modes
            .iter()
            .copied()
            .find(|mode| matches!(mode, PresentMode::Immediate | PresentMode::Mailbox))
            .unwrap_or(PresentMode::Immediate)
    }
}

fn choose_alpha_mode(modes: &[CompositeAlphaMode]) -> CompositeAlphaMode {
    modes
        .iter()
        .copied()
        .find(|mode| matches!(mode, CompositeAlphaMode::Auto))
        .unwrap_or_else(|| modes.first().copied().unwrap_or(CompositeAlphaMode::Opaque))
}
