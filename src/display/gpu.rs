//! WebGPU render backend: texture upload plus a fullscreen-triangle draw.

use std::sync::Arc;
use std::time::Instant;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, instrument, warn};
use wgpu::*;
use winit::window::Window;

use crate::capture::Frame;
use crate::display::surface::RenderBackend;
use crate::error::FrameError;

/// GPU state for one render target.
pub struct WgpuBackend {
    device: Device,
    queue: Queue,
    surface: Surface<'static>,
    surface_config: SurfaceConfiguration,
    pipeline: RenderPipeline,
    bind_layout: BindGroupLayout,
    sampler: Sampler,
    /// Frame texture, recreated when the capture dimensions change.
    texture: Option<FrameTexture>,
}

struct FrameTexture {
    texture: Texture,
    bind_group: BindGroup,
    width: u32,
    height: u32,
}

impl WgpuBackend {
    /// Initialize WebGPU against the given window.
    #[instrument(skip(window))]
    pub fn new(window: Arc<Window>, width: u32, height: u32, vsync: bool) -> Result<Self> {
        info!("Initializing WebGPU display");

        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        // Prefer the discrete adapter when there is one
        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| eyre!("No suitable GPU adapter found"))?;

        info!("GPU: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &DeviceDescriptor {
                label: Some("Contour GPU Device"),
                required_features: Features::empty(),
                required_limits: Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: width.max(1),
            height: height.max(1),
            present_mode: if vsync {
                PresentMode::AutoVsync
            } else {
                PresentMode::AutoNoVsync
            },
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &surface_config);

        let bind_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Frame Bind Layout"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("Frame Sampler"),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        let pipeline = create_render_pipeline(&device, surface_format, &bind_layout);

        Ok(Self {
            device,
            queue,
            surface,
            surface_config,
            pipeline,
            bind_layout,
            sampler,
            texture: None,
        })
    }

    fn ensure_texture(&mut self, width: u32, height: u32) {
        let matches = self
            .texture
            .as_ref()
            .is_some_and(|t| t.width == width && t.height == height);
        if matches {
            return;
        }

        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some("Frame Texture"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let view = texture.create_view(&TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout: &self.bind_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        self.texture = Some(FrameTexture {
            texture,
            bind_group,
            width,
            height,
        });
    }
}

impl RenderBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) {
        self.surface_config.width = width.max(1);
        self.surface_config.height = height.max(1);
        self.surface.configure(&self.device, &self.surface_config);
    }

    fn submit(&mut self, frame: &Frame) -> Result<(), FrameError> {
        let render_start = Instant::now();

        self.ensure_texture(frame.meta.width, frame.meta.height);
        let frame_tex = self
            .texture
            .as_ref()
            .ok_or_else(|| FrameError::RenderFailed("no frame texture".into()))?;

        self.queue.write_texture(
            ImageCopyTexture {
                texture: &frame_tex.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            &frame.buf,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * frame.meta.width),
                rows_per_image: Some(frame.meta.height),
            },
            Extent3d {
                width: frame.meta.width,
                height: frame.meta.height,
                depth_or_array_layers: 1,
            },
        );

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                // Swapchain went stale (e.g. mid-resize); reconfigure and
                // let the next frame draw.
                warn!("surface lost, reconfiguring");
                self.surface.configure(&self.device, &self.surface_config);
                return Err(FrameError::RenderFailed("surface lost".into()));
            }
            Err(e) => return Err(FrameError::RenderFailed(e.to_string())),
        };
        let view = output
            .texture
            .create_view(&TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::BLACK),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &frame_tex.bind_group, &[]);
            render_pass.draw(0..3, 0..1); // Fullscreen triangle
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        metrics::histogram!("render_time_us").record(render_start.elapsed().as_micros() as f64);
        Ok(())
    }
}

fn create_render_pipeline(
    device: &Device,
    format: TextureFormat,
    bind_layout: &BindGroupLayout,
) -> RenderPipeline {
    let shader_source = r#"
        @group(0) @binding(0) var frame_tex: texture_2d<f32>;
        @group(0) @binding(1) var frame_samp: sampler;

        struct VsOut {
            @builtin(position) pos: vec4<f32>,
            @location(0) uv: vec2<f32>,
        };

        @vertex
        fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VsOut {
            // Fullscreen triangle trick
            let uv = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));
            var out: VsOut;
            out.pos = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
            out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
            return out;
        }

        @fragment
        fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
            return textureSample(frame_tex, frame_samp, in.uv);
        }
    "#;

    let shader = device.create_shader_module(ShaderModuleDescriptor {
        label: Some("Display Shader"),
        source: ShaderSource::Wgsl(shader_source.into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some("Display Pipeline Layout"),
        bind_group_layouts: &[bind_layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("Display Pipeline"),
        layout: Some(&pipeline_layout),
        cache: None,
        vertex: VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(ColorTargetState {
                format,
                blend: Some(BlendState::REPLACE),
                write_mask: ColorWrites::ALL,
            })],
        }),
        primitive: PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: MultisampleState::default(),
        multiview: None,
    })
}
