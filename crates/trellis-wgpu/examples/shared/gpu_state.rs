use std::sync::Arc;
use trellis::Batch;
use trellis_wgpu::{WgpuDevice, WgpuDeviceConfig};
use winit::window::Window;

/// Surface, device and the trellis renderer for one window
pub struct GpuState {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub renderer: WgpuDevice,
    last_draw_count: usize,
}

impl GpuState {
    pub async fn new(window: Arc<Window>) -> Self {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .expect("surface for the example window");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                compatible_surface: Some(&surface),
                ..Default::default()
            })
            .await
            .expect("adapter compatible with the window surface");
        log::info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Trellis Example Device"),
                ..Default::default()
            })
            .await
            .expect("device");

        let mut config = surface
            .get_default_config(&adapter, size.width.max(1), size.height.max(1))
            .expect("surface supported by the adapter");
        // Prefer an sRGB target
        if let Some(srgb) = surface
            .get_capabilities(&adapter)
            .formats
            .into_iter()
            .find(|format| format.is_srgb())
        {
            config.format = srgb;
        }
        config.present_mode = wgpu::PresentMode::AutoVsync;
        surface.configure(&device, &config);

        let mut renderer = WgpuDevice::new(
            &device,
            &queue,
            WgpuDeviceConfig::default()
                .with_label_prefix("Example")
                .with_target_format(config.format),
        );
        renderer.set_target_size(config.width, config.height);

        Self {
            surface,
            device,
            queue,
            config,
            renderer,
            last_draw_count: 0,
        }
    }

    pub fn resize(&mut self, size: winit::dpi::PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(&self.device, &self.config);
        self.renderer.set_target_size(size.width, size.height);
    }

    /// Draws issued by the last frame
    pub fn last_draw_count(&self) -> usize {
        self.last_draw_count
    }

    /// Draw `batch` into the next surface texture
    pub fn render(&mut self, batch: &mut Batch, clear: wgpu::Color) -> Result<(), wgpu::SurfaceError> {
        let frame = self.surface.get_current_texture()?;
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

        batch.draw(&mut self.renderer);
        self.last_draw_count = self.renderer.command_count();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Trellis Frame Encoder"),
            });
        self.renderer
            .render(&mut encoder, &view, wgpu::LoadOp::Clear(clear));
        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}
