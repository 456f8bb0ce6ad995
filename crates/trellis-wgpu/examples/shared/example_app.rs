use trellis::Batch;
use trellis_wgpu::WgpuDevice;

/// Core trait that all examples implement.
/// The runner owns the window, surface and device; the example owns its batch.
pub trait ExampleApp: Sized {
    /// Create the app once the GPU is available: register programs and
    /// textures on `renderer` and fill the batch
    fn new(renderer: &mut WgpuDevice, device: &wgpu::Device, queue: &wgpu::Queue) -> Self;

    /// Advance by `dt` seconds; update vertex data here
    fn update(&mut self, _dt: f32) {}

    /// The batch drawn every frame
    fn batch(&mut self) -> &mut Batch;

    /// Optional: Window title
    fn window_title() -> &'static str {
        "Trellis Example"
    }

    /// Optional: Window size
    fn window_size() -> (u32, u32) {
        (800, 600)
    }

    /// Optional: Clear color
    fn clear_color() -> wgpu::Color {
        wgpu::Color {
            r: 0.118,
            g: 0.118,
            b: 0.180,
            a: 1.0,
        }
    }
}
