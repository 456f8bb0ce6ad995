use super::example_app::ExampleApp;
use super::gpu_state::GpuState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

/// How often frame timings are logged while profiling
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Timings accumulated between two reports
#[derive(Debug, Default)]
struct FrameTimings {
    frames: u32,
    update: Duration,
    draw: Duration,
    draw_calls: usize,
}

impl FrameTimings {
    fn report(&self, elapsed: Duration) {
        if self.frames == 0 {
            return;
        }
        let frames = self.frames as f32;
        log::info!(
            "{:.1} FPS | update {:.3}ms | draw {:.3}ms | {} draw calls/frame",
            frames / elapsed.as_secs_f32(),
            self.update.as_secs_f32() * 1000.0 / frames,
            self.draw.as_secs_f32() * 1000.0 / frames,
            self.draw_calls / self.frames as usize,
        );
    }
}

/// Owns the window and GPU state and drives an [`ExampleApp`]
struct AppRunner<T: ExampleApp> {
    window: Option<Arc<Window>>,
    gpu: Option<GpuState>,
    app: Option<T>,
    last_frame: Instant,
    profiling: bool,
    timings: FrameTimings,
    report_start: Instant,
}

impl<T: ExampleApp> AppRunner<T> {
    fn new() -> Self {
        Self {
            window: None,
            gpu: None,
            app: None,
            last_frame: Instant::now(),
            profiling: std::env::var("PROFILE").is_ok(),
            timings: FrameTimings::default(),
            report_start: Instant::now(),
        }
    }

    fn frame(&mut self) {
        let (Some(gpu), Some(app)) = (&mut self.gpu, &mut self.app) else {
            return;
        };

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        app.update(dt);
        let updated = Instant::now();

        match gpu.render(app.batch(), T::clear_color()) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                if let Some(window) = &self.window {
                    gpu.resize(window.inner_size());
                }
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("surface out of memory");
                std::process::exit(1);
            }
            Err(err) => log::error!("render error: {err:?}"),
        }

        if !self.profiling {
            return;
        }
        self.timings.frames += 1;
        self.timings.update += updated - now;
        self.timings.draw += updated.elapsed();
        self.timings.draw_calls += gpu.last_draw_count();

        let elapsed = self.report_start.elapsed();
        if elapsed >= REPORT_INTERVAL {
            self.timings.report(elapsed);
            self.timings = FrameTimings::default();
            self.report_start = Instant::now();
        }
    }

    fn key_pressed(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        match event.physical_key {
            PhysicalKey::Code(KeyCode::Escape) => event_loop.exit(),
            PhysicalKey::Code(KeyCode::KeyF) => {
                self.profiling = !self.profiling;
                self.timings = FrameTimings::default();
                self.report_start = Instant::now();
                log::info!("frame timings {}", if self.profiling { "on" } else { "off" });
            }
            _ => {}
        }
    }
}

impl<T: ExampleApp> ApplicationHandler for AppRunner<T> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let (width, height) = T::window_size();
        let attributes = Window::default_attributes()
            .with_title(T::window_title())
            .with_inner_size(winit::dpi::LogicalSize::new(width, height));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("failed to create window: {err}");
                event_loop.exit();
                return;
            }
        };

        let mut gpu = pollster::block_on(GpuState::new(window.clone()));
        self.app = Some(T::new(&mut gpu.renderer, &gpu.device, &gpu.queue));
        self.gpu = Some(gpu);
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. } => self.key_pressed(event_loop, &event),
            WindowEvent::Resized(size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.resize(size);
                }
            }
            WindowEvent::RedrawRequested => {
                self.frame();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

/// Open a window and run `T` until it is closed
pub fn run_example<T: ExampleApp + 'static>() {
    env_logger::init();

    let event_loop = EventLoop::new().expect("event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    log::info!("ESC: quit | F: toggle frame timings");

    let mut runner = AppRunner::<T>::new();
    if let Err(err) = event_loop.run_app(&mut runner) {
        log::error!("event loop stopped: {err}");
    }
}
