//! Shared modules for `trellis-wgpu` examples.

pub mod example_app;
pub mod gpu_state;
pub mod runner;

pub use example_app::ExampleApp;
pub use runner::run_example;
