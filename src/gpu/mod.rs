//! wgpu backend for the energy map renderer.

pub mod context;
pub mod pipeline;
pub mod rasterizer;

pub use context::GpuContext;
pub use rasterizer::GpuRasterizer;
