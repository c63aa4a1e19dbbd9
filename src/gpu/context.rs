use crate::error::{Result, SimError};

/// Headless device and queue.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter: String,
}

impl GpuContext {
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None, // Headless
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| SimError::Gpu("no adapter found".into()))?;

        let info = adapter.get_info();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("pmdsim device"),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| SimError::Gpu(e.to_string()))?;

        let adapter = format!("{} ({:?})", info.name, info.backend);
        log::info!("Using GPU adapter {}", adapter);
        Ok(Self {
            device,
            queue,
            adapter,
        })
    }

    /// Blocking variant of [`GpuContext::new`].
    pub fn headless() -> Result<Self> {
        pollster::block_on(Self::new())
    }
}
