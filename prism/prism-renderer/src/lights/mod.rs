//! Visible light collection and the GPU buffers the lighting pass reads.

mod collect;
mod data;

pub use collect::{spot_angle_scale_offset, CollectedLights, EnvSlotSource, LightBoundCollector};
pub use data::{
    DirectionalLightData, EnvLightData, LightBound, LightCategory, PunctualLightData, INVALID_ENV_INDEX,
};

use crate::config::PrismConfig;

/// Fixed-capacity storage buffers, rewritten every frame. Imported into the frame graph.
pub struct LightBuffers {
    pub directional: wgpu::Buffer,
    pub punctual: wgpu::Buffer,
    pub env: wgpu::Buffer,
    directional_count: u32,
    punctual_count: u32,
    env_count: u32,
}

impl LightBuffers {
    pub fn new(device: &wgpu::Device, config: &PrismConfig) -> Self {
        let make = |label: &str, count: u32, stride: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                // Storage bindings must not be empty even when the budget is zero.
                size: (count.max(1) as u64) * stride as u64,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        Self {
            directional: make(
                "directional_light_datas",
                config.max_directional_lights,
                std::mem::size_of::<DirectionalLightData>(),
            ),
            punctual: make(
                "punctual_light_datas",
                config.max_punctual_lights,
                std::mem::size_of::<PunctualLightData>(),
            ),
            env: make("env_light_datas", config.max_env_lights, std::mem::size_of::<EnvLightData>()),
            directional_count: 0,
            punctual_count: 0,
            env_count: 0,
        }
    }

    pub fn upload(&mut self, queue: &wgpu::Queue, lights: &CollectedLights) {
        if !lights.directional.is_empty() {
            queue.write_buffer(&self.directional, 0, bytemuck::cast_slice(&lights.directional));
        }
        if !lights.punctual.is_empty() {
            queue.write_buffer(&self.punctual, 0, bytemuck::cast_slice(&lights.punctual));
        }
        if !lights.env.is_empty() {
            queue.write_buffer(&self.env, 0, bytemuck::cast_slice(&lights.env));
        }
        self.directional_count = lights.directional.len() as u32;
        self.punctual_count = lights.punctual.len() as u32;
        self.env_count = lights.env.len() as u32;
    }

    pub fn directional_count(&self) -> u32 {
        self.directional_count
    }

    pub fn punctual_count(&self) -> u32 {
        self.punctual_count
    }

    pub fn env_count(&self) -> u32 {
        self.env_count
    }
}
