//! GPU layouts of the per-frame light arrays. Field order matches `shaders/light_types.wgsl`.

use bytemuck::{Pod, Zeroable};

/// Env slot value the lighting shader treats as "probe not resident".
pub const INVALID_ENV_INDEX: i32 = -1;

/// Category a clustered light belongs to; selects the data buffer its index points into.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightCategory {
    Punctual = 0,
    Env = 1,
}

impl LightCategory {
    pub const COUNT: usize = 2;

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(LightCategory::Punctual),
            1 => Some(LightCategory::Env),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DirectionalLightData {
    /// Unit vector pointing toward the light. w unused.
    pub direction: [f32; 4],
    /// Linear color. w unused.
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PunctualLightData {
    pub position_ws: [f32; 3],
    pub range: f32,
    pub color: [f32; 3],
    /// `1 / clamp(1 - cos(outer), 1e-4, 1)`; 0 for point lights.
    pub spot_angle_scale: f32,
    pub forward: [f32; 3],
    /// `-cos(outer) * scale`; 1 for point lights.
    pub spot_angle_offset: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct EnvLightData {
    pub position_ws: [f32; 3],
    /// Slot in the probe cache array, or `INVALID_ENV_INDEX`.
    pub env_index: i32,
    pub range: f32,
    pub blend_distance: f32,
    pub _pad: [f32; 2],
}

impl Default for EnvLightData {
    fn default() -> Self {
        Self {
            position_ws: [0.0; 3],
            env_index: INVALID_ENV_INDEX,
            range: 0.0,
            blend_distance: 0.0,
            _pad: [0.0; 2],
        }
    }
}

/// Bounding volume of one clustered light. World space when collected, view space once the
/// grid builder has prepared it.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct LightBound {
    pub position: [f32; 3],
    pub range: f32,
    pub forward: [f32; 3],
    pub spot_cos_angle: f32,
    pub spot_sin_angle: f32,
    /// `LightCategory` as u32.
    pub category: u32,
    /// Subtracted from the bound index to get the index into the category's data buffer.
    pub category_offset: u32,
    pub _pad: u32,
}

impl LightBound {
    pub fn punctual(light: &PunctualLightData) -> Self {
        Self {
            position: light.position_ws,
            range: light.range,
            forward: light.forward,
            spot_cos_angle: 1.0,
            spot_sin_angle: 0.0,
            category: LightCategory::Punctual as u32,
            category_offset: 0,
            _pad: 0,
        }
    }

    pub fn env(light: &EnvLightData, category_offset: u32) -> Self {
        Self {
            position: light.position_ws,
            range: light.range,
            forward: [0.0; 3],
            spot_cos_angle: 1.0,
            spot_sin_angle: 0.0,
            category: LightCategory::Env as u32,
            category_offset,
            _pad: 0,
        }
    }

    pub fn category(&self) -> Option<LightCategory> {
        LightCategory::from_u32(self.category)
    }

    /// A spot bound; point and env bounds keep `cos = 1, sin = 0`.
    pub fn is_spot(&self) -> bool {
        self.spot_sin_angle > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_struct_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<DirectionalLightData>(), 32);
        assert_eq!(std::mem::size_of::<PunctualLightData>(), 48);
        assert_eq!(std::mem::size_of::<EnvLightData>(), 32);
        assert_eq!(std::mem::size_of::<LightBound>(), 48);
    }

    #[test]
    fn env_default_is_not_resident() {
        assert_eq!(EnvLightData::default().env_index, INVALID_ENV_INDEX);
    }

    #[test]
    fn category_round_trips_through_u32() {
        assert_eq!(LightCategory::from_u32(LightCategory::Env as u32), Some(LightCategory::Env));
        assert_eq!(LightCategory::from_u32(7), None);
    }
}
