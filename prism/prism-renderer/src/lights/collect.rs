//! Light bound collection: turns the host's visible lights and probes into flat GPU arrays.

use glam::{Mat4, Vec3};
use render_api::{ExtractedLight, ExtractedReflectionProbe, LightKind};

use super::data::{DirectionalLightData, EnvLightData, LightBound, PunctualLightData, INVALID_ENV_INDEX};

/// Resolves a probe texture to a slot of the reflection probe cache.
/// The renderer backs this with the GPU cache; tests back it with a slot table.
pub trait EnvSlotSource {
    fn fetch_slice(&mut self, texture_id: u64) -> Option<u32>;
}

/// Output of one collection. Punctual bounds come first, env bounds after them.
#[derive(Default, Debug)]
pub struct CollectedLights {
    pub directional: Vec<DirectionalLightData>,
    pub punctual: Vec<PunctualLightData>,
    pub env: Vec<EnvLightData>,
    pub bounds: Vec<LightBound>,
}

impl CollectedLights {
    fn clear(&mut self) {
        self.directional.clear();
        self.punctual.clear();
        self.env.clear();
        self.bounds.clear();
    }
}

pub struct LightBoundCollector {
    max_directional: usize,
    max_punctual: usize,
    max_env: usize,
    collected: CollectedLights,
}

impl LightBoundCollector {
    pub fn new(max_directional: u32, max_punctual: u32, max_env: u32) -> Self {
        Self {
            max_directional: max_directional as usize,
            max_punctual: max_punctual as usize,
            max_env: max_env as usize,
            collected: CollectedLights::default(),
        }
    }

    pub fn collected(&self) -> &CollectedLights {
        &self.collected
    }

    /// Classify this frame's visible lights and probes. Lights past a category's cap are dropped.
    pub fn collect(
        &mut self,
        lights: &[ExtractedLight],
        probes: &[ExtractedReflectionProbe],
        slots: &mut dyn EnvSlotSource,
    ) -> &CollectedLights {
        self.collected.clear();
        self.collect_lights(lights);
        self.collect_probes(probes, slots);
        &self.collected
    }

    fn collect_lights(&mut self, lights: &[ExtractedLight]) {
        let mut dropped = 0usize;
        for light in lights {
            let local_to_world = Mat4::from_cols_array(&light.local_to_world);
            let forward = local_to_world.z_axis.truncate().normalize_or_zero();
            match light.kind {
                LightKind::Directional => {
                    if self.collected.directional.len() >= self.max_directional {
                        dropped += 1;
                        continue;
                    }
                    self.collected.directional.push(DirectionalLightData {
                        direction: (-forward).extend(0.0).to_array(),
                        color: [light.color[0], light.color[1], light.color[2], 1.0],
                    });
                }
                LightKind::Point | LightKind::Spot => {
                    if self.collected.punctual.len() >= self.max_punctual {
                        dropped += 1;
                        continue;
                    }
                    let mut punctual = PunctualLightData {
                        position_ws: local_to_world.w_axis.truncate().to_array(),
                        range: light.range,
                        color: light.color,
                        spot_angle_scale: 0.0,
                        forward: forward.to_array(),
                        spot_angle_offset: 1.0,
                    };
                    let mut bound = LightBound::punctual(&punctual);
                    if light.kind == LightKind::Spot {
                        let (scale, offset) = spot_angle_scale_offset(light.spot_angle);
                        punctual.spot_angle_scale = scale;
                        punctual.spot_angle_offset = offset;
                        let half = (light.spot_angle * 0.5).to_radians();
                        bound.spot_cos_angle = half.cos();
                        bound.spot_sin_angle = half.sin();
                    }
                    self.collected.punctual.push(punctual);
                    self.collected.bounds.push(bound);
                }
            }
        }
        if dropped > 0 {
            log::debug!("light collection: {} lights over budget dropped this frame", dropped);
        }
    }

    fn collect_probes(&mut self, probes: &[ExtractedReflectionProbe], slots: &mut dyn EnvSlotSource) {
        let category_offset = self.collected.punctual.len() as u32;
        for probe in probes {
            if self.collected.env.len() >= self.max_env {
                break;
            }
            let Some(texture_id) = probe.texture_id else {
                continue;
            };
            if !probe.active {
                continue;
            }
            let range = Vec3::from_array(probe.bounds_extents).length();
            let env_index = slots
                .fetch_slice(texture_id)
                .map(|slot| slot as i32)
                .unwrap_or(INVALID_ENV_INDEX);
            let env = EnvLightData {
                position_ws: probe.bounds_center,
                env_index,
                range,
                blend_distance: probe.blend_distance.min(range),
                _pad: [0.0; 2],
            };
            self.collected.env.push(env);
            self.collected.bounds.push(LightBound::env(&env, category_offset));
        }
    }
}

/// Spot falloff folded into one multiply-add: `saturate(cos * scale + offset)`.
pub fn spot_angle_scale_offset(spot_angle_degrees: f32) -> (f32, f32) {
    let cos_outer = (spot_angle_degrees * 0.5).to_radians().cos();
    let inv_angle_range = 1.0 / (1.0 - cos_outer).clamp(1e-4, 1.0);
    (inv_angle_range, -cos_outer * inv_angle_range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lights::data::LightCategory;

    struct FixedSlots {
        next: u32,
        capacity: u32,
    }

    impl EnvSlotSource for FixedSlots {
        fn fetch_slice(&mut self, _texture_id: u64) -> Option<u32> {
            if self.next >= self.capacity {
                return None;
            }
            self.next += 1;
            Some(self.next - 1)
        }
    }

    fn translation(x: f32, y: f32, z: f32) -> [f32; 16] {
        Mat4::from_translation(Vec3::new(x, y, z)).to_cols_array()
    }

    fn point(x: f32, y: f32, z: f32, range: f32) -> ExtractedLight {
        ExtractedLight {
            kind: LightKind::Point,
            local_to_world: translation(x, y, z),
            range,
            color: [1.0, 1.0, 1.0],
            spot_angle: 0.0,
        }
    }

    fn probe(texture_id: Option<u64>) -> ExtractedReflectionProbe {
        ExtractedReflectionProbe {
            bounds_center: [0.0, 1.0, 0.0],
            bounds_extents: [3.0, 4.0, 0.0],
            blend_distance: 10.0,
            texture_id,
            active: true,
        }
    }

    #[test]
    fn directional_lights_never_become_bounds() {
        let mut collector = LightBoundCollector::new(16, 512, 16);
        let lights = vec![
            ExtractedLight {
                kind: LightKind::Directional,
                local_to_world: Mat4::IDENTITY.to_cols_array(),
                range: 0.0,
                color: [1.0, 0.9, 0.8],
                spot_angle: 0.0,
            },
            point(0.0, 0.0, -5.0, 10.0),
        ];
        let mut slots = FixedSlots { next: 0, capacity: 16 };
        let out = collector.collect(&lights, &[], &mut slots);
        assert_eq!(out.directional.len(), 1);
        assert_eq!(out.directional[0].direction, [0.0, 0.0, -1.0, 0.0]);
        assert_eq!(out.punctual.len(), 1);
        assert_eq!(out.bounds.len(), 1);
        assert_eq!(out.bounds[0].category(), Some(LightCategory::Punctual));
    }

    #[test]
    fn point_lights_keep_unit_spot_term() {
        let mut collector = LightBoundCollector::new(16, 512, 16);
        let mut slots = FixedSlots { next: 0, capacity: 16 };
        let out = collector.collect(&[point(1.0, 2.0, 3.0, 4.0)], &[], &mut slots);
        let p = out.punctual[0];
        assert_eq!(p.position_ws, [1.0, 2.0, 3.0]);
        assert_eq!(p.spot_angle_scale, 0.0);
        assert_eq!(p.spot_angle_offset, 1.0);
        assert!(!out.bounds[0].is_spot());
    }

    #[test]
    fn spot_falloff_precomputed() {
        let (scale, offset) = spot_angle_scale_offset(90.0);
        let cos_outer = 45f32.to_radians().cos();
        assert!((scale - 1.0 / (1.0 - cos_outer)).abs() < 1e-4);
        // At the cone edge the attenuation term is zero, on the axis it is one.
        assert!((cos_outer * scale + offset).abs() < 1e-4);
        assert!((1.0 * scale + offset - 1.0).abs() < 1e-4);
    }

    #[test]
    fn degenerate_spot_angle_is_clamped() {
        let (scale, _) = spot_angle_scale_offset(0.0);
        assert!((scale - 1e4).abs() < 1.0);
    }

    #[test]
    fn spot_bounds_carry_half_angle() {
        let mut collector = LightBoundCollector::new(16, 512, 16);
        let mut slots = FixedSlots { next: 0, capacity: 16 };
        let spot = ExtractedLight { kind: LightKind::Spot, spot_angle: 60.0, ..point(0.0, 0.0, 0.0, 5.0) };
        let out = collector.collect(&[spot], &[], &mut slots);
        let bound = out.bounds[0];
        assert!((bound.spot_cos_angle - 30f32.to_radians().cos()).abs() < 1e-6);
        assert!((bound.spot_sin_angle - 0.5).abs() < 1e-6);
        assert!(bound.is_spot());
    }

    #[test]
    fn punctual_cap_drops_extra_lights() {
        let mut collector = LightBoundCollector::new(1, 4, 16);
        let lights: Vec<_> = (0..10).map(|i| point(i as f32, 0.0, 0.0, 1.0)).collect();
        let mut slots = FixedSlots { next: 0, capacity: 16 };
        let out = collector.collect(&lights, &[], &mut slots);
        assert_eq!(out.punctual.len(), 4);
        assert_eq!(out.bounds.len(), 4);
        assert_eq!(out.punctual[3].position_ws[0], 3.0);
    }

    #[test]
    fn env_bounds_follow_punctual_with_category_offset() {
        let mut collector = LightBoundCollector::new(16, 512, 16);
        let mut slots = FixedSlots { next: 0, capacity: 16 };
        let lights = vec![point(0.0, 0.0, 0.0, 1.0), point(1.0, 0.0, 0.0, 1.0)];
        let out = collector.collect(&lights, &[probe(Some(7))], &mut slots);
        assert_eq!(out.env.len(), 1);
        let env = out.env[0];
        assert_eq!(env.range, 5.0);
        assert_eq!(env.blend_distance, 5.0);
        assert_eq!(env.env_index, 0);
        let bound = out.bounds[2];
        assert_eq!(bound.category(), Some(LightCategory::Env));
        assert_eq!(bound.category_offset, 2);
        assert_eq!(bound.position, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn probes_without_texture_or_inactive_are_skipped() {
        let mut collector = LightBoundCollector::new(16, 512, 16);
        let mut slots = FixedSlots { next: 0, capacity: 16 };
        let inactive = ExtractedReflectionProbe { active: false, ..probe(Some(1)) };
        let out = collector.collect(&[], &[probe(None), inactive], &mut slots);
        assert!(out.env.is_empty());
        assert!(out.bounds.is_empty());
    }

    #[test]
    fn full_cache_yields_invalid_env_index() {
        let mut collector = LightBoundCollector::new(16, 512, 16);
        let mut slots = FixedSlots { next: 0, capacity: 1 };
        let out = collector.collect(&[], &[probe(Some(1)), probe(Some(2))], &mut slots);
        assert_eq!(out.env.len(), 2);
        assert_eq!(out.env[0].env_index, 0);
        assert_eq!(out.env[1].env_index, INVALID_ENV_INDEX);
    }

    #[test]
    fn collection_resets_between_frames() {
        let mut collector = LightBoundCollector::new(16, 512, 16);
        let mut slots = FixedSlots { next: 0, capacity: 16 };
        collector.collect(&[point(0.0, 0.0, 0.0, 1.0)], &[], &mut slots);
        let out = collector.collect(&[], &[], &mut slots);
        assert!(out.punctual.is_empty());
        assert!(out.bounds.is_empty());
    }
}
