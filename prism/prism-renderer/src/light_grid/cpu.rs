//! CPU version of the cluster build kernel. Same tests, same list order, same packing; clusters
//! are visited in index order so spans are deterministic. Used to validate GPU readback.

use glam::Vec3;

use super::params::{pack_offset_count, packing_slot, unpack_offset_count, ClusterParams};
use crate::lights::{LightBound, LightCategory};

/// Cluster grid contents in the layout the lighting shader reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterGrid {
    pub packing_offsets: Vec<u32>,
    pub cluster_lights: Vec<u32>,
    pub offset_bits: u32,
}

impl ClusterGrid {
    pub fn new(packing_offsets: Vec<u32>, cluster_lights: Vec<u32>, offset_bits: u32) -> Self {
        Self { packing_offsets, cluster_lights, offset_bits }
    }

    /// Category-relative light indices of one cluster. Empty if the span is out of range.
    pub fn lights(&self, cluster: u32, category: LightCategory) -> &[u32] {
        let Some(&packed) = self.packing_offsets.get(packing_slot(cluster, category)) else {
            return &[];
        };
        let (offset, count) = unpack_offset_count(packed, self.offset_bits);
        self.cluster_lights
            .get(offset as usize..(offset + count) as usize)
            .unwrap_or(&[])
    }

    pub fn cluster_count(&self) -> u32 {
        (self.packing_offsets.len() / LightCategory::COUNT) as u32
    }

    /// Per-cluster lists with span offsets stripped. The GPU assigns spans in whatever order its
    /// atomics resolve, so only the lists are comparable between builds.
    pub fn lists(&self) -> Vec<[Vec<u32>; LightCategory::COUNT]> {
        (0..self.cluster_count())
            .map(|c| {
                [
                    self.lights(c, LightCategory::Punctual).to_vec(),
                    self.lights(c, LightCategory::Env).to_vec(),
                ]
            })
            .collect()
    }
}

pub fn sphere_intersects_aabb(center: Vec3, radius: f32, min: Vec3, max: Vec3) -> bool {
    let closest = center.clamp(min, max);
    (center - closest).length_squared() <= radius * radius
}

/// Cone (apex, unit axis, range, half-angle) against the AABB's bounding sphere.
pub fn cone_intersects_sphere(
    apex: Vec3,
    axis: Vec3,
    range: f32,
    cos_angle: f32,
    sin_angle: f32,
    sphere_center: Vec3,
    sphere_radius: f32,
) -> bool {
    let v = sphere_center - apex;
    let v_len_sq = v.length_squared();
    let v1_len = v.dot(axis);
    let distance_closest = cos_angle * (v_len_sq - v1_len * v1_len).max(0.0).sqrt() - v1_len * sin_angle;
    let angle_cull = distance_closest > sphere_radius;
    let front_cull = v1_len > sphere_radius + range;
    let back_cull = v1_len < -sphere_radius;
    !(angle_cull || front_cull || back_cull)
}

pub fn bound_intersects_cluster(bound: &LightBound, min: Vec3, max: Vec3) -> bool {
    let position = Vec3::from_array(bound.position);
    if !sphere_intersects_aabb(position, bound.range, min, max) {
        return false;
    }
    if !bound.is_spot() {
        return true;
    }
    let center = (min + max) * 0.5;
    let radius = (max - min).length() * 0.5;
    cone_intersects_sphere(
        position,
        Vec3::from_array(bound.forward),
        bound.range,
        bound.spot_cos_angle,
        bound.spot_sin_angle,
        center,
        radius,
    )
}

/// Build the grid from view-space bounds (punctual bounds first, env after).
pub fn build_reference(params: &ClusterParams, bounds: &[LightBound], max_lights_per_cluster: u32) -> ClusterGrid {
    let constants = params.constants(bounds.len() as u32, max_lights_per_cluster);
    let clusters = params.cluster_count();
    let mut packing_offsets = vec![0u32; clusters as usize * LightCategory::COUNT];
    let mut cluster_lights = vec![0u32; constants.capacity as usize];
    let mut counter = 0u32;
    let mut local = Vec::with_capacity(max_lights_per_cluster as usize);

    for z in 0..params.depth_slices {
        for y in 0..params.clusters_y {
            for x in 0..params.clusters_x {
                let (min, max) = params.cluster_aabb(x, y, z);
                local.clear();
                let mut counts = [0u32; LightCategory::COUNT];
                for (i, bound) in bounds.iter().enumerate() {
                    if local.len() as u32 >= max_lights_per_cluster {
                        break;
                    }
                    let Some(category) = bound.category() else {
                        continue;
                    };
                    if bound_intersects_cluster(bound, min, max) {
                        local.push(i as u32 - bound.category_offset);
                        counts[category as usize] += 1;
                    }
                }

                // Reserve one span; truncate when the global capacity runs out.
                let total = local.len() as u32;
                let base = counter.min(constants.capacity);
                counter += total;
                let available = (constants.capacity - base).min(total);
                let punctual = counts[0].min(available);
                let env = counts[1].min(available - punctual);
                let kept = (punctual + env) as usize;
                cluster_lights[base as usize..base as usize + kept].copy_from_slice(&local[..kept]);

                let cluster = params.cluster_index(x, y, z);
                packing_offsets[packing_slot(cluster, LightCategory::Punctual)] =
                    pack_offset_count(base, punctual, constants.offset_bits);
                packing_offsets[packing_slot(cluster, LightCategory::Env)] =
                    pack_offset_count(base + punctual, env, constants.offset_bits);
            }
        }
    }
    ClusterGrid::new(packing_offsets, cluster_lights, constants.offset_bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light_grid::params::{bounds_to_view_space, flip_view_handedness};
    use crate::lights::{EnvLightData, EnvSlotSource, LightBoundCollector, PunctualLightData};
    use glam::Mat4;
    use render_api::{ExtractedLight, LightKind};

    struct NoProbes;

    impl EnvSlotSource for NoProbes {
        fn fetch_slice(&mut self, _texture_id: u64) -> Option<u32> {
            None
        }
    }

    fn point_bound(position: [f32; 3], range: f32) -> LightBound {
        LightBound::punctual(&PunctualLightData { position_ws: position, range, ..Default::default() })
    }

    fn spot_bound(position: [f32; 3], forward: [f32; 3], range: f32, spot_angle_degrees: f32) -> LightBound {
        let mut bound = LightBound::punctual(&PunctualLightData {
            position_ws: position,
            range,
            forward,
            ..Default::default()
        });
        let half = (spot_angle_degrees * 0.5).to_radians();
        bound.spot_cos_angle = half.cos();
        bound.spot_sin_angle = half.sin();
        bound
    }

    /// 512x512 at 32px tiles gives 16 rows of clusters.
    fn scenario_params() -> ClusterParams {
        ClusterParams::new(512, 512, 60.0, 1.0, 0.1, 100.0, 32, 64)
    }

    #[test]
    fn point_light_at_depth_five_fills_its_slice() {
        let params = scenario_params();
        assert_eq!(params.clusters_y, 16);
        let lights = vec![
            ExtractedLight {
                kind: LightKind::Directional,
                local_to_world: Mat4::IDENTITY.to_cols_array(),
                range: 0.0,
                color: [1.0; 3],
                spot_angle: 0.0,
            },
            ExtractedLight {
                kind: LightKind::Point,
                local_to_world: Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)).to_cols_array(),
                range: 10.0,
                color: [1.0; 3],
                spot_angle: 0.0,
            },
        ];
        let mut collector = LightBoundCollector::new(16, 512, 16);
        let collected = collector.collect(&lights, &[], &mut NoProbes);
        assert_eq!(collected.directional.len(), 1);
        let mut bounds = collected.bounds.clone();
        assert_eq!(bounds.len(), 1);
        bounds_to_view_space(&flip_view_handedness(Mat4::IDENTITY), &mut bounds);
        assert_eq!(bounds[0].position, [0.0, 0.0, 5.0]);

        let grid = build_reference(&params, &bounds, 32);
        let slice = params.slice_index(5.0);
        for y in 0..params.clusters_y {
            for x in 0..params.clusters_x {
                let cluster = params.cluster_index(x, y, slice);
                assert_eq!(grid.lights(cluster, LightCategory::Punctual), &[0], "tile ({x}, {y})");
            }
        }
        // Beyond depth 15 the sphere is gone.
        let past = params.slice_index(15.0) + 1;
        for z in past..params.depth_slices {
            for y in 0..params.clusters_y {
                for x in 0..params.clusters_x {
                    assert!(grid.lights(params.cluster_index(x, y, z), LightCategory::Punctual).is_empty());
                }
            }
        }
        // Only punctual and env data ever reach the grid; the directional light is not in it.
        for c in 0..params.cluster_count() {
            assert!(grid.lights(c, LightCategory::Env).is_empty());
            assert!(grid.lights(c, LightCategory::Punctual).len() <= 1);
        }
    }

    #[test]
    fn small_light_only_touches_its_screen_footprint() {
        let params = scenario_params();
        let bounds = vec![point_bound([2.0, 0.0, 5.0], 1.0)];
        let grid = build_reference(&params, &bounds, 32);
        let slice = params.slice_index(5.0);
        // x = 2 at depth 5 projects to pixel ~433, tile 13; the row at the screen center is 8.
        assert_eq!(grid.lights(params.cluster_index(13, 8, slice), LightCategory::Punctual), &[0]);
        assert!(grid.lights(params.cluster_index(0, 8, slice), LightCategory::Punctual).is_empty());
        assert!(grid.lights(params.cluster_index(13, 0, slice), LightCategory::Punctual).is_empty());
        assert!(grid.lights(params.cluster_index(13, 8, 0), LightCategory::Punctual).is_empty());
    }

    #[test]
    fn spot_cone_culls_clusters_outside_its_angle() {
        let params = scenario_params();
        let spot = vec![spot_bound([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], 20.0, 30.0)];
        let point = vec![point_bound([0.0, 0.0, 0.0], 20.0)];
        let slice = params.slice_index(10.0);
        let corner = params.cluster_index(0, 0, slice);
        let center = params.cluster_index(8, 8, slice);

        let grid = build_reference(&params, &spot, 32);
        assert!(grid.lights(corner, LightCategory::Punctual).is_empty());
        assert_eq!(grid.lights(center, LightCategory::Punctual), &[0]);

        let grid = build_reference(&params, &point, 32);
        assert_eq!(grid.lights(corner, LightCategory::Punctual), &[0]);
    }

    #[test]
    fn env_indices_are_category_relative() {
        let params = ClusterParams::new(128, 128, 60.0, 1.0, 0.1, 50.0, 32, 16);
        let env = EnvLightData { position_ws: [0.0, 0.0, 4.0], env_index: 3, range: 2.0, ..Default::default() };
        let bounds = vec![point_bound([0.0, 0.0, 4.0], 2.0), LightBound::env(&env, 1)];
        let grid = build_reference(&params, &bounds, 32);
        let cluster = params.cluster_index(1, 1, params.slice_index(4.0));
        assert_eq!(grid.lights(cluster, LightCategory::Punctual), &[0]);
        assert_eq!(grid.lights(cluster, LightCategory::Env), &[0]);
    }

    #[test]
    fn zero_lights_build_an_empty_grid() {
        let params = ClusterParams::new(0, 0, 60.0, 1.0, 0.1, 100.0, 32, 16);
        let grid = build_reference(&params, &[], 32);
        assert_eq!(grid.cluster_count(), 16);
        assert!(grid.lists().iter().all(|[p, e]| p.is_empty() && e.is_empty()));
    }

    #[test]
    fn building_twice_is_identical() {
        let params = ClusterParams::new(256, 128, 75.0, 2.0, 0.3, 200.0, 32, 32);
        let bounds: Vec<_> = (0..20)
            .map(|i| point_bound([i as f32 - 10.0, (i % 3) as f32, 2.0 + i as f32 * 3.0], 4.0))
            .collect();
        let first = build_reference(&params, &bounds, 32);
        let second = build_reference(&params, &bounds, 32);
        assert_eq!(first, second);
        assert_eq!(first.lists(), second.lists());
    }

    #[test]
    fn lists_truncate_at_max_lights_per_cluster() {
        let params = ClusterParams::new(64, 64, 60.0, 1.0, 0.1, 10.0, 32, 4);
        let bounds: Vec<_> = (0..40).map(|_| point_bound([0.0, 0.0, 1.0], 100.0)).collect();
        let grid = build_reference(&params, &bounds, 32);
        for [punctual, env] in grid.lists() {
            assert_eq!(punctual, (0..32).collect::<Vec<u32>>());
            assert!(env.is_empty());
        }
    }

    #[test]
    fn sphere_aabb_touching_counts_as_overlap() {
        assert!(sphere_intersects_aabb(Vec3::new(2.0, 0.0, 0.0), 1.0, Vec3::splat(-1.0), Vec3::splat(1.0)));
        assert!(!sphere_intersects_aabb(Vec3::new(2.5, 0.0, 0.0), 1.0, Vec3::splat(-1.0), Vec3::splat(1.0)));
    }
}
