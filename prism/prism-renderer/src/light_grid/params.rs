//! Cluster grid geometry: tile counts, geometric depth slicing, view-space transform of bounds.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::lights::{LightBound, LightCategory};

/// `r^D` is kept below this so `zScale` stays a finite f32 for very wide FOVs on small viewports.
const MAX_SERIES_LOG2: f32 = 100.0;

/// Per-camera cluster layout. Recomputed every frame from the camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClusterParams {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub tile_size: u32,
    pub clusters_x: u32,
    pub clusters_y: u32,
    pub depth_slices: u32,
    pub common_ratio: f32,
    pub z_scale: f32,
    pub near: f32,
    pub far: f32,
    pub tan_half_fov_y: f32,
    pub aspect: f32,
}

impl ClusterParams {
    /// `fov_y_degrees` is the full vertical field of view. A zero-size viewport still yields a
    /// 1x1 tile grid.
    pub fn new(
        viewport_width: u32,
        viewport_height: u32,
        fov_y_degrees: f32,
        aspect: f32,
        near: f32,
        far: f32,
        tile_size: u32,
        depth_slices: u32,
    ) -> Self {
        let tile_size = tile_size.max(1);
        let depth_slices = depth_slices.max(1);
        let clusters_x = viewport_width.div_ceil(tile_size).max(1);
        let clusters_y = viewport_height.div_ceil(tile_size).max(1);
        let near = near.max(1e-5);
        let far = if far > near { far } else { near + 1e-3 };
        let tan_half_fov_y = (fov_y_degrees * 0.5).to_radians().tan().max(1e-4);

        let max_ratio = (MAX_SERIES_LOG2 / depth_slices as f32).exp2();
        let common_ratio = (1.0 + 2.0 * tan_half_fov_y / clusters_y as f32).min(max_ratio);
        let series = (common_ratio.powi(depth_slices as i32) - 1.0) / (common_ratio - 1.0);
        let z_scale = series / (far - near);

        Self {
            viewport_width,
            viewport_height,
            tile_size,
            clusters_x,
            clusters_y,
            depth_slices,
            common_ratio,
            z_scale,
            near,
            far,
            tan_half_fov_y,
            aspect: if aspect > 0.0 { aspect } else { 1.0 },
        }
    }

    pub fn cluster_count(&self) -> u32 {
        self.clusters_x * self.clusters_y * self.depth_slices
    }

    pub fn cluster_index(&self, x: u32, y: u32, z: u32) -> u32 {
        (z * self.clusters_y + y) * self.clusters_x + x
    }

    /// Continuous slice coordinate of a view-space depth: 0 at `near`, `depth_slices` at `far`.
    pub fn slice_coordinate(&self, depth: f32) -> f32 {
        let d = (depth - self.near).max(0.0);
        (1.0 + d * self.z_scale * (self.common_ratio - 1.0)).ln() / self.common_ratio.ln()
    }

    pub fn slice_index(&self, depth: f32) -> u32 {
        (self.slice_coordinate(depth).floor().max(0.0) as u32).min(self.depth_slices - 1)
    }

    /// View-space depth where slice `k` starts; `slice_depth(depth_slices) == far`.
    pub fn slice_depth(&self, k: u32) -> f32 {
        let r = self.common_ratio;
        self.near + (r.powi(k as i32) - 1.0) / ((r - 1.0) * self.z_scale)
    }

    /// View-space AABB of cluster (x, y, z). Tile rows count from the top of the screen; the last
    /// column/row may extend past the viewport edge.
    pub fn cluster_aabb(&self, x: u32, y: u32, z: u32) -> (Vec3, Vec3) {
        let w = self.viewport_width.max(1) as f32;
        let h = self.viewport_height.max(1) as f32;
        let t = self.tile_size as f32;
        let ndc_x0 = (x as f32 * t) / w * 2.0 - 1.0;
        let ndc_x1 = ((x + 1) as f32 * t) / w * 2.0 - 1.0;
        let ndc_y0 = 1.0 - ((y + 1) as f32 * t) / h * 2.0;
        let ndc_y1 = 1.0 - (y as f32 * t) / h * 2.0;
        let tan_x = self.tan_half_fov_y * self.aspect;
        let tan_y = self.tan_half_fov_y;
        let d0 = self.slice_depth(z);
        let d1 = self.slice_depth(z + 1);

        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for d in [d0, d1] {
            for nx in [ndc_x0, ndc_x1] {
                for ny in [ndc_y0, ndc_y1] {
                    let p = Vec3::new(nx * tan_x * d, ny * tan_y * d, d);
                    min = min.min(p);
                    max = max.max(p);
                }
            }
        }
        (min, max)
    }

    /// Workgroups for the build kernel at `workgroup` invocations per axis.
    pub fn dispatch_size(&self, workgroup: [u32; 3]) -> [u32; 3] {
        [
            self.clusters_x.div_ceil(workgroup[0]).max(1),
            self.clusters_y.div_ceil(workgroup[1]).max(1),
            self.depth_slices.div_ceil(workgroup[2]).max(1),
        ]
    }

    /// Index capacity of the grid for the given per-cluster limit, bounded by what the packed
    /// offset field can address.
    pub fn capacity(&self, max_lights_per_cluster: u32) -> u32 {
        let addressable = 1u64 << offset_bits(max_lights_per_cluster);
        (self.cluster_count() as u64 * max_lights_per_cluster as u64).min(addressable) as u32
    }

    pub fn constants(&self, light_count: u32, max_lights_per_cluster: u32) -> ClusterConstants {
        let w = self.viewport_width.max(1) as f32;
        let h = self.viewport_height.max(1) as f32;
        ClusterConstants {
            num_tiles_x: self.clusters_x,
            num_tiles_y: self.clusters_y,
            num_slices: self.depth_slices,
            tile_size: self.tile_size,
            z_params: [self.z_scale, self.common_ratio, self.near, self.far],
            clip_to_view: [self.tan_half_fov_y * self.aspect, self.tan_half_fov_y, 0.0, 0.0],
            screen: [w, h, 1.0 / w, 1.0 / h],
            light_count,
            max_lights_per_cluster,
            offset_bits: offset_bits(max_lights_per_cluster),
            capacity: self.capacity(max_lights_per_cluster),
        }
    }
}

/// Uniform block shared by the grid build and the lighting pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ClusterConstants {
    pub num_tiles_x: u32,
    pub num_tiles_y: u32,
    pub num_slices: u32,
    pub tile_size: u32,
    /// (zScale, commonRatio, near, far)
    pub z_params: [f32; 4],
    /// (tan half fov * aspect, tan half fov, 0, 0)
    pub clip_to_view: [f32; 4],
    /// (width, height, 1/width, 1/height)
    pub screen: [f32; 4],
    pub light_count: u32,
    pub max_lights_per_cluster: u32,
    pub offset_bits: u32,
    pub capacity: u32,
}

/// Low bits of a packed entry hold the offset, the high bits the count. The count field is
/// wide enough to hold `max_lights_per_cluster` itself.
pub fn offset_bits(max_lights_per_cluster: u32) -> u32 {
    32 - (32 - max_lights_per_cluster.max(1).leading_zeros())
}

pub fn pack_offset_count(offset: u32, count: u32, offset_bits: u32) -> u32 {
    (offset & ((1u32 << offset_bits) - 1)) | (count << offset_bits)
}

pub fn unpack_offset_count(packed: u32, offset_bits: u32) -> (u32, u32) {
    (packed & ((1u32 << offset_bits) - 1), packed >> offset_bits)
}

/// Index of (cluster, category) in the packing-offset buffer.
pub fn packing_slot(cluster: u32, category: LightCategory) -> usize {
    cluster as usize * LightCategory::COUNT + category as usize
}

/// Host view matrices look down -Z; the cluster grid wants depth along +Z. Negates the row that
/// produces view-space Z.
pub fn flip_view_handedness(world_to_view: Mat4) -> Mat4 {
    let mut m = world_to_view;
    m.x_axis.z = -m.x_axis.z;
    m.y_axis.z = -m.y_axis.z;
    m.z_axis.z = -m.z_axis.z;
    m.w_axis.z = -m.w_axis.z;
    m
}

/// Rewrite world-space bounds into the flipped view space in place.
pub fn bounds_to_view_space(flipped_world_to_view: &Mat4, bounds: &mut [LightBound]) {
    for bound in bounds {
        bound.position = flipped_world_to_view
            .transform_point3(Vec3::from_array(bound.position))
            .to_array();
        bound.forward = flipped_world_to_view
            .transform_vector3(Vec3::from_array(bound.forward))
            .to_array();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lights::PunctualLightData;

    fn params(fov: f32, near: f32, far: f32, height: u32) -> ClusterParams {
        ClusterParams::new(height, height, fov, 1.0, near, far, 32, 64)
    }

    #[test]
    fn cluster_counts_round_up() {
        let p = ClusterParams::new(1920, 1080, 60.0, 16.0 / 9.0, 0.1, 100.0, 32, 64);
        assert_eq!((p.clusters_x, p.clusters_y), (60, 34));
        assert_eq!(p.cluster_count(), 60 * 34 * 64);
    }

    #[test]
    fn zero_viewport_clamps_to_one_tile() {
        let p = ClusterParams::new(0, 0, 60.0, 1.0, 0.1, 100.0, 32, 16);
        assert_eq!((p.clusters_x, p.clusters_y), (1, 1));
        assert_eq!(p.dispatch_size([4, 4, 4]), [1, 1, 4]);
        assert!(p.z_scale.is_finite());
    }

    #[test]
    fn ratio_and_scale_follow_fov() {
        let p = params(60.0, 0.1, 100.0, 512);
        let expected_r = 1.0 + 2.0 * 30f32.to_radians().tan() / 16.0;
        assert!((p.common_ratio - expected_r).abs() < 1e-6);
        let series = (expected_r.powi(64) - 1.0) / (expected_r - 1.0);
        assert!((p.z_scale - series / 99.9).abs() / p.z_scale < 1e-4);
    }

    #[test]
    fn depth_mapping_is_monotonic_with_clamped_ends() {
        for fov in [10.0, 45.0, 60.0, 90.0, 120.0, 170.0] {
            for (near, far) in [(0.01, 10.0), (0.1, 100.0), (1.0, 5000.0)] {
                for height in [1, 32, 512, 1080, 2160] {
                    let p = params(fov, near, far, height);
                    assert_eq!(p.slice_index(near), 0, "fov {fov} near {near} h {height}");
                    assert_eq!(p.slice_index(far), p.depth_slices - 1, "fov {fov} far {far} h {height}");
                    let mut previous = -1.0;
                    for i in 0..=200 {
                        let z = near + (far - near) * i as f32 / 200.0;
                        let c = p.slice_coordinate(z);
                        assert!(c > previous, "fov {fov} near {near} far {far} h {height} z {z}");
                        previous = c;
                    }
                }
            }
        }
    }

    #[test]
    fn slice_depths_bracket_their_index() {
        let p = params(60.0, 0.1, 100.0, 512);
        assert!((p.slice_depth(0) - 0.1).abs() < 1e-6);
        assert!((p.slice_depth(p.depth_slices) - 100.0).abs() < 1e-2);
        for k in 0..p.depth_slices {
            let mid = 0.5 * (p.slice_depth(k) + p.slice_depth(k + 1));
            assert_eq!(p.slice_index(mid), k);
        }
    }

    #[test]
    fn packing_holds_max_count() {
        let bits = offset_bits(32);
        assert_eq!(bits, 26);
        let packed = pack_offset_count(123_456, 32, bits);
        assert_eq!(unpack_offset_count(packed, bits), (123_456, 32));
        assert_eq!(offset_bits(64), 25);
        assert_eq!(offset_bits(1), 31);
    }

    #[test]
    fn constants_carry_z_params_and_clip_to_view() {
        let p = ClusterParams::new(1280, 720, 60.0, 1280.0 / 720.0, 0.3, 1000.0, 32, 64);
        let c = p.constants(7, 32);
        assert_eq!(c.z_params, [p.z_scale, p.common_ratio, 0.3, 1000.0]);
        assert!((c.clip_to_view[1] - 30f32.to_radians().tan()).abs() < 1e-6);
        assert!((c.clip_to_view[0] - c.clip_to_view[1] * 1280.0 / 720.0).abs() < 1e-5);
        assert_eq!(c.capacity, p.cluster_count() * 32);
        assert_eq!(c.light_count, 7);
        assert_eq!(std::mem::size_of::<ClusterConstants>(), 80);
    }

    #[test]
    fn flip_matches_view_transform_with_negated_z() {
        let eye = Vec3::new(3.0, 2.0, 5.0);
        let world_to_view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let flipped = flip_view_handedness(world_to_view);
        for world in [Vec3::ZERO, Vec3::new(1.0, -2.0, 0.5), Vec3::new(-4.0, 0.0, 9.0)] {
            let expected = world_to_view.transform_point3(world) * Vec3::new(1.0, 1.0, -1.0);
            let got = flipped.transform_point3(world);
            assert!((got - expected).length() < 1e-5);
        }
        // The look-at target is in front of the camera: positive depth after the flip.
        assert!(flipped.transform_point3(Vec3::ZERO).z > 0.0);
        assert_eq!(flipped, Mat4::from_scale(Vec3::new(1.0, 1.0, -1.0)) * world_to_view);
    }

    #[test]
    fn bounds_move_to_view_space() {
        let world_to_view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let flipped = flip_view_handedness(world_to_view);
        let light = PunctualLightData {
            position_ws: [0.0, 1.0, 0.0],
            range: 2.0,
            forward: [0.0, 0.0, -1.0],
            ..Default::default()
        };
        let mut bounds = vec![LightBound::punctual(&light)];
        bounds_to_view_space(&flipped, &mut bounds);
        let position = Vec3::from_array(bounds[0].position);
        let forward = Vec3::from_array(bounds[0].forward);
        assert!((position - Vec3::new(0.0, 1.0, 10.0)).length() < 1e-5);
        assert!((forward - Vec3::Z).length() < 1e-5);
        assert_eq!(bounds[0].range, 2.0);
    }

    #[test]
    fn cluster_aabbs_tile_the_slice() {
        let p = ClusterParams::new(64, 64, 90.0, 1.0, 1.0, 10.0, 32, 4);
        let (min, max) = p.cluster_aabb(0, 0, 0);
        // Top-left tile: negative x, positive y.
        assert!(max.x <= 1e-6 && min.x < 0.0);
        assert!(min.y >= -1e-6 && max.y > 0.0);
        assert!((min.z - 1.0).abs() < 1e-5);
        assert!((max.z - p.slice_depth(1)).abs() < 1e-5);
    }
}
