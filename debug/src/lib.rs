//! Shared demo scene for the debug programs: a floor, a few boxes, a ring of colored point and
//! spot lights, one directional light and a reflection probe with a procedural sky cubemap.

use std::collections::HashMap;

use glam::{Mat4, Vec3};
use render_api::{
    ExtractedLight, ExtractedMaterial, ExtractedMesh, ExtractedProbeTexture, ExtractedReflectionProbe,
    ExtractedScene, ExtractedView, LightKind, OutputTarget, ProbeTextureFormat,
};

pub const SKY_TEXTURE_ID: u64 = 1;

/// Axis-aligned box of half size 1 around the origin; position + normal per vertex.
pub fn cube_mesh() -> (Vec<u8>, Vec<u8>) {
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0, 0.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];
    let mut vertices: Vec<f32> = Vec::with_capacity(24 * 6);
    let mut indices: Vec<u32> = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let n = Vec3::from_array(normal);
        let u = Vec3::from_array(u);
        let v = Vec3::from_array(v);
        let base = (vertices.len() / 6) as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = n + u * su + v * sv;
            vertices.extend_from_slice(&[p.x, p.y, p.z, n.x, n.y, n.z]);
        }
        // Counter-clockwise seen from outside.
        if u.cross(v).dot(n) > 0.0 {
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        } else {
            indices.extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
        }
    }
    (bytemuck::cast_slice(&vertices).to_vec(), bytemuck::cast_slice(&indices).to_vec())
}

fn mesh(entity_id: u64, transform: Mat4, material: ExtractedMaterial) -> ExtractedMesh {
    let (vertex_data, index_data) = cube_mesh();
    ExtractedMesh { entity_id, vertex_data, index_data, transform: transform.to_cols_array(), material, visible: true }
}

/// Six faces of a vertical gradient sky, `size` texels per edge, Rgba8Unorm.
pub fn sky_cubemap(size: u32, version: u64) -> ExtractedProbeTexture {
    let mut data = Vec::with_capacity((size * size * 6 * 4) as usize);
    for face in 0..6u32 {
        for y in 0..size {
            let t = match face {
                2 => 1.0,
                3 => 0.0,
                _ => 1.0 - y as f32 / (size - 1).max(1) as f32,
            };
            let sky = Vec3::new(0.35, 0.55, 0.9).lerp(Vec3::new(0.25, 0.22, 0.2), 1.0 - t);
            for _ in 0..size {
                data.extend_from_slice(&[
                    (sky.x * 255.0) as u8,
                    (sky.y * 255.0) as u8,
                    (sky.z * 255.0) as u8,
                    255,
                ]);
            }
        }
    }
    ExtractedProbeTexture {
        texture_id: SKY_TEXTURE_ID,
        size,
        format: ProbeTextureFormat::Rgba8Unorm,
        layers: 6,
        realtime: false,
        version,
        data,
    }
}

pub fn demo_scene() -> ExtractedScene {
    let mut meshes = HashMap::new();
    let floor = ExtractedMaterial { albedo: [0.6, 0.6, 0.6], roughness: 0.8, ..Default::default() };
    meshes.insert(1, mesh(1, Mat4::from_scale(Vec3::new(12.0, 0.1, 12.0)) * Mat4::from_translation(-Vec3::Y), floor));
    let palette = [
        ExtractedMaterial { albedo: [0.9, 0.2, 0.2], roughness: 0.3, ..Default::default() },
        ExtractedMaterial { albedo: [0.95, 0.8, 0.4], metallic: 1.0, roughness: 0.2, ..Default::default() },
        ExtractedMaterial { albedo: [0.2, 0.5, 0.9], roughness: 0.6, ..Default::default() },
    ];
    for (i, material) in palette.into_iter().enumerate() {
        let x = (i as f32 - 1.0) * 3.0;
        let id = 10 + i as u64;
        meshes.insert(id, mesh(id, Mat4::from_translation(Vec3::new(x, 0.5, 0.0)) * Mat4::from_scale(Vec3::splat(0.6)), material));
    }
    let mut probe_textures = HashMap::new();
    probe_textures.insert(SKY_TEXTURE_ID, sky_cubemap(32, 1));
    ExtractedScene { meshes, probe_textures }
}

/// Ring of `count` lights around the boxes, rotated by `time` seconds. Every fourth is a spot.
pub fn demo_lights(count: usize, time: f32) -> Vec<ExtractedLight> {
    let mut lights = vec![ExtractedLight {
        kind: LightKind::Directional,
        local_to_world: Mat4::look_to_rh(Vec3::ZERO, Vec3::new(0.3, 0.8, 0.5), Vec3::Y)
            .inverse()
            .to_cols_array(),
        range: 0.0,
        color: [0.4, 0.4, 0.45],
        spot_angle: 0.0,
    }];
    for i in 0..count {
        let angle = i as f32 / count.max(1) as f32 * std::f32::consts::TAU + time * 0.5;
        let radius = 3.0 + (i % 4) as f32;
        let position = Vec3::new(angle.cos() * radius, 1.0 + (i % 3) as f32 * 0.5, angle.sin() * radius);
        let hue = i as f32 / count.max(1) as f32;
        let color = [
            (hue * std::f32::consts::TAU).cos() * 0.5 + 0.5,
            ((hue + 0.33) * std::f32::consts::TAU).cos() * 0.5 + 0.5,
            ((hue + 0.66) * std::f32::consts::TAU).cos() * 0.5 + 0.5,
        ];
        let spot = i % 4 == 0;
        // Spots face down toward the floor; +Z of the light transform is its forward.
        let local_to_world = if spot {
            Mat4::from_translation(position) * Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2)
        } else {
            Mat4::from_translation(position)
        };
        lights.push(ExtractedLight {
            kind: if spot { LightKind::Spot } else { LightKind::Point },
            local_to_world: local_to_world.to_cols_array(),
            range: 4.0,
            color: [color[0] * 4.0, color[1] * 4.0, color[2] * 4.0],
            spot_angle: 50.0,
        });
    }
    lights
}

pub fn demo_probe() -> ExtractedReflectionProbe {
    ExtractedReflectionProbe {
        bounds_center: [0.0, 1.0, 0.0],
        bounds_extents: [8.0, 4.0, 8.0],
        blend_distance: 2.0,
        texture_id: Some(SKY_TEXTURE_ID),
        active: true,
    }
}

/// Camera orbiting the scene at `time`, drawing the whole `size` output.
pub fn demo_view(size: (u32, u32), time: f32, light_count: usize, output: OutputTarget) -> ExtractedView {
    let (w, h) = (size.0.max(1), size.1.max(1));
    let eye = Vec3::new((time * 0.2).sin() * 9.0, 4.0, (time * 0.2).cos() * 9.0);
    let fov_y = 60.0f32;
    let (near, far) = (0.1, 100.0);
    ExtractedView {
        world_to_view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y).to_cols_array(),
        projection: Mat4::perspective_rh(fov_y.to_radians(), w as f32 / h as f32, near, far).to_cols_array(),
        fov_y,
        near,
        far,
        pixel_rect: (0, 0, w, h),
        viewport_size: (w, h),
        output,
        lights: demo_lights(light_count, time),
        reflection_probes: vec![demo_probe()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_outward_winding() {
        let (vertices, indices) = cube_mesh();
        let v: &[f32] = bytemuck::cast_slice(&vertices);
        let idx: &[u32] = bytemuck::cast_slice(&indices);
        assert_eq!(v.len(), 24 * 6);
        assert_eq!(idx.len(), 36);
        for tri in idx.chunks(3) {
            let p = |i: u32| Vec3::new(v[i as usize * 6], v[i as usize * 6 + 1], v[i as usize * 6 + 2]);
            let n = Vec3::new(v[tri[0] as usize * 6 + 3], v[tri[0] as usize * 6 + 4], v[tri[0] as usize * 6 + 5]);
            let face_normal = (p(tri[1]) - p(tri[0])).cross(p(tri[2]) - p(tri[0]));
            assert!(face_normal.dot(n) > 0.0);
        }
    }

    #[test]
    fn sky_cubemap_is_tightly_packed() {
        let sky = sky_cubemap(8, 3);
        assert_eq!(sky.data.len(), 8 * 8 * 6 * 4);
        assert_eq!(sky.layers, 6);
    }

    #[test]
    fn demo_view_has_one_directional_light() {
        let view = demo_view((640, 480), 0.0, 12, OutputTarget::Offscreen { flip_y: false });
        let directional = view.lights.iter().filter(|l| l.kind == LightKind::Directional).count();
        assert_eq!(directional, 1);
        assert_eq!(view.lights.len(), 13);
    }
}
