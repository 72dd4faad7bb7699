//! Split-sum GGX environment BRDF: `(scale, bias)` applied to F0 as `F0 * scale + bias`, indexed by
//! (N.V, roughness). Integrated once on the CPU and uploaded as an Rg16Float texture.

use glam::Vec3;
use half::f16;

pub const BRDF_LUT_SIZE: u32 = 64;
const SAMPLE_COUNT: u32 = 256;

fn radical_inverse_vdc(mut bits: u32) -> f32 {
    bits = bits.rotate_right(16);
    bits = ((bits & 0x5555_5555) << 1) | ((bits & 0xAAAA_AAAA) >> 1);
    bits = ((bits & 0x3333_3333) << 2) | ((bits & 0xCCCC_CCCC) >> 2);
    bits = ((bits & 0x0F0F_0F0F) << 4) | ((bits & 0xF0F0_F0F0) >> 4);
    bits = ((bits & 0x00FF_00FF) << 8) | ((bits & 0xFF00_FF00) >> 8);
    bits as f32 * 2.328_306_4e-10
}

fn hammersley(i: u32, n: u32) -> (f32, f32) {
    (i as f32 / n as f32, radical_inverse_vdc(i))
}

/// GGX half vector around +Z.
fn importance_sample_ggx(xi: (f32, f32), roughness: f32) -> Vec3 {
    let a = roughness * roughness;
    let phi = 2.0 * std::f32::consts::PI * xi.0;
    let cos_theta = ((1.0 - xi.1) / (1.0 + (a * a - 1.0) * xi.1)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta)
}

fn geometry_smith_ibl(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let k = roughness * roughness / 2.0;
    let g1 = |x: f32| x / (x * (1.0 - k) + k);
    g1(n_dot_v) * g1(n_dot_l)
}

/// `(scale, bias)` for one (N.V, roughness) pair.
pub fn integrate_brdf(n_dot_v: f32, roughness: f32) -> (f32, f32) {
    let n_dot_v = n_dot_v.max(1e-4);
    let v = Vec3::new((1.0 - n_dot_v * n_dot_v).max(0.0).sqrt(), 0.0, n_dot_v);
    let mut scale = 0.0;
    let mut bias = 0.0;
    for i in 0..SAMPLE_COUNT {
        let h = importance_sample_ggx(hammersley(i, SAMPLE_COUNT), roughness);
        let l = 2.0 * v.dot(h) * h - v;
        let n_dot_l = l.z;
        if n_dot_l <= 0.0 {
            continue;
        }
        let n_dot_h = h.z.max(0.0);
        let v_dot_h = v.dot(h).max(0.0);
        let g_vis = geometry_smith_ibl(n_dot_v, n_dot_l, roughness) * v_dot_h / (n_dot_h * n_dot_v).max(1e-6);
        let fc = (1.0 - v_dot_h).powi(5);
        scale += (1.0 - fc) * g_vis;
        bias += fc * g_vis;
    }
    (scale / SAMPLE_COUNT as f32, bias / SAMPLE_COUNT as f32)
}

/// Row-major texels: x is N.V, y is roughness, both sampled at texel centers.
pub fn compute_brdf_lut(size: u32) -> Vec<[f16; 2]> {
    let mut texels = Vec::with_capacity((size * size) as usize);
    for y in 0..size {
        let roughness = (y as f32 + 0.5) / size as f32;
        for x in 0..size {
            let n_dot_v = (x as f32 + 0.5) / size as f32;
            let (scale, bias) = integrate_brdf(n_dot_v, roughness);
            texels.push([f16::from_f32(scale), f16::from_f32(bias)]);
        }
    }
    texels
}

pub struct PreIntegratedBrdf {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl PreIntegratedBrdf {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let size = BRDF_LUT_SIZE;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("brdf_lut"),
            size: wgpu::Extent3d { width: size, height: size, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rg16Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let texels = compute_brdf_lut(size);
        let bits: Vec<u16> = texels.iter().flat_map(|t| [t[0].to_bits(), t[1].to_bits()]).collect();
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&bits),
            wgpu::ImageDataLayout { offset: 0, bytes_per_row: Some(size * 4), rows_per_image: Some(size) },
            wgpu::Extent3d { width: size, height: size, depth_or_array_layers: 1 },
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { _texture: texture, view }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hammersley_covers_unit_square() {
        assert_eq!(hammersley(0, 4), (0.0, 0.0));
        assert!((hammersley(1, 4).1 - 0.5).abs() < 1e-6);
        assert!((hammersley(2, 4).1 - 0.25).abs() < 1e-6);
    }

    #[test]
    fn lut_values_stay_in_unit_range() {
        let lut = compute_brdf_lut(16);
        assert_eq!(lut.len(), 256);
        for texel in &lut {
            let (scale, bias) = (texel[0].to_f32(), texel[1].to_f32());
            assert!((0.0..=1.0).contains(&scale), "scale {scale}");
            assert!((0.0..=1.0).contains(&bias), "bias {bias}");
            assert!(scale + bias <= 1.01);
        }
    }

    #[test]
    fn smooth_head_on_reflection_keeps_energy() {
        let (scale, bias) = integrate_brdf(1.0, 0.05);
        assert!(scale + bias > 0.9, "{scale} + {bias}");
    }

    #[test]
    fn rough_surfaces_lose_energy() {
        let (smooth_a, smooth_b) = integrate_brdf(0.5, 0.1);
        let (rough_a, rough_b) = integrate_brdf(0.5, 1.0);
        assert!(rough_a + rough_b < smooth_a + smooth_b);
    }
}
