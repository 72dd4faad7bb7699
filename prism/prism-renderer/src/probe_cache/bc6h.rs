//! BC6H compression of a convolved probe into the cache array: compute encode into a staging
//! buffer, then a buffer-to-texture copy per mip.

use bytemuck::{Pod, Zeroable};

use crate::cubemap_filter::align_to;
use crate::kernels::{Kernel, KernelRegistry};

const BLOCK_BYTES: u64 = 16;
const FACES: u32 = 6;
const WORKGROUP: u32 = 8;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
struct EncodeParams {
    mip_size: u32,
    blocks_x: u32,
    blocks_y: u32,
    row_pitch_blocks: u32,
    base_block: u32,
    _pad: [u32; 3],
}

/// Placement of one mip's blocks in the staging buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MipBlocks {
    pub mip_size: u32,
    pub blocks_x: u32,
    pub blocks_y: u32,
    /// Row pitch in bytes; a multiple of the copy row alignment.
    pub bytes_per_row: u32,
    pub offset: u64,
}

impl MipBlocks {
    /// Copy extent of one face: the mip rounded up to whole blocks.
    pub fn physical_size(&self) -> u32 {
        self.blocks_x * 4
    }
}

/// Staging layout of every mip of a 6-face BC6H cube.
pub fn block_layout(resolution: u32, mip_count: u32) -> (Vec<MipBlocks>, u64) {
    let mut mips = Vec::with_capacity(mip_count as usize);
    let mut offset = 0u64;
    for mip in 0..mip_count {
        let mip_size = (resolution >> mip).max(1);
        let blocks = mip_size.div_ceil(4);
        let bytes_per_row = align_to(blocks as u64 * BLOCK_BYTES, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64) as u32;
        mips.push(MipBlocks { mip_size, blocks_x: blocks, blocks_y: blocks, bytes_per_row, offset });
        offset += bytes_per_row as u64 * blocks as u64 * FACES as u64;
    }
    (mips, offset)
}

pub struct Bc6hEncoder {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buf: wgpu::Buffer,
    params_stride: u64,
    output: wgpu::Buffer,
    mips: Vec<MipBlocks>,
}

impl Bc6hEncoder {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        kernels: &KernelRegistry,
        resolution: u32,
        mip_count: u32,
    ) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("bc6h_encode_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<EncodeParams>() as u64),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("bc6h_encode_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("bc6h_encode_pipeline"),
            layout: Some(&layout),
            module: kernels.module(Kernel::Bc6hEncode),
            entry_point: Some("encode_bc6h"),
            compilation_options: Default::default(),
            cache: None,
        });

        let (mips, total_bytes) = block_layout(resolution, mip_count);
        let output = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("bc6h_blocks"),
            size: total_bytes.max(BLOCK_BYTES),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let params_stride = align_to(
            std::mem::size_of::<EncodeParams>() as u64,
            device.limits().min_uniform_buffer_offset_alignment as u64,
        );
        let mut blocks = vec![0u8; (params_stride * mips.len().max(1) as u64) as usize];
        for (i, mip) in mips.iter().enumerate() {
            let params = EncodeParams {
                mip_size: mip.mip_size,
                blocks_x: mip.blocks_x,
                blocks_y: mip.blocks_y,
                row_pitch_blocks: (mip.bytes_per_row as u64 / BLOCK_BYTES) as u32,
                base_block: (mip.offset / BLOCK_BYTES) as u32,
                _pad: [0; 3],
            };
            let offset = (params_stride * i as u64) as usize;
            blocks[offset..offset + std::mem::size_of::<EncodeParams>()].copy_from_slice(bytemuck::bytes_of(&params));
        }
        let params_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("bc6h_encode_params"),
            size: blocks.len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&params_buf, 0, &blocks);

        Self { pipeline, bind_group_layout, params_buf, params_stride, output, mips }
    }

    /// Encode every mip of `source` (6-layer, working format) into the cube at `slot` of `cache`.
    pub fn encode(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Texture,
        cache: &wgpu::Texture,
        slot: u32,
    ) {
        for (i, mip) in self.mips.iter().enumerate() {
            let view = source.create_view(&wgpu::TextureViewDescriptor {
                label: Some("bc6h_encode_source"),
                dimension: Some(wgpu::TextureViewDimension::D2Array),
                base_mip_level: i as u32,
                mip_level_count: Some(1),
                ..Default::default()
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("bc6h_encode_bind_group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &self.params_buf,
                            offset: 0,
                            size: wgpu::BufferSize::new(std::mem::size_of::<EncodeParams>() as u64),
                        }),
                    },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&view) },
                    wgpu::BindGroupEntry { binding: 2, resource: self.output.as_entire_binding() },
                ],
            });
            let mut cp = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("bc6h_encode"),
                timestamp_writes: None,
            });
            cp.set_pipeline(&self.pipeline);
            cp.set_bind_group(0, &bind_group, &[(self.params_stride * i as u64) as u32]);
            cp.dispatch_workgroups(mip.blocks_x.div_ceil(WORKGROUP), mip.blocks_y.div_ceil(WORKGROUP), FACES);
        }

        for (i, mip) in self.mips.iter().enumerate() {
            encoder.copy_buffer_to_texture(
                wgpu::ImageCopyBuffer {
                    buffer: &self.output,
                    layout: wgpu::ImageDataLayout {
                        offset: mip.offset,
                        bytes_per_row: Some(mip.bytes_per_row),
                        rows_per_image: Some(mip.blocks_y),
                    },
                },
                wgpu::ImageCopyTexture {
                    texture: cache,
                    mip_level: i as u32,
                    origin: wgpu::Origin3d { x: 0, y: 0, z: slot * FACES },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: mip.physical_size(),
                    height: mip.physical_size(),
                    depth_or_array_layers: FACES,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_copy_aligned() {
        let (mips, total) = block_layout(128, 7);
        assert_eq!(mips.len(), 7);
        // 128 px -> 32 blocks -> 512 bytes per row, already aligned.
        assert_eq!(mips[0].bytes_per_row, 512);
        assert_eq!(mips[0].blocks_y, 32);
        // 32 px -> 8 blocks -> 128 bytes, padded to 256.
        assert_eq!(mips[2].bytes_per_row, 256);
        for mip in &mips {
            assert_eq!(mip.bytes_per_row % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);
            assert_eq!(mip.offset % BLOCK_BYTES, 0);
        }
        let last = mips[6];
        assert_eq!(total, last.offset + last.bytes_per_row as u64 * last.blocks_y as u64 * 6);
    }

    #[test]
    fn small_mips_round_up_to_one_block() {
        let (mips, _) = block_layout(128, 7);
        // 2x2 texels still occupy a full 4x4 block.
        assert_eq!(mips[6].mip_size, 2);
        assert_eq!(mips[6].blocks_x, 1);
        assert_eq!(mips[6].physical_size(), 4);
    }

    #[test]
    fn params_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<EncodeParams>(), 32);
    }
}
