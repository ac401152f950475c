// SPDX-License-Identifier: CEPL-1.0
//! Buffers, memory, depth attachment and descriptor plumbing.

use anyhow::{anyhow, Context, Result};
use ash::vk;

use crate::device::Gpu;

pub(crate) fn find_memory_type(
    mem: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..mem.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0 && mem.memory_types[i as usize].property_flags.contains(req)
    })
}

/// Fills `partial` in place. If that fails, `release` gets the half-built
/// value before the error is returned, so it must accept null handles.
pub(crate) fn build_or_release<T>(
    mut partial: T,
    fill: impl FnOnce(&mut T) -> Result<()>,
    release: impl FnOnce(&mut T),
) -> Result<T> {
    match fill(&mut partial) {
        Ok(()) => Ok(partial),
        Err(e) => {
            release(&mut partial);
            Err(e)
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Buffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Buffer {
    pub unsafe fn new(
        gpu: &Gpu,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let device = &gpu.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = device.create_buffer(&bci, None).context("vkCreateBuffer")?;
        let partial = Self {
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
        };
        build_or_release(
            partial,
            |b| {
                let req = device.get_buffer_memory_requirements(b.buffer);
                let memory_type_index =
                    find_memory_type(&gpu.mem_props, req.memory_type_bits, props)
                        .ok_or_else(|| anyhow!("no memory type for buffer ({props:?})"))?;
                let mai = vk::MemoryAllocateInfo {
                    s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                    allocation_size: req.size,
                    memory_type_index,
                    ..Default::default()
                };
                b.memory = device.allocate_memory(&mai, None).context("vkAllocateMemory")?;
                device
                    .bind_buffer_memory(b.buffer, b.memory, 0)
                    .context("vkBindBufferMemory")?;
                Ok(())
            },
            |b| b.destroy(device),
        )
    }

    /// Copy `bytes` into host-visible, host-coherent memory.
    pub unsafe fn write(&self, device: &ash::Device, bytes: &[u8]) -> Result<()> {
        debug_assert!(bytes.len() as vk::DeviceSize <= self.size);
        let ptr = device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
            .context("vkMapMemory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        device.unmap_memory(self.memory);
        Ok(())
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

/// Device-local buffer filled through a one-shot staging copy on the graphics queue.
pub(crate) unsafe fn upload_device_local(
    gpu: &Gpu,
    pool: vk::CommandPool,
    usage: vk::BufferUsageFlags,
    bytes: &[u8],
) -> Result<Buffer> {
    let device = &gpu.device;
    let size = bytes.len() as vk::DeviceSize;
    let mut staging = Buffer::default();
    let mut cmd = vk::CommandBuffer::null();

    let uploaded = (|| -> Result<Buffer> {
        staging = Buffer::new(
            gpu,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write(device, bytes)?;

        let dst = Buffer::new(
            gpu,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        build_or_release(
            dst,
            |dst| {
                let ai = vk::CommandBufferAllocateInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                    command_pool: pool,
                    level: vk::CommandBufferLevel::PRIMARY,
                    command_buffer_count: 1,
                    ..Default::default()
                };
                cmd = device.allocate_command_buffers(&ai)?[0];
                let bi = vk::CommandBufferBeginInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                    flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                    ..Default::default()
                };
                device.begin_command_buffer(cmd, &bi)?;
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                };
                device.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
                device.end_command_buffer(cmd)?;

                let si = vk::SubmitInfo {
                    s_type: vk::StructureType::SUBMIT_INFO,
                    command_buffer_count: 1,
                    p_command_buffers: &cmd,
                    ..Default::default()
                };
                device
                    .queue_submit(gpu.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())
                    .context("vkQueueSubmit (staging)")?;
                device.queue_wait_idle(gpu.graphics_queue)?;
                Ok(())
            },
            |dst| dst.destroy(device),
        )
    })();

    if cmd != vk::CommandBuffer::null() {
        device.free_command_buffers(pool, std::slice::from_ref(&cmd));
    }
    staging.destroy(device);
    uploaded
}

pub(crate) unsafe fn pick_depth_format(instance: &ash::Instance, phys: vk::PhysicalDevice) -> vk::Format {
    [
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D16_UNORM,
    ]
    .into_iter()
    .find(|&fmt| {
        instance
            .get_physical_device_format_properties(phys, fmt)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    // D16 support is mandatory
    .unwrap_or(vk::Format::D16_UNORM)
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DepthBuffer {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl DepthBuffer {
    pub unsafe fn new(gpu: &Gpu, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let device = &gpu.device;
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = device.create_image(&img_ci, None).context("vkCreateImage (depth)")?;
        let partial = Self {
            image,
            ..Default::default()
        };
        build_or_release(
            partial,
            |d| {
                let req = device.get_image_memory_requirements(d.image);
                let memory_type_index = find_memory_type(
                    &gpu.mem_props,
                    req.memory_type_bits,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )
                .or_else(|| {
                    find_memory_type(&gpu.mem_props, req.memory_type_bits, vk::MemoryPropertyFlags::empty())
                })
                .ok_or_else(|| anyhow!("no memory type for depth image"))?;
                let alloc = vk::MemoryAllocateInfo {
                    s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                    allocation_size: req.size,
                    memory_type_index,
                    ..Default::default()
                };
                d.memory = device.allocate_memory(&alloc, None)?;
                device.bind_image_memory(d.image, d.memory, 0)?;

                let view_ci = vk::ImageViewCreateInfo {
                    s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                    image: d.image,
                    view_type: vk::ImageViewType::TYPE_2D,
                    format,
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::DEPTH,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                };
                d.view = device.create_image_view(&view_ci, None)?;
                Ok(())
            },
            |d| d.destroy(device),
        )
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

/// Set 0, binding 0: the vertex-stage uniform block.
pub(crate) unsafe fn create_uniform_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding {
        binding: 0,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    };
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: 1,
        p_bindings: &binding,
        ..Default::default()
    };
    Ok(device.create_descriptor_set_layout(&ci, None)?)
}

/// One descriptor set per uniform buffer, all from a fresh pool.
pub(crate) unsafe fn create_uniform_sets(
    device: &ash::Device,
    layout: vk::DescriptorSetLayout,
    uniforms: &[Buffer],
) -> Result<(vk::DescriptorPool, Vec<vk::DescriptorSet>)> {
    let count = uniforms.len() as u32;
    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: count,
    }];
    let pool_ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets: count,
        pool_size_count: pool_sizes.len() as u32,
        p_pool_sizes: pool_sizes.as_ptr(),
        ..Default::default()
    };
    let pool = device
        .create_descriptor_pool(&pool_ci, None)
        .context("vkCreateDescriptorPool")?;

    let layouts = vec![layout; uniforms.len()];
    let alloc = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: count,
        p_set_layouts: layouts.as_ptr(),
        ..Default::default()
    };
    let sets = device.allocate_descriptor_sets(&alloc)?;

    let infos: Vec<vk::DescriptorBufferInfo> = uniforms
        .iter()
        .map(|u| vk::DescriptorBufferInfo {
            buffer: u.buffer,
            offset: 0,
            range: u.size,
        })
        .collect();
    let writes: Vec<vk::WriteDescriptorSet> = sets
        .iter()
        .zip(&infos)
        .map(|(&dst_set, info)| vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: info,
            ..Default::default()
        })
        .collect();
    device.update_descriptor_sets(&writes, &[]);

    Ok((pool, sets))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            p.memory_types[i].property_flags = f;
        }
        p
    }

    #[test]
    fn picks_first_type_with_all_required_flags() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let want = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&p, 0b111, want), Some(2));
        assert_eq!(find_memory_type(&p, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE), Some(1));
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Handles {
        buffer: u64,
        memory: u64,
    }

    #[test]
    fn failed_fill_releases_what_was_created() {
        let mut released = Vec::new();
        let res = build_or_release(
            Handles {
                buffer: 7,
                memory: 0,
            },
            |h| {
                h.memory = 9;
                Err(anyhow!("vkBindBufferMemory"))
            },
            |h| released.push(*h),
        );
        assert_eq!(res.unwrap_err().to_string(), "vkBindBufferMemory");
        assert_eq!(
            released,
            vec![Handles {
                buffer: 7,
                memory: 9
            }]
        );
    }

    #[test]
    fn failure_before_allocation_releases_only_the_first_handle() {
        let mut released = Vec::new();
        let res = build_or_release(
            Handles {
                buffer: 7,
                memory: 0,
            },
            |_| Err(anyhow!("vkAllocateMemory")),
            |h| released.push(*h),
        );
        assert!(res.is_err());
        assert_eq!(released, vec![Handles { buffer: 7, memory: 0 }]);
    }

    #[test]
    fn successful_fill_releases_nothing() {
        let mut released = 0;
        let built = build_or_release(
            Handles::default(),
            |h| {
                h.buffer = 1;
                h.memory = 2;
                Ok(())
            },
            |_| released += 1,
        )
        .unwrap();
        assert_eq!(built, Handles { buffer: 1, memory: 2 });
        assert_eq!(released, 0);
    }

    #[test]
    fn respects_type_bits() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(find_memory_type(&p, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(1));
        assert_eq!(find_memory_type(&p, 0b00, vk::MemoryPropertyFlags::DEVICE_LOCAL), None);
    }
}
