// SPDX-License-Identifier: CEPL-1.0
//! Command pools and the per-image command buffers.

use anyhow::{Context, Result};
use ash::vk;

use crate::device::QueueFamilies;
use crate::geometry::CUBE_VERTEX_COUNT;
use crate::resources::Buffer;

pub(crate) unsafe fn create_pool(device: &ash::Device, family: u32) -> Result<vk::CommandPool> {
    let ci = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    Ok(device.create_command_pool(&ci, None).context("vkCreateCommandPool")?)
}

pub(crate) unsafe fn allocate(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<vk::CommandBuffer>> {
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count as u32,
        ..Default::default()
    };
    Ok(device
        .allocate_command_buffers(&ai)
        .context("vkAllocateCommandBuffers")?)
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Queue-family ownership move of a presentable image, graphics to present.
/// The release half carries the color write, the acquire half has no access.
fn ownership_barrier(
    image: vk::Image,
    families: QueueFamilies,
    src_access_mask: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask,
        dst_access_mask: vk::AccessFlags::empty(),
        old_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        src_queue_family_index: families.graphics,
        dst_queue_family_index: families.present,
        image,
        subresource_range: COLOR_RANGE,
        ..Default::default()
    }
}

/// Inputs for one image's draw recording.
pub(crate) struct DrawTarget<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertices: &'a Buffer,
    pub clear_color: [f32; 4],
    pub image: vk::Image,
    /// Set when present happens on another family; appends the release barrier.
    pub release_to: Option<QueueFamilies>,
}

pub(crate) unsafe fn record_draw(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    t: &DrawTarget<'_>,
) -> Result<()> {
    device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
    };
    device.begin_command_buffer(cmd, &begin)?;

    let clears = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: t.clear_color,
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];
    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: t.extent,
    };
    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: t.render_pass,
        framebuffer: t.framebuffer,
        render_area,
        clear_value_count: clears.len() as u32,
        p_clear_values: clears.as_ptr(),
        ..Default::default()
    };
    device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, t.pipeline);
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: t.extent.width as f32,
        height: t.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
    device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&render_area));
    device.cmd_bind_descriptor_sets(
        cmd,
        vk::PipelineBindPoint::GRAPHICS,
        t.pipeline_layout,
        0,
        std::slice::from_ref(&t.descriptor_set),
        &[],
    );
    device.cmd_bind_vertex_buffers(cmd, 0, &[t.vertices.buffer], &[0]);
    device.cmd_draw(cmd, CUBE_VERTEX_COUNT, 1, 0, 0);

    device.cmd_end_render_pass(cmd);

    if let Some(families) = t.release_to {
        let barrier = ownership_barrier(t.image, families, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&barrier),
        );
    }

    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Acquire half of the ownership transfer, recorded once per image on the
/// present-queue pool.
pub(crate) unsafe fn record_ownership(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    families: QueueFamilies,
) -> Result<()> {
    device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::SIMULTANEOUS_USE,
        ..Default::default()
    };
    device.begin_command_buffer(cmd, &begin)?;
    let barrier = ownership_barrier(image, families, vk::AccessFlags::empty());
    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
    device.end_command_buffer(cmd)?;
    Ok(())
}
