// SPDX-License-Identifier: CEPL-1.0
//! Swapchain parameter choice and the swapchain-scoped resource bundle.

use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::info;
use vkframe_render::{RenderSize, VsyncMode};

use crate::resources::{Buffer, DepthBuffer};

/// A lone `UNDEFINED` entry means the surface has no preference.
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    const PREFERRED: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    match formats {
        [] => PREFERRED,
        [only] if only.format == vk::Format::UNDEFINED => vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: only.color_space,
        },
        _ => formats
            .iter()
            .copied()
            .find(|f| *f == PREFERRED)
            .unwrap_or(formats[0]),
    }
}

pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VsyncMode,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ],
        (true, VsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX],
        (true, VsyncMode::Fifo) => &[],
    };
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `u32::MAX` in `current_extent` means the window decides.
pub(crate) fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub(crate) fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

pub(crate) fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

pub(crate) fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&a| supported.contains(a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct SwapchainParams {
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
}

pub(crate) struct NewSwapchain {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub images: Vec<vk::Image>,
}

/// Create a swapchain for a known non-zero `extent`, retiring `old` (which
/// the caller still destroys).
pub(crate) unsafe fn create_swapchain(
    surface_loader: &surface::Instance,
    swapchain_loader: &swapchain::Device,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    caps: &vk::SurfaceCapabilitiesKHR,
    extent: vk::Extent2D,
    params: SwapchainParams,
    old: vk::SwapchainKHR,
) -> Result<NewSwapchain> {
    let formats = surface_loader
        .get_physical_device_surface_formats(phys, surface)
        .context("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
    let modes = surface_loader
        .get_physical_device_surface_present_modes(phys, surface)
        .context("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

    let format = choose_surface_format(&formats);
    let present_mode = choose_present_mode(&modes, params.vsync, params.vsync_mode);
    let min_image_count = image_count(caps);
    let pre_transform = choose_pre_transform(caps);
    let composite_alpha = choose_composite_alpha(caps.supported_composite_alpha);

    info!(
        "swapchain: {}x{} {:?}/{:?} {:?} vsync={} ({:?}) images>={} transform={:?} alpha={:?}",
        extent.width,
        extent.height,
        format.format,
        format.color_space,
        present_mode,
        params.vsync,
        params.vsync_mode,
        min_image_count,
        pre_transform,
        composite_alpha
    );

    // Exclusive even with a separate present queue: ownership moves by barrier.
    let info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface,
        min_image_count,
        image_format: format.format,
        image_color_space: format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: vk::SharingMode::EXCLUSIVE,
        pre_transform,
        composite_alpha,
        present_mode,
        clipped: vk::TRUE,
        old_swapchain: old,
        ..Default::default()
    };
    let swapchain = swapchain_loader
        .create_swapchain(&info, None)
        .context("vkCreateSwapchainKHR")?;
    let images = match swapchain_loader.get_swapchain_images(swapchain) {
        Ok(images) => images,
        Err(e) => {
            swapchain_loader.destroy_swapchain(swapchain, None);
            return Err(e).context("vkGetSwapchainImagesKHR");
        }
    };

    Ok(NewSwapchain {
        swapchain,
        format,
        extent,
        present_mode,
        images,
    })
}

pub(crate) unsafe fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let iv_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    Ok(device.create_image_view(&iv_info, None)?)
}

pub(crate) unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let fb_info = vk::FramebufferCreateInfo {
        s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
        render_pass,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        width: extent.width,
        height: extent.height,
        layers: 1,
        ..Default::default()
    };
    Ok(device
        .create_framebuffer(&fb_info, None)
        .context("vkCreateFramebuffer")?)
}

/// Everything tied to one presentable image.
pub(crate) struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
    pub draw_cmd: vk::CommandBuffer,
    /// Present-queue half of the ownership transfer; only with separate queues.
    pub ownership_cmd: Option<vk::CommandBuffer>,
    pub uniforms: Buffer,
    pub descriptor_set: vk::DescriptorSet,
}

impl SwapchainImage {
    /// Only the image handle; everything else is filled in during the build.
    pub fn blank(image: vk::Image) -> Self {
        Self {
            image,
            view: vk::ImageView::null(),
            framebuffer: vk::Framebuffer::null(),
            draw_cmd: vk::CommandBuffer::null(),
            ownership_cmd: None,
            uniforms: Buffer::default(),
            descriptor_set: vk::DescriptorSet::null(),
        }
    }
}

/// The swapchain and every object whose lifetime follows it.
pub(crate) struct SwapchainResources {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub depth: DepthBuffer,
    pub descriptor_pool: vk::DescriptorPool,
    pub images: Vec<SwapchainImage>,
}

impl SwapchainResources {
    /// Destroy everything except the swapchain handle, which is returned so
    /// it can be passed as `oldSwapchain` before being destroyed.
    /// The device must be idle.
    pub unsafe fn retire(
        self,
        device: &ash::Device,
        graphics_pool: vk::CommandPool,
        present_pool: Option<vk::CommandPool>,
    ) -> vk::SwapchainKHR {
        for img in &self.images {
            device.destroy_framebuffer(img.framebuffer, None);
        }
        device.destroy_descriptor_pool(self.descriptor_pool, None);
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.pipeline_layout, None);
        device.destroy_render_pass(self.render_pass, None);
        self.depth.destroy(device);

        let draw: Vec<_> = self.images.iter().map(|i| i.draw_cmd).collect();
        if !draw.is_empty() {
            device.free_command_buffers(graphics_pool, &draw);
        }
        if let Some(pool) = present_pool {
            let own: Vec<_> = self.images.iter().filter_map(|i| i.ownership_cmd).collect();
            if !own.is_empty() {
                device.free_command_buffers(pool, &own);
            }
        }
        for img in &self.images {
            img.uniforms.destroy(device);
            device.destroy_image_view(img.view, None);
        }
        self.swapchain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        }
    }

    #[test]
    fn undefined_format_means_no_preference() {
        let only = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(choose_surface_format(&only).format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn prefers_bgra_unorm_srgb_else_first() {
        let first = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let bgra = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[first, bgra]), bgra);
        assert_eq!(choose_surface_format(&[first]), first);
    }

    #[test]
    fn present_mode_follows_vsync_settings() {
        use ash::vk::PresentModeKHR as P;
        let all = [P::FIFO, P::MAILBOX, P::IMMEDIATE];
        assert_eq!(choose_present_mode(&all, true, VsyncMode::Fifo), P::FIFO);
        assert_eq!(choose_present_mode(&all, true, VsyncMode::Mailbox), P::MAILBOX);
        assert_eq!(choose_present_mode(&all, false, VsyncMode::Fifo), P::IMMEDIATE);

        let no_immediate = [P::FIFO, P::MAILBOX];
        assert_eq!(choose_present_mode(&no_immediate, false, VsyncMode::Fifo), P::MAILBOX);

        let fifo_only = [P::FIFO];
        assert_eq!(choose_present_mode(&fifo_only, true, VsyncMode::Mailbox), P::FIFO);
        assert_eq!(choose_present_mode(&fifo_only, false, VsyncMode::Mailbox), P::FIFO);
    }

    #[test]
    fn extent_uses_current_unless_sentinel() {
        let mut c = caps();
        let want = RenderSize::new(10_000, 0);
        assert_eq!(extent_from_caps(&c, want), c.current_extent);

        c.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let e = extent_from_caps(&c, want);
        assert_eq!((e.width, e.height), (4096, 1));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut c = caps();
        assert_eq!(image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(image_count(&c), 2);
        c.max_image_count = 0;
        c.min_image_count = 5;
        assert_eq!(image_count(&c), 6);
    }

    #[test]
    fn pre_transform_prefers_identity() {
        let mut c = caps();
        assert_eq!(choose_pre_transform(&c), vk::SurfaceTransformFlagsKHR::IDENTITY);
        c.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        c.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_pre_transform(&c), vk::SurfaceTransformFlagsKHR::ROTATE_90);
    }

    #[test]
    fn composite_alpha_takes_first_supported() {
        use ash::vk::CompositeAlphaFlagsKHR as A;
        assert_eq!(choose_composite_alpha(A::OPAQUE | A::INHERIT), A::OPAQUE);
        assert_eq!(choose_composite_alpha(A::POST_MULTIPLIED | A::INHERIT), A::POST_MULTIPLIED);
        assert_eq!(choose_composite_alpha(A::INHERIT), A::INHERIT);
    }
}
