// SPDX-License-Identifier: CEPL-1.0
//! Device-lifetime state and the Vulkan side of the frame protocol.

use std::path::PathBuf;

use anyhow::Result;
use ash::khr::swapchain;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};
use vkframe_render::{
    AcquireOutcome, FrameDevice, FrameSlot, PerFrame, PresentOutcome, RenderError, RenderSettings,
    RenderSize, SwapchainStatus, VsyncMode,
};

use crate::commands::{self, DrawTarget};
use crate::device::{pick_physical_device, Gpu};
use crate::geometry::{cube_vertices, spin_mvp, FrameUniforms};
use crate::instance::InstanceBundle;
use crate::pipeline;
use crate::resources::{self, Buffer, DepthBuffer};
use crate::swapchain::{
    create_color_view, create_framebuffer, create_swapchain, extent_from_caps, NewSwapchain,
    SwapchainImage, SwapchainParams, SwapchainResources,
};
use crate::sync::FrameSync;

fn backend(call: &'static str) -> impl FnOnce(vk::Result) -> RenderError {
    move |e| RenderError::Backend {
        call,
        detail: format!("{e:?}"),
    }
}

/// Everything that lives as long as the logical device, plus the current
/// swapchain bundle when one exists.
///
/// Handles start out null and are filled in during construction, so a
/// failure part-way through still tears down whatever was created.
pub(crate) struct VkContext {
    inst: InstanceBundle,
    gpu: Gpu,
    swapchain_loader: swapchain::Device,

    pipeline_cache: vk::PipelineCache,
    cache_path: PathBuf,
    set_layout: vk::DescriptorSetLayout,
    graphics_pool: vk::CommandPool,
    present_pool: Option<vk::CommandPool>,
    vertices: Buffer,
    depth_format: vk::Format,
    frames: PerFrame<FrameSync>,

    swapchain: Option<SwapchainResources>,

    pub requested: RenderSize,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    clear_color: [f32; 4],
    angle: f32,
    spin_step: f32,
}

impl VkContext {
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let mut inst = InstanceBundle::new(window, display, &settings.app_name, settings.validation)?;
        let gpu = match pick_physical_device(&inst.instance, &inst.surface_loader, inst.surface)
            .and_then(|(phys, families)| Gpu::new(&inst.instance, phys, families))
        {
            Ok(gpu) => gpu,
            Err(e) => {
                inst.destroy();
                return Err(e);
            }
        };
        let swapchain_loader = swapchain::Device::new(&inst.instance, &gpu.device);
        let depth_format = resources::pick_depth_format(&inst.instance, gpu.phys);
        let cache_path = pipeline::pipeline_cache_path(&std::env::temp_dir(), &gpu.props);

        let mut ctx = Self {
            inst,
            gpu,
            swapchain_loader,
            pipeline_cache: vk::PipelineCache::null(),
            cache_path,
            set_layout: vk::DescriptorSetLayout::null(),
            graphics_pool: vk::CommandPool::null(),
            present_pool: None,
            vertices: Buffer::default(),
            depth_format,
            frames: PerFrame::new(|_| FrameSync::default()),
            swapchain: None,
            requested: size,
            vsync: settings.vsync,
            vsync_mode: settings.vsync_mode,
            clear_color: settings.clear_color,
            angle: 0.0,
            spin_step: settings.spin_degrees_per_frame,
        };
        ctx.create_device_objects()?;
        debug!("depth format {:?}, pipeline cache {}", depth_format, ctx.cache_path.display());
        Ok(ctx)
    }

    unsafe fn create_device_objects(&mut self) -> Result<()> {
        let device = &self.gpu.device;
        let families = self.gpu.families;

        self.pipeline_cache = pipeline::create_or_load_pipeline_cache(device, &self.cache_path)?;
        self.set_layout = resources::create_uniform_set_layout(device)?;
        self.graphics_pool = commands::create_pool(device, families.graphics)?;
        if families.separate_present() {
            self.present_pool = Some(commands::create_pool(device, families.present)?);
        }

        let verts = cube_vertices();
        self.vertices = resources::upload_device_local(
            &self.gpu,
            self.graphics_pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&verts),
        )?;

        for slot in FrameSlot::all() {
            self.frames[slot] = FrameSync::new(device, families.separate_present())?;
        }
        Ok(())
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        self.clear_color = rgba;
        if self.swapchain.is_none() {
            return Ok(());
        }
        unsafe {
            self.gpu
                .device
                .device_wait_idle()
                .map_err(backend("vkDeviceWaitIdle"))?;
            self.record_all()
        }
    }

    fn resources(&self) -> Result<&SwapchainResources> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no swapchain"))
    }

    fn image(&self, image: u32) -> Result<&SwapchainImage> {
        let res = self.resources()?;
        res.images.get(image as usize).ok_or_else(|| {
            RenderError::ImageOutOfRange {
                index: image,
                count: res.images.len(),
            }
            .into()
        })
    }

    /// Idle the device, drop the old swapchain bundle and build a new one
    /// for the current surface extent.
    unsafe fn rebuild_swapchain(&mut self) -> Result<SwapchainStatus> {
        self.gpu
            .device
            .device_wait_idle()
            .map_err(backend("vkDeviceWaitIdle"))?;

        let old = match self.swapchain.take() {
            Some(res) => res.retire(&self.gpu.device, self.graphics_pool, self.present_pool),
            None => vk::SwapchainKHR::null(),
        };

        let caps = match self
            .inst
            .surface_loader
            .get_physical_device_surface_capabilities(self.gpu.phys, self.inst.surface)
        {
            Ok(caps) => caps,
            Err(e) => {
                self.swapchain_loader.destroy_swapchain(old, None);
                return Err(backend("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")(e).into());
            }
        };
        let extent = extent_from_caps(&caps, self.requested);
        if extent.width == 0 || extent.height == 0 || self.requested.is_empty() {
            self.swapchain_loader.destroy_swapchain(old, None);
            debug!("surface has zero extent; waiting for it to grow");
            return Ok(SwapchainStatus::Minimized);
        }

        let params = SwapchainParams {
            vsync: self.vsync,
            vsync_mode: self.vsync_mode,
        };
        let created = create_swapchain(
            &self.inst.surface_loader,
            &self.swapchain_loader,
            self.gpu.phys,
            self.inst.surface,
            &caps,
            extent,
            params,
            old,
        );
        // Retired either way once the create call has returned.
        self.swapchain_loader.destroy_swapchain(old, None);
        let res = self.build_resources(created?)?;
        let image_count = res.images.len();
        debug!(
            "swapchain ready: {image_count} images, {:?}, {}x{}",
            res.present_mode, res.extent.width, res.extent.height
        );
        self.swapchain = Some(res);
        self.record_all()?;
        Ok(SwapchainStatus::Ready { image_count })
    }

    unsafe fn build_resources(&self, new: NewSwapchain) -> Result<SwapchainResources> {
        let mut res = SwapchainResources {
            swapchain: new.swapchain,
            format: new.format,
            extent: new.extent,
            present_mode: new.present_mode,
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            depth: DepthBuffer::default(),
            descriptor_pool: vk::DescriptorPool::null(),
            images: new.images.iter().map(|&i| SwapchainImage::blank(i)).collect(),
        };
        match self.fill_resources(&mut res) {
            Ok(()) => Ok(res),
            Err(e) => {
                let sc = res.retire(&self.gpu.device, self.graphics_pool, self.present_pool);
                self.swapchain_loader.destroy_swapchain(sc, None);
                Err(e)
            }
        }
    }

    unsafe fn fill_resources(&self, res: &mut SwapchainResources) -> Result<()> {
        let device = &self.gpu.device;

        res.depth = DepthBuffer::new(&self.gpu, res.extent, self.depth_format)?;
        res.render_pass = pipeline::create_render_pass(device, res.format.format, self.depth_format)?;
        let (layout, pipe) =
            pipeline::create_cube_pipeline(device, self.pipeline_cache, res.render_pass, self.set_layout)?;
        res.pipeline_layout = layout;
        res.pipeline = pipe;

        let ubo_size = std::mem::size_of::<FrameUniforms>() as vk::DeviceSize;
        for img in &mut res.images {
            img.view = create_color_view(device, img.image, res.format.format)?;
            img.framebuffer =
                create_framebuffer(device, res.render_pass, &[img.view, res.depth.view], res.extent)?;
            img.uniforms = Buffer::new(
                &self.gpu,
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
        }

        let n = res.images.len();
        for (img, cmd) in res
            .images
            .iter_mut()
            .zip(commands::allocate(device, self.graphics_pool, n)?)
        {
            img.draw_cmd = cmd;
        }
        if let Some(pool) = self.present_pool {
            for (img, cmd) in res.images.iter_mut().zip(commands::allocate(device, pool, n)?) {
                img.ownership_cmd = Some(cmd);
            }
        }

        let uniforms: Vec<Buffer> = res.images.iter().map(|i| i.uniforms).collect();
        let (pool, sets) = resources::create_uniform_sets(device, self.set_layout, &uniforms)?;
        res.descriptor_pool = pool;
        for (img, set) in res.images.iter_mut().zip(sets) {
            img.descriptor_set = set;
        }
        Ok(())
    }

    /// Re-record every image's command buffers. The device must be idle.
    unsafe fn record_all(&self) -> Result<()> {
        let Some(res) = &self.swapchain else {
            return Ok(());
        };
        let device = &self.gpu.device;
        let families = self.gpu.families;
        let release_to = families.separate_present().then_some(families);
        for img in &res.images {
            let target = DrawTarget {
                render_pass: res.render_pass,
                framebuffer: img.framebuffer,
                extent: res.extent,
                pipeline: res.pipeline,
                pipeline_layout: res.pipeline_layout,
                descriptor_set: img.descriptor_set,
                vertices: &self.vertices,
                clear_color: self.clear_color,
                image: img.image,
                release_to,
            };
            commands::record_draw(device, img.draw_cmd, &target)?;
            if let Some(cmd) = img.ownership_cmd {
                commands::record_ownership(device, cmd, img.image, families)?;
            }
        }
        Ok(())
    }
}

impl FrameDevice for VkContext {
    fn wait_frame(&mut self, slot: FrameSlot) -> Result<()> {
        let fence = self.frames[slot].fence;
        unsafe {
            self.gpu
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
                .map_err(backend("vkWaitForFences"))?;
        }
        Ok(())
    }

    fn reset_frame(&mut self, slot: FrameSlot) -> Result<()> {
        let fence = self.frames[slot].fence;
        unsafe {
            self.gpu
                .device
                .reset_fences(&[fence])
                .map_err(backend("vkResetFences"))?;
        }
        Ok(())
    }

    fn acquire_next_image(&mut self, slot: FrameSlot) -> Result<AcquireOutcome> {
        let Some(res) = &self.swapchain else {
            return Ok(AcquireOutcome::OutOfDate);
        };
        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                res.swapchain,
                u64::MAX,
                self.frames[slot].image_acquired,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image, suboptimal)) => Ok(AcquireOutcome::Acquired { image, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(backend("vkAcquireNextImageKHR")(e).into()),
        }
    }

    fn update_frame_data(&mut self, image: u32, _slot: FrameSlot) -> Result<()> {
        self.angle = (self.angle + self.spin_step) % 360.0;
        let extent = self.resources()?.extent;
        let ubo = FrameUniforms::from_mvp(spin_mvp(self.angle, extent.width, extent.height));
        let img = self.image(image)?;
        unsafe { img.uniforms.write(&self.gpu.device, bytemuck::bytes_of(&ubo)) }
    }

    fn submit_frame(&mut self, image: u32, slot: FrameSlot) -> Result<()> {
        let cmd = self.image(image)?.draw_cmd;
        let sync = &self.frames[slot];
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.image_acquired,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &sync.draw_complete,
            ..Default::default()
        };
        unsafe {
            self.gpu
                .device
                .queue_submit(self.gpu.graphics_queue, std::slice::from_ref(&si), sync.fence)
                .map_err(backend("vkQueueSubmit"))?;
        }
        Ok(())
    }

    fn separate_present_queue(&self) -> bool {
        self.gpu.families.separate_present()
    }

    fn submit_ownership_transfer(&mut self, image: u32, slot: FrameSlot) -> Result<()> {
        let Some(cmd) = self.image(image)?.ownership_cmd else {
            return Ok(());
        };
        let sync = &self.frames[slot];
        let Some(ownership) = sync.image_ownership else {
            return Ok(());
        };
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.draw_complete,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &ownership,
            ..Default::default()
        };
        unsafe {
            self.gpu
                .device
                .queue_submit(self.gpu.present_queue, std::slice::from_ref(&si), vk::Fence::null())
                .map_err(backend("vkQueueSubmit (ownership)"))?;
        }
        Ok(())
    }

    fn present(&mut self, image: u32, slot: FrameSlot) -> Result<PresentOutcome> {
        let swapchain = self.resources()?.swapchain;
        let wait = self.frames[slot].present_wait();
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image,
            ..Default::default()
        };
        let presented = unsafe { self.swapchain_loader.queue_present(self.gpu.present_queue, &info) };
        match presented {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(backend("vkQueuePresentKHR")(e).into()),
        }
    }

    fn recreate_swapchain(&mut self) -> Result<SwapchainStatus> {
        unsafe { self.rebuild_swapchain() }
    }
}

impl Drop for VkContext {
    fn drop(&mut self) {
        unsafe {
            let d = &self.gpu.device;
            d.device_wait_idle().ok();

            if let Some(res) = self.swapchain.take() {
                let sc = res.retire(d, self.graphics_pool, self.present_pool);
                self.swapchain_loader.destroy_swapchain(sc, None);
            }
            for sync in self.frames.values() {
                sync.destroy(d);
            }
            self.vertices.destroy(d);
            if let Some(pool) = self.present_pool.take() {
                d.destroy_command_pool(pool, None);
            }
            d.destroy_command_pool(self.graphics_pool, None);
            d.destroy_descriptor_set_layout(self.set_layout, None);

            if self.pipeline_cache != vk::PipelineCache::null() {
                match pipeline::save_pipeline_cache(d, self.pipeline_cache, &self.cache_path) {
                    Ok(()) => debug!("pipeline cache saved to {}", self.cache_path.display()),
                    Err(e) => warn!("pipeline cache not saved: {e:#}"),
                }
                d.destroy_pipeline_cache(self.pipeline_cache, None);
            }

            self.gpu.destroy();
            self.inst.destroy();
        }
        info!("vk context destroyed");
    }
}
