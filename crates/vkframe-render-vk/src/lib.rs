// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: a spinning cube behind a FRAME_LAG-deep fence/semaphore
//! protocol, with the swapchain rebuilt whenever the surface goes stale.

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};
use vkframe_render::{
    FrameDevice, FrameLoop, FrameStats, FrameStatus, LifecycleState, RecreateReason,
    RenderSettings, RenderSize, Renderer, VsyncMode,
};

mod commands;
mod context;
mod device;
mod geometry;
mod instance;
mod pipeline;
mod resources;
mod swapchain;
mod sync;

use context::VkContext;

pub struct VkRenderer {
    frames: FrameLoop,
    ctx: VkContext,
}

impl VkRenderer {
    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.frames.state()
    }

    /// Preferred present mode while vsync is on. Takes effect on the next frame.
    pub fn set_vsync_mode(&mut self, mode: VsyncMode) {
        if self.ctx.vsync_mode != mode {
            self.ctx.vsync_mode = mode;
            self.frames.invalidate(RecreateReason::Settings);
        }
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let mut frames = FrameLoop::new();
        let mut ctx = unsafe { VkContext::new(window, display, size, settings)? };
        frames.device_ready()?;
        let status = ctx.recreate_swapchain()?;
        frames.swapchain_created(status)?;
        info!("vk renderer ready ({})", frames.state());
        Ok(Self { frames, ctx })
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if self.ctx.requested != size {
            self.ctx.requested = size;
            self.frames.invalidate(RecreateReason::Resized);
        }
        Ok(())
    }

    fn render(&mut self) -> Result<FrameStatus> {
        self.frames.draw_frame(&mut self.ctx)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        self.ctx.set_clear_color(rgba)
    }

    fn set_vsync(&mut self, on: bool) -> Result<()> {
        if self.ctx.vsync != on {
            self.ctx.vsync = on;
            self.frames.invalidate(RecreateReason::Settings);
        }
        Ok(())
    }

    fn stats(&self) -> FrameStats {
        self.frames.stats()
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.frames.destroy() {
            warn!("renderer teardown: {e}");
        }
    }
}
