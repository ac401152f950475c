// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod error;
mod frame;
mod lifecycle;
mod protocol;

pub use error::RenderError;
pub use frame::{FrameSlot, PerFrame, FRAME_LAG};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use protocol::{
    AcquireOutcome, FrameDevice, FrameLoop, FrameStats, FrameStatus, PresentOutcome,
    RecreateReason, SwapchainStatus,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-area surface cannot back a swapchain.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Present mode preference when vsync is on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VsyncMode {
    #[default]
    Fifo,
    Mailbox,
}

#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub app_name: String,
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub validation: bool,
    /// Cube rotation per presented frame.
    pub spin_degrees_per_frame: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            app_name: "vkframe".into(),
            clear_color: [0.2, 0.2, 0.2, 1.0],
            vsync: true,
            vsync_mode: VsyncMode::Fifo,
            validation: cfg!(debug_assertions),
            spin_degrees_per_frame: 1.0,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<FrameStatus>;
    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()>;
    fn set_vsync(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }
    fn stats(&self) -> FrameStats;
}
