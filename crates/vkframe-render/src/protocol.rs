// SPDX-License-Identifier: CEPL-1.0
//! The per-frame fence/semaphore protocol, independent of any graphics API.
//!
//! [`FrameLoop`] decides *when* each step happens; a [`FrameDevice`] does the
//! actual waiting, acquiring, submitting and presenting. Per frame:
//!
//! 1. wait on the slot's fence (the GPU has finished the frame that last used it)
//! 2. acquire an image, signalling the slot's image-acquired semaphore
//! 3. make sure no other in-flight slot still renders into that image
//! 4. reset the fence, refresh per-frame data, submit
//! 5. with a separate present queue, transfer image ownership
//! 6. present, then rotate to the next slot
//!
//! The fence is only reset after a successful acquire. A skipped frame leaves
//! it signaled, so the next wait on that slot cannot hang.

use std::fmt;

use anyhow::Result;

use crate::error::RenderError;
use crate::frame::FrameSlot;
use crate::lifecycle::{Lifecycle, LifecycleState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// `suboptimal` means the image is usable but the swapchain no longer
    /// matches the surface exactly.
    Acquired { image: u32, suboptimal: bool },
    /// Nothing was acquired and no semaphore was signaled.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainStatus {
    Ready { image_count: usize },
    /// The surface has zero area. No swapchain exists until it grows again.
    Minimized,
}

/// What one [`FrameLoop::draw_frame`] call achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// An image was handed to the presentation engine.
    Presented,
    /// The swapchain went stale mid-frame and was rebuilt; nothing was shown.
    Recreated,
    /// No swapchain (minimized). Nothing was drawn.
    Suspended,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_presented: u64,
    pub frames_skipped: u64,
    pub recreations: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecreateReason {
    OutOfDate,
    Suboptimal,
    Resized,
    Settings,
    /// Polling a minimized surface for a usable extent.
    Resume,
}

impl fmt::Display for RecreateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecreateReason::OutOfDate => "out of date",
            RecreateReason::Suboptimal => "suboptimal",
            RecreateReason::Resized => "resized",
            RecreateReason::Settings => "settings changed",
            RecreateReason::Resume => "resume",
        };
        f.write_str(s)
    }
}

/// The GPU side of the frame protocol.
///
/// Every method receives the slot whose sync objects it must use. `image` is
/// the swapchain image index returned by the matching acquire.
pub trait FrameDevice {
    /// Block until the slot's fence is signaled.
    fn wait_frame(&mut self, slot: FrameSlot) -> Result<()>;

    /// Return the slot's fence to unsignaled. Called only after a successful acquire.
    fn reset_frame(&mut self, slot: FrameSlot) -> Result<()>;

    /// Acquire an image, signalling the slot's image-acquired semaphore.
    fn acquire_next_image(&mut self, slot: FrameSlot) -> Result<AcquireOutcome>;

    /// Refresh per-frame host data (uniforms) for `image`. The image's
    /// previous GPU work is guaranteed complete.
    fn update_frame_data(&mut self, _image: u32, _slot: FrameSlot) -> Result<()> {
        Ok(())
    }

    /// Submit the image's draw commands: wait image-acquired, signal
    /// draw-complete and the slot's fence.
    fn submit_frame(&mut self, image: u32, slot: FrameSlot) -> Result<()>;

    fn separate_present_queue(&self) -> bool {
        false
    }

    /// On the present queue: wait draw-complete, acquire image ownership,
    /// signal the slot's ownership semaphore.
    fn submit_ownership_transfer(&mut self, _image: u32, _slot: FrameSlot) -> Result<()> {
        Ok(())
    }

    /// Present, waiting on ownership (separate queues) or draw-complete.
    fn present(&mut self, image: u32, slot: FrameSlot) -> Result<PresentOutcome>;

    /// Idle the device and rebuild every swapchain-dependent resource.
    fn recreate_swapchain(&mut self) -> Result<SwapchainStatus>;
}

/// Drives a [`FrameDevice`] through the lifecycle one frame at a time.
#[derive(Debug)]
pub struct FrameLoop {
    lifecycle: Lifecycle,
    slot: FrameSlot,
    /// Slot whose submission last rendered into each swapchain image.
    images_in_flight: Vec<Option<FrameSlot>>,
    pending_recreate: Option<RecreateReason>,
    stats: FrameStats,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            slot: FrameSlot::FIRST,
            images_in_flight: Vec::new(),
            pending_recreate: None,
            stats: FrameStats::default(),
        }
    }

    pub fn device_ready(&mut self) -> Result<(), RenderError> {
        self.lifecycle.advance(LifecycleState::DeviceReady)
    }

    /// Record the outcome of the first swapchain build.
    pub fn swapchain_created(&mut self, status: SwapchainStatus) -> Result<(), RenderError> {
        self.apply_status(status)
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    #[inline]
    pub fn frame_index(&self) -> FrameSlot {
        self.slot
    }

    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Rebuild the swapchain before the next acquire.
    pub fn invalidate(&mut self, reason: RecreateReason) {
        tracing::debug!("swapchain invalidated ({reason})");
        self.pending_recreate = Some(reason);
    }

    pub fn advance_frame_slot(&mut self) -> FrameSlot {
        self.slot = self.slot.next();
        self.slot
    }

    pub fn destroy(&mut self) -> Result<(), RenderError> {
        self.images_in_flight.clear();
        self.lifecycle.advance(LifecycleState::Destroyed)
    }

    pub fn draw_frame<D: FrameDevice + ?Sized>(&mut self, device: &mut D) -> Result<FrameStatus> {
        let state = self.lifecycle.state();
        if state != LifecycleState::SwapchainReady && state != LifecycleState::Recreating {
            return Err(RenderError::IllegalTransition {
                from: state,
                to: LifecycleState::Recording,
            }
            .into());
        }

        let pending = match self.pending_recreate.take() {
            Some(reason) => Some(reason),
            None if state == LifecycleState::Recreating => Some(RecreateReason::Resume),
            None => None,
        };
        if let Some(reason) = pending {
            if self.recreate(device, reason)? == SwapchainStatus::Minimized {
                return Ok(FrameStatus::Suspended);
            }
        }

        let slot = self.slot;
        device.wait_frame(slot)?;

        let (image, acquired_suboptimal) = match device.acquire_next_image(slot)? {
            AcquireOutcome::Acquired { image, suboptimal } => (image, suboptimal),
            AcquireOutcome::OutOfDate => {
                self.stats.frames_skipped += 1;
                return match self.recreate(device, RecreateReason::OutOfDate)? {
                    SwapchainStatus::Ready { .. } => Ok(FrameStatus::Recreated),
                    SwapchainStatus::Minimized => Ok(FrameStatus::Suspended),
                };
            }
        };

        let count = self.images_in_flight.len();
        let owner = self
            .images_in_flight
            .get_mut(image as usize)
            .ok_or(RenderError::ImageOutOfRange { index: image, count })?;
        if let Some(prev) = owner.replace(slot) {
            if prev != slot {
                device.wait_frame(prev)?;
            }
        }

        self.lifecycle.advance(LifecycleState::Recording)?;
        device.reset_frame(slot)?;
        device.update_frame_data(image, slot)?;
        device.submit_frame(image, slot)?;
        if device.separate_present_queue() {
            device.submit_ownership_transfer(image, slot)?;
        }

        self.lifecycle.advance(LifecycleState::Presenting)?;
        let presented = device.present(image, slot)?;
        self.advance_frame_slot();

        let stale = match presented {
            PresentOutcome::Presented => {
                self.stats.frames_presented += 1;
                acquired_suboptimal.then_some(RecreateReason::Suboptimal)
            }
            PresentOutcome::Suboptimal => {
                self.stats.frames_presented += 1;
                Some(RecreateReason::Suboptimal)
            }
            PresentOutcome::OutOfDate => {
                self.stats.frames_skipped += 1;
                Some(RecreateReason::OutOfDate)
            }
        };

        match stale {
            None => {
                self.lifecycle.advance(LifecycleState::SwapchainReady)?;
                Ok(FrameStatus::Presented)
            }
            Some(reason) => {
                let status = self.recreate(device, reason)?;
                Ok(match (presented, status) {
                    (_, SwapchainStatus::Minimized) => FrameStatus::Suspended,
                    (PresentOutcome::OutOfDate, _) => FrameStatus::Recreated,
                    _ => FrameStatus::Presented,
                })
            }
        }
    }

    fn recreate<D: FrameDevice + ?Sized>(
        &mut self,
        device: &mut D,
        reason: RecreateReason,
    ) -> Result<SwapchainStatus> {
        self.lifecycle.advance(LifecycleState::Recreating)?;
        if reason == RecreateReason::Resume {
            tracing::trace!("polling minimized surface");
        } else {
            tracing::info!("recreating swapchain ({reason})");
        }
        let status = device.recreate_swapchain()?;
        self.apply_status(status)?;
        if let SwapchainStatus::Ready { .. } = status {
            self.stats.recreations += 1;
        }
        Ok(status)
    }

    fn apply_status(&mut self, status: SwapchainStatus) -> Result<(), RenderError> {
        match status {
            SwapchainStatus::Ready { image_count } => {
                self.images_in_flight = vec![None; image_count];
                self.lifecycle.advance(LifecycleState::SwapchainReady)
            }
            SwapchainStatus::Minimized => {
                self.images_in_flight.clear();
                self.lifecycle.advance(LifecycleState::Recreating)
            }
        }
    }
}
