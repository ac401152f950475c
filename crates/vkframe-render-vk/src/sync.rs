// SPDX-License-Identifier: CEPL-1.0
//! Per-slot fence and semaphores.

use anyhow::{Context, Result};
use ash::vk;

use crate::resources::build_or_release;

/// Sync objects for one frame slot. The fence starts signaled so the first
/// wait on a fresh slot returns at once.
#[derive(Debug, Default)]
pub(crate) struct FrameSync {
    pub fence: vk::Fence,
    pub image_acquired: vk::Semaphore,
    pub draw_complete: vk::Semaphore,
    /// Signaled by the present-queue ownership submit; only with separate queues.
    pub image_ownership: Option<vk::Semaphore>,
}

unsafe fn semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let ci = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    Ok(device.create_semaphore(&ci, None).context("vkCreateSemaphore")?)
}

impl FrameSync {
    pub unsafe fn new(device: &ash::Device, separate_present: bool) -> Result<Self> {
        let fci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        let fence = device.create_fence(&fci, None).context("vkCreateFence")?;
        let partial = Self {
            fence,
            ..Default::default()
        };
        build_or_release(
            partial,
            |sync| {
                sync.image_acquired = semaphore(device)?;
                sync.draw_complete = semaphore(device)?;
                if separate_present {
                    sync.image_ownership = Some(semaphore(device)?);
                }
                Ok(())
            },
            |sync| sync.destroy(device),
        )
    }

    /// Semaphore the present call waits on.
    #[inline]
    pub fn present_wait(&self) -> vk::Semaphore {
        self.image_ownership.unwrap_or(self.draw_complete)
    }

    /// Null handles are ignored by the destroy calls.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_fence(self.fence, None);
        device.destroy_semaphore(self.image_acquired, None);
        device.destroy_semaphore(self.draw_complete, None);
        if let Some(s) = self.image_ownership {
            device.destroy_semaphore(s, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn present_waits_on_ownership_when_queues_differ() {
        let mut s = FrameSync {
            fence: vk::Fence::null(),
            image_acquired: vk::Semaphore::from_raw(1),
            draw_complete: vk::Semaphore::from_raw(2),
            image_ownership: None,
        };
        assert_eq!(s.present_wait(), vk::Semaphore::from_raw(2));
        s.image_ownership = Some(vk::Semaphore::from_raw(3));
        assert_eq!(s.present_wait(), vk::Semaphore::from_raw(3));
    }
}
