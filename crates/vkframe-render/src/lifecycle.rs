// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

use crate::error::RenderError;

/// Where the renderer is in its swapchain lifecycle.
///
/// `Recreating` doubles as the resting state while the surface has no area
/// (minimized window): there is no swapchain until the extent is non-zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    DeviceReady,
    SwapchainReady,
    Recording,
    Presenting,
    Recreating,
    Destroyed,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        if next == Destroyed {
            return self != Destroyed;
        }
        matches!(
            (self, next),
            (Uninitialized, DeviceReady)
                | (DeviceReady, SwapchainReady)
                | (DeviceReady, Recreating)
                | (SwapchainReady, Recording)
                | (SwapchainReady, Recreating)
                | (Recording, Presenting)
                | (Presenting, SwapchainReady)
                | (Presenting, Recreating)
                | (Recreating, SwapchainReady)
                | (Recreating, Recreating)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::DeviceReady => "device-ready",
            LifecycleState::SwapchainReady => "swapchain-ready",
            LifecycleState::Recording => "recording",
            LifecycleState::Presenting => "presenting",
            LifecycleState::Recreating => "recreating",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
        }
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn advance(&mut self, next: LifecycleState) -> Result<(), RenderError> {
        if !self.state.can_transition_to(next) {
            return Err(RenderError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        if self.state != next {
            tracing::trace!("lifecycle {} -> {}", self.state, next);
        }
        self.state = next;
        Ok(())
    }
}
