// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Fatal renderer errors that callers may want to tell apart.
///
/// Swapchain staleness is not here: it is reported through
/// [`AcquireOutcome`](crate::AcquireOutcome) and
/// [`PresentOutcome`](crate::PresentOutcome).
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("no physical device can both render and present to this surface")]
    NoSuitableDevice,

    #[error("no queue family supports {0}")]
    NoQueueFamily(&'static str),

    #[error("swapchain image index {index} out of range ({count} images)")]
    ImageOutOfRange { index: u32, count: usize },

    #[error("{call} failed: {detail}")]
    Backend { call: &'static str, detail: String },
}
