// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub use winit;

use winit::dpi::LogicalSize;
use winit::window::{Window, WindowAttributes};

/// What the app asks the windowing layer for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl WindowSpec {
    pub fn attributes(&self) -> WindowAttributes {
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(LogicalSize::new(self.width.max(1), self.height.max(1)))
    }
}

/// Current framebuffer size in physical pixels. Either side may be 0 while minimized.
pub fn framebuffer_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    tracing::trace!("framebuffer size {}x{}", size.width, size.height);
    (size.width, size.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_spec_is_clamped() {
        let spec = WindowSpec {
            title: "t".into(),
            width: 0,
            height: 0,
        };
        let attrs = spec.attributes();
        let size = attrs.inner_size.expect("inner size set");
        let logical: LogicalSize<u32> = size.to_logical(1.0);
        assert_eq!((logical.width, logical.height), (1, 1));
        assert_eq!(attrs.title, "t");
    }
}
