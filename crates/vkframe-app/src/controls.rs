// SPDX-License-Identifier: CEPL-1.0
//! Runtime toggles bound to keys, and when the loop should keep spinning.

use vkframe_platform::winit::keyboard::KeyCode;
use vkframe_render::{LifecycleState, RenderSettings, VsyncMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    ToggleVsync,
    TogglePresentMode,
    NextClearColor,
}

impl KeyAction {
    /// Physical keys, so the bindings survive keyboard layouts.
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::KeyV => Some(Self::ToggleVsync),
            KeyCode::KeyM => Some(Self::TogglePresentMode),
            KeyCode::KeyC => Some(Self::NextClearColor),
            _ => None,
        }
    }
}

const PALETTE: [[f32; 4]; 4] = [
    [0.2, 0.2, 0.2, 1.0],
    [0.05, 0.07, 0.15, 1.0],
    [0.35, 0.12, 0.1, 1.0],
    [0.9, 0.9, 0.9, 1.0],
];

/// The runtime-adjustable part of the render settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Controls {
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub clear_color: [f32; 4],
    next_color: usize,
}

impl Controls {
    pub fn new(settings: &RenderSettings) -> Self {
        // Start cycling after the configured color when it is a palette entry.
        let next_color = PALETTE
            .iter()
            .position(|c| *c == settings.clear_color)
            .map_or(0, |i| (i + 1) % PALETTE.len());
        Self {
            vsync: settings.vsync,
            vsync_mode: settings.vsync_mode,
            clear_color: settings.clear_color,
            next_color,
        }
    }

    pub fn apply(&mut self, action: KeyAction) {
        match action {
            KeyAction::ToggleVsync => self.vsync = !self.vsync,
            KeyAction::TogglePresentMode => {
                self.vsync_mode = match self.vsync_mode {
                    VsyncMode::Fifo => VsyncMode::Mailbox,
                    VsyncMode::Mailbox => VsyncMode::Fifo,
                }
            }
            KeyAction::NextClearColor => {
                self.clear_color = PALETTE[self.next_color];
                self.next_color = (self.next_color + 1) % PALETTE.len();
            }
        }
    }
}

/// Poll and redraw continuously only while there is something to show:
/// a live swapchain and a window that is not hidden.
pub fn keeps_polling(state: LifecycleState, occluded: bool) -> bool {
    !occluded && state != LifecycleState::Recreating
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RenderSettings {
        RenderSettings::default()
    }

    #[test]
    fn only_bound_keys_map_to_actions() {
        assert_eq!(KeyAction::from_key(KeyCode::KeyV), Some(KeyAction::ToggleVsync));
        assert_eq!(KeyAction::from_key(KeyCode::KeyM), Some(KeyAction::TogglePresentMode));
        assert_eq!(KeyAction::from_key(KeyCode::KeyC), Some(KeyAction::NextClearColor));
        assert_eq!(KeyAction::from_key(KeyCode::Escape), None);
        assert_eq!(KeyAction::from_key(KeyCode::KeyX), None);
    }

    #[test]
    fn vsync_and_present_mode_toggle_back_and_forth() {
        let s = settings();
        let mut c = Controls::new(&s);
        c.apply(KeyAction::ToggleVsync);
        assert_eq!(c.vsync, !s.vsync);
        c.apply(KeyAction::ToggleVsync);
        assert_eq!(c.vsync, s.vsync);

        assert_eq!(c.vsync_mode, VsyncMode::Fifo);
        c.apply(KeyAction::TogglePresentMode);
        assert_eq!(c.vsync_mode, VsyncMode::Mailbox);
        c.apply(KeyAction::TogglePresentMode);
        assert_eq!(c.vsync_mode, VsyncMode::Fifo);
    }

    #[test]
    fn clear_color_changes_on_first_press_and_wraps() {
        let mut s = settings();
        s.clear_color = PALETTE[0];
        let mut c = Controls::new(&s);
        c.apply(KeyAction::NextClearColor);
        assert_ne!(c.clear_color, s.clear_color);
        for _ in 1..PALETTE.len() {
            c.apply(KeyAction::NextClearColor);
        }
        assert_eq!(c.clear_color, s.clear_color);
    }

    #[test]
    fn custom_clear_color_cycles_from_palette_start() {
        let mut s = settings();
        s.clear_color = [0.0, 1.0, 0.0, 1.0];
        let mut c = Controls::new(&s);
        c.apply(KeyAction::NextClearColor);
        assert_eq!(c.clear_color, PALETTE[0]);
    }

    #[test]
    fn toggles_leave_other_settings_alone() {
        let s = settings();
        let mut c = Controls::new(&s);
        c.apply(KeyAction::NextClearColor);
        assert_eq!((c.vsync, c.vsync_mode), (s.vsync, s.vsync_mode));
    }

    #[test]
    fn hidden_or_swapchainless_window_stops_polling() {
        assert!(keeps_polling(LifecycleState::SwapchainReady, false));
        assert!(!keeps_polling(LifecycleState::SwapchainReady, true));
        assert!(!keeps_polling(LifecycleState::Recreating, false));
        assert!(!keeps_polling(LifecycleState::Recreating, true));
    }
}
