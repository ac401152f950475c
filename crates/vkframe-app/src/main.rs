// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};
use vkframe_core::init_tracing;
use vkframe_platform::framebuffer_size;
use vkframe_render::{FrameStatus, RenderSize, Renderer};
use vkframe_render_vk::VkRenderer;

use vkframe_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::PhysicalKey,
    window::{Window, WindowId},
};

mod config;
mod controls;

use config::{load_cfg, AppCfg, Args};
use controls::{keeps_polling, Controls, KeyAction};

struct App {
    cfg: AppCfg,
    frame_limit: Option<u64>,
    // Dropped before the window it renders into.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    controls: Controls,
    occluded: bool,

    fatal: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg, frame_limit: Option<u64>) -> Self {
        let controls = Controls::new(&cfg.render_settings());
        Self {
            cfg,
            frame_limit,
            renderer: None,
            window: None,
            controls,
            occluded: false,
            fatal: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop.create_window(self.cfg.window_spec().attributes())?;
        let (w, h) = framebuffer_size(&window);
        let settings = self.cfg.render_settings();
        info!(
            "window {}x{}, vsync={} ({:?}), validation={}",
            w, h, settings.vsync, settings.vsync_mode, settings.validation
        );
        let renderer = VkRenderer::new(&window, &window, RenderSize::new(w, h), &settings)?;
        window.request_redraw();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(r) = &self.renderer {
            let s = r.stats();
            info!(
                "presented {} frames, skipped {}, {} swapchain rebuilds",
                s.frames_presented, s.frames_skipped, s.recreations
            );
        }
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.fatal = Some(e);
        self.shutdown(event_loop);
    }

    fn handle_key(&mut self, action: KeyAction) -> Result<()> {
        let Some(renderer) = &mut self.renderer else {
            return Ok(());
        };
        self.controls.apply(action);
        let c = &self.controls;
        match action {
            KeyAction::ToggleVsync => {
                info!("vsync → {}", c.vsync);
                renderer.set_vsync(c.vsync)?;
            }
            KeyAction::TogglePresentMode => {
                info!("present mode → {:?}", c.vsync_mode);
                renderer.set_vsync_mode(c.vsync_mode);
            }
            KeyAction::NextClearColor => {
                debug!("clear color → {:?}", c.clear_color);
                renderer.set_clear_color(c.clear_color)?;
            }
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }
        Ok(())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        match renderer.render() {
            Ok(FrameStatus::Presented) => {
                self.frames = self.frames.saturating_add(1);
                let presented = renderer.stats().frames_presented;
                if self.frame_limit.is_some_and(|n| presented >= n) {
                    info!("frame limit reached ({presented})");
                    self.shutdown(event_loop);
                }
            }
            Ok(FrameStatus::Recreated) => debug!("frame skipped for swapchain rebuild"),
            Ok(FrameStatus::Suspended) => {}
            Err(e) => self.fail(event_loop, e),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e.context("renderer init"));
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                debug!("Resized → {}x{}", size.width, size.height);
                if let Some(r) = &mut self.renderer {
                    if let Err(e) = r.resize(size) {
                        self.fail(event_loop, e);
                        return;
                    }
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::Occluded(occluded) => {
                if self.occluded != occluded {
                    self.occluded = occluded;
                    info!("Occluded={occluded}");
                }
                if !occluded {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if let Some(action) = KeyAction::from_key(code) {
                    if let Err(e) = self.handle_key(action) {
                        self.fail(event_loop, e);
                    }
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = &self.renderer else {
            return;
        };

        // Minimized or hidden: sleep until a Resized or Occluded event.
        if !keeps_polling(renderer.state(), self.occluded) {
            event_loop.set_control_flow(ControlFlow::Wait);
        } else {
            event_loop.set_control_flow(ControlFlow::Poll);
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = load_cfg(&args.config);
    cfg.apply_args(&args);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, args.frames);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
