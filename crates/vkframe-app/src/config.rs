// SPDX-License-Identifier: CEPL-1.0
//! Command line and `vkframe.toml`. File values first, flags on top.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing::{debug, warn};
use vkframe_platform::WindowSpec;
use vkframe_render::{RenderSettings, VsyncMode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Spinning cube on a FRAME_LAG-deep Vulkan frame loop", long_about = None)]
pub struct Args {
    /// TOML config file; missing means defaults
    #[arg(long, default_value = "vkframe.toml")]
    pub config: PathBuf,

    /// Override vsync from the config file
    #[arg(long)]
    pub vsync: Option<bool>,

    /// Present mode preferred while vsync is on
    #[arg(long, value_enum)]
    pub present_mode: Option<PresentModeCfg>,

    /// Enable the Khronos validation layer
    #[arg(long)]
    pub validation: bool,

    /// Exit after this many presented frames
    #[arg(long)]
    pub frames: Option<u64>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Fifo,
    Mailbox,
}

impl From<PresentModeCfg> for VsyncMode {
    fn from(m: PresentModeCfg) -> Self {
        match m {
            PresentModeCfg::Fifo => VsyncMode::Fifo,
            PresentModeCfg::Mailbox => VsyncMode::Mailbox,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WindowCfg {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_vsync")]
    pub vsync: bool,
    #[serde(default)]
    pub present_mode: PresentModeCfg,
    #[serde(default = "default_validation")]
    pub validation: bool,
    #[serde(default = "default_spin")]
    pub spin_degrees_per_frame: f32,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: default_title(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: default_vsync(),
            present_mode: PresentModeCfg::Fifo,
            validation: default_validation(),
            spin_degrees_per_frame: default_spin(),
        }
    }
}

fn default_title() -> String {
    "vkframe".into()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_clear() -> [f32; 4] {
    [0.2, 0.2, 0.2, 1.0]
}
fn default_vsync() -> bool {
    true
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}
fn default_spin() -> f32 {
    1.0
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(e) => {
            debug!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

impl AppCfg {
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(v) = args.vsync {
            self.render.vsync = v;
        }
        if let Some(m) = args.present_mode {
            self.render.present_mode = m;
        }
        if args.validation {
            self.render.validation = true;
        }
        if let Some(w) = args.width {
            self.window.width = w;
        }
        if let Some(h) = args.height {
            self.window.height = h;
        }
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            app_name: self.window.title.clone(),
            clear_color: self.render.clear_color,
            vsync: self.render.vsync,
            vsync_mode: self.render.present_mode.into(),
            validation: self.render.validation,
            spin_degrees_per_frame: self.render.spin_degrees_per_frame,
        }
    }
}
