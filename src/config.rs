//! YAML configuration and its merge with command-line overrides.

use crate::demos::{self, Demo};
use crate::output::WindowConfig;
use crate::pipeline::{SamplerBinding, DEFAULT_TIME_UNIFORM};
use crate::shader::ShaderSource;
use crate::texture::{TextureSource, WrapMode, MAX_TEXTURE_UNITS};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Contents of a config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub demo: Option<String>,
    pub window: WindowSection,
    pub fps: Option<u32>,
    pub clear_color: Option<[f64; 4]>,
    pub textures: Vec<TextureInput>,
    /// Sampler uniform name to texture unit.
    pub samplers: BTreeMap<String, u32>,
    pub shaders: ShaderOverrides,
    pub time_uniform: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSection {
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderOverrides {
    pub vertex: Option<PathBuf>,
    pub fragment: Option<PathBuf>,
}

/// A texture to load onto a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureInput {
    pub unit: u32,
    #[serde(flatten)]
    pub source: TextureSource,
    #[serde(default)]
    pub wrap: WrapMode,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_yaml(&content).with_context(|| format!("invalid config {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Values given on the command line; they win over the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub demo: Option<String>,
    pub vertex: Option<PathBuf>,
    pub fragment: Option<PathBuf>,
    /// Image files for units 0, 1, ...
    pub textures: Vec<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
}

/// Everything a run needs, after merging defaults, file and CLI.
#[derive(Debug, Clone)]
pub struct Settings {
    pub demo: &'static Demo,
    pub vertex: ShaderSource,
    pub fragment: ShaderSource,
    pub window: WindowConfig,
    pub fps: u32,
    pub clear_color: [f64; 4],
    pub textures: Vec<TextureInput>,
    pub samplers: Vec<SamplerBinding>,
    pub time_uniform: String,
}

pub const DEFAULT_FPS: u32 = 60;

impl Settings {
    pub fn resolve(config: Config, overrides: Overrides) -> Result<Self> {
        let name = overrides
            .demo
            .or(config.demo)
            .unwrap_or_else(|| demos::DEFAULT_DEMO.to_string());
        let Some(demo) = demos::find(&name) else {
            bail!(
                "unknown demo `{name}` (available: {})",
                demos::DEMOS.iter().map(|d| d.name).collect::<Vec<_>>().join(", ")
            );
        };

        let vertex = match overrides.vertex.or(config.shaders.vertex) {
            Some(path) => ShaderSource::from_path(path)?,
            None => demo.vertex_source(),
        };
        let fragment = match overrides.fragment.or(config.shaders.fragment) {
            Some(path) => ShaderSource::from_path(path)?,
            None => demo.fragment_source(),
        };

        let defaults = WindowConfig::default();
        let window = WindowConfig {
            title: config
                .window
                .title
                .unwrap_or_else(|| format!("{} - {}", defaults.title, demo.name)),
            width: overrides.width.or(config.window.width).unwrap_or(defaults.width),
            height: overrides.height.or(config.window.height).unwrap_or(defaults.height),
        };
        if window.width == 0 || window.height == 0 {
            bail!("window size must be non-zero, got {}x{}", window.width, window.height);
        }

        let fps = overrides.fps.or(config.fps).unwrap_or(DEFAULT_FPS);
        if fps == 0 {
            bail!("fps must be at least 1");
        }

        // Later entries replace earlier ones on the same unit.
        let mut by_unit: BTreeMap<u32, TextureInput> = demo
            .samplers
            .iter()
            .map(|s| {
                (
                    s.unit,
                    TextureInput {
                        unit: s.unit,
                        source: s.default.source(),
                        wrap: WrapMode::default(),
                    },
                )
            })
            .collect();
        for input in config.textures {
            by_unit.insert(input.unit, input);
        }
        for (unit, path) in overrides.textures.into_iter().enumerate() {
            let unit = unit as u32;
            let wrap = by_unit.get(&unit).map(|t| t.wrap).unwrap_or_default();
            by_unit.insert(
                unit,
                TextureInput {
                    unit,
                    source: TextureSource::File { path },
                    wrap,
                },
            );
        }
        if let Some(unit) = by_unit.keys().find(|u| **u as usize >= MAX_TEXTURE_UNITS) {
            bail!("texture unit {unit} is out of range (max {})", MAX_TEXTURE_UNITS - 1);
        }

        let mut samplers: Vec<SamplerBinding> = demo
            .samplers
            .iter()
            .map(|s| SamplerBinding {
                name: s.name.to_string(),
                unit: s.unit,
            })
            .collect();
        for (name, unit) in config.samplers {
            match samplers.iter_mut().find(|s| s.name == name) {
                Some(binding) => binding.unit = unit,
                None => samplers.push(SamplerBinding { name, unit }),
            }
        }

        Ok(Self {
            demo,
            vertex,
            fragment,
            window,
            fps,
            clear_color: config.clear_color.unwrap_or(demo.clear_color),
            textures: by_unit.into_values().collect(),
            samplers,
            time_uniform: config
                .time_uniform
                .unwrap_or_else(|| DEFAULT_TIME_UNIFORM.to_string()),
        })
    }
}
