use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::mask::MaskPolarity;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub background: String,
    pub max_words: usize,
    pub min_font_size: u32,
    pub max_font_size: u32,
    pub prefer_horizontal: f32,
    pub padding: u32,
    pub mask_polarity: MaskPolarity,
    pub font_path: Option<String>,
    pub font_family: Option<String>,
    pub base_url: String,
    pub request_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 400,
            scale: 3.0,
            background: "#ffffff".to_string(),
            max_words: 200,
            min_font_size: 1,
            max_font_size: 50,
            prefer_horizontal: 0.9,
            padding: 1,
            mask_polarity: MaskPolarity::LightIsDrawable,
            font_path: None,
            font_family: None,
            base_url: "https://shuiyuan.sjtu.edu.cn".to_string(),
            request_delay_ms: 200,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    canvas: Option<CanvasSettings>,
    layout: Option<LayoutSettings>,
    mask: Option<MaskSettings>,
    font: Option<FontSettings>,
    discourse: Option<DiscourseSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct CanvasSettings {
    width: Option<u32>,
    height: Option<u32>,
    scale: Option<f32>,
    background: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutSettings {
    max_words: Option<usize>,
    min_font_size: Option<u32>,
    max_font_size: Option<u32>,
    prefer_horizontal: Option<f32>,
    padding: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct MaskSettings {
    polarity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FontSettings {
    path: Option<String>,
    family: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscourseSettings {
    base_url: Option<String>,
    request_delay_ms: Option<u64>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed)?;
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        if let Some(canvas) = incoming.canvas {
            if let Some(width) = canvas.width {
                if width > 0 {
                    self.width = width;
                }
            }
            if let Some(height) = canvas.height {
                if height > 0 {
                    self.height = height;
                }
            }
            if let Some(scale) = canvas.scale {
                if scale > 0.0 {
                    self.scale = scale;
                }
            }
            if let Some(background) = canvas.background {
                if !background.trim().is_empty() {
                    self.background = background;
                }
            }
        }
        if let Some(layout) = incoming.layout {
            if let Some(max_words) = layout.max_words {
                if max_words > 0 {
                    self.max_words = max_words;
                }
            }
            if let Some(size) = layout.min_font_size {
                if size > 0 {
                    self.min_font_size = size;
                }
            }
            if let Some(size) = layout.max_font_size {
                if size > 0 {
                    self.max_font_size = size;
                }
            }
            if let Some(bias) = layout.prefer_horizontal {
                if (0.0..=1.0).contains(&bias) {
                    self.prefer_horizontal = bias;
                }
            }
            if let Some(padding) = layout.padding {
                self.padding = padding;
            }
        }
        if let Some(mask) = incoming.mask {
            if let Some(polarity) = mask.polarity {
                self.mask_polarity = parse_polarity(&polarity)?;
            }
        }
        if let Some(font) = incoming.font {
            if let Some(path) = font.path {
                if !path.trim().is_empty() {
                    self.font_path = Some(path);
                }
            }
            if let Some(family) = font.family {
                if !family.trim().is_empty() {
                    self.font_family = Some(family);
                }
            }
        }
        if let Some(discourse) = incoming.discourse {
            if let Some(base_url) = discourse.base_url {
                if !base_url.trim().is_empty() {
                    self.base_url = base_url.trim_end_matches('/').to_string();
                }
            }
            if let Some(delay) = discourse.request_delay_ms {
                self.request_delay_ms = delay;
            }
        }
        Ok(())
    }
}

fn parse_polarity(value: &str) -> Result<MaskPolarity> {
    match value.trim().to_ascii_lowercase().as_str() {
        "light" => Ok(MaskPolarity::LightIsDrawable),
        "dark" => Ok(MaskPolarity::DarkIsDrawable),
        other => Err(anyhow!(
            "invalid mask polarity '{}' (expected \"light\" or \"dark\")",
            other
        )),
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".discourse-wordcloud"))
        }
    })
}
