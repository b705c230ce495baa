// src/config.rs  -  runtime configuration (CLI + TOML)
use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The example config is embedded directly in the binary at compile time.
/// Users can write it out with:  roboid --write-config
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../config.toml.example");

// ── CLI ───────────────────────────────────────────────────────────────────────
#[derive(Parser, Debug)]
#[command(
    name    = "roboid",
    about   = "Hamster robot runtime over a USB-to-BLE serial bridge",
    version,
)]
pub struct Cli {
    /// Config file path (default: ~/.config/roboid/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial port of the bridge (e.g. /dev/ttyUSB0, COM3).
    /// All ports are scanned when omitted.
    #[arg(long)]
    pub port: Option<String>,

    /// Tempo for the note demos in beats per minute (default: 60)
    #[arg(long)]
    pub tempo: Option<f64>,

    /// Demo program: square | follow | scale
    #[arg(long)]
    pub demo: Option<DemoProgram>,

    /// List available serial ports and exit
    #[arg(long, action)]
    pub list_ports: bool,

    /// Probe the bridge: open, handshake, report the robot address
    #[arg(long, action)]
    pub check_bridge: bool,

    /// Write the built-in default config.toml to the config path and exit.
    /// Use --config <PATH> to write to a custom location.
    #[arg(long, action)]
    pub write_config: bool,

    /// Print the built-in default config.toml to stdout and exit
    #[arg(long, action)]
    pub print_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DemoProgram {
    /// Drive one square on the board grid (four cells, four left turns)
    Square,
    /// Follow a black line on both floor sensors for ten seconds
    Follow,
    /// Play a C major scale on the buzzer
    Scale,
}

// ── TOML file structure ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    pub bridge: Option<BridgeCfg>,
    pub music:  Option<MusicCfg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeCfg {
    /// Serial port of the USB-to-BLE bridge; unset scans all ports
    pub port: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicCfg {
    /// Beats per minute for note playback
    pub tempo: Option<f64>,
}

// ── Resolved / merged config ──────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port:  String,
    pub tempo: f64,
    pub demo:  DemoProgram,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port:  String::new(),
            tempo: 60.0,
            demo:  DemoProgram::Square,
        }
    }
}

// ── Config loader ─────────────────────────────────────────────────────────────
impl AppConfig {
    /// Write the embedded default config to disk.
    /// Returns the path it was written to.
    pub fn write_default_config(cli: &Cli) -> Result<PathBuf> {
        let path = cli.config.clone().unwrap_or_else(default_config_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Creating config directory {:?}", parent))?;
        }
        std::fs::write(&path, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("Writing config to {:?}", path))?;
        Ok(path)
    }

    pub fn load(cli: &Cli) -> Result<Self> {
        let mut cfg = Self::default();

        // 1. Load TOML file
        let path = cli.config.clone().unwrap_or_else(default_config_path);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Reading config {:?}", path))?;
            let fc: FileConfig = toml::from_str(&raw)
                .with_context(|| format!("Parsing config {:?}", path))?;
            cfg.apply_file(&fc);
        }

        // 2. Apply CLI overrides
        cfg.apply_cli(cli);
        Ok(cfg)
    }

    fn apply_file(&mut self, fc: &FileConfig) {
        if let Some(b) = &fc.bridge {
            if let Some(v) = &b.port { self.port = v.clone(); }
        }
        if let Some(m) = &fc.music {
            if let Some(v) = m.tempo { self.tempo = v; }
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(v) = &cli.port  { self.port  = v.clone(); }
        if let Some(v) = cli.tempo  { self.tempo = v; }
        if let Some(v) = cli.demo   { self.demo  = v; }
    }
}

fn default_config_path() -> PathBuf {
    config_dir().join("roboid").join("config.toml")
}

fn config_dir() -> PathBuf {
    if let Ok(v) = std::env::var("XDG_CONFIG_HOME") { return PathBuf::from(v); }
    if let Ok(v) = std::env::var("APPDATA")          { return PathBuf::from(v); }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_default();
    PathBuf::from(home).join(".config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_config_parses() {
        let fc: FileConfig = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert!(fc.music.unwrap().tempo.is_some());
    }

    #[test]
    fn file_values_yield_to_cli_overrides() {
        let mut cfg = AppConfig::default();
        cfg.apply_file(&FileConfig {
            bridge: Some(BridgeCfg { port: Some("/dev/ttyUSB0".into()) }),
            music:  Some(MusicCfg { tempo: Some(90.0) }),
        });
        assert_eq!(cfg.port, "/dev/ttyUSB0");
        assert_eq!(cfg.tempo, 90.0);

        let cli = Cli::parse_from(["roboid", "--port", "COM3", "--demo", "scale"]);
        cfg.apply_cli(&cli);
        assert_eq!(cfg.port, "COM3");
        assert_eq!(cfg.tempo, 90.0);
        assert_eq!(cfg.demo, DemoProgram::Scale);
    }
}
