//! Locating the transcoding utility.
//!
//! Only ffmpeg is needed. A path from `tools.ffmpeg_path` wins when it
//! exists; otherwise `PATH` is searched with [`which`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tl_core::config::ToolsConfig;
use tl_core::{Error, Result};

use crate::command::ToolCommand;

const KNOWN_TOOLS: &[&str] = &["ffmpeg"];

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a tool was found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    pub path: PathBuf,
}

/// Result of [`ToolRegistry::check_all`] for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// e.g. "6.1.1", from `-version`.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Resolve every known tool. Missing tools are left out; asking for one
    /// later with [`require`](Self::require) reports it.
    pub fn discover(config: &ToolsConfig) -> Self {
        let mut registry = Self::default();
        for &name in KNOWN_TOOLS {
            let configured = match name {
                "ffmpeg" => config.ffmpeg_path.as_deref(),
                _ => None,
            };
            match resolve(name, configured) {
                Some(path) => {
                    tracing::debug!("Found {name} at {}", path.display());
                    registry = registry.with_tool(name, path);
                }
                None => tracing::debug!("{name} not found"),
            }
        }
        registry
    }

    pub fn with_tool(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        let config = ToolConfig {
            name: name.to_string(),
            path: path.into(),
        };
        self.tools.insert(config.name.clone(), config);
        self
    }

    pub fn require(&self, name: &str) -> Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Availability and version of every known tool.
    pub async fn check_all(&self) -> Vec<ToolInfo> {
        let mut infos = Vec::with_capacity(KNOWN_TOOLS.len());
        for &name in KNOWN_TOOLS {
            let info = match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: probe_version(&cfg.path).await,
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            };
            infos.push(info);
        }
        infos
    }
}

fn resolve(name: &str, configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(
            "Configured {name} path {} does not exist; searching PATH",
            path.display()
        );
    }
    which::which(name).ok()
}

async fn probe_version(path: &Path) -> Option<String> {
    let mut cmd = ToolCommand::new(path);
    cmd.arg("-version").timeout(VERSION_PROBE_TIMEOUT);
    let output = cmd.execute().await.ok()?;
    parse_version(&output.stdout)
}

/// `ffmpeg version 6.1.1-3ubuntu5 Copyright ...` -> `6.1.1-3ubuntu5`
fn parse_version(stdout: &str) -> Option<String> {
    let first = stdout.lines().next()?;
    let mut words = first.split_whitespace();
    while let Some(word) = words.next() {
        if word == "version" {
            return words.next().map(str::to_string);
        }
    }
    None
}
