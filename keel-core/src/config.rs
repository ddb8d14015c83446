//! Engine configuration: a JSON file on disk or a chainable builder in code.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub window_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub app_name: String,
    pub engine_name: String,
    /// Enables the Khronos validation layer and the debug messenger.
    #[serde(default)]
    pub debug_mode: bool,
    /// Compiler backend to attach; the first compiled-in backend when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<String>,
    pub window: WindowCfg,
    /// Directory the config was loaded from. Relative shader paths resolve here.
    #[serde(skip)]
    pub base_path: Option<PathBuf>,
}

/// Read a JSON config. `base_path` is set to the file's directory.
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut cfg: EngineConfig =
        serde_json::from_str(&text).map_err(|e| Error::Config { path: path.to_path_buf(), message: e.to_string() })?;
    validate_config(&cfg)?;

    let abs = path.canonicalize().map_err(|e| Error::io(path, e))?;
    cfg.base_path = abs.parent().map(Path::to_path_buf);
    log::debug!("loaded config '{}' from {}", cfg.app_name, path.display());
    Ok(cfg)
}

pub fn validate_config(cfg: &EngineConfig) -> Result<()> {
    if cfg.window.width == 0 || cfg.window.height == 0 {
        return Err(Error::InvalidConfig(format!(
            "window size must be non-zero, got {}x{}",
            cfg.window.width, cfg.window.height
        )));
    }
    if cfg.app_name.trim().is_empty() {
        return Err(Error::InvalidConfig("app_name is empty".into()));
    }
    if cfg.engine_name.trim().is_empty() {
        return Err(Error::InvalidConfig("engine_name is empty".into()));
    }
    if matches!(&cfg.compiler, Some(c) if c.trim().is_empty()) {
        return Err(Error::InvalidConfig("compiler is empty; omit it to use the default backend".into()));
    }
    Ok(())
}

/// Chainable construction of an [`EngineConfig`] without a file.
#[derive(Default)]
pub struct EngineBuilder {
    app: Option<String>,
    engine: Option<String>,
    window: Option<WindowCfg>,
    debug: bool,
    compiler: Option<String>,
    base_path: Option<PathBuf>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn app(mut self, name: impl Into<String>) -> Self {
        self.app = Some(name.into());
        self
    }
    pub fn engine(mut self, name: impl Into<String>) -> Self {
        self.engine = Some(name.into());
        self
    }
    pub fn window(mut self, width: u32, height: u32, title: impl Into<String>) -> Self {
        self.window = Some(WindowCfg { width, height, window_name: title.into() });
        self
    }
    pub fn debug(mut self, on: bool) -> Self {
        self.debug = on;
        self
    }
    pub fn compiler(mut self, backend: impl Into<String>) -> Self {
        self.compiler = Some(backend.into());
        self
    }
    pub fn base_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_path = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let app = self.app.unwrap_or_else(|| "Untitled".to_string());
        let cfg = EngineConfig {
            engine_name: self.engine.unwrap_or_else(|| "keel".to_string()),
            window: self
                .window
                .unwrap_or_else(|| WindowCfg { width: 1280, height: 720, window_name: app.clone() }),
            app_name: app,
            debug_mode: self.debug,
            compiler: self.compiler,
            base_path: self.base_path,
        };
        validate_config(&cfg)?;
        Ok(cfg)
    }
}
