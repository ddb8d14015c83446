//! Shader descriptors and their resolution into SPIR-V words.

use std::fmt;
use std::path::{Path, PathBuf};

use ash::vk;

use crate::compiler::{NoCompiler, ShaderCompiler};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Geometry,
    TessControl,
    TessEvaluation,
}

impl ShaderStage {
    pub fn vk_flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        }
    }

    /// Guess the stage from a conventional GLSL file extension.
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "vert" => Some(ShaderStage::Vertex),
            "frag" => Some(ShaderStage::Fragment),
            "comp" => Some(ShaderStage::Compute),
            "geom" => Some(ShaderStage::Geometry),
            "tesc" => Some(ShaderStage::TessControl),
            "tese" => Some(ShaderStage::TessEvaluation),
            _ => None,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::Geometry => "geometry",
            ShaderStage::TessControl => "tessellation control",
            ShaderStage::TessEvaluation => "tessellation evaluation",
        })
    }
}

/// The four accepted shader representations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShaderSource {
    /// GLSL text held in memory. `name` is what diagnostics refer to.
    Inline { name: String, code: String },
    /// Path to a GLSL file.
    SourcePath(PathBuf),
    /// SPIR-V already in memory.
    Bytecode(Vec<u32>),
    /// Path to a SPIR-V file.
    BytecodePath(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderDesc {
    pub source: ShaderSource,
    pub optimize: bool,
}

impl ShaderDesc {
    pub fn inline(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self { source: ShaderSource::Inline { name: name.into(), code: code.into() }, optimize: true }
    }

    pub fn source_path(path: impl Into<PathBuf>) -> Self {
        Self { source: ShaderSource::SourcePath(path.into()), optimize: true }
    }

    pub fn bytecode(words: Vec<u32>) -> Self {
        Self { source: ShaderSource::Bytecode(words), optimize: true }
    }

    pub fn bytecode_path(path: impl Into<PathBuf>) -> Self {
        Self { source: ShaderSource::BytecodePath(path.into()), optimize: true }
    }

    pub fn optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> String {
        match &self.source {
            ShaderSource::Inline { name, .. } => name.clone(),
            ShaderSource::SourcePath(p) | ShaderSource::BytecodePath(p) => p.display().to_string(),
            ShaderSource::Bytecode(_) => "<bytecode>".to_string(),
        }
    }
}

/// Reinterpret raw bytes as little-endian 32-bit words.
/// A trailing partial word is zero-padded, never dropped.
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

/// Resolves [`ShaderDesc`]s to SPIR-V. Relative paths are joined to `base_dir`.
///
/// No caching happens here; wrap the compiler in
/// [`CachingCompiler`](crate::compiler::CachingCompiler) to avoid recompiling.
pub struct ShaderLoader {
    compiler: Box<dyn ShaderCompiler>,
    base_dir: Option<PathBuf>,
}

impl Default for ShaderLoader {
    fn default() -> Self {
        Self::new(Box::new(NoCompiler))
    }
}

impl ShaderLoader {
    pub fn new(compiler: Box<dyn ShaderCompiler>) -> Self {
        Self { compiler, base_dir: None }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn compiler(&self) -> &dyn ShaderCompiler {
        self.compiler.as_ref()
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn resolve(&self, desc: &ShaderDesc, stage: ShaderStage) -> Result<Vec<u32>> {
        let words = match &desc.source {
            ShaderSource::Inline { name, code } => self.compile(name, code, stage, desc.optimize)?,
            ShaderSource::SourcePath(path) => {
                let path = self.resolve_path(path);
                let code = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
                self.compile(&path.display().to_string(), &code, stage, desc.optimize)?
            }
            ShaderSource::Bytecode(words) => words.clone(),
            ShaderSource::BytecodePath(path) => {
                let path = self.resolve_path(path);
                let bytes = std::fs::read(&path).map_err(|e| Error::io(&path, e))?;
                words_from_bytes(&bytes)
            }
        };
        if words.is_empty() {
            return Err(Error::EmptyShader { name: desc.name() });
        }
        log::debug!("resolved {stage} shader '{}' to {} words", desc.name(), words.len());
        Ok(words)
    }

    fn compile(&self, name: &str, code: &str, stage: ShaderStage, optimize: bool) -> Result<Vec<u32>> {
        self.compiler
            .compile(name, code, stage, optimize)
            .map_err(|diagnostic| Error::ShaderCompilation { name: name.to_string(), stage, diagnostic })
    }
}
