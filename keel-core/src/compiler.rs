//! Pluggable GLSL → SPIR-V compiler backends.
//!
//! The engine never links a compiler directly. A backend implements
//! [`ShaderCompiler`], reports the interface version it was written against,
//! and is admitted through [`attach`] (or located by name through
//! [`discover`]). A backend built against a different interface version is
//! refused up front instead of failing in the middle of a pipeline build.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};
use crate::shader::ShaderStage;

/// Interface version a backend must report to be attached.
pub const COMPILER_INTERFACE_VERSION: u32 = 1;

/// Narrow compile capability consumed by the shader loader.
///
/// `compile` returns SPIR-V words, or the compiler's diagnostic text verbatim.
pub trait ShaderCompiler {
    fn backend_name(&self) -> &str;

    fn interface_version(&self) -> u32 {
        COMPILER_INTERFACE_VERSION
    }

    fn compile(
        &self,
        name: &str,
        source: &str,
        stage: ShaderStage,
        optimize: bool,
    ) -> std::result::Result<Vec<u32>, String>;
}

impl<C: ShaderCompiler + ?Sized> ShaderCompiler for Box<C> {
    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }
    fn interface_version(&self) -> u32 {
        (**self).interface_version()
    }
    fn compile(&self, name: &str, source: &str, stage: ShaderStage, optimize: bool) -> std::result::Result<Vec<u32>, String> {
        (**self).compile(name, source, stage, optimize)
    }
}

/// Verify a backend's version token before handing it to a loader.
pub fn attach(compiler: Box<dyn ShaderCompiler>) -> Result<Box<dyn ShaderCompiler>> {
    let found = compiler.interface_version();
    if found != COMPILER_INTERFACE_VERSION {
        return Err(Error::CompilerVersion {
            backend: compiler.backend_name().to_string(),
            found,
            expected: COMPILER_INTERFACE_VERSION,
        });
    }
    log::info!("attached shader compiler '{}' (interface v{found})", compiler.backend_name());
    Ok(compiler)
}

/// Names of the backends compiled into this build.
pub fn available_backends() -> &'static [&'static str] {
    #[cfg(feature = "shaderc")]
    {
        &["shaderc"]
    }
    #[cfg(not(feature = "shaderc"))]
    {
        &[]
    }
}

/// Locate a compiled-in backend by name (or the first one when `name` is `None`)
/// and attach it.
pub fn discover(name: Option<&str>) -> Result<Box<dyn ShaderCompiler>> {
    let wanted = match name {
        Some(n) => n,
        None => available_backends()
            .first()
            .copied()
            .ok_or_else(|| Error::CompilerUnavailable("no backend compiled in; enable the 'shaderc' feature".into()))?,
    };
    match wanted {
        #[cfg(feature = "shaderc")]
        "shaderc" => attach(Box::new(shaderc_backend::ShadercCompiler::new()?)),
        other => Err(Error::CompilerUnavailable(format!(
            "unknown backend '{other}' (available: {:?})",
            available_backends()
        ))),
    }
}

/// A loader with no compiler attached: every source-based shader fails.
/// Bytecode descriptors still resolve.
#[derive(Debug, Default)]
pub struct NoCompiler;

impl ShaderCompiler for NoCompiler {
    fn backend_name(&self) -> &str {
        "none"
    }
    fn compile(&self, name: &str, _source: &str, _stage: ShaderStage, _optimize: bool) -> std::result::Result<Vec<u32>, String> {
        Err(format!("no shader compiler attached, cannot compile '{name}'; supply SPIR-V instead"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    source_hash: u64,
    stage: ShaderStage,
    optimize: bool,
}

impl CacheKey {
    fn new(source: &str, stage: ShaderStage, optimize: bool) -> Self {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        Self { source_hash: hasher.finish(), stage, optimize }
    }
}

struct CacheEntry {
    source: String,
    words: Vec<u32>,
}

/// Content-addressed cache in front of another compiler.
///
/// Keyed on (source hash, stage, optimize); a hit also compares the stored
/// source text, so a hash collision recompiles instead of returning foreign
/// bytecode. The shader name is not part of the key, so two files with
/// identical text share one entry. Failures are not cached.
pub struct CachingCompiler<C> {
    inner: C,
    entries: RefCell<HashMap<CacheKey, CacheEntry>>,
    hits: RefCell<u64>,
}

impl<C: ShaderCompiler> CachingCompiler<C> {
    pub fn new(inner: C) -> Self {
        Self { inner, entries: RefCell::new(HashMap::new()), hits: RefCell::new(0) }
    }

    pub fn hits(&self) -> u64 {
        *self.hits.borrow()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl<C: ShaderCompiler> ShaderCompiler for CachingCompiler<C> {
    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn interface_version(&self) -> u32 {
        self.inner.interface_version()
    }

    fn compile(&self, name: &str, source: &str, stage: ShaderStage, optimize: bool) -> std::result::Result<Vec<u32>, String> {
        let key = CacheKey::new(source, stage, optimize);

        if let Some(entry) = self.entries.borrow().get(&key) {
            if entry.source == source {
                *self.hits.borrow_mut() += 1;
                log::debug!("shader cache hit for '{name}' ({stage})");
                return Ok(entry.words.clone());
            }
            log::debug!("shader cache collision for '{name}' ({stage}), recompiling");
        }
        let words = self.inner.compile(name, source, stage, optimize)?;
        self.entries
            .borrow_mut()
            .insert(key, CacheEntry { source: source.to_string(), words: words.clone() });
        Ok(words)
    }
}

#[cfg(feature = "shaderc")]
mod shaderc_backend {
    use super::ShaderCompiler;
    use crate::error::{Error, Result};
    use crate::shader::ShaderStage;

    pub struct ShadercCompiler {
        compiler: shaderc::Compiler,
    }

    impl ShadercCompiler {
        pub fn new() -> Result<Self> {
            let compiler = shaderc::Compiler::new()
                .ok_or_else(|| Error::CompilerUnavailable("shaderc compiler could not be created".into()))?;
            Ok(Self { compiler })
        }
    }

    fn kind_of(stage: ShaderStage) -> shaderc::ShaderKind {
        match stage {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
            ShaderStage::Compute => shaderc::ShaderKind::Compute,
            ShaderStage::Geometry => shaderc::ShaderKind::Geometry,
            ShaderStage::TessControl => shaderc::ShaderKind::TessControl,
            ShaderStage::TessEvaluation => shaderc::ShaderKind::TessEvaluation,
        }
    }

    impl ShaderCompiler for ShadercCompiler {
        fn backend_name(&self) -> &str {
            "shaderc"
        }

        fn compile(&self, name: &str, source: &str, stage: ShaderStage, optimize: bool) -> std::result::Result<Vec<u32>, String> {
            let mut opts = shaderc::CompileOptions::new().ok_or_else(|| "shaderc options unavailable".to_string())?;
            opts.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_1 as u32);
            if optimize {
                opts.set_optimization_level(shaderc::OptimizationLevel::Size);
            }
            let bin = self
                .compiler
                .compile_into_spirv(source, kind_of(stage), name, "main", Some(&opts))
                .map_err(|e| e.to_string())?;
            Ok(bin.as_binary().to_vec())
        }
    }
}
