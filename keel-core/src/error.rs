use std::fmt;
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

use crate::pipeline::BuildState;
use crate::shader::ShaderStage;

/// Native object kinds created by the engine, used to say which call failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Artifact {
    Instance,
    DebugMessenger,
    Surface,
    Device,
    Swapchain,
    ImageView,
    ShaderModule(ShaderStage),
    PipelineLayout,
    RenderPass,
    Pipeline,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Instance => f.write_str("instance"),
            Artifact::DebugMessenger => f.write_str("debug messenger"),
            Artifact::Surface => f.write_str("surface"),
            Artifact::Device => f.write_str("logical device"),
            Artifact::Swapchain => f.write_str("swapchain"),
            Artifact::ImageView => f.write_str("swapchain image view"),
            Artifact::ShaderModule(stage) => write!(f, "{stage} shader module"),
            Artifact::PipelineLayout => f.write_str("pipeline layout"),
            Artifact::RenderPass => f.write_str("render pass"),
            Artifact::Pipeline => f.write_str("graphics pipeline"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no usable physical device among {candidates} candidate(s)")]
    SelectionExhausted { candidates: usize },

    #[error("cannot enter {entering}: builder must be in one of {} but is in {actual}", StateList(.expected))]
    InvalidStateTransition {
        entering: BuildState,
        expected: Vec<BuildState>,
        actual: BuildState,
    },

    #[error("pipeline construction abandoned in state {state}, expected {}", BuildState::Done)]
    UnfinishedPipeline { state: BuildState },

    #[error("failed to compile {stage} shader '{name}':\n{diagnostic}")]
    ShaderCompilation {
        name: String,
        stage: ShaderStage,
        diagnostic: String,
    },

    #[error("render subpass #{index} is invalid: {reason}")]
    InvalidSubpass { index: usize, reason: String },

    #[error("shader '{name}' resolved to empty bytecode")]
    EmptyShader { name: String },

    #[error("failed to create {artifact}: {result}")]
    NativeCreation { artifact: Artifact, result: vk::Result },

    #[error("native call {call} failed: {result}")]
    NativeQuery { call: &'static str, result: vk::Result },

    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load config '{}': {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("shader compiler unavailable: {0}")]
    CompilerUnavailable(String),

    #[error("shader compiler '{backend}' speaks interface v{found}, expected v{expected}")]
    CompilerVersion {
        backend: String,
        found: u32,
        expected: u32,
    },

    #[error("failed to load the Vulkan library: {0}")]
    Loader(String),

    #[error("windowing platform already initialized in this process")]
    PlatformAlreadyInitialized,

    #[error("window error: {0}")]
    Window(String),

    #[error("debug mode requested but VK_LAYER_KHRONOS_validation is not installed")]
    MissingValidationLayer,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    pub(crate) fn native(artifact: Artifact) -> impl FnOnce(vk::Result) -> Self {
        move |result| Error::NativeCreation { artifact, result }
    }

    pub(crate) fn query(call: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Error::NativeQuery { call, result }
    }
}

struct StateList<'a>(&'a [BuildState]);

impl fmt::Display for StateList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, state) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{state}")?;
        }
        f.write_str("}")
    }
}
