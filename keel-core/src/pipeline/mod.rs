//! Graphics pipeline construction: stage records, vk mapping, the builder
//! state machine and the final creation call.

pub mod bridge;
pub mod builder;
pub mod create;
pub mod desc;

#[cfg(test)]
pub(crate) mod fake;

pub use builder::{BuildState, PipelineBuilder};
pub use create::{finalize, GraphicsPipeline, PipelineDevice, PipelineObjects, PipelineRecipe};
pub use desc::{
    AttrFormat, ColorBlendInfo, CullMode, FrontFace, InputAssemblyInfo, LayoutsInfo, MultisampleInfo, PolygonMode,
    RasterizerInfo, Scissor, StepMode, SubpassInfo, SwapTarget, Topology, VertexAttribute, VertexBinding, VertexInputInfo,
    Viewport, ViewportInfo,
};
