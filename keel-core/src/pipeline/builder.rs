//! Order-enforcing pipeline construction.
//!
//! A [`PipelineBuilder`] walks a fixed sequence of stages. Each `add_*` call
//! consumes the builder and hands it back only if it was called from the one
//! state allowed to precede it, so skipping, repeating or reordering a stage
//! is an [`Error::InvalidStateTransition`]. Render subpasses are the only
//! repeatable stage; the render pass is created from the first one. After [`end`](PipelineBuilder::end), [`build`](PipelineBuilder::build)
//! creates every native object in one call.
//!
//! ```no_run
//! # use keel_core::pipeline::*;
//! # use keel_core::shader::{ShaderDesc, ShaderLoader};
//! # fn demo(device: &ash::Device, target: SwapTarget, loader: &ShaderLoader) -> keel_core::Result<()> {
//! let pipeline = PipelineBuilder::begin(target, loader)
//!     .add_vertex_input(VertexInputInfo::default())?
//!     .add_input_assembly(InputAssemblyInfo::default())?
//!     .add_viewport(ViewportInfo::default())?
//!     .add_vertex_shader(&ShaderDesc::bytecode_path("tri.vert.spv"))?
//!     .add_rasterizer(RasterizerInfo::default())?
//!     .add_multisampler(MultisampleInfo::default())?
//!     .add_fragment_shader(&ShaderDesc::bytecode_path("tri.frag.spv"))?
//!     .add_color_blending(ColorBlendInfo::default())?
//!     .add_layouts(LayoutsInfo::default())?
//!     .add_render_subpass(SubpassInfo::default())?
//!     .end()?
//!     .build(device)?;
//! # drop(pipeline);
//! # Ok(())
//! # }
//! ```

use std::fmt;

use super::create::{self, GraphicsPipeline, PipelineDevice, PipelineRecipe};
use super::desc::{
    ColorBlendInfo, InputAssemblyInfo, LayoutsInfo, MultisampleInfo, RasterizerInfo, SubpassInfo, SwapTarget, VertexInputInfo,
    ViewportInfo,
};
use crate::error::{Error, Result};
use crate::shader::{ShaderDesc, ShaderLoader, ShaderStage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildState {
    Start,
    VertexInput,
    InputAssembly,
    Viewport,
    VertexShader,
    Rasterizer,
    Multisampler,
    FragmentShader,
    ColorBlending,
    Layouts,
    RenderSubpass,
    Done,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct PipelineBuilder<'l> {
    state: BuildState,
    target: SwapTarget,
    loader: &'l ShaderLoader,
    recipe: PipelineRecipe,
    settled: bool,
}

impl<'l> PipelineBuilder<'l> {
    pub fn begin(target: SwapTarget, loader: &'l ShaderLoader) -> Self {
        Self { state: BuildState::Start, target, loader, recipe: PipelineRecipe::new(target), settled: false }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn target(&self) -> SwapTarget {
        self.target
    }

    /// Stage data collected so far, defaults substituted.
    pub fn recipe(&self) -> &PipelineRecipe {
        &self.recipe
    }

    fn require(&self, entering: BuildState, expected: &[BuildState]) -> Result<()> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition { entering, expected: expected.to_vec(), actual: self.state })
        }
    }

    fn enter(&mut self, next: BuildState) {
        log::debug!("pipeline builder: {} -> {}", self.state, next);
        self.state = next;
    }

    pub fn add_vertex_input(mut self, info: VertexInputInfo) -> Result<Self> {
        self.require(BuildState::VertexInput, &[BuildState::Start])?;
        self.recipe.vertex_input = info.or_neutral();
        self.enter(BuildState::VertexInput);
        Ok(self)
    }

    pub fn add_input_assembly(mut self, info: InputAssemblyInfo) -> Result<Self> {
        self.require(BuildState::InputAssembly, &[BuildState::VertexInput])?;
        self.recipe.input_assembly = info.or_neutral();
        self.enter(BuildState::InputAssembly);
        Ok(self)
    }

    pub fn add_viewport(mut self, info: ViewportInfo) -> Result<Self> {
        self.require(BuildState::Viewport, &[BuildState::InputAssembly])?;
        self.recipe.viewport = info.or_neutral(self.target.extent);
        self.enter(BuildState::Viewport);
        Ok(self)
    }

    /// Resolves the shader to SPIR-V now; compile errors surface here.
    pub fn add_vertex_shader(mut self, desc: &ShaderDesc) -> Result<Self> {
        self.require(BuildState::VertexShader, &[BuildState::Viewport])?;
        self.recipe.vertex_code = self.loader.resolve(desc, ShaderStage::Vertex)?;
        self.enter(BuildState::VertexShader);
        Ok(self)
    }

    pub fn add_rasterizer(mut self, info: RasterizerInfo) -> Result<Self> {
        self.require(BuildState::Rasterizer, &[BuildState::VertexShader])?;
        self.recipe.rasterizer = info.or_neutral();
        self.enter(BuildState::Rasterizer);
        Ok(self)
    }

    pub fn add_multisampler(mut self, info: MultisampleInfo) -> Result<Self> {
        self.require(BuildState::Multisampler, &[BuildState::Rasterizer])?;
        self.recipe.multisample = info.or_neutral();
        self.enter(BuildState::Multisampler);
        Ok(self)
    }

    pub fn add_fragment_shader(mut self, desc: &ShaderDesc) -> Result<Self> {
        self.require(BuildState::FragmentShader, &[BuildState::Multisampler])?;
        self.recipe.fragment_code = self.loader.resolve(desc, ShaderStage::Fragment)?;
        self.enter(BuildState::FragmentShader);
        Ok(self)
    }

    pub fn add_color_blending(mut self, info: ColorBlendInfo) -> Result<Self> {
        self.require(BuildState::ColorBlending, &[BuildState::FragmentShader])?;
        self.recipe.color_blend = info.or_neutral();
        self.enter(BuildState::ColorBlending);
        Ok(self)
    }

    pub fn add_layouts(mut self, info: LayoutsInfo) -> Result<Self> {
        self.require(BuildState::Layouts, &[BuildState::ColorBlending])?;
        self.recipe.layouts = info.or_neutral();
        self.enter(BuildState::Layouts);
        Ok(self)
    }

    /// May be called repeatedly; each call records one subpass. The render pass
    /// is built from the first record and the pipeline binds it.
    pub fn add_render_subpass(mut self, info: SubpassInfo) -> Result<Self> {
        self.require(BuildState::RenderSubpass, &[BuildState::Layouts, BuildState::RenderSubpass])?;
        self.recipe.subpasses.push(info.or_neutral());
        self.enter(BuildState::RenderSubpass);
        Ok(self)
    }

    pub fn end(mut self) -> Result<Self> {
        self.require(BuildState::Done, &[BuildState::RenderSubpass])?;
        self.enter(BuildState::Done);
        Ok(self)
    }

    /// Create the pipeline on `device`. Only valid after [`end`](Self::end).
    pub fn build<'d, D: PipelineDevice>(mut self, device: &'d D) -> Result<GraphicsPipeline<'d, D>> {
        if self.state != BuildState::Done {
            return Err(Error::UnfinishedPipeline { state: self.state });
        }
        self.settled = true;
        create::finalize(device, &self.recipe)
    }

    /// Give up on the builder, reporting whether construction was complete.
    pub fn close(mut self) -> Result<()> {
        self.settled = true;
        match self.state {
            BuildState::Done => Ok(()),
            state => Err(Error::UnfinishedPipeline { state }),
        }
    }
}

impl Drop for PipelineBuilder<'_> {
    fn drop(&mut self) {
        if !self.settled && self.state != BuildState::Done {
            log::error!("pipeline builder dropped in state {}, expected {}; no pipeline was created", self.state, BuildState::Done);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::desc::CullMode;
    use crate::pipeline::fake::{Call, FakeDevice};
    use ash::vk;

    fn target() -> SwapTarget {
        SwapTarget { format: vk::Format::B8G8R8A8_SRGB, extent: vk::Extent2D { width: 800, height: 600 } }
    }

    fn spirv() -> ShaderDesc {
        ShaderDesc::bytecode(vec![0x0723_0203, 0x0001_0000, 0, 1, 0])
    }

    fn up_to_layouts(loader: &ShaderLoader) -> Result<PipelineBuilder<'_>> {
        PipelineBuilder::begin(target(), loader)
            .add_vertex_input(VertexInputInfo::default())?
            .add_input_assembly(InputAssemblyInfo::default())?
            .add_viewport(ViewportInfo::default())?
            .add_vertex_shader(&spirv())?
            .add_rasterizer(RasterizerInfo::default())?
            .add_multisampler(MultisampleInfo::default())?
            .add_fragment_shader(&spirv())?
            .add_color_blending(ColorBlendInfo::default())?
            .add_layouts(LayoutsInfo::default())
    }

    #[test]
    fn out_of_order_stage_is_rejected() {
        let loader = ShaderLoader::default();
        let err = PipelineBuilder::begin(target(), &loader).add_input_assembly(InputAssemblyInfo::default()).err().unwrap();
        match err {
            Error::InvalidStateTransition { entering, expected, actual } => {
                assert_eq!(entering, BuildState::InputAssembly);
                assert_eq!(expected, vec![BuildState::VertexInput]);
                assert_eq!(actual, BuildState::Start);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn repeating_a_stage_is_rejected() {
        let loader = ShaderLoader::default();
        let res = PipelineBuilder::begin(target(), &loader)
            .add_vertex_input(VertexInputInfo::default())
            .and_then(|b| b.add_vertex_input(VertexInputInfo::default()));
        assert!(matches!(res, Err(Error::InvalidStateTransition { actual: BuildState::VertexInput, .. })));
    }

    #[test]
    fn full_sequence_builds_live_objects() {
        let loader = ShaderLoader::default();
        let device = FakeDevice::default();
        let pipeline = up_to_layouts(&loader)
            .and_then(|b| b.add_render_subpass(SubpassInfo::default()))
            .and_then(PipelineBuilder::end)
            .and_then(|b| b.build(&device))
            .unwrap();

        assert_ne!(pipeline.pipeline(), vk::Pipeline::null());
        assert_ne!(pipeline.layout(), vk::PipelineLayout::null());
        assert_ne!(pipeline.render_pass(), vk::RenderPass::null());
        assert_eq!(device.live_of(Call::ShaderModule), 0);
        drop(pipeline);
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn cannot_finish_without_shader_stages() {
        let loader = ShaderLoader::default();
        let res = PipelineBuilder::begin(target(), &loader)
            .add_vertex_input(VertexInputInfo::default())
            .and_then(|b| b.add_input_assembly(InputAssemblyInfo::default()))
            .and_then(|b| b.add_viewport(ViewportInfo::default()))
            .and_then(|b| b.add_rasterizer(RasterizerInfo::default()));
        assert!(matches!(
            res,
            Err(Error::InvalidStateTransition { entering: BuildState::Rasterizer, actual: BuildState::Viewport, .. })
        ));

        let no_fragment = PipelineBuilder::begin(target(), &loader)
            .add_vertex_input(VertexInputInfo::default())
            .and_then(|b| b.add_input_assembly(InputAssemblyInfo::default()))
            .and_then(|b| b.add_viewport(ViewportInfo::default()))
            .and_then(|b| b.add_vertex_shader(&spirv()))
            .and_then(|b| b.add_rasterizer(RasterizerInfo::default()))
            .and_then(|b| b.add_multisampler(MultisampleInfo::default()))
            .and_then(|b| b.add_color_blending(ColorBlendInfo::default()));
        assert!(matches!(
            no_fragment,
            Err(Error::InvalidStateTransition { entering: BuildState::ColorBlending, actual: BuildState::Multisampler, .. })
        ));

        let early = PipelineBuilder::begin(target(), &loader).end();
        assert!(matches!(early, Err(Error::InvalidStateTransition { entering: BuildState::Done, .. })));
    }

    #[test]
    fn end_requires_a_subpass() {
        let loader = ShaderLoader::default();
        let res = up_to_layouts(&loader).and_then(PipelineBuilder::end);
        assert!(matches!(
            res,
            Err(Error::InvalidStateTransition { expected, actual: BuildState::Layouts, .. }) if expected == vec![BuildState::RenderSubpass]
        ));
    }

    #[test]
    fn repeated_subpasses_are_recorded_in_order() {
        let loader = ShaderLoader::default();
        let b = up_to_layouts(&loader)
            .and_then(|b| b.add_render_subpass(SubpassInfo::default()))
            .and_then(|b| b.add_render_subpass(SubpassInfo { use_defaults: false, color_attachments: vec![0] }))
            .and_then(PipelineBuilder::end)
            .unwrap();
        assert_eq!(b.recipe().subpasses.len(), 2);
        assert!(b.recipe().subpasses.iter().all(|s| s.color_attachments == vec![0]));
        assert!(b.close().is_ok());
    }

    #[test]
    fn build_before_end_fails() {
        let loader = ShaderLoader::default();
        let device = FakeDevice::default();
        let res = up_to_layouts(&loader).and_then(|b| b.build(&device));
        assert!(matches!(res, Err(Error::UnfinishedPipeline { state: BuildState::Layouts })));
        assert!(device.created.borrow().is_empty());
    }

    #[test]
    fn defaults_are_substituted_per_stage() {
        let loader = ShaderLoader::default();
        let b = up_to_layouts(&loader).unwrap();
        let r = b.recipe();
        assert!(!r.viewport.use_defaults);
        assert_eq!(r.viewport.scissor.width, 800);
        assert_eq!(r.viewport.viewport.height, 600.0);
        assert_eq!(r.rasterizer.cull_mode, CullMode::None);
        assert_eq!(r.multisample.samples, 1);
        assert!(!r.color_blend.enable);
        assert!(r.layouts.set_layouts.is_empty());
        assert!(b.close().is_err());
    }

    #[test]
    fn explicit_records_reach_the_device() {
        let loader = ShaderLoader::default();
        let device = FakeDevice::default();
        let _pipeline = PipelineBuilder::begin(target(), &loader)
            .add_vertex_input(VertexInputInfo::default())
            .and_then(|b| b.add_input_assembly(InputAssemblyInfo::default()))
            .and_then(|b| b.add_viewport(ViewportInfo::default()))
            .and_then(|b| b.add_vertex_shader(&spirv()))
            .and_then(|b| b.add_rasterizer(RasterizerInfo { cull_mode: CullMode::Back, ..RasterizerInfo::neutral() }))
            .and_then(|b| b.add_multisampler(MultisampleInfo::default()))
            .and_then(|b| b.add_fragment_shader(&spirv()))
            .and_then(|b| b.add_color_blending(ColorBlendInfo::enabled(true)))
            .and_then(|b| b.add_layouts(LayoutsInfo::default()))
            .and_then(|b| b.add_render_subpass(SubpassInfo::default()))
            .and_then(|b| b.add_render_subpass(SubpassInfo::default()))
            .and_then(PipelineBuilder::end)
            .and_then(|b| b.build(&device))
            .unwrap();
        let seen = device.seen.borrow();
        assert_eq!(seen.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(seen.blend_enable, vk::TRUE);
        assert_eq!(seen.subpasses, 1);
        assert_eq!(seen.pipeline_subpass, 0);
    }

    #[test]
    fn shader_failure_surfaces_at_the_stage() {
        let loader = ShaderLoader::default();
        let res = PipelineBuilder::begin(target(), &loader)
            .add_vertex_input(VertexInputInfo::default())
            .and_then(|b| b.add_input_assembly(InputAssemblyInfo::default()))
            .and_then(|b| b.add_viewport(ViewportInfo::default()))
            .and_then(|b| b.add_vertex_shader(&ShaderDesc::inline("tri.vert", "void main() {}")));
        assert!(matches!(res, Err(Error::ShaderCompilation { stage: ShaderStage::Vertex, .. })));
    }

    #[test]
    fn close_reports_completion() {
        let loader = ShaderLoader::default();
        let done = up_to_layouts(&loader)
            .and_then(|b| b.add_render_subpass(SubpassInfo::default()))
            .and_then(PipelineBuilder::end)
            .unwrap();
        assert!(done.close().is_ok());

        let abandoned = PipelineBuilder::begin(target(), &loader);
        assert!(matches!(abandoned.close(), Err(Error::UnfinishedPipeline { state: BuildState::Start })));
    }
}
