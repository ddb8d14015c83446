//! The one irreversible step: turning a finished recipe into native objects.

use std::ffi::CStr;
use std::mem;

use ash::prelude::VkResult;
use ash::vk;

use super::bridge;
use super::desc::{
    ColorBlendInfo, InputAssemblyInfo, LayoutsInfo, MultisampleInfo, RasterizerInfo, SubpassInfo, SwapTarget, VertexInputInfo,
    ViewportInfo,
};
use crate::error::{Artifact, Error, Result};
use crate::shader::ShaderStage;

// SAFETY: the literal is nul-terminated and has no interior nul.
const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Attachments in the render pass, and blend attachments in the pipeline.
pub const COLOR_ATTACHMENT_COUNT: u32 = 1;

/// The device calls pipeline creation needs.
///
/// Implemented for [`ash::Device`]; tests substitute an in-memory fake.
pub trait PipelineDevice {
    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
}

// SAFETY (all methods): create infos are built by `finalize` from live locals,
// and destroyed handles were created by this device and are no longer in use.
impl PipelineDevice for ash::Device {
    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { ash::Device::create_shader_module(self, &info, None) }
    }
    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { ash::Device::destroy_shader_module(self, module, None) }
    }
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        unsafe { ash::Device::create_pipeline_layout(self, &info, None) }
    }
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { ash::Device::destroy_pipeline_layout(self, layout, None) }
    }
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        unsafe { ash::Device::create_render_pass(self, info, None) }
    }
    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { ash::Device::destroy_render_pass(self, render_pass, None) }
    }
    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline> {
        let pipelines = unsafe {
            ash::Device::create_graphics_pipelines(self, vk::PipelineCache::null(), std::slice::from_ref(info), None)
        }
        .map_err(|(_, e)| e)?;
        pipelines.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }
    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { ash::Device::destroy_pipeline(self, pipeline, None) }
    }
}

/// Everything the builder collected, defaults already substituted.
#[derive(Clone, Debug)]
pub struct PipelineRecipe {
    pub color_format: vk::Format,
    pub vertex_input: VertexInputInfo,
    pub input_assembly: InputAssemblyInfo,
    pub viewport: ViewportInfo,
    pub vertex_code: Vec<u32>,
    pub rasterizer: RasterizerInfo,
    pub multisample: MultisampleInfo,
    pub fragment_code: Vec<u32>,
    pub color_blend: ColorBlendInfo,
    pub layouts: LayoutsInfo,
    pub subpasses: Vec<SubpassInfo>,
}

impl PipelineRecipe {
    /// Neutral values for every stage, no shader code, no subpasses.
    pub fn new(target: SwapTarget) -> Self {
        Self {
            color_format: target.format,
            vertex_input: VertexInputInfo::neutral(),
            input_assembly: InputAssemblyInfo::neutral(),
            viewport: ViewportInfo::neutral(target.extent),
            vertex_code: Vec::new(),
            rasterizer: RasterizerInfo::neutral(),
            multisample: MultisampleInfo::neutral(),
            fragment_code: Vec::new(),
            color_blend: ColorBlendInfo::neutral(),
            layouts: LayoutsInfo::neutral(),
            subpasses: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineObjects {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

/// A created pipeline. Borrows the device, so the device outlives it;
/// dropping destroys pipeline, render pass, then layout.
pub struct GraphicsPipeline<'d, D: PipelineDevice> {
    device: &'d D,
    objects: PipelineObjects,
}

impl<'d, D: PipelineDevice> GraphicsPipeline<'d, D> {
    pub fn pipeline(&self) -> vk::Pipeline { self.objects.pipeline }
    pub fn layout(&self) -> vk::PipelineLayout { self.objects.layout }
    pub fn render_pass(&self) -> vk::RenderPass { self.objects.render_pass }
    pub fn objects(&self) -> PipelineObjects { self.objects }
}

impl<D: PipelineDevice> Drop for GraphicsPipeline<'_, D> {
    fn drop(&mut self) {
        self.device.destroy_pipeline(self.objects.pipeline);
        self.device.destroy_render_pass(self.objects.render_pass);
        self.device.destroy_pipeline_layout(self.objects.layout);
        log::debug!("destroyed graphics pipeline {:?}", self.objects.pipeline);
    }
}

/// Objects created so far in one attempt. Whatever is still held on drop is
/// destroyed; shader modules are always held.
struct Staged<'d, D: PipelineDevice> {
    device: &'d D,
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
}

impl<'d, D: PipelineDevice> Staged<'d, D> {
    fn new(device: &'d D) -> Self {
        Self {
            device,
            vert: vk::ShaderModule::null(),
            frag: vk::ShaderModule::null(),
            layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
        }
    }

    fn commit(mut self, pipeline: vk::Pipeline) -> PipelineObjects {
        PipelineObjects { render_pass: mem::take(&mut self.render_pass), layout: mem::take(&mut self.layout), pipeline }
    }
}

impl<D: PipelineDevice> Drop for Staged<'_, D> {
    fn drop(&mut self) {
        if self.render_pass != vk::RenderPass::null() {
            self.device.destroy_render_pass(self.render_pass);
        }
        if self.layout != vk::PipelineLayout::null() {
            self.device.destroy_pipeline_layout(self.layout);
        }
        for module in [self.frag, self.vert] {
            if module != vk::ShaderModule::null() {
                self.device.destroy_shader_module(module);
            }
        }
    }
}

/// Create shader modules, layout, render pass and pipeline, in that order.
/// On failure every object created by this call is destroyed again.
pub fn finalize<'d, D: PipelineDevice>(device: &'d D, recipe: &PipelineRecipe) -> Result<GraphicsPipeline<'d, D>> {
    for (stage, code) in [(ShaderStage::Vertex, &recipe.vertex_code), (ShaderStage::Fragment, &recipe.fragment_code)] {
        if code.is_empty() {
            return Err(Error::EmptyShader { name: format!("{stage} stage") });
        }
    }

    check_subpasses(&recipe.subpasses)?;

    let mut staged = Staged::new(device);
    staged.vert = device
        .create_shader_module(&recipe.vertex_code)
        .map_err(Error::native(Artifact::ShaderModule(ShaderStage::Vertex)))?;
    staged.frag = device
        .create_shader_module(&recipe.fragment_code)
        .map_err(Error::native(Artifact::ShaderModule(ShaderStage::Fragment)))?;
    staged.layout = device
        .create_pipeline_layout(&recipe.layouts.set_layouts)
        .map_err(Error::native(Artifact::PipelineLayout))?;
    staged.render_pass = create_render_pass(device, recipe).map_err(Error::native(Artifact::RenderPass))?;
    let pipeline = create_pipeline(device, recipe, &staged).map_err(Error::native(Artifact::Pipeline))?;

    let objects = staged.commit(pipeline);
    log::info!(
        "created graphics pipeline {:?} (layout {:?}, render pass {:?})",
        objects.pipeline,
        objects.layout,
        objects.render_pass
    );
    Ok(GraphicsPipeline { device, objects })
}

/// Every recorded subpass must write exactly the one colour attachment the
/// pipeline blends into.
pub fn check_subpasses(subpasses: &[SubpassInfo]) -> Result<()> {
    for (index, subpass) in subpasses.iter().enumerate() {
        let reason = match subpass.color_attachments.as_slice() {
            [] => "writes no colour attachment".to_string(),
            [a] if *a >= COLOR_ATTACHMENT_COUNT => {
                format!("references colour attachment {a} but the render pass has {COLOR_ATTACHMENT_COUNT}")
            }
            [_] => continue,
            many => format!("writes {} colour attachments but the pipeline blends {COLOR_ATTACHMENT_COUNT}", many.len()),
        };
        return Err(Error::InvalidSubpass { index, reason });
    }
    Ok(())
}

/// One subpass, described by the first recorded subpass; further records stay in the recipe only.
fn create_render_pass<D: PipelineDevice>(device: &D, recipe: &PipelineRecipe) -> VkResult<vk::RenderPass> {
    let attachment = bridge::color_attachment_from(recipe.color_format);
    let subpass_info = recipe.subpasses.first().cloned().unwrap_or_else(SubpassInfo::neutral);
    let refs = bridge::color_refs_from(&subpass_info.color_attachments);
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&refs)
        .build();
    let dependency = bridge::external_dependency();
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(std::slice::from_ref(&attachment))
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));
    device.create_render_pass(&info)
}

fn create_pipeline<D: PipelineDevice>(device: &D, recipe: &PipelineRecipe, staged: &Staged<'_, D>) -> VkResult<vk::Pipeline> {
    let stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(staged.vert)
            .name(ENTRY_POINT)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(staged.frag)
            .name(ENTRY_POINT)
            .build(),
    ];

    let (binding_descs, attr_descs) = bridge::vertex_input_from(&recipe.vertex_input);
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&binding_descs)
        .vertex_attribute_descriptions(&attr_descs);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(bridge::topology_from(recipe.input_assembly.topology))
        .primitive_restart_enable(recipe.input_assembly.primitive_restart);

    let (viewport, scissor) = bridge::viewport_from(&recipe.viewport);
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(std::slice::from_ref(&viewport))
        .scissors(std::slice::from_ref(&scissor));

    let raster = bridge::raster_state_from(&recipe.rasterizer);
    let multisample = bridge::multisample_state_from(&recipe.multisample);
    let blend_attachment = bridge::color_blend_attachment_from(&recipe.color_blend);
    let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(std::slice::from_ref(&blend_attachment));

    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&raster)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .layout(staged.layout)
        .render_pass(staged.render_pass)
        .subpass(0);
    device.create_graphics_pipeline(&info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fake::{Call, FakeDevice};

    fn recipe() -> PipelineRecipe {
        let mut r = PipelineRecipe::new(SwapTarget { format: vk::Format::B8G8R8A8_SRGB, extent: vk::Extent2D { width: 800, height: 600 } });
        r.vertex_code = vec![0x0723_0203, 1];
        r.fragment_code = vec![0x0723_0203, 2];
        r.subpasses.push(SubpassInfo::neutral());
        r
    }

    #[test]
    fn success_keeps_three_objects_and_drops_modules() {
        let device = FakeDevice::default();
        let pipeline = finalize(&device, &recipe()).unwrap();
        assert_eq!(
            *device.created.borrow(),
            vec![Call::ShaderModule, Call::ShaderModule, Call::PipelineLayout, Call::RenderPass, Call::Pipeline]
        );
        assert_eq!(device.live_of(Call::ShaderModule), 0);
        assert_eq!(device.live_count(), 3);
        assert_ne!(pipeline.pipeline(), vk::Pipeline::null());
        assert_ne!(pipeline.layout(), vk::PipelineLayout::null());
        assert_ne!(pipeline.render_pass(), vk::RenderPass::null());

        drop(pipeline);
        assert_eq!(device.live_count(), 0);
        let destroyed = device.destroyed.borrow();
        assert_eq!(&destroyed[destroyed.len() - 3..], &[Call::Pipeline, Call::RenderPass, Call::PipelineLayout]);
    }

    #[test]
    fn render_pass_has_one_subpass_however_many_are_recorded() {
        let device = FakeDevice::default();
        let mut r = recipe();
        r.subpasses.push(SubpassInfo::neutral());
        let _p = finalize(&device, &r).unwrap();
        let seen = device.seen.borrow();
        assert_eq!(seen.subpasses, 1);
        assert_eq!(seen.dependencies, 1);
        assert_eq!(seen.color_refs, vec![0]);
        assert_eq!(seen.attachment_format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(seen.pipeline_subpass, 0);
        assert_eq!(seen.stages, 2);
    }

    #[test]
    fn every_partial_failure_cleans_up() {
        let expected = [
            Artifact::ShaderModule(ShaderStage::Vertex),
            Artifact::ShaderModule(ShaderStage::Fragment),
            Artifact::PipelineLayout,
            Artifact::RenderPass,
            Artifact::Pipeline,
        ];
        for (step, artifact) in expected.into_iter().enumerate() {
            let device = FakeDevice::failing_at(step);
            match finalize(&device, &recipe()) {
                Err(Error::NativeCreation { artifact: a, result }) => {
                    assert_eq!(a, artifact);
                    assert_eq!(result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
                }
                Err(other) => panic!("step {step}: unexpected error {other}"),
                Ok(_) => panic!("step {step}: creation should fail"),
            }
            assert_eq!(device.live_count(), 0, "step {step} leaked objects");
            assert_eq!(device.destroyed.borrow().len(), step);
        }
    }

    #[test]
    fn empty_code_is_rejected_before_touching_the_device() {
        let device = FakeDevice::default();
        let mut r = recipe();
        r.fragment_code.clear();
        assert!(matches!(finalize(&device, &r), Err(Error::EmptyShader { .. })));
        assert!(device.created.borrow().is_empty());
    }

    #[test]
    fn missing_subpasses_get_one_default() {
        let device = FakeDevice::default();
        let mut r = recipe();
        r.subpasses.clear();
        let _p = finalize(&device, &r).unwrap();
        assert_eq!(device.seen.borrow().subpasses, 1);
    }

    #[test]
    fn out_of_range_attachment_is_rejected_before_touching_the_device() {
        let device = FakeDevice::default();
        let mut r = recipe();
        r.subpasses.push(SubpassInfo { use_defaults: false, color_attachments: vec![5] });
        match finalize(&device, &r) {
            Err(Error::InvalidSubpass { index, reason }) => {
                assert_eq!(index, 1);
                assert!(reason.contains("attachment 5"), "{reason}");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("attachment 5 does not exist"),
        }
        assert!(device.created.borrow().is_empty());
    }

    #[test]
    fn subpass_without_colour_output_is_rejected() {
        let device = FakeDevice::default();
        let mut r = recipe();
        r.subpasses[0].color_attachments.clear();
        assert!(matches!(finalize(&device, &r), Err(Error::InvalidSubpass { index: 0, .. })));

        r.subpasses[0].color_attachments = vec![0, 0];
        assert!(matches!(finalize(&device, &r), Err(Error::InvalidSubpass { index: 0, .. })));
        assert!(device.created.borrow().is_empty());
    }
}
