//! In-memory [`PipelineDevice`] for tests.

use std::cell::{Cell, RefCell};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use super::create::PipelineDevice;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    ShaderModule,
    PipelineLayout,
    RenderPass,
    Pipeline,
}

/// Fields read out of the last create infos.
#[derive(Debug, Default)]
pub struct Seen {
    pub subpasses: u32,
    pub color_refs: Vec<u32>,
    pub dependencies: u32,
    pub attachment_format: vk::Format,
    pub stages: u32,
    pub pipeline_subpass: u32,
    pub set_layouts: usize,
    pub cull_mode: vk::CullModeFlags,
    pub blend_enable: vk::Bool32,
}

#[derive(Default)]
pub struct FakeDevice {
    next: Cell<u64>,
    fail_at: Option<usize>,
    live: RefCell<Vec<(Call, u64)>>,
    pub created: RefCell<Vec<Call>>,
    pub destroyed: RefCell<Vec<Call>>,
    pub seen: RefCell<Seen>,
}

impl FakeDevice {
    /// Fail the `n`th create call (0-based) with out-of-device-memory.
    pub fn failing_at(n: usize) -> Self {
        Self { fail_at: Some(n), ..Default::default() }
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn live_of(&self, call: Call) -> usize {
        self.live.borrow().iter().filter(|(c, _)| *c == call).count()
    }

    fn create(&self, call: Call) -> VkResult<u64> {
        if self.fail_at == Some(self.created.borrow().len()) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let id = self.next.get() + 1;
        self.next.set(id);
        self.created.borrow_mut().push(call);
        self.live.borrow_mut().push((call, id));
        Ok(id)
    }

    fn destroy(&self, call: Call, raw: u64) {
        let mut live = self.live.borrow_mut();
        let pos = live
            .iter()
            .position(|&(c, id)| c == call && id == raw)
            .unwrap_or_else(|| panic!("{call:?} {raw} destroyed but not live"));
        live.remove(pos);
        self.destroyed.borrow_mut().push(call);
    }
}

impl PipelineDevice for FakeDevice {
    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        assert!(!code.is_empty());
        self.create(Call::ShaderModule).map(vk::ShaderModule::from_raw)
    }
    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy(Call::ShaderModule, module.as_raw());
    }
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout]) -> VkResult<vk::PipelineLayout> {
        self.seen.borrow_mut().set_layouts = set_layouts.len();
        self.create(Call::PipelineLayout).map(vk::PipelineLayout::from_raw)
    }
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy(Call::PipelineLayout, layout.as_raw());
    }
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        {
            let mut seen = self.seen.borrow_mut();
            seen.subpasses = info.subpass_count;
            seen.dependencies = info.dependency_count;
            // SAFETY: finalize keeps the attachment, subpass and reference arrays alive for this call.
            unsafe {
                seen.attachment_format = (*info.p_attachments).format;
                let subpass = &*info.p_subpasses;
                seen.color_refs = (0..subpass.color_attachment_count as usize)
                    .map(|i| (*subpass.p_color_attachments.add(i)).attachment)
                    .collect();
            }
        }
        self.create(Call::RenderPass).map(vk::RenderPass::from_raw)
    }
    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy(Call::RenderPass, render_pass.as_raw());
    }
    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> VkResult<vk::Pipeline> {
        {
            let mut seen = self.seen.borrow_mut();
            seen.stages = info.stage_count;
            seen.pipeline_subpass = info.subpass;
            // SAFETY: finalize keeps every referenced state struct alive for this call.
            unsafe {
                seen.cull_mode = (*info.p_rasterization_state).cull_mode;
                seen.blend_enable = (*(*info.p_color_blend_state).p_attachments).blend_enable;
            }
        }
        self.create(Call::Pipeline).map(vk::Pipeline::from_raw)
    }
    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy(Call::Pipeline, pipeline.as_raw());
    }
}
