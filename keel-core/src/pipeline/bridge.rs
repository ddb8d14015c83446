//! Stage records to `ash::vk` structures.
//!
//! Nothing here touches a device; everything returned is plain data (or a
//! `.build()` struct without pointers) so it can be checked in tests.

use ash::vk;

use super::desc::{
    AttrFormat, ColorBlendInfo, CullMode, FrontFace, MultisampleInfo, PolygonMode, RasterizerInfo, StepMode, Topology,
    VertexInputInfo, ViewportInfo,
};

fn map_format(fmt: AttrFormat) -> vk::Format {
    match fmt {
        AttrFormat::F32 => vk::Format::R32_SFLOAT,
        AttrFormat::I32 => vk::Format::R32_SINT,
        AttrFormat::U32 => vk::Format::R32_UINT,
        AttrFormat::Vec2 => vk::Format::R32G32_SFLOAT,
        AttrFormat::Vec3 => vk::Format::R32G32B32_SFLOAT,
        AttrFormat::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
        AttrFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
    }
}

pub fn vertex_input_from(info: &VertexInputInfo) -> (Vec<vk::VertexInputBindingDescription>, Vec<vk::VertexInputAttributeDescription>) {
    let bindings = info
        .bindings
        .iter()
        .map(|b| {
            let input_rate = match b.step { StepMode::Vertex => vk::VertexInputRate::VERTEX, StepMode::Instance => vk::VertexInputRate::INSTANCE };
            vk::VertexInputBindingDescription { binding: b.binding, stride: b.stride, input_rate }
        })
        .collect();
    let attributes = info
        .attributes
        .iter()
        .map(|a| vk::VertexInputAttributeDescription { location: a.location, binding: a.binding, format: map_format(a.format), offset: a.offset })
        .collect();
    (bindings, attributes)
}

pub fn topology_from(topology: Topology) -> vk::PrimitiveTopology {
    match topology {
        Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
        Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

pub fn viewport_from(info: &ViewportInfo) -> (vk::Viewport, vk::Rect2D) {
    let v = info.viewport;
    let s = info.scissor;
    (
        vk::Viewport { x: v.x, y: v.y, width: v.width, height: v.height, min_depth: v.min_depth, max_depth: v.max_depth },
        vk::Rect2D { offset: vk::Offset2D { x: s.x, y: s.y }, extent: vk::Extent2D { width: s.width, height: s.height } },
    )
}

pub fn raster_state_from(info: &RasterizerInfo) -> vk::PipelineRasterizationStateCreateInfo {
    let poly = match info.polygon_mode { PolygonMode::Fill => vk::PolygonMode::FILL, PolygonMode::Line => vk::PolygonMode::LINE, PolygonMode::Point => vk::PolygonMode::POINT };
    let cull = match info.cull_mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
    };
    let ff = match info.front_face { FrontFace::Cw => vk::FrontFace::CLOCKWISE, FrontFace::Ccw => vk::FrontFace::COUNTER_CLOCKWISE };
    vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(poly)
        .cull_mode(cull)
        .front_face(ff)
        .line_width(info.line_width)
        .depth_clamp_enable(info.depth_clamp)
        .rasterizer_discard_enable(info.discard)
        .depth_bias_enable(false)
        .build()
}

/// Unsupported counts fall back to one sample.
pub fn samples_from(count: u32) -> vk::SampleCountFlags {
    match count {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

pub fn multisample_state_from(info: &MultisampleInfo) -> vk::PipelineMultisampleStateCreateInfo {
    vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(samples_from(info.samples))
        .sample_shading_enable(info.sample_shading)
        .min_sample_shading(info.min_sample_shading)
        .alpha_to_coverage_enable(false)
        .alpha_to_one_enable(false)
        .build()
}

pub fn color_blend_attachment_from(info: &ColorBlendInfo) -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::R | vk::ColorComponentFlags::G | vk::ColorComponentFlags::B | vk::ColorComponentFlags::A)
        .blend_enable(info.enable)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build()
}

/// The single presentable colour attachment: cleared, stored, handed to present.
pub fn color_attachment_from(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()
}

pub fn color_refs_from(indices: &[u32]) -> Vec<vk::AttachmentReference> {
    indices
        .iter()
        .map(|&attachment| vk::AttachmentReference { attachment, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL })
        .collect()
}

/// External → 0: the colour write waits for the presentation engine to release the image.
pub fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::desc::{VertexAttribute, VertexBinding};

    #[test]
    fn vertex_input_maps_rates_and_formats() {
        let info = VertexInputInfo::new(
            vec![VertexBinding { binding: 0, stride: 20, step: StepMode::Vertex }, VertexBinding { binding: 1, stride: 16, step: StepMode::Instance }],
            vec![
                VertexAttribute { location: 0, binding: 0, format: AttrFormat::Vec2, offset: 0 },
                VertexAttribute { location: 1, binding: 0, format: AttrFormat::Vec3, offset: 8 },
            ],
        );
        let (b, a) = vertex_input_from(&info);
        assert_eq!(b[1].input_rate, vk::VertexInputRate::INSTANCE);
        assert_eq!(b[0].stride, 20);
        assert_eq!(a[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(a[1].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(a[1].offset, 8);
    }

    #[test]
    fn neutral_raster_state() {
        let rs = raster_state_from(&RasterizerInfo::neutral());
        assert_eq!(rs.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(rs.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(rs.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(rs.line_width, 1.0);
        assert_eq!(rs.depth_clamp_enable, vk::FALSE);
        assert_eq!(rs.rasterizer_discard_enable, vk::FALSE);
    }

    #[test]
    fn odd_sample_counts_fall_back_to_one() {
        assert_eq!(samples_from(4), vk::SampleCountFlags::TYPE_4);
        assert_eq!(samples_from(3), vk::SampleCountFlags::TYPE_1);
        assert_eq!(samples_from(0), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn blend_flag_drives_blend_enable_only() {
        let off = color_blend_attachment_from(&ColorBlendInfo::neutral());
        let on = color_blend_attachment_from(&ColorBlendInfo::enabled(true));
        assert_eq!(off.blend_enable, vk::FALSE);
        assert_eq!(on.blend_enable, vk::TRUE);
        assert!(on.color_write_mask.contains(vk::ColorComponentFlags::R | vk::ColorComponentFlags::G | vk::ColorComponentFlags::B | vk::ColorComponentFlags::A));
    }

    #[test]
    fn attachment_goes_from_undefined_to_present() {
        let a = color_attachment_from(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(a.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(a.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(a.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(a.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn external_dependency_guards_colour_writes() {
        let dep = external_dependency();
        assert_eq!((dep.src_subpass, dep.dst_subpass), (vk::SUBPASS_EXTERNAL, 0));
        assert_eq!(dep.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(dep.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert!(dep.dependency_flags.is_empty());
    }
}
