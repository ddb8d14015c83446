//! Plain stage records handed to the pipeline builder.
//!
//! Each record carries `use_defaults`. `Default` sets it, which is the
//! "pass nothing" form; the builder then substitutes the record's `neutral`
//! values. A record with `use_defaults == false` is taken as written.

use ash::vk;

/// What the swapchain negotiated: the colour format and extent a pipeline renders to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapTarget {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology { TriangleList, TriangleStrip, LineList, LineStrip, PointList }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolygonMode { Fill, Line, Point }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode { None, Front, Back, FrontAndBack }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontFace { Cw, Ccw }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepMode { Vertex, Instance }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttrFormat { F32, Vec2, Vec3, Vec4, I32, U32, Rgba8Unorm }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBinding { pub binding: u32, pub stride: u32, pub step: StepMode }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute { pub location: u32, pub binding: u32, pub format: AttrFormat, pub offset: u32 }

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexInputInfo {
    pub use_defaults: bool,
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexInputInfo {
    /// No vertex buffers: positions come from the vertex shader itself.
    pub fn neutral() -> Self {
        Self { use_defaults: false, bindings: Vec::new(), attributes: Vec::new() }
    }

    pub fn new(bindings: Vec<VertexBinding>, attributes: Vec<VertexAttribute>) -> Self {
        Self { use_defaults: false, bindings, attributes }
    }

    pub fn or_neutral(self) -> Self {
        if self.use_defaults { Self::neutral() } else { self }
    }
}

impl Default for VertexInputInfo {
    fn default() -> Self { Self { use_defaults: true, ..Self::neutral() } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputAssemblyInfo {
    pub use_defaults: bool,
    pub topology: Topology,
    pub primitive_restart: bool,
}

impl InputAssemblyInfo {
    pub fn neutral() -> Self {
        Self { use_defaults: false, topology: Topology::TriangleList, primitive_restart: false }
    }

    pub fn new(topology: Topology, primitive_restart: bool) -> Self {
        Self { use_defaults: false, topology, primitive_restart }
    }

    pub fn or_neutral(self) -> Self {
        if self.use_defaults { Self::neutral() } else { self }
    }
}

impl Default for InputAssemblyInfo {
    fn default() -> Self { Self { use_defaults: true, ..Self::neutral() } }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport { pub x: f32, pub y: f32, pub width: f32, pub height: f32, pub min_depth: f32, pub max_depth: f32 }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scissor { pub x: i32, pub y: i32, pub width: u32, pub height: u32 }

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportInfo {
    pub use_defaults: bool,
    pub viewport: Viewport,
    pub scissor: Scissor,
}

impl ViewportInfo {
    /// Whole target, depth 0..1, scissor equal to the viewport.
    pub fn neutral(extent: vk::Extent2D) -> Self {
        Self {
            use_defaults: false,
            viewport: Viewport { x: 0.0, y: 0.0, width: extent.width as f32, height: extent.height as f32, min_depth: 0.0, max_depth: 1.0 },
            scissor: Scissor { x: 0, y: 0, width: extent.width, height: extent.height },
        }
    }

    pub fn new(viewport: Viewport, scissor: Scissor) -> Self {
        Self { use_defaults: false, viewport, scissor }
    }

    pub fn or_neutral(self, extent: vk::Extent2D) -> Self {
        if self.use_defaults { Self::neutral(extent) } else { self }
    }
}

impl Default for ViewportInfo {
    fn default() -> Self {
        Self { use_defaults: true, ..Self::neutral(vk::Extent2D::default()) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizerInfo {
    pub use_defaults: bool,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub line_width: f32,
    pub depth_clamp: bool,
    pub discard: bool,
}

impl RasterizerInfo {
    pub fn neutral() -> Self {
        Self {
            use_defaults: false,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::None,
            front_face: FrontFace::Ccw,
            line_width: 1.0,
            depth_clamp: false,
            discard: false,
        }
    }

    pub fn or_neutral(self) -> Self {
        if self.use_defaults { Self::neutral() } else { self }
    }
}

impl Default for RasterizerInfo {
    fn default() -> Self { Self { use_defaults: true, ..Self::neutral() } }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MultisampleInfo {
    pub use_defaults: bool,
    /// Samples per pixel; 1, 2, 4, 8, 16, 32 or 64.
    pub samples: u32,
    pub sample_shading: bool,
    pub min_sample_shading: f32,
}

impl MultisampleInfo {
    pub fn neutral() -> Self {
        Self { use_defaults: false, samples: 1, sample_shading: false, min_sample_shading: 1.0 }
    }

    pub fn or_neutral(self) -> Self {
        if self.use_defaults { Self::neutral() } else { self }
    }
}

impl Default for MultisampleInfo {
    fn default() -> Self { Self { use_defaults: true, ..Self::neutral() } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlendInfo {
    pub use_defaults: bool,
    /// Standard alpha blending on the colour attachment.
    pub enable: bool,
}

impl ColorBlendInfo {
    pub fn neutral() -> Self { Self { use_defaults: false, enable: false } }

    pub fn enabled(enable: bool) -> Self { Self { use_defaults: false, enable } }

    pub fn or_neutral(self) -> Self {
        if self.use_defaults { Self::neutral() } else { self }
    }
}

impl Default for ColorBlendInfo {
    fn default() -> Self { Self { use_defaults: true, ..Self::neutral() } }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutsInfo {
    pub use_defaults: bool,
    /// Descriptor set layouts, owned by the caller.
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
}

impl LayoutsInfo {
    pub fn neutral() -> Self { Self { use_defaults: false, set_layouts: Vec::new() } }

    pub fn new(set_layouts: Vec<vk::DescriptorSetLayout>) -> Self { Self { use_defaults: false, set_layouts } }

    pub fn or_neutral(self) -> Self {
        if self.use_defaults { Self::neutral() } else { self }
    }
}

impl Default for LayoutsInfo {
    fn default() -> Self { Self { use_defaults: true, ..Self::neutral() } }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubpassInfo {
    pub use_defaults: bool,
    /// Colour attachment indices written by this subpass.
    pub color_attachments: Vec<u32>,
}

impl SubpassInfo {
    pub fn neutral() -> Self { Self { use_defaults: false, color_attachments: vec![0] } }

    pub fn or_neutral(self) -> Self {
        if self.use_defaults { Self::neutral() } else { self }
    }
}

impl Default for SubpassInfo {
    fn default() -> Self { Self { use_defaults: true, ..Self::neutral() } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_records_resolve_to_neutral_values() {
        assert_eq!(VertexInputInfo::default().or_neutral(), VertexInputInfo::neutral());
        let ia = InputAssemblyInfo::default().or_neutral();
        assert_eq!((ia.topology, ia.primitive_restart), (Topology::TriangleList, false));
        let rs = RasterizerInfo::default().or_neutral();
        assert_eq!(rs.polygon_mode, PolygonMode::Fill);
        assert_eq!(rs.cull_mode, CullMode::None);
        assert_eq!(rs.front_face, FrontFace::Ccw);
        assert_eq!(rs.line_width, 1.0);
        let ms = MultisampleInfo::default().or_neutral();
        assert_eq!((ms.samples, ms.sample_shading, ms.min_sample_shading), (1, false, 1.0));
        assert!(!ColorBlendInfo::default().or_neutral().enable);
        assert!(LayoutsInfo::default().or_neutral().set_layouts.is_empty());
        assert_eq!(SubpassInfo::default().or_neutral().color_attachments, vec![0]);
    }

    #[test]
    fn default_viewport_covers_extent() {
        let vp = ViewportInfo::default().or_neutral(vk::Extent2D { width: 800, height: 600 });
        assert!(!vp.use_defaults);
        assert_eq!(vp.viewport, Viewport { x: 0.0, y: 0.0, width: 800.0, height: 600.0, min_depth: 0.0, max_depth: 1.0 });
        assert_eq!(vp.scissor, Scissor { x: 0, y: 0, width: 800, height: 600 });
    }

    #[test]
    fn explicit_records_are_kept() {
        let rs = RasterizerInfo { cull_mode: CullMode::Back, front_face: FrontFace::Cw, ..RasterizerInfo::neutral() };
        assert_eq!(rs.or_neutral(), rs);

        let custom = ViewportInfo::new(
            Viewport { x: 10.0, y: 0.0, width: 100.0, height: 50.0, min_depth: 0.0, max_depth: 1.0 },
            Scissor { x: 10, y: 0, width: 100, height: 50 },
        );
        assert_eq!(custom.or_neutral(vk::Extent2D { width: 800, height: 600 }), custom);
    }
}
