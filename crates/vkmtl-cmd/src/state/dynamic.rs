//! Source-API dynamic graphics state and its per-field dirty bits.

use bitflags::bitflags;

use crate::limits::{MAX_VERTEX_BUFFERS, MAX_VIEWPORTS};
use crate::native::{CullMode, DepthStencilStateId, ScissorRect, Viewport, Winding};
use crate::topology::PrimitiveTopology;

bitflags! {
    /// Dynamic state changed since the last draw flush.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DynamicDirty: u32 {
        const VI_BINDING_STRIDES = 1 << 0;
        const RASTERIZER_DISCARD = 1 << 1;
        const CULL_MODE = 1 << 2;
        const PRIMITIVE_TOPOLOGY = 1 << 3;
        const PRIMITIVE_RESTART = 1 << 4;
        const VIEWPORTS = 1 << 5;
        const SCISSORS = 1 << 6;
        const DEPTH_STENCIL = 1 << 7;
        const FRONT_FACE = 1 << 8;
        const DEPTH_BIAS = 1 << 9;
        const DEPTH_CLAMP = 1 << 10;
        const STENCIL_REFERENCE = 1 << 11;
        const BLEND_CONSTANTS = 1 << 12;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct StencilFaces: u32 {
        const FRONT = 1 << 0;
        const BACK = 1 << 1;
        const FRONT_AND_BACK = Self::FRONT.bits() | Self::BACK.bits();
    }
}

/// Source-API face culling, which unlike the native one can cull both faces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FaceCull {
    #[default]
    None,
    Front,
    Back,
    FrontAndBack,
}

impl FaceCull {
    /// Native cull mode; `None` for front-and-back, which has no native equivalent.
    pub fn native(self) -> Option<CullMode> {
        match self {
            FaceCull::None => Some(CullMode::None),
            FaceCull::Front => Some(CullMode::Front),
            FaceCull::Back => Some(CullMode::Back),
            FaceCull::FrontAndBack => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub fn native(self) -> Winding {
        match self {
            FrontFace::CounterClockwise => Winding::CounterClockwise,
            FrontFace::Clockwise => Winding::Clockwise,
        }
    }
}

/// Integer rectangle with a signed origin, as the source API describes scissors and areas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect2D {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamp to `area`; the result is always contained in `area` and may be empty.
    pub fn clamp_to(&self, area: &Rect2D) -> ScissorRect {
        let origin_x = i64::from(area.x);
        let origin_y = i64::from(area.y);
        let end_x = origin_x + i64::from(area.width);
        let end_y = origin_y + i64::from(area.height);

        let x0 = i64::from(self.x).clamp(origin_x, end_x);
        let x1 = (i64::from(self.x) + i64::from(self.width)).clamp(origin_x, end_x);
        let y0 = i64::from(self.y).clamp(origin_y, end_y);
        let y1 = (i64::from(self.y) + i64::from(self.height)).clamp(origin_y, end_y);

        let (min_x, max_x) = (x0.min(x1), x0.max(x1));
        let (min_y, max_y) = (y0.min(y1), y0.max(y1));
        ScissorRect {
            x: min_x.max(0) as u32,
            y: min_y.max(0) as u32,
            width: (max_x - min_x) as u32,
            height: (max_y - min_y) as u32,
        }
    }
}

/// Source-API viewport: Y points up and depth range is `[min_depth, max_depth]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ViewportDesc {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl ViewportDesc {
    /// Native viewport with the Y axis flipped.
    pub fn to_native(&self) -> Viewport {
        Viewport {
            origin_x: self.x,
            origin_y: self.y + self.height,
            width: self.width,
            height: -self.height,
            znear: self.min_depth,
            zfar: self.max_depth,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub slope: f32,
    pub clamp: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DynamicState {
    pub vi_binding_strides: [u32; MAX_VERTEX_BUFFERS],
    /// Bindings whose stride was ever set.
    pub vi_bindings_valid: u32,
    pub rasterizer_discard: bool,
    pub cull_mode: FaceCull,
    pub front_face: FrontFace,
    pub topology: PrimitiveTopology,
    pub primitive_restart: bool,
    pub viewports: Vec<ViewportDesc>,
    pub scissors: Vec<Rect2D>,
    /// Depth/stencil state used while the bound pipeline leaves it dynamic.
    pub depth_stencil: Option<DepthStencilStateId>,
    pub depth_bias: DepthBias,
    pub depth_clamp: bool,
    pub stencil_reference: [u32; 2],
    pub blend_constants: [f32; 4],
    pub dirty: DynamicDirty,
}

impl Default for DynamicState {
    fn default() -> Self {
        Self {
            vi_binding_strides: [0; MAX_VERTEX_BUFFERS],
            vi_bindings_valid: 0,
            rasterizer_discard: false,
            cull_mode: FaceCull::None,
            front_face: FrontFace::CounterClockwise,
            topology: PrimitiveTopology::TriangleList,
            primitive_restart: false,
            viewports: Vec::new(),
            scissors: Vec::new(),
            depth_stencil: None,
            depth_bias: DepthBias::default(),
            depth_clamp: false,
            stencil_reference: [0; 2],
            blend_constants: [0.0; 4],
            dirty: DynamicDirty::all(),
        }
    }
}

impl DynamicState {
    pub fn set_vertex_binding_strides(&mut self, first: u32, strides: &[u32]) {
        let first = first as usize;
        assert!(first + strides.len() <= MAX_VERTEX_BUFFERS, "vertex binding out of range");
        for (i, stride) in strides.iter().enumerate() {
            self.vi_binding_strides[first + i] = *stride;
            self.vi_bindings_valid |= 1 << (first + i);
        }
        self.dirty |= DynamicDirty::VI_BINDING_STRIDES;
    }

    pub fn set_viewports(&mut self, first: u32, viewports: &[ViewportDesc]) {
        let end = first as usize + viewports.len();
        assert!(end <= MAX_VIEWPORTS, "viewport {end} out of range");
        if self.viewports.len() < end {
            self.viewports.resize(end, ViewportDesc::default());
        }
        self.viewports[first as usize..end].copy_from_slice(viewports);
        self.dirty |= DynamicDirty::VIEWPORTS;
    }

    pub fn set_scissors(&mut self, first: u32, scissors: &[Rect2D]) {
        let end = first as usize + scissors.len();
        assert!(end <= MAX_VIEWPORTS, "scissor {end} out of range");
        if self.scissors.len() < end {
            self.scissors.resize(end, Rect2D::default());
        }
        self.scissors[first as usize..end].copy_from_slice(scissors);
        self.dirty |= DynamicDirty::SCISSORS;
    }

    pub fn set_stencil_reference(&mut self, faces: StencilFaces, reference: u32) {
        if faces.contains(StencilFaces::FRONT) {
            self.stencil_reference[0] = reference;
        }
        if faces.contains(StencilFaces::BACK) {
            self.stencil_reference[1] = reference;
        }
        self.dirty |= DynamicDirty::STENCIL_REFERENCE;
    }

    pub fn dirty_all(&mut self) {
        self.dirty = DynamicDirty::all();
    }
}
