//! Data-driven description of a frame: passes, the textures they exchange and
//! the pipelines they bind. This is what a renderpack file deserializes into
//! and what the render graph builder consumes.

use crate::types::PipelineStage;

/// Name of the implicit swapchain texture. Passes that list it among their
/// outputs render to the screen.
pub const BACKBUFFER_NAME: &str = "Backbuffer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
    Rgba16F,
    Rgba32F,
    Rg16F,
    R32F,
    Depth32,
    Depth24Stencil8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgba16F => 8,
            PixelFormat::Rgba32F => 16,
            PixelFormat::Rg16F => 4,
            PixelFormat::R32F => 4,
            PixelFormat::Depth32 => 4,
            PixelFormat::Depth24Stencil8 => 4,
        }
    }

    pub fn has_depth(self) -> bool {
        matches!(self, PixelFormat::Depth32 | PixelFormat::Depth24Stencil8)
    }
}

/// Size of a render-graph texture, either in pixels or as a fraction of the
/// swapchain size so the texture tracks window resizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextureDimensions {
    Absolute { width: u32, height: u32 },
    ScreenRelative { width: f32, height: f32 },
}

impl TextureDimensions {
    pub fn full_screen() -> Self {
        TextureDimensions::ScreenRelative { width: 1.0, height: 1.0 }
    }

    /// Resolve to a pixel size against the current swapchain size.
    pub fn pixels(&self, swapchain: [u32; 2]) -> [u32; 2] {
        match *self {
            TextureDimensions::Absolute { width, height } => [width, height],
            TextureDimensions::ScreenRelative { width, height } => [
                (swapchain[0] as f32 * width).round() as u32,
                (swapchain[1] as f32 * height).round() as u32,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    RenderTarget,
    DepthTarget,
    SampledImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureCreateInfo {
    pub name: String,
    pub format: PixelFormat,
    pub dimensions: TextureDimensions,
    pub usage: TextureUsage,
    /// Persistent textures keep their contents across frames and are never
    /// aliased with other transients.
    pub persistent: bool,
}

impl TextureCreateInfo {
    pub fn render_target(name: impl Into<String>, format: PixelFormat) -> Self {
        Self {
            name: name.into(),
            format,
            dimensions: TextureDimensions::full_screen(),
            usage: if format.has_depth() {
                TextureUsage::DepthTarget
            } else {
                TextureUsage::RenderTarget
            },
            persistent: false,
        }
    }
}

/// One pass of the frame as declared by the renderpack.
///
/// `texture_inputs` are sampled, `texture_outputs` are rendered to. Ordering
/// between passes is inferred from these lists plus the explicit
/// `dependencies`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderPassCreateInfo {
    pub name: String,
    pub dependencies: Vec<String>,
    pub texture_inputs: Vec<String>,
    pub texture_outputs: Vec<String>,
}

impl RenderPassCreateInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn reads(mut self, texture: impl Into<String>) -> Self {
        self.texture_inputs.push(texture.into());
        self
    }

    pub fn writes(mut self, texture: impl Into<String>) -> Self {
        self.texture_outputs.push(texture.into());
        self
    }

    pub fn writes_to_backbuffer(&self) -> bool {
        self.texture_outputs.iter().any(|t| t == BACKBUFFER_NAME)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
}

/// Where a shader expects one of its resources to be bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceBindingDescription {
    pub set: u32,
    pub binding: u32,
    pub count: u32,
    pub descriptor_type: DescriptorType,
    pub stages: Vec<PipelineStage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderSource {
    pub filename: String,
    pub spirv: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFieldFormat {
    Float2,
    Float3,
    Float4,
    Uint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexField {
    pub semantic: String,
    pub format: VertexFieldFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineCreateInfo {
    pub name: String,
    /// Name of the pass this pipeline renders in.
    pub pass: String,
    pub vertex_shader: ShaderSource,
    pub fragment_shader: Option<ShaderSource>,
    pub vertex_fields: Vec<VertexField>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub bindings: Vec<ResourceBindingDescription>,
}

/// A material instance: a pipeline plus the resources bound to it, keyed by
/// binding name.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    pub name: String,
    pub pipeline: String,
    pub bound_resources: Vec<(String, String)>,
}

/// Everything a renderpack declares, after deserialization and validation.
#[derive(Debug, Clone, Default)]
pub struct RenderpackData {
    pub passes: Vec<RenderPassCreateInfo>,
    pub textures: Vec<TextureCreateInfo>,
    pub pipelines: Vec<PipelineCreateInfo>,
    pub materials: Vec<MaterialData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_relative_dimensions_track_swapchain() {
        let half = TextureDimensions::ScreenRelative { width: 0.5, height: 0.5 };
        assert_eq!(half.pixels([1920, 1080]), [960, 540]);

        let fixed = TextureDimensions::Absolute { width: 256, height: 256 };
        assert_eq!(fixed.pixels([1920, 1080]), [256, 256]);
    }

    #[test]
    fn backbuffer_output_is_detected() {
        let pass = RenderPassCreateInfo::new("composite")
            .reads("gbuffer_color")
            .writes(BACKBUFFER_NAME);
        assert!(pass.writes_to_backbuffer());

        let off_screen = RenderPassCreateInfo::new("gbuffer").writes("gbuffer_color");
        assert!(!off_screen.writes_to_backbuffer());
    }
}
