//! Layers of a display

use crate::backend::drm::{
    BufferInfo, BufferInfoError, FramebufferImporter, ImportError, ImportedFramebuffer,
};
use crate::utils::{FRectangle, Rectangle, Transform};

/// Identifier of a layer, unique per display
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub(crate) u64);

/// How a layer is composited
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum CompositionType {
    /// Not yet set
    #[default]
    Invalid,
    /// Composited by the client into the client target
    Client,
    /// Scanned out by a plane
    Device,
    /// Filled with a solid color
    SolidColor,
    /// A cursor, scanned out by a plane
    Cursor,
    /// Content streamed from outside the client
    Sideband,
}

impl CompositionType {
    /// Whether layers of this type may be scanned out by a plane
    pub fn is_hardware_eligible(self) -> bool {
        matches!(self, CompositionType::Device | CompositionType::Cursor)
    }
}

#[derive(Debug)]
struct LayerBuffer {
    info: BufferInfo,
    framebuffer: ImportedFramebuffer,
}

/// A layer of a display
#[derive(Debug, Default)]
pub struct Layer {
    requested: CompositionType,
    validated: CompositionType,
    display_frame: Rectangle,
    source_crop: FRectangle,
    transform: Transform,
    zpos: u32,
    buffer: Option<LayerBuffer>,
    buffer_info_failed: bool,
    import_failed: bool,
}

impl Layer {
    /// Composition type requested by the client
    pub fn requested_type(&self) -> CompositionType {
        self.requested
    }

    /// Set the composition type requested by the client
    pub fn set_requested_type(&mut self, kind: CompositionType) {
        self.requested = kind;
    }

    /// Composition type decided by the last validation
    pub fn validated_type(&self) -> CompositionType {
        self.validated
    }

    pub(crate) fn set_validated_type(&mut self, kind: CompositionType) {
        self.validated = kind;
    }

    /// Whether the last validation changed the requested type
    pub fn type_changed(&self) -> bool {
        self.requested != self.validated
    }

    pub(crate) fn accept_type_change(&mut self) {
        self.requested = self.validated;
    }

    /// Destination of the layer on the display
    pub fn display_frame(&self) -> Rectangle {
        self.display_frame
    }

    /// Set the destination of the layer on the display
    pub fn set_display_frame(&mut self, frame: Rectangle) {
        self.display_frame = frame;
    }

    /// Area of the buffer to display
    pub fn source_crop(&self) -> FRectangle {
        self.source_crop
    }

    /// Set the area of the buffer to display
    pub fn set_source_crop(&mut self, crop: FRectangle) {
        self.source_crop = crop;
    }

    /// Transformation applied to the buffer
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Set the transformation applied to the buffer
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Position in the layer stack, higher is closer to the viewer
    pub fn zpos(&self) -> u32 {
        self.zpos
    }

    /// Set the position in the layer stack
    pub fn set_zpos(&mut self, zpos: u32) {
        self.zpos = zpos;
    }

    /// Metadata of the current buffer
    pub fn buffer_info(&self) -> Option<&BufferInfo> {
        self.buffer.as_ref().map(|b| &b.info)
    }

    /// Framebuffer of the current buffer
    pub fn framebuffer(&self) -> Option<&ImportedFramebuffer> {
        self.buffer.as_ref().map(|b| &b.framebuffer)
    }

    /// Whether the layer can be scanned out by a plane
    pub fn is_usable_as_device(&self) -> bool {
        !self.buffer_info_failed && !self.import_failed && self.buffer.is_some()
    }

    /// Whether the plane would have to scale the buffer or sample it at sub-pixel offsets
    pub fn requires_scaling_or_phasing(&self) -> bool {
        let crop = &self.source_crop;
        let frame = &self.display_frame;
        let scaling = crop.width() != frame.width() as f32 || crop.height() != frame.height() as f32;
        let phasing = crop.left.fract() != 0.0 || crop.top.fract() != 0.0;
        scaling || phasing
    }

    /// Replace the layer's buffer
    ///
    /// The buffer is registered right away. On failure the layer is left without a buffer,
    /// which makes it fall back to client composition until a new buffer is set.
    pub(crate) fn set_buffer(
        &mut self,
        importer: &FramebufferImporter,
        info: Result<BufferInfo, BufferInfoError>,
        avoid_alpha: bool,
    ) -> Result<(), LayerBufferError> {
        self.buffer = None;
        self.buffer_info_failed = false;
        self.import_failed = false;

        let info = match info {
            Ok(info) if avoid_alpha => info.into_opaque(),
            Ok(info) => info,
            Err(err) => {
                self.buffer_info_failed = true;
                return Err(LayerBufferError::BufferInfo(err));
            }
        };
        let framebuffer = importer.get_or_create_fb_id(&info).map_err(|err| {
            self.import_failed = true;
            LayerBufferError::Import(err)
        })?;
        self.buffer = Some(LayerBuffer { info, framebuffer });
        Ok(())
    }
}

/// Reasons a buffer could not be attached to a layer
#[derive(thiserror::Error, Debug)]
pub enum LayerBufferError {
    /// The buffer's metadata could not be resolved
    #[error(transparent)]
    BufferInfo(#[from] BufferInfoError),
    /// The buffer could not be registered as framebuffer
    #[error(transparent)]
    Import(#[from] ImportError),
}
