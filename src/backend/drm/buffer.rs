//! Metadata of client buffers
//!
//! The composition core never looks into platform buffer handles itself. A
//! [`BufferInfoGetter`] resolves a handle into a [`BufferInfo`], which carries everything
//! needed to register the buffer as a framebuffer.

use std::fmt;
use std::os::unix::io::RawFd;

use drm_fourcc::{DrmFourcc, DrmModifier};

/// One plane of a client buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPlane {
    /// dma-buf file descriptor holding the plane's memory
    pub prime_fd: RawFd,
    /// Bytes per row
    pub pitch: u32,
    /// Offset of the plane's first byte inside the dma-buf
    pub offset: u32,
    /// Memory layout of the plane
    pub modifier: DrmModifier,
}

/// Metadata of a client buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: DrmFourcc,
    /// Up to four planes, unused ones are `None`
    pub planes: [Option<BufferPlane>; 4],
}

impl BufferInfo {
    /// Describe a single-plane buffer
    pub fn single_plane(width: u32, height: u32, format: DrmFourcc, plane: BufferPlane) -> Self {
        BufferInfo {
            width,
            height,
            format,
            planes: [Some(plane), None, None, None],
        }
    }

    /// Modifier that has to be passed when registering the framebuffer
    ///
    /// Linear and invalid modifiers need no explicit registration, so `None` is returned
    /// for them as well as for buffers without planes.
    pub fn explicit_modifier(&self) -> Option<DrmModifier> {
        match self.planes[0]?.modifier {
            DrmModifier::Linear | DrmModifier::Invalid => None,
            modifier => Some(modifier),
        }
    }

    /// The same buffer with its format replaced by the opaque alternative, if there is one
    ///
    /// Scanning out `Abgr8888` as `Xbgr8888` makes the plane ignore the alpha channel.
    pub fn into_opaque(mut self) -> Self {
        if let Some(opaque) = get_opaque(self.format) {
            self.format = opaque;
        }
        self
    }
}

/// Returns the opaque alternative of a format with an alpha channel
pub const fn get_opaque(fourcc: DrmFourcc) -> Option<DrmFourcc> {
    match fourcc {
        DrmFourcc::Argb8888 => Some(DrmFourcc::Xrgb8888),
        DrmFourcc::Abgr8888 => Some(DrmFourcc::Xbgr8888),
        DrmFourcc::Rgba8888 => Some(DrmFourcc::Rgbx8888),
        DrmFourcc::Bgra8888 => Some(DrmFourcc::Bgrx8888),
        DrmFourcc::Argb2101010 => Some(DrmFourcc::Xrgb2101010),
        DrmFourcc::Abgr2101010 => Some(DrmFourcc::Xbgr2101010),
        DrmFourcc::Rgba1010102 => Some(DrmFourcc::Rgbx1010102),
        DrmFourcc::Bgra1010102 => Some(DrmFourcc::Bgrx1010102),
        DrmFourcc::Argb16161616f => Some(DrmFourcc::Xrgb16161616f),
        DrmFourcc::Abgr16161616f => Some(DrmFourcc::Xbgr16161616f),
        _ => None,
    }
}

/// Errors of a [`BufferInfoGetter`]
#[derive(thiserror::Error, Debug)]
pub enum BufferInfoError {
    /// The buffer's format has no drm equivalent
    #[error("Buffer format {0:#x} has no drm equivalent")]
    UnsupportedFormat(u32),
    /// The buffer does not describe any memory
    #[error("Buffer has no planes")]
    NoPlanes,
    /// The platform failed to report the buffer's metadata
    #[error("Failed to query buffer metadata: {0}")]
    Query(String),
}

/// Resolves platform buffer handles of type `B` into their metadata
pub trait BufferInfoGetter<B: ?Sized>: fmt::Debug {
    /// Query the metadata of `buffer`
    fn buffer_info(&self, buffer: &B) -> Result<BufferInfo, BufferInfoError>;
}

#[cfg(test)]
mod tests {
    use drm_fourcc::{DrmFourcc, DrmModifier};

    use super::{BufferInfo, BufferPlane};

    fn plane(modifier: DrmModifier) -> BufferPlane {
        BufferPlane {
            prime_fd: 3,
            pitch: 256,
            offset: 0,
            modifier,
        }
    }

    #[test]
    fn trivial_modifiers_are_implicit() {
        let info = BufferInfo::single_plane(64, 64, DrmFourcc::Argb8888, plane(DrmModifier::Linear));
        assert_eq!(info.explicit_modifier(), None);
        let info = BufferInfo::single_plane(64, 64, DrmFourcc::Argb8888, plane(DrmModifier::Invalid));
        assert_eq!(info.explicit_modifier(), None);
        let info = BufferInfo::single_plane(
            64,
            64,
            DrmFourcc::Argb8888,
            plane(DrmModifier::I915_x_tiled),
        );
        assert_eq!(info.explicit_modifier(), Some(DrmModifier::I915_x_tiled));
    }

    #[test]
    fn opaque_formats() {
        let info = BufferInfo::single_plane(64, 64, DrmFourcc::Abgr8888, plane(DrmModifier::Linear));
        assert_eq!(info.into_opaque().format, DrmFourcc::Xbgr8888);
        let info = BufferInfo::single_plane(64, 64, DrmFourcc::Nv12, plane(DrmModifier::Linear));
        assert_eq!(info.into_opaque().format, DrmFourcc::Nv12);
    }
}
