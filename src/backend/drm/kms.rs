//! The kernel interface used to register scan-out framebuffers
//!
//! Everything the composition core needs from the kernel to turn a client buffer into
//! something a plane can scan out is captured by the [`KmsDevice`] trait. [`DrmKmsDevice`]
//! implements it for any open [`drm::control::Device`].

use std::fmt;
use std::os::unix::io::RawFd;

use drm::buffer::{self, PlanarBuffer};
use drm::control::framebuffer;
use drm_fourcc::{DrmFourcc, DrmModifier};

#[cfg(feature = "backend_drm")]
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd};
#[cfg(feature = "backend_drm")]
use std::path::PathBuf;

#[cfg(feature = "backend_drm")]
use drm::{control::FbCmd2Flags, DriverCapability};
#[cfg(feature = "backend_drm")]
use tracing::{debug, info};

use super::error::AccessError;

/// Parameters for registering a framebuffer object (`DRM_IOCTL_MODE_ADDFB2`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferDescriptor {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: DrmFourcc,
    /// GEM handle per plane, `None` for unused planes
    pub handles: [Option<buffer::Handle>; 4],
    /// Pitch in bytes per plane
    pub pitches: [u32; 4],
    /// Offset in bytes per plane
    pub offsets: [u32; 4],
    /// Memory layout modifier, `None` registers without `DRM_MODE_FB_MODIFIERS`
    pub modifier: Option<DrmModifier>,
}

impl PlanarBuffer for FramebufferDescriptor {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    fn modifier(&self) -> Option<DrmModifier> {
        self.modifier
    }

    fn pitches(&self) -> [u32; 4] {
        self.pitches
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        self.handles
    }

    fn offsets(&self) -> [u32; 4] {
        self.offsets
    }
}

/// Kernel operations required for importing client buffers
///
/// Implementations must be usable from multiple threads, as the
/// [`FramebufferImporter`](super::fb_import::FramebufferImporter) is shared across displays.
pub trait KmsDevice: Send + Sync + fmt::Debug {
    /// Import a dma-buf file descriptor and return its GEM handle.
    ///
    /// Importing the same underlying memory twice returns the same handle.
    fn prime_fd_to_handle(&self, fd: RawFd) -> Result<buffer::Handle, AccessError>;

    /// Release a GEM handle obtained by [`KmsDevice::prime_fd_to_handle`]
    fn close_handle(&self, handle: buffer::Handle) -> Result<(), AccessError>;

    /// Register a framebuffer object
    fn add_framebuffer(&self, desc: &FramebufferDescriptor) -> Result<framebuffer::Handle, AccessError>;

    /// Deregister a framebuffer object
    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> Result<(), AccessError>;

    /// Whether framebuffers may be registered with explicit modifiers
    fn has_addfb2_modifiers(&self) -> bool;
}

#[cfg(feature = "backend_drm")]
/// [`KmsDevice`] implementation for an open drm device
#[derive(Debug)]
pub struct DrmKmsDevice<D> {
    dev: D,
    has_addfb2_modifiers: bool,
}

#[cfg(feature = "backend_drm")]
impl<D: drm::control::Device> DrmKmsDevice<D> {
    /// Wrap an open drm device
    pub fn new(dev: D) -> Self {
        let has_addfb2_modifiers = dev
            .get_driver_capability(DriverCapability::AddFB2Modifiers)
            .map(|val| val == 1)
            .unwrap_or(false);
        info!(
            dev = ?dev_path(dev.as_fd()),
            has_addfb2_modifiers, "Initialized kms device"
        );
        DrmKmsDevice {
            dev,
            has_addfb2_modifiers,
        }
    }

    /// Access the underlying device
    pub fn device(&self) -> &D {
        &self.dev
    }

    fn access_error(&self, errmsg: &'static str, source: std::io::Error) -> AccessError {
        AccessError {
            errmsg,
            dev: dev_path(self.dev.as_fd()),
            source,
        }
    }
}

#[cfg(feature = "backend_drm")]
impl<D> KmsDevice for DrmKmsDevice<D>
where
    D: drm::control::Device + Send + Sync + fmt::Debug,
{
    fn prime_fd_to_handle(&self, fd: RawFd) -> Result<buffer::Handle, AccessError> {
        // SAFETY: the fd is owned by the buffer the caller described and stays open for the call
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        self.dev
            .prime_fd_to_buffer(fd)
            .map_err(|source| self.access_error("Failed to import prime fd", source))
    }

    fn close_handle(&self, handle: buffer::Handle) -> Result<(), AccessError> {
        self.dev
            .close_buffer(handle)
            .map_err(|source| self.access_error("Failed to close gem handle", source))
    }

    #[profiling::function]
    fn add_framebuffer(&self, desc: &FramebufferDescriptor) -> Result<framebuffer::Handle, AccessError> {
        let flags = if desc.modifier.is_some() {
            FbCmd2Flags::MODIFIERS
        } else {
            FbCmd2Flags::empty()
        };
        let fb = self
            .dev
            .add_planar_framebuffer(desc, flags)
            .map_err(|source| self.access_error("Failed to add framebuffer", source))?;
        debug!(?fb, format = ?desc.format, modifier = ?desc.modifier, "Added framebuffer");
        Ok(fb)
    }

    fn remove_framebuffer(&self, fb: framebuffer::Handle) -> Result<(), AccessError> {
        self.dev
            .destroy_framebuffer(fb)
            .map_err(|source| self.access_error("Failed to remove framebuffer", source))
    }

    fn has_addfb2_modifiers(&self) -> bool {
        self.has_addfb2_modifiers
    }
}

#[cfg(feature = "backend_drm")]
/// Path of the device node behind `fd`, used for error reporting
pub(crate) fn dev_path(fd: BorrowedFd<'_>) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/self/fd/{:?}", fd.as_raw_fd())).ok()
}
