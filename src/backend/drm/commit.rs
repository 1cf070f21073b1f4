//! Interface to the atomic commit path of a pipeline
//!
//! Building and submitting the actual atomic property sets is left to an
//! [`AtomicStateManager`], created once per [`DisplayPipeline`](super::DisplayPipeline).

use std::fmt;

use drm::control::plane;

use super::error::AccessError;
use super::fb_import::ImportedFramebuffer;
use crate::utils::{FRectangle, Rectangle, Transform};

/// Configuration of one plane in a commit
#[derive(Debug, Clone)]
pub struct PlannedLayer {
    /// Plane scanning out the layer
    pub plane: plane::Handle,
    /// Framebuffer to scan out
    pub framebuffer: ImportedFramebuffer,
    /// Destination on the crtc
    pub display_frame: Rectangle,
    /// Source area of the framebuffer
    pub source_crop: FRectangle,
    /// Transformation applied by the plane
    pub transform: Transform,
    /// Position in the plane stack, 0 being the bottom-most
    pub zpos: usize,
}

/// Arguments of a single commit
#[derive(Debug, Clone, Copy)]
pub struct AtomicCommitArgs<'a> {
    /// Only test the configuration, do not apply it
    pub test_only: bool,
    /// The planes to enable, bottom to top
    pub plan: &'a [PlannedLayer],
}

/// Errors returned by an [`AtomicStateManager`]
#[derive(thiserror::Error, Debug)]
pub enum CommitError {
    /// The kernel rejected the configuration
    #[error("The configuration was rejected by the kernel")]
    TestFailed,
    /// Submitting the commit failed
    #[error(transparent)]
    Access(#[from] AccessError),
}

/// Owner of the kernel state of one pipeline
pub trait AtomicStateManager: Send + fmt::Debug {
    /// Test or apply a configuration
    fn commit(&mut self, args: &AtomicCommitArgs<'_>) -> Result<(), CommitError>;

    /// Disable the pipeline and stop any pending work
    ///
    /// Called exactly once, when the owning pipeline is destroyed.
    fn stop(&mut self);
}
