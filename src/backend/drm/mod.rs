//! Drm/Kms resource management
//!
//! This module manages the kernel side of composition:
//!
//! - [`DeviceResources`] is a snapshot of the connectors, encoders, crtcs and planes of a device.
//! - [`BindingStorage`] guarantees that every one of these objects is used by at most one
//!   [`DisplayPipeline`] at a time.
//! - [`DisplayPipeline::create`] searches for a free connector/encoder/crtc/primary plane
//!   combination for a connector and owns the resulting bindings.
//! - [`FramebufferImporter`] turns client buffers into scan-out framebuffers and caches the
//!   registration for as long as somebody uses it.
//!
//! ## Binding objects
//!
//! ```rust,ignore
//! use drmhwc::backend::drm::{BindingStorage, DeviceResources, DisplayPipeline};
//!
//! let resources = DeviceResources::from_device(&device)?;
//! let bindings = BindingStorage::new(&resources);
//!
//! // `factory` creates the atomic state manager for a freshly bound pipeline
//! let pipeline = DisplayPipeline::create(&resources, &bindings, connector, &factory)?;
//!
//! // all objects are released again once the pipeline is dropped
//! drop(pipeline);
//! ```
//!
//! ## Kernel access
//!
//! The framebuffer importer does not talk to a [`drm::control::Device`] directly but through the
//! [`KmsDevice`] trait. With the `backend_drm` feature enabled [`DrmKmsDevice`] implements it for
//! any open device.

pub(crate) mod binding;
pub(crate) mod buffer;
pub(crate) mod commit;
mod error;
pub(crate) mod fb_import;
pub(crate) mod kms;
pub(crate) mod pipeline;
pub(crate) mod resources;

#[cfg(test)]
pub(crate) mod mock;

pub use self::binding::{BindTransaction, Binding, BindingStorage, DrmObject};
pub use self::buffer::{BufferInfo, BufferInfoError, BufferInfoGetter, BufferPlane};
pub use self::commit::{AtomicCommitArgs, AtomicStateManager, CommitError, PlannedLayer};
pub use self::error::{AccessError, Error as DrmError};
pub use self::fb_import::{FramebufferImporter, ImportError, ImportedFramebuffer};
pub use self::kms::{FramebufferDescriptor, KmsDevice};
pub use self::pipeline::{AtomicStateFactory, DisplayPipeline, PipelineId, PipelineInfo};
pub use self::resources::{ConnectorInfo, DeviceResources, EncoderInfo, PlaneInfo};

#[cfg(feature = "backend_drm")]
pub use self::kms::DrmKmsDevice;
