use std::io;
use std::path::PathBuf;

use drm::control::{connector, crtc};

/// Error for a failed call into the kernel
#[derive(thiserror::Error, Debug)]
#[error("DRM access error: {errmsg} on device `{dev:?}` ({source})")]
pub struct AccessError {
    /// Error message associated to the access error
    pub errmsg: &'static str,
    /// Device on which the error was generated
    pub dev: Option<PathBuf>,
    /// Underlying device error
    #[source]
    pub source: io::Error,
}

/// Errors thrown while inspecting a drm device or binding its resources
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device encountered an access error
    #[error(transparent)]
    Access(#[from] AccessError),
    /// The connector is not known to the device
    #[error("Connector `{0:?}` does not exist on this device")]
    UnknownConnector(connector::Handle),
    /// No free encoder/crtc/primary plane combination exists for the connector
    #[error("Could not find a suitable encoder/crtc for connector `{0:?}`")]
    NoSuitablePipeline(connector::Handle),
    /// The crtc has no primary plane which could be bound
    #[error("No bindable primary plane found for crtc `{0:?}`")]
    NoPrimaryPlane(crtc::Handle),
}
