//! Snapshot of the modesetting objects of a drm device
//!
//! The pipeline search only needs to know which objects exist, how they may be combined and
//! what the kernel currently has configured. [`DeviceResources`] captures exactly that, either
//! loaded from a live device with [`DeviceResources::from_device`] or assembled by hand.

use drm::control::{connector, crtc, encoder, plane, PlaneType};

#[cfg(feature = "backend_drm")]
use super::error::AccessError;

/// A connector and the encoders it may be driven by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    /// Handle of the connector
    pub handle: connector::Handle,
    /// Human readable name, e.g. `HDMIA-1`
    pub name: String,
    /// Encoder currently driving the connector, if any
    pub current_encoder: Option<encoder::Handle>,
    /// Encoders compatible with this connector
    pub encoders: Vec<encoder::Handle>,
}

impl ConnectorInfo {
    /// Whether the connector can be driven by the given encoder
    pub fn supports_encoder(&self, encoder: encoder::Handle) -> bool {
        self.encoders.contains(&encoder)
    }
}

/// An encoder and the crtcs it may be driven by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// Handle of the encoder
    pub handle: encoder::Handle,
    /// Crtc currently attached to the encoder, if any
    pub current_crtc: Option<crtc::Handle>,
    /// Crtcs compatible with this encoder
    pub possible_crtcs: Vec<crtc::Handle>,
}

impl EncoderInfo {
    /// Whether the encoder can be driven by the given crtc
    pub fn supports_crtc(&self, crtc: crtc::Handle) -> bool {
        self.possible_crtcs.contains(&crtc)
    }
}

/// A plane, its type and the crtcs it may be attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneInfo {
    /// Handle of the plane
    pub handle: plane::Handle,
    /// Type of the plane
    pub kind: PlaneType,
    /// Crtcs compatible with this plane
    pub possible_crtcs: Vec<crtc::Handle>,
}

impl PlaneInfo {
    /// Whether the plane can be attached to the given crtc
    pub fn supports_crtc(&self, crtc: crtc::Handle) -> bool {
        self.possible_crtcs.contains(&crtc)
    }
}

/// All modesetting objects of one device, in kernel enumeration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceResources {
    /// Connectors of the device
    pub connectors: Vec<ConnectorInfo>,
    /// Encoders of the device
    pub encoders: Vec<EncoderInfo>,
    /// Crtcs of the device
    pub crtcs: Vec<crtc::Handle>,
    /// Planes of the device
    pub planes: Vec<PlaneInfo>,
}

impl DeviceResources {
    /// Look up a connector
    pub fn connector(&self, handle: connector::Handle) -> Option<&ConnectorInfo> {
        self.connectors.iter().find(|c| c.handle == handle)
    }

    /// Look up an encoder
    pub fn encoder(&self, handle: encoder::Handle) -> Option<&EncoderInfo> {
        self.encoders.iter().find(|e| e.handle == handle)
    }

    /// Look up a crtc
    pub fn crtc(&self, handle: crtc::Handle) -> Option<crtc::Handle> {
        self.crtcs.iter().copied().find(|c| *c == handle)
    }

    /// Planes of the given type that can be attached to `crtc`, in enumeration order
    pub fn planes_for_crtc(&self, crtc: crtc::Handle, kind: PlaneType) -> impl Iterator<Item = &PlaneInfo> {
        self.planes
            .iter()
            .filter(move |p| p.kind == kind && p.supports_crtc(crtc))
    }

    /// Load the resources of a live device
    ///
    /// Universal planes are requested from the kernel, so that primary and cursor planes are
    /// reported alongside overlays.
    #[cfg(feature = "backend_drm")]
    pub fn from_device<D: drm::control::Device>(dev: &D) -> Result<Self, AccessError> {
        use drm::ClientCapability;
        use std::os::unix::io::AsFd;
        use tracing::{debug, warn};

        let dev_path = || super::kms::dev_path(dev.as_fd());

        if let Err(err) = dev.set_client_capability(ClientCapability::UniversalPlanes, true) {
            warn!(?err, "Failed to enable universal planes, only overlays will be reported");
        }

        let res = dev.resource_handles().map_err(|source| AccessError {
            errmsg: "Error loading drm resources",
            dev: dev_path(),
            source,
        })?;

        let mut connectors = Vec::with_capacity(res.connectors().len());
        for conn in res.connectors() {
            let info = dev.get_connector(*conn, false).map_err(|source| AccessError {
                errmsg: "Error loading connector info",
                dev: dev_path(),
                source,
            })?;
            connectors.push(ConnectorInfo {
                handle: *conn,
                name: format!("{:?}-{}", info.interface(), info.interface_id()),
                current_encoder: info.current_encoder(),
                encoders: info.encoders().to_vec(),
            });
        }

        let mut encoders = Vec::with_capacity(res.encoders().len());
        for enc in res.encoders() {
            let info = dev.get_encoder(*enc).map_err(|source| AccessError {
                errmsg: "Error loading encoder info",
                dev: dev_path(),
                source,
            })?;
            encoders.push(EncoderInfo {
                handle: *enc,
                current_crtc: info.crtc(),
                possible_crtcs: res.filter_crtcs(info.possible_crtcs()),
            });
        }

        let plane_handles = dev.plane_handles().map_err(|source| AccessError {
            errmsg: "Error loading planes",
            dev: dev_path(),
            source,
        })?;
        let mut planes = Vec::with_capacity(plane_handles.len());
        for plane in plane_handles {
            let info = dev.get_plane(plane).map_err(|source| AccessError {
                errmsg: "Failed to get plane info",
                dev: dev_path(),
                source,
            })?;
            let Some(kind) = plane_type(dev, plane)? else {
                debug!(?plane, "Plane without type property, skipping");
                continue;
            };
            planes.push(PlaneInfo {
                handle: plane,
                kind,
                possible_crtcs: res.filter_crtcs(info.possible_crtcs()),
            });
        }

        Ok(DeviceResources {
            connectors,
            encoders,
            crtcs: res.crtcs().to_vec(),
            planes,
        })
    }
}

#[cfg(feature = "backend_drm")]
fn plane_type<D: drm::control::Device>(
    dev: &D,
    plane: plane::Handle,
) -> Result<Option<PlaneType>, AccessError> {
    use std::os::unix::io::AsFd;

    let props = dev.get_properties(plane).map_err(|source| AccessError {
        errmsg: "Failed to get properties of plane",
        dev: super::kms::dev_path(dev.as_fd()),
        source,
    })?;
    let (ids, vals) = props.as_props_and_values();
    for (&id, &val) in ids.iter().zip(vals.iter()) {
        let info = dev.get_property(id).map_err(|source| AccessError {
            errmsg: "Failed to get property info",
            dev: super::kms::dev_path(dev.as_fd()),
            source,
        })?;
        if info.name().to_str().map(|x| x == "type").unwrap_or(false) {
            return Ok(match val {
                x if x == PlaneType::Primary as u64 => Some(PlaneType::Primary),
                x if x == PlaneType::Cursor as u64 => Some(PlaneType::Cursor),
                x if x == PlaneType::Overlay as u64 => Some(PlaneType::Overlay),
                _ => None,
            });
        }
    }
    Ok(None)
}
