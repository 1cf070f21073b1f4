//! Backend helpers talking to the display hardware
//!
//! The composition core is split into two layers:
//!
//! - [`drm`] models the kernel side: which connectors, encoders, CRTCs and planes exist,
//!   which logical display currently owns them and how client buffers become
//!   scan-out framebuffers.
//! - [`hwc`] models the display server side: the per-display layer stack and the
//!   planner deciding, every frame, which layers go to hardware planes.

pub mod drm;
pub mod hwc;
