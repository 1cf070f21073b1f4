#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
// Allow acronyms like CRTC
#![allow(clippy::upper_case_acronyms)]

//! # drmhwc: hardware composition planning for DRM/KMS
//!
//! This crate decides, frame by frame, which layers of a display can be scanned out directly by
//! hardware planes and which have to be composited by the GPU into a single client target.
//! It also owns the bookkeeping required to make that decision cheap: exclusive binding of
//! connectors, encoders, CRTCs and planes to a logical display, and a cache of imported
//! framebuffer objects.
//!
//! ## Structure of the crate
//!
//! - [`backend::drm`] contains everything talking to (or standing in for) the kernel:
//!   the device topology, resource bindings, [`DisplayPipeline`](backend::drm::DisplayPipeline)
//!   creation, the atomic commit interface and the
//!   [`FramebufferImporter`](backend::drm::FramebufferImporter).
//! - [`backend::hwc`] contains the per-display state driven by a display server adapter:
//!   layers, statistics, flattening and the composition planner.
//! - [`config`] holds the runtime knobs usually read from the environment.
//!
//! ### Logging
//!
//! drmhwc makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod config;
pub mod utils;
