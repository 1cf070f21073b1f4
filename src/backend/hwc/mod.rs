//! Per-display composition
//!
//! A [`HwcDisplay`] holds the layer stack of one display. Every frame the client
//!
//! - updates its layers and their buffers,
//! - calls [`HwcDisplay::validate`] and composites every layer marked
//!   [`CompositionType::Client`] into the client target,
//! - calls [`HwcDisplay::present`] to scan the frame out.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use drmhwc::backend::drm::{FramebufferImporter, KmsDevice, DisplayPipeline};
//! # use drmhwc::backend::hwc::{CompositionType, HwcDisplay};
//! # use drmhwc::config::Config;
//! # fn frame(device: Arc<dyn KmsDevice>, pipeline: DisplayPipeline) {
//! let mut display = HwcDisplay::new(Config::from_env(), FramebufferImporter::new(device), Some(pipeline));
//! let layer = display.create_layer();
//! display.layer_mut(layer).unwrap().set_requested_type(CompositionType::Device);
//!
//! let result = display.validate();
//! if result.changes {
//!     // composite the layers listed by `changed_composition_types` and set the client target
//!     display.accept_display_changes();
//! }
//! display.present().expect("Failed to present");
//! # }
//! ```

mod display;
mod flatten;
mod layer;
mod planner;
mod stats;

pub use self::display::{Error as HwcError, HwcDisplay};
pub use self::flatten::{FlatteningController, IdleFlatteningController};
pub use self::layer::{CompositionType, Layer, LayerBufferError, LayerId};
pub use self::planner::{backend_for, Backend, ValidateResult, GENERIC_BACKEND};
pub use self::stats::Stats;
