//! Flattening of static scenes
//!
//! A display whose content has not changed for a while can be composited once by the client
//! and then scanned out from a single plane, freeing all other planes. A
//! [`FlatteningController`] decides when a frame should be flattened.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// Decides when a display may be flattened
pub trait FlatteningController: Send + Sync + fmt::Debug {
    /// Stop flattening, e.g. because the display shows a single layer
    fn disable(&self);

    /// Notify the controller about a new frame
    ///
    /// Returns `true` if this frame should be composited entirely by the client.
    fn new_frame(&self) -> bool;
}

#[derive(Debug)]
struct IdleState {
    deadline: Option<Instant>,
    flatten_next_frame: bool,
}

/// Flattens a display once no new frame arrived for a configured time
///
/// The controller has to be driven by [`tick`](IdleFlatteningController::tick), usually from
/// the vblank or timer source of the display. Once the display was idle for the timeout, the
/// next frame is flattened and the controller disarms until frames arrive again.
#[derive(Debug)]
pub struct IdleFlatteningController {
    timeout: Duration,
    state: Mutex<IdleState>,
}

impl IdleFlatteningController {
    /// Create a disarmed controller
    pub fn new(timeout: Duration) -> Self {
        IdleFlatteningController {
            timeout,
            state: Mutex::new(IdleState {
                deadline: None,
                flatten_next_frame: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IdleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the idle timer
    ///
    /// Returns `true` if the display became idle and should be refreshed, so that the
    /// flattened frame gets composited.
    pub fn tick(&self, now: Instant) -> bool {
        let mut state = self.lock();
        match state.deadline {
            Some(deadline) if now >= deadline => {
                debug!("Display idle, flattening next frame");
                state.deadline = None;
                state.flatten_next_frame = true;
                true
            }
            _ => false,
        }
    }

    /// [`FlatteningController::new_frame`] at a given point in time
    pub fn new_frame_at(&self, now: Instant) -> bool {
        let mut state = self.lock();
        if state.flatten_next_frame {
            state.flatten_next_frame = false;
            return true;
        }
        if state.deadline.is_none() {
            trace!("Flattening armed");
        }
        state.deadline = Some(now + self.timeout);
        false
    }
}

impl FlatteningController for IdleFlatteningController {
    fn disable(&self) {
        let mut state = self.lock();
        state.deadline = None;
        state.flatten_next_frame = false;
    }

    fn new_frame(&self) -> bool {
        self.new_frame_at(Instant::now())
    }
}
