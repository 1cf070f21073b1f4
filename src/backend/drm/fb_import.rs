//! Cache of scan-out framebuffers
//!
//! Registering a client buffer as a framebuffer requires importing its dma-bufs and an
//! `ADDFB2` ioctl, which is too expensive to repeat every frame. The [`FramebufferImporter`]
//! remembers registrations keyed by the GEM handle of the buffer's first plane, which the
//! kernel reports identically for every import of the same memory.
//!
//! The cache never keeps a framebuffer alive. Consumers hold [`ImportedFramebuffer`]s, which
//! are reference counted; once the last one is dropped the framebuffer is removed and its GEM
//! handles are closed. Cache entries pointing to released framebuffers are detected through a
//! generation counter and are cleaned up lazily.

use std::collections::HashMap;
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use drm::buffer;
use drm::control::framebuffer;
use drm_fourcc::DrmModifier;
use tracing::{debug, error, trace, warn};

use super::buffer::BufferInfo;
use super::error::AccessError;
use super::kms::{FramebufferDescriptor, KmsDevice};

/// Cache size above which stale entries are swept on the next miss
const CLEANUP_THRESHOLD: usize = 128;

/// Errors thrown when importing a buffer
#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    /// The buffer does not describe any plane
    #[error("Buffer has no planes")]
    NoPlanes,
    /// A dma-buf could not be imported
    #[error("Failed to import prime fd {fd}")]
    PrimeImport {
        /// The offending file descriptor
        fd: RawFd,
        /// Underlying error
        #[source]
        source: AccessError,
    },
    /// The buffer requires a modifier the device cannot register
    #[error("No ADDFB2 with modifier support, can't import modifier {0:?}")]
    ModifiersUnsupported(DrmModifier),
    /// The kernel refused to register the framebuffer
    #[error("Could not create framebuffer")]
    AddFramebuffer(#[source] AccessError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotKey {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Entry {
    fb: framebuffer::Handle,
    handles: [Option<buffer::Handle>; 4],
    refs: usize,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

#[derive(Debug, Default)]
struct CacheState {
    slots: Vec<Slot>,
    free: Vec<usize>,
    keys: HashMap<buffer::Handle, SlotKey>,
}

impl CacheState {
    fn entry_mut(&mut self, key: SlotKey) -> Option<&mut Entry> {
        self.slots
            .get_mut(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn is_live(&self, key: SlotKey) -> bool {
        self.slots
            .get(key.index)
            .map(|slot| slot.generation == key.generation && slot.entry.is_some())
            .unwrap_or(false)
    }

    fn insert(&mut self, entry: Entry) -> SlotKey {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.entry = Some(entry);
        SlotKey {
            index,
            generation: slot.generation,
        }
    }

    fn remove(&mut self, key: SlotKey) -> Option<Entry> {
        let slot = self
            .slots
            .get_mut(key.index)
            .filter(|slot| slot.generation == key.generation)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        Some(entry)
    }

    fn sweep(&mut self) {
        let before = self.keys.len();
        let slots = &self.slots;
        self.keys.retain(|_, key| {
            slots
                .get(key.index)
                .map(|slot| slot.generation == key.generation && slot.entry.is_some())
                .unwrap_or(false)
        });
        trace!(removed = before - self.keys.len(), "Swept framebuffer cache");
    }
}

struct ImporterInner {
    device: Arc<dyn KmsDevice>,
    state: Mutex<CacheState>,
}

impl fmt::Debug for ImporterInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImporterInner")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl ImporterInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_handles(&self, handles: &[Option<buffer::Handle>; 4]) {
        let primary = handles[0];
        for (idx, handle) in handles.iter().enumerate() {
            let Some(handle) = *handle else {
                continue;
            };
            // planes sharing the first plane's memory share its handle
            if idx != 0 && Some(handle) == primary {
                continue;
            }
            if let Err(err) = self.device.close_handle(handle) {
                error!(?handle, ?err, "Failed to close gem handle");
            }
        }
    }
}

/// Shared cache turning [`BufferInfo`]s into framebuffers
///
/// Cloning the importer yields a handle to the same cache, which may be used from any thread.
#[derive(Debug, Clone)]
pub struct FramebufferImporter {
    inner: Arc<ImporterInner>,
}

impl FramebufferImporter {
    /// Create an empty cache for `device`
    pub fn new(device: Arc<dyn KmsDevice>) -> Self {
        FramebufferImporter {
            inner: Arc::new(ImporterInner {
                device,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Return the framebuffer for `info`, registering it if necessary
    ///
    /// As long as a returned [`ImportedFramebuffer`] is alive, calls for a buffer backed by
    /// the same memory return the same framebuffer without touching the kernel again.
    #[profiling::function]
    pub fn get_or_create_fb_id(&self, info: &BufferInfo) -> Result<ImportedFramebuffer, ImportError> {
        let first = info.planes[0].ok_or(ImportError::NoPlanes)?;

        let mut state = self.inner.lock();

        let primary = self
            .inner
            .device
            .prime_fd_to_handle(first.prime_fd)
            .map_err(|source| ImportError::PrimeImport {
                fd: first.prime_fd,
                source,
            })?;

        if let Some(key) = state.keys.get(&primary).copied() {
            if let Some(entry) = state.entry_mut(key) {
                entry.refs += 1;
                trace!(fb = ?entry.fb, refs = entry.refs, "Framebuffer cache hit");
                return Ok(ImportedFramebuffer {
                    inner: self.inner.clone(),
                    key,
                    fb: entry.fb,
                });
            }
            state.keys.remove(&primary);
        }

        if state.keys.len() > CLEANUP_THRESHOLD {
            state.sweep();
        }

        let (fb, handles) = self.create(info, primary)?;
        let key = state.insert(Entry { fb, handles, refs: 1 });
        state.keys.insert(primary, key);
        debug!(?fb, ?primary, format = ?info.format, "Imported framebuffer");

        Ok(ImportedFramebuffer {
            inner: self.inner.clone(),
            key,
            fb,
        })
    }

    fn create(
        &self,
        info: &BufferInfo,
        primary: buffer::Handle,
    ) -> Result<(framebuffer::Handle, [Option<buffer::Handle>; 4]), ImportError> {
        let device = &self.inner.device;
        let mut handles = [Some(primary), None, None, None];
        let mut pitches = [0u32; 4];
        let mut offsets = [0u32; 4];

        let first_fd = info.planes[0].map(|p| p.prime_fd);
        for (idx, plane) in info.planes.iter().enumerate() {
            let Some(plane) = plane else {
                continue;
            };
            pitches[idx] = plane.pitch;
            offsets[idx] = plane.offset;
            if idx == 0 {
                continue;
            }
            if Some(plane.prime_fd) == first_fd {
                handles[idx] = Some(primary);
                continue;
            }
            match device.prime_fd_to_handle(plane.prime_fd) {
                Ok(handle) => handles[idx] = Some(handle),
                Err(source) => {
                    error!(fd = plane.prime_fd, ?source, "Failed to import prime fd");
                    self.inner.close_handles(&handles);
                    return Err(ImportError::PrimeImport {
                        fd: plane.prime_fd,
                        source,
                    });
                }
            }
        }

        let modifier = info.explicit_modifier();
        if let Some(modifier) = modifier {
            if !device.has_addfb2_modifiers() {
                warn!(?modifier, "No ADDFB2 with modifier support");
                self.inner.close_handles(&handles);
                return Err(ImportError::ModifiersUnsupported(modifier));
            }
        }

        let desc = FramebufferDescriptor {
            width: info.width,
            height: info.height,
            format: info.format,
            handles,
            pitches,
            offsets,
            modifier,
        };
        match device.add_framebuffer(&desc) {
            Ok(fb) => Ok((fb, handles)),
            Err(err) => {
                error!(?err, "Could not create framebuffer");
                self.inner.close_handles(&handles);
                Err(ImportError::AddFramebuffer(err))
            }
        }
    }

    /// Number of keys in the cache, including stale ones not yet swept
    pub fn cached_keys(&self) -> usize {
        self.inner.lock().keys.len()
    }

    /// Number of framebuffers currently alive
    pub fn live_framebuffers(&self) -> usize {
        let state = self.inner.lock();
        state.keys.values().filter(|key| state.is_live(**key)).count()
    }
}

/// A counted reference to a registered framebuffer
///
/// The framebuffer is removed from the device once the last reference is dropped.
pub struct ImportedFramebuffer {
    inner: Arc<ImporterInner>,
    key: SlotKey,
    fb: framebuffer::Handle,
}

impl fmt::Debug for ImportedFramebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportedFramebuffer").field("fb", &self.fb).finish()
    }
}

impl ImportedFramebuffer {
    /// Handle of the framebuffer
    pub fn fb(&self) -> framebuffer::Handle {
        self.fb
    }
}

impl PartialEq for ImportedFramebuffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && self.key == other.key
    }
}

impl Clone for ImportedFramebuffer {
    fn clone(&self) -> Self {
        let mut state = self.inner.lock();
        if let Some(entry) = state.entry_mut(self.key) {
            entry.refs += 1;
        }
        ImportedFramebuffer {
            inner: self.inner.clone(),
            key: self.key,
            fb: self.fb,
        }
    }
}

impl Drop for ImportedFramebuffer {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        let Some(entry) = state.entry_mut(self.key) else {
            return;
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return;
        }
        let Some(entry) = state.remove(self.key) else {
            return;
        };

        trace!(fb = ?entry.fb, "Releasing framebuffer");
        if let Err(err) = self.inner.device.remove_framebuffer(entry.fb) {
            error!(fb = ?entry.fb, ?err, "Failed to remove framebuffer");
        }
        self.inner.close_handles(&entry.handles);
    }
}
