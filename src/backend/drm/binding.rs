//! Exclusive ownership of modesetting objects
//!
//! Every connector, encoder, crtc and plane of a device has one record in a shared
//! [`BindingStorage`]. A record is either free or bound to exactly one
//! [`PipelineId`]. Binding is a compare-and-swap on that owner field; the
//! returned [`Binding`] releases the record again once the last binding for it is dropped.
//!
//! Binding several objects as one unit is done with a [`BindTransaction`], which releases
//! everything it acquired unless it is explicitly committed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use drm::control::{connector, crtc, encoder, plane};
use tracing::{trace, warn};

use super::resources::DeviceResources;
use super::PipelineId;

/// A physical modesetting object
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DrmObject {
    /// A connector
    Connector(connector::Handle),
    /// An encoder
    Encoder(encoder::Handle),
    /// A crtc
    Crtc(crtc::Handle),
    /// A plane of any type
    Plane(plane::Handle),
}

#[derive(Debug, Default)]
struct Record {
    owner: Option<PipelineId>,
    refs: usize,
}

/// Binding records for all objects of one device
///
/// Cloning the storage is cheap and yields a handle to the same records.
#[derive(Debug, Clone, Default)]
pub struct BindingStorage {
    records: Arc<Mutex<HashMap<DrmObject, Record>>>,
}

impl BindingStorage {
    /// Create records for every object of the device, all of them free
    pub fn new(resources: &DeviceResources) -> Self {
        let objects = resources
            .connectors
            .iter()
            .map(|c| DrmObject::Connector(c.handle))
            .chain(resources.encoders.iter().map(|e| DrmObject::Encoder(e.handle)))
            .chain(resources.crtcs.iter().map(|c| DrmObject::Crtc(*c)))
            .chain(resources.planes.iter().map(|p| DrmObject::Plane(p.handle)));

        BindingStorage {
            records: Arc::new(Mutex::new(
                objects.map(|object| (object, Record::default())).collect(),
            )),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DrmObject, Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Try to bind `object` to `pipeline`
    ///
    /// Succeeds if the object is free. If it is already bound to `pipeline` and
    /// `return_if_bound` is set, another binding to the same record is returned.
    /// Any other request fails without side effects.
    pub fn bind(&self, object: DrmObject, pipeline: PipelineId, return_if_bound: bool) -> Option<Binding> {
        let mut records = self.lock();
        let Some(record) = records.get_mut(&object) else {
            warn!(?object, "Tried to bind unknown object");
            return None;
        };

        match record.owner {
            None => {
                record.owner = Some(pipeline);
                record.refs = 1;
            }
            Some(owner) if owner == pipeline && return_if_bound => {
                record.refs += 1;
            }
            Some(owner) => {
                trace!(?object, ?owner, requester = ?pipeline, "Object already bound");
                return None;
            }
        }

        Some(Binding {
            storage: self.clone(),
            object,
            pipeline,
        })
    }

    /// Current owner of `object`, if it is bound
    pub fn owner(&self, object: DrmObject) -> Option<PipelineId> {
        self.lock().get(&object).and_then(|record| record.owner)
    }

    /// Number of currently bound objects
    pub fn bound_count(&self) -> usize {
        self.lock().values().filter(|record| record.owner.is_some()).count()
    }

    fn release(&self, object: DrmObject, pipeline: PipelineId) {
        let mut records = self.lock();
        let Some(record) = records.get_mut(&object) else {
            return;
        };
        if record.owner != Some(pipeline) {
            warn!(?object, owner = ?record.owner, ?pipeline, "Releasing binding not owned by pipeline");
            return;
        }
        record.refs -= 1;
        if record.refs == 0 {
            trace!(?object, ?pipeline, "Object released");
            record.owner = None;
        }
    }
}

/// A reference to an object bound to a pipeline
///
/// The object stays bound until every binding for it has been dropped.
#[derive(Debug)]
pub struct Binding {
    storage: BindingStorage,
    object: DrmObject,
    pipeline: PipelineId,
}

impl Binding {
    /// The bound object
    pub fn object(&self) -> DrmObject {
        self.object
    }

    /// The pipeline owning the object
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// The bound plane, if this binding is for a plane
    pub fn plane(&self) -> Option<plane::Handle> {
        match self.object {
            DrmObject::Plane(plane) => Some(plane),
            _ => None,
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.storage.release(self.object, self.pipeline);
    }
}

/// Binds several objects to one pipeline, all or nothing
#[derive(Debug)]
pub struct BindTransaction<'a> {
    storage: &'a BindingStorage,
    pipeline: PipelineId,
    acquired: Vec<Binding>,
}

impl<'a> BindTransaction<'a> {
    /// Start a transaction for `pipeline`
    pub fn new(storage: &'a BindingStorage, pipeline: PipelineId) -> Self {
        BindTransaction {
            storage,
            pipeline,
            acquired: Vec::with_capacity(4),
        }
    }

    /// Bind `object`, returning its index in the transaction on success
    pub fn bind(&mut self, object: DrmObject) -> Option<usize> {
        let binding = self.storage.bind(object, self.pipeline, false)?;
        self.acquired.push(binding);
        Some(self.acquired.len() - 1)
    }

    /// Bind the first object of `candidates` that is free
    pub fn bind_first(&mut self, candidates: impl IntoIterator<Item = DrmObject>) -> Option<&Binding> {
        let idx = candidates.into_iter().find_map(|object| self.bind(object))?;
        self.acquired.get(idx)
    }

    /// Keep all acquired bindings, in the order they were acquired
    pub fn commit(mut self) -> Vec<Binding> {
        std::mem::take(&mut self.acquired)
    }

    /// Release all acquired bindings
    pub fn rollback(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        if !self.acquired.is_empty() {
            trace!(pipeline = ?self.pipeline, count = self.acquired.len(), "Rolling back bindings");
        }
        self.acquired.clear();
    }
}

impl<'a> Drop for BindTransaction<'a> {
    fn drop(&mut self) {
        self.release_all();
    }
}
