//! Display pipelines
//!
//! A [`DisplayPipeline`] is the hardware path of one logical display: a connector, the encoder
//! driving it, the crtc feeding that encoder and a primary plane. Overlay planes are bound on
//! demand, whenever the composition planner asks for the [usable planes](DisplayPipeline::usable_planes)
//! of a frame.

use std::sync::atomic::{AtomicUsize, Ordering};

use drm::control::{connector, crtc, encoder, plane, PlaneType};
use tracing::{debug, error, info, info_span, trace};

use super::binding::{BindTransaction, Binding, BindingStorage, DrmObject};
use super::commit::{AtomicCommitArgs, AtomicStateManager, CommitError};
use super::error::Error;
use super::resources::{ConnectorInfo, DeviceResources};
use crate::config::Config;

static PIPELINE_IDS: AtomicUsize = AtomicUsize::new(0);

/// Unique identifier of a [`DisplayPipeline`]
///
/// Identifiers are never reused, not even after the pipeline was dropped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(usize);

impl PipelineId {
    pub(crate) fn next() -> PipelineId {
        PipelineId(PIPELINE_IDS.fetch_add(1, Ordering::Relaxed))
    }
}

/// The objects bound to a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInfo {
    /// Identifier of the pipeline
    pub id: PipelineId,
    /// Bound connector
    pub connector: connector::Handle,
    /// Bound encoder
    pub encoder: encoder::Handle,
    /// Bound crtc
    pub crtc: crtc::Handle,
    /// Bound primary plane
    pub primary_plane: plane::Handle,
}

/// Creates the [`AtomicStateManager`] of a freshly bound pipeline
pub trait AtomicStateFactory {
    /// Create the state manager for `pipeline`
    fn create(&self, pipeline: &PipelineInfo) -> Box<dyn AtomicStateManager>;
}

impl<F> AtomicStateFactory for F
where
    F: Fn(&PipelineInfo) -> Box<dyn AtomicStateManager>,
{
    fn create(&self, pipeline: &PipelineInfo) -> Box<dyn AtomicStateManager> {
        (self)(pipeline)
    }
}

/// A bound connector/encoder/crtc/primary plane combination
#[derive(Debug)]
pub struct DisplayPipeline {
    info: PipelineInfo,
    bindings: BindingStorage,
    overlay_planes: Vec<plane::Handle>,
    atomic_state: Box<dyn AtomicStateManager>,
    // connector, encoder, crtc and primary plane, released after the state manager was stopped
    _bound: Vec<Binding>,
}

impl DisplayPipeline {
    /// Search and bind a free pipeline for `connector`
    ///
    /// The encoder and crtc the connector currently uses are tried first, so an
    /// already configured output keeps its configuration. After that every encoder
    /// compatible with the connector is tried, each with every compatible crtc,
    /// in device order. Failed attempts leave no object bound.
    pub fn create(
        resources: &DeviceResources,
        bindings: &BindingStorage,
        connector: connector::Handle,
        factory: &dyn AtomicStateFactory,
    ) -> Result<DisplayPipeline, Error> {
        let conn = resources
            .connector(connector)
            .ok_or(Error::UnknownConnector(connector))?;
        let span = info_span!("drm_pipeline", connector = %conn.name);
        let _guard = span.enter();

        for (encoder, crtc) in candidates(resources, conn) {
            let id = PipelineId::next();
            match try_bind(resources, bindings, id, conn.handle, encoder, crtc) {
                Ok((primary_plane, bound)) => {
                    let info = PipelineInfo {
                        id,
                        connector: conn.handle,
                        encoder,
                        crtc,
                        primary_plane,
                    };
                    info!(?encoder, ?crtc, plane = ?primary_plane, "Created display pipeline");
                    let overlay_planes = resources
                        .planes_for_crtc(crtc, PlaneType::Overlay)
                        .map(|p| p.handle)
                        .collect();
                    let atomic_state = factory.create(&info);
                    return Ok(DisplayPipeline {
                        info,
                        bindings: bindings.clone(),
                        overlay_planes,
                        atomic_state,
                        _bound: bound,
                    });
                }
                Err(err) => trace!(?encoder, ?crtc, %err, "Candidate rejected"),
            }
        }

        error!("Could not find a suitable encoder/crtc");
        Err(Error::NoSuitablePipeline(connector))
    }

    /// The objects bound to this pipeline
    pub fn info(&self) -> &PipelineInfo {
        &self.info
    }

    /// Identifier of this pipeline
    pub fn id(&self) -> PipelineId {
        self.info.id
    }

    /// Planes this pipeline may use for the next frame
    ///
    /// The primary plane always comes first. With [`Config::use_overlay_planes`] every
    /// overlay plane of the crtc that is free or already bound to this pipeline follows,
    /// in device order. Overlay planes stay bound as long as any returned binding is alive.
    #[profiling::function]
    pub fn usable_planes(&self, config: &Config) -> Vec<Binding> {
        let mut planes = Vec::with_capacity(1 + self.overlay_planes.len());
        if let Some(primary) = self
            .bindings
            .bind(DrmObject::Plane(self.info.primary_plane), self.info.id, true)
        {
            planes.push(primary);
        }

        if config.use_overlay_planes {
            planes.extend(
                self.overlay_planes
                    .iter()
                    .filter_map(|plane| self.bindings.bind(DrmObject::Plane(*plane), self.info.id, true)),
            );
        }

        planes
    }

    /// Test or apply a configuration through the pipeline's state manager
    pub fn commit(&mut self, args: &AtomicCommitArgs<'_>) -> Result<(), CommitError> {
        self.atomic_state.commit(args)
    }
}

impl Drop for DisplayPipeline {
    fn drop(&mut self) {
        debug!(pipeline = ?self.info.id, "Tearing down display pipeline");
        self.atomic_state.stop();
    }
}

fn candidates(
    resources: &DeviceResources,
    conn: &ConnectorInfo,
) -> Vec<(encoder::Handle, crtc::Handle)> {
    let mut candidates = Vec::new();

    let mut push_encoder = |encoder: encoder::Handle| {
        let Some(enc) = resources.encoder(encoder) else {
            return;
        };
        let current = enc.current_crtc.and_then(|crtc| resources.crtc(crtc));
        let possible = resources.crtcs.iter().copied().filter(|crtc| enc.supports_crtc(*crtc));
        for crtc in current.into_iter().chain(possible) {
            if !candidates.contains(&(encoder, crtc)) {
                candidates.push((encoder, crtc));
            }
        }
    };

    if let Some(current) = conn.current_encoder {
        push_encoder(current);
    }
    for enc in resources.encoders.iter().filter(|e| conn.supports_encoder(e.handle)) {
        push_encoder(enc.handle);
    }

    candidates
}

fn try_bind(
    resources: &DeviceResources,
    bindings: &BindingStorage,
    id: PipelineId,
    connector: connector::Handle,
    encoder: encoder::Handle,
    crtc: crtc::Handle,
) -> Result<(plane::Handle, Vec<Binding>), Error> {
    let mut txn = BindTransaction::new(bindings, id);

    if txn.bind(DrmObject::Connector(connector)).is_none()
        || txn.bind(DrmObject::Encoder(encoder)).is_none()
        || txn.bind(DrmObject::Crtc(crtc)).is_none()
    {
        txn.rollback();
        return Err(Error::NoSuitablePipeline(connector));
    }

    for cursor in resources.planes_for_crtc(crtc, PlaneType::Cursor) {
        debug!(plane = ?cursor.handle, "Ignoring cursor plane");
    }

    let primary_planes = resources
        .planes_for_crtc(crtc, PlaneType::Primary)
        .map(|p| p.handle)
        .collect::<Vec<_>>();
    let primary = txn
        .bind_first(primary_planes.iter().copied().map(DrmObject::Plane))
        .and_then(Binding::plane);
    let Some(primary) = primary else {
        if primary_planes.is_empty() {
            error!(?crtc, "Primary plane for crtc not found");
        } else {
            error!(?crtc, "Failed to bind primary plane");
        }
        txn.rollback();
        return Err(Error::NoPrimaryPlane(crtc));
    };

    Ok((primary, txn.commit()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use drm::control::plane;

    use super::DisplayPipeline;
    use crate::backend::drm::binding::{BindingStorage, DrmObject};
    use crate::backend::drm::mock::{committer_factory, dual_output_resources, handle, CommitLog};
    use crate::backend::drm::DrmError;
    use crate::config::Config;

    #[test]
    fn prefers_current_encoder_and_crtc() {
        let mut resources = dual_output_resources();
        resources.connectors[0].current_encoder = Some(handle(11));
        resources.encoders[1].current_crtc = Some(handle(21));
        let bindings = BindingStorage::new(&resources);
        let log = Arc::new(CommitLog::default());

        let factory = committer_factory(&log);
        let pipeline = DisplayPipeline::create(&resources, &bindings, handle(1), &factory).unwrap();
        assert_eq!(pipeline.info().encoder, handle(11));
        assert_eq!(pipeline.info().crtc, handle(21));
        assert_eq!(pipeline.info().primary_plane, handle(40));
    }

    #[test]
    fn falls_back_to_device_order() {
        let resources = dual_output_resources();
        let bindings = BindingStorage::new(&resources);
        let log = Arc::new(CommitLog::default());
        let factory = committer_factory(&log);

        let first = DisplayPipeline::create(&resources, &bindings, handle(1), &factory).unwrap();
        assert_eq!(first.info().encoder, handle(10));
        assert_eq!(first.info().crtc, handle(20));

        // encoder 10 and crtc 20 are taken, connector 2 has to use the second path
        let second = DisplayPipeline::create(&resources, &bindings, handle(2), &factory).unwrap();
        assert_eq!(second.info().encoder, handle(11));
        assert_eq!(second.info().crtc, handle(21));
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn failed_creation_leaks_no_bindings() {
        let resources = dual_output_resources();
        let bindings = BindingStorage::new(&resources);
        let log = Arc::new(CommitLog::default());
        let factory = committer_factory(&log);

        // occupy both primary planes, every candidate now fails after binding its crtc
        let _a = bindings.bind(DrmObject::Plane(handle(30)), super::PipelineId::next(), false);
        let _b = bindings.bind(DrmObject::Plane(handle(40)), super::PipelineId::next(), false);

        let err = DisplayPipeline::create(&resources, &bindings, handle(1), &factory).unwrap_err();
        assert!(matches!(err, DrmError::NoSuitablePipeline(_)));
        assert_eq!(bindings.bound_count(), 2);
        assert_eq!(log.created(), 0);
    }

    #[test]
    fn unknown_connector() {
        let resources = dual_output_resources();
        let bindings = BindingStorage::new(&resources);
        let log = Arc::new(CommitLog::default());
        let factory = committer_factory(&log);
        let err = DisplayPipeline::create(&resources, &bindings, handle(99), &factory).unwrap_err();
        assert!(matches!(err, DrmError::UnknownConnector(_)));
    }

    #[test]
    fn concurrent_creation_binds_the_connector_once() {
        const THREADS: usize = 8;
        let resources = dual_output_resources();
        let bindings = BindingStorage::new(&resources);
        let log = Arc::new(CommitLog::default());
        let created = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    let factory = committer_factory(&log);
                    barrier.wait();
                    let pipeline = DisplayPipeline::create(&resources, &bindings, handle(1), &factory);
                    if pipeline.is_ok() {
                        created.fetch_add(1, Ordering::SeqCst);
                    }
                    // hold the pipeline until every thread has tried
                    barrier.wait();
                    drop(pipeline);
                });
            }
        });

        assert_eq!(created.into_inner(), 1);
        assert_eq!(log.created(), 1);
        assert_eq!(log.stopped(), 1);
        assert_eq!(bindings.bound_count(), 0);
    }

    #[test]
    fn drop_releases_objects_and_stops_state() {
        let resources = dual_output_resources();
        let bindings = BindingStorage::new(&resources);
        let log = Arc::new(CommitLog::default());
        let factory = committer_factory(&log);

        let pipeline = DisplayPipeline::create(&resources, &bindings, handle(1), &factory).unwrap();
        assert_eq!(bindings.bound_count(), 4);
        assert_eq!(log.created(), 1);
        drop(pipeline);
        assert_eq!(bindings.bound_count(), 0);
        assert_eq!(log.stopped(), 1);

        // the same objects can be bound again
        let pipeline = DisplayPipeline::create(&resources, &bindings, handle(1), &factory).unwrap();
        assert_eq!(pipeline.info().crtc, handle(20));
    }

    #[test]
    fn usable_planes_respect_ownership_and_config() {
        let resources = dual_output_resources();
        let bindings = BindingStorage::new(&resources);
        let log = Arc::new(CommitLog::default());
        let factory = committer_factory(&log);

        let pipeline = DisplayPipeline::create(&resources, &bindings, handle(1), &factory).unwrap();
        let other = DisplayPipeline::create(&resources, &bindings, handle(2), &factory).unwrap();

        // overlay 32 is shared between both crtcs, the first pipeline to ask gets it
        let planes = pipeline.usable_planes(&Config::default());
        let handles = planes.iter().filter_map(|b| b.plane()).collect::<Vec<_>>();
        let expected: Vec<plane::Handle> = vec![handle(30), handle(31), handle(32)];
        assert_eq!(handles, expected);

        let other_planes = other.usable_planes(&Config::default());
        let handles = other_planes.iter().filter_map(|b| b.plane()).collect::<Vec<_>>();
        let expected: Vec<plane::Handle> = vec![handle(40)];
        assert_eq!(handles, expected);

        // asking again while still holding the bindings returns the same planes
        assert_eq!(pipeline.usable_planes(&Config::default()).len(), 3);

        let config = Config {
            use_overlay_planes: false,
            ..Config::default()
        };
        drop(planes);
        let planes = pipeline.usable_planes(&config);
        assert_eq!(planes.len(), 1);
        assert_eq!(bindings.owner(DrmObject::Plane(handle(32))), None);
    }
}
