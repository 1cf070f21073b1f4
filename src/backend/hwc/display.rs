//! State of one display
//!
//! [`HwcDisplay`] owns the layers of a display together with the hardware path used to show
//! them. A frame goes through three steps:
//!
//! 1. The client updates layers and their buffers. Buffers are registered as framebuffers
//!    right away, so a buffer the kernel cannot scan out is known before planning.
//! 2. [`HwcDisplay::validate`] decides which layers get their own plane and which have to be
//!    composited by the client into the client target.
//! 3. After the client rendered the client target, [`HwcDisplay::present`] commits the frame.

use std::fmt::Write as _;
use std::sync::Arc;

use drm::control::plane;
use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, error, info_span, instrument, trace};

use super::flatten::{FlatteningController, IdleFlatteningController};
use super::layer::{CompositionType, Layer, LayerBufferError, LayerId};
use super::planner::{Backend, ValidateResult};
use super::stats::Stats;
use crate::backend::drm::{
    AtomicCommitArgs, Binding, BufferInfoError, BufferInfoGetter, CommitError, DisplayPipeline,
    FramebufferImporter, ImportError, PlannedLayer,
};
use crate::config::Config;
use crate::utils::{FRectangle, Rectangle};

/// Errors of display operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The display has no pipeline
    #[error("Display is not connected to a pipeline")]
    NoPipeline,
    /// The layer does not exist
    #[error("Layer {0:?} does not exist")]
    BadLayer(LayerId),
    /// No layer is marked for composition
    #[error("Nothing to compose")]
    EmptyComposition,
    /// The composition needs more planes than usable
    #[error("Composition needs {needed} planes, only {available} are usable")]
    TooManyLayers {
        /// Planes required
        needed: usize,
        /// Planes usable by the display
        available: usize,
    },
    /// A device layer has no framebuffer
    #[error("Layer {0:?} has no framebuffer")]
    MissingFramebuffer(LayerId),
    /// The client target is required but has no framebuffer
    #[error("Client target has no framebuffer")]
    NoClientTarget,
    /// The buffer does not fit into display coordinates
    #[error("Buffer of {width}x{height} exceeds the display coordinate range")]
    BufferTooLarge {
        /// Buffer width in pixels
        width: u32,
        /// Buffer height in pixels
        height: u32,
    },
    /// Buffer metadata could not be resolved
    #[error(transparent)]
    BufferInfo(#[from] BufferInfoError),
    /// A buffer could not be registered
    #[error(transparent)]
    Import(#[from] ImportError),
    /// The kernel rejected the commit
    #[error(transparent)]
    Commit(#[from] CommitError),
}

impl From<LayerBufferError> for Error {
    fn from(err: LayerBufferError) -> Self {
        match err {
            LayerBufferError::BufferInfo(err) => Error::BufferInfo(err),
            LayerBufferError::Import(err) => Error::Import(err),
        }
    }
}

/// A committed frame, keeping its planes bound and framebuffers alive while scanned out
#[derive(Debug)]
struct KmsPlan {
    _planes: SmallVec<[Binding; 4]>,
    _layers: Vec<PlannedLayer>,
}

/// State of one display
#[derive(Debug)]
pub struct HwcDisplay {
    config: Config,
    importer: FramebufferImporter,
    backend: Backend,
    pipeline: Option<DisplayPipeline>,
    flattening: Option<Arc<dyn FlatteningController>>,
    layers: IndexMap<LayerId, Layer>,
    next_layer_id: u64,
    client_layer: Layer,
    color_transform_by_gpu: bool,
    presented: Option<KmsPlan>,
    total_stats: Stats,
    prev_stats: Stats,
    frame_no: u64,
    span: tracing::Span,
}

impl HwcDisplay {
    /// Create a display, headless if `pipeline` is `None`
    pub fn new(config: Config, importer: FramebufferImporter, pipeline: Option<DisplayPipeline>) -> Self {
        let span = info_span!(
            parent: None,
            "hwc_display",
            pipeline = ?pipeline.as_ref().map(|p| p.id()),
        );
        HwcDisplay {
            config,
            importer,
            backend: Backend::default(),
            pipeline,
            flattening: None,
            layers: IndexMap::new(),
            next_layer_id: 0,
            client_layer: Layer::default(),
            color_transform_by_gpu: false,
            presented: None,
            total_stats: Stats::default(),
            prev_stats: Stats::default(),
            frame_no: 0,
            span,
        }
    }

    /// Configuration of the display
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the composition planner
    pub fn set_backend(&mut self, backend: Backend) {
        self.backend = backend;
    }

    /// Replace the pipeline, e.g. after a hotplug event
    ///
    /// The previous pipeline is torn down, releasing every object it had bound.
    pub fn set_pipeline(&mut self, pipeline: Option<DisplayPipeline>) {
        let _guard = self.span.enter();
        self.presented = None;
        self.pipeline = pipeline;
        debug!(pipeline = ?self.pipeline.as_ref().map(|p| p.id()), "Pipeline changed");
    }

    /// The pipeline of the display, `None` if headless
    pub fn pipeline(&self) -> Option<&DisplayPipeline> {
        self.pipeline.as_ref()
    }

    pub(crate) fn has_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    pub(crate) fn usable_plane_count(&self) -> usize {
        self.pipeline
            .as_ref()
            .map(|pipeline| pipeline.usable_planes(&self.config).len())
            .unwrap_or(0)
    }

    /// Set or remove the flattening controller
    pub fn set_flattening_controller(&mut self, controller: Option<Arc<dyn FlatteningController>>) {
        self.flattening = controller;
    }

    /// Flatten the display after it was idle for [`Config::flattening_timeout`]
    ///
    /// The returned controller has to be [ticked](IdleFlatteningController::tick) by the caller.
    pub fn enable_idle_flattening(&mut self) -> Arc<IdleFlatteningController> {
        let controller = Arc::new(IdleFlatteningController::new(self.config.flattening_timeout));
        self.flattening = Some(controller.clone());
        controller
    }

    pub(crate) fn flattening_controller(&self) -> Option<Arc<dyn FlatteningController>> {
        self.flattening.clone()
    }

    /// Whether the color transform is applied by the client
    pub fn color_transform_by_gpu(&self) -> bool {
        self.color_transform_by_gpu
    }

    /// Let the client apply the color transform, forcing client composition of every layer
    pub fn set_color_transform_by_gpu(&mut self, by_gpu: bool) {
        self.color_transform_by_gpu = by_gpu;
    }

    /// Add a new layer
    pub fn create_layer(&mut self) -> LayerId {
        let id = LayerId(self.next_layer_id);
        self.next_layer_id += 1;
        self.layers.insert(id, Layer::default());
        id
    }

    /// Remove a layer
    pub fn destroy_layer(&mut self, id: LayerId) -> Result<(), Error> {
        self.layers.shift_remove(&id).map(|_| ()).ok_or(Error::BadLayer(id))
    }

    /// Access a layer
    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    /// Mutably access a layer
    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(&id)
    }

    /// All layers, bottom to top
    ///
    /// Layers with the same z position keep their creation order.
    pub fn layers_by_zpos(&self) -> Vec<(LayerId, &Layer)> {
        let mut layers = self.layers.iter().map(|(id, layer)| (*id, layer)).collect::<Vec<_>>();
        layers.sort_by_key(|(_, layer)| layer.zpos());
        layers
    }

    /// Attach a new buffer to a layer
    ///
    /// If the buffer cannot be resolved or registered the error is returned and the layer is
    /// composited by the client until it gets a usable buffer.
    pub fn set_layer_buffer<B, G>(&mut self, getter: &G, id: LayerId, buffer: &B) -> Result<(), Error>
    where
        B: ?Sized,
        G: BufferInfoGetter<B> + ?Sized,
    {
        let avoid_alpha = self.config.avoid_alpha_for_framebuffer;
        let layer = self.layers.get_mut(&id).ok_or(Error::BadLayer(id))?;
        layer
            .set_buffer(&self.importer, getter.buffer_info(buffer), avoid_alpha)
            .map_err(|err| {
                debug!(parent: &self.span, layer = ?id, %err, "Layer buffer unusable");
                Error::from(err)
            })
    }

    /// Attach the buffer the client composited into
    ///
    /// The client target covers the whole buffer and is shown at the top-left corner. A buffer
    /// too large for display coordinates is rejected and the previous client target is kept.
    pub fn set_client_target<B, G>(&mut self, getter: &G, buffer: &B) -> Result<(), Error>
    where
        B: ?Sized,
        G: BufferInfoGetter<B> + ?Sized,
    {
        let avoid_alpha = self.config.avoid_alpha_for_framebuffer;
        let info = getter.buffer_info(buffer);
        let frame = match &info {
            Ok(info) => match (i32::try_from(info.width), i32::try_from(info.height)) {
                (Ok(w), Ok(h)) => Some(Rectangle::from_loc_and_size(0, 0, w, h)),
                _ => {
                    let (width, height) = (info.width, info.height);
                    debug!(parent: &self.span, width, height, "Client target too large");
                    return Err(Error::BufferTooLarge { width, height });
                }
            },
            Err(_) => None,
        };

        self.client_layer.set_buffer(&self.importer, info, avoid_alpha)?;
        if let Some(frame) = frame {
            self.client_layer.set_display_frame(frame);
            self.client_layer.set_source_crop(FRectangle::from(frame));
        }
        Ok(())
    }

    /// Decide the composition type of every layer
    #[instrument(level = "trace", parent = &self.span, skip_all)]
    pub fn validate(&mut self) -> ValidateResult {
        let backend = self.backend.clone();
        backend.validate_display(self)
    }

    /// Layers whose composition type differs from the requested one, bottom to top
    pub fn changed_composition_types(&self) -> Vec<(LayerId, CompositionType)> {
        self.layers_by_zpos()
            .into_iter()
            .filter(|(_, layer)| layer.type_changed())
            .map(|(id, layer)| (id, layer.validated_type()))
            .collect()
    }

    /// Take over the composition types decided by the last validation
    pub fn accept_display_changes(&mut self) {
        for layer in self.layers.values_mut() {
            layer.accept_type_change();
        }
    }

    /// Build the plane configuration of the current composition types and commit it
    ///
    /// Device layers get one plane each, all client layers share the plane of the client
    /// target at the position of the lowest client layer.
    #[profiling::function]
    pub fn create_composition(&mut self, test_only: bool) -> Result<(), Error> {
        let (planes, plan) = {
            let pipeline = self.pipeline.as_ref().ok_or(Error::NoPipeline)?;

            let mut composition = SmallVec::<[(Option<LayerId>, &Layer); 8]>::new();
            let mut client_inserted = false;
            for (id, layer) in self.layers_by_zpos() {
                match layer.validated_type() {
                    CompositionType::Device => composition.push((Some(id), layer)),
                    CompositionType::Client if !client_inserted => {
                        client_inserted = true;
                        composition.push((None, &self.client_layer));
                    }
                    _ => {}
                }
            }
            if composition.is_empty() {
                return Err(Error::EmptyComposition);
            }

            let planes = pipeline
                .usable_planes(&self.config)
                .into_iter()
                .filter_map(|binding| binding.plane().map(|plane| (plane, binding)))
                .collect::<Vec<(plane::Handle, Binding)>>();
            if composition.len() > planes.len() {
                return Err(Error::TooManyLayers {
                    needed: composition.len(),
                    available: planes.len(),
                });
            }

            let mut plan = Vec::with_capacity(composition.len());
            for (zpos, ((id, layer), (plane, _))) in composition.iter().zip(&planes).enumerate() {
                let framebuffer = layer.framebuffer().cloned().ok_or(match id {
                    Some(id) => Error::MissingFramebuffer(*id),
                    None => Error::NoClientTarget,
                })?;
                plan.push(PlannedLayer {
                    plane: *plane,
                    framebuffer,
                    display_frame: layer.display_frame(),
                    source_crop: layer.source_crop(),
                    transform: layer.transform(),
                    zpos,
                });
            }

            let planes = planes
                .into_iter()
                .take(plan.len())
                .map(|(_, binding)| binding)
                .collect::<SmallVec<[Binding; 4]>>();
            (planes, plan)
        };

        let pipeline = self.pipeline.as_mut().ok_or(Error::NoPipeline)?;
        if let Err(err) = pipeline.commit(&AtomicCommitArgs {
            test_only,
            plan: &plan,
        }) {
            if !test_only {
                error!(parent: &self.span, %err, "Failed to apply the frame composition");
            }
            return Err(err.into());
        }

        if !test_only {
            self.frame_no += 1;
            trace!(parent: &self.span, frame = self.frame_no, planes = plan.len(), "Frame committed");
            self.presented = Some(KmsPlan {
                _planes: planes,
                _layers: plan,
            });
        }
        Ok(())
    }

    /// Commit the validated frame
    #[instrument(level = "trace", parent = &self.span, skip_all)]
    pub fn present(&mut self) -> Result<(), Error> {
        if self.pipeline.is_none() {
            return Ok(());
        }

        self.total_stats.total_frames += 1;
        self.create_composition(false).map_err(|err| {
            self.total_stats.failed_kms_present += 1;
            err
        })
    }

    /// Number of frames committed so far
    pub fn frame_no(&self) -> u64 {
        self.frame_no
    }

    /// Statistics since the display was created
    pub fn stats(&self) -> &Stats {
        &self.total_stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut Stats {
        &mut self.total_stats
    }

    /// Human readable state of the display
    ///
    /// Statistics are reported both in total and since the previous call.
    pub fn dump(&mut self) -> String {
        let delta = self.total_stats.minus(&self.prev_stats);
        self.prev_stats = self.total_stats;

        let mut out = String::new();
        match &self.pipeline {
            Some(pipeline) => {
                let info = pipeline.info();
                let _ = writeln!(
                    out,
                    "- Display on connector {:?}, crtc {:?}",
                    info.connector, info.crtc
                );
            }
            None => {
                let _ = writeln!(out, "- Headless display");
            }
        }
        let _ = writeln!(out, "  Backend: {}", self.backend.name());
        let _ = writeln!(out, "  Flattening: {}", self.flattening.is_some());
        let _ = write!(
            out,
            "\nStatistics since system boot:\n{}\n\nStatistics since last dump:\n{}\n\n",
            self.total_stats, delta
        );
        out
    }
}
