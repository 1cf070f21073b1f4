//! Composition planning
//!
//! Every frame the layers of a display are split into layers scanned out by their own plane
//! ("device" layers) and layers the client composites into its client target. The client
//! target occupies a single plane at a single position of the plane stack, so the client
//! layers always form one contiguous range in z-order.
//!
//! The planner starts from the smallest range covering every layer that cannot be scanned
//! out. If there are not enough planes for the remaining layers the range grows, and of all
//! candidate placements the one with the least client-composited pixel area wins.

use std::ops::Range;

use tracing::{debug, trace, warn};

use super::display::HwcDisplay;
use super::layer::{CompositionType, Layer, LayerId};

/// Name of the backend used for any hardware
pub const GENERIC_BACKEND: &str = "generic";

/// Outcome of validating a display
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ValidateResult {
    /// Whether any layer has to be composited by the client
    pub changes: bool,
    /// Number of layers composited by the client
    pub num_types: usize,
    /// Number of layer requests, always zero
    pub num_requests: usize,
}

/// The composition planner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    name: &'static str,
}

impl Default for Backend {
    fn default() -> Self {
        Backend {
            name: GENERIC_BACKEND,
        }
    }
}

/// Look up a backend by name
///
/// Unknown names fall back to the generic backend.
pub fn backend_for(name: &str) -> Backend {
    if name != GENERIC_BACKEND {
        warn!(backend = name, "Unknown backend, using {}", GENERIC_BACKEND);
    }
    Backend::default()
}

impl Backend {
    /// Name of the backend
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decide the composition type of every layer of `display`
    ///
    /// A rejected test commit is not an error: the whole frame then falls back to
    /// client composition and [`Stats::failed_kms_validate`](super::Stats::failed_kms_validate)
    /// is incremented.
    #[profiling::function]
    pub fn validate_display(&self, display: &mut HwcDisplay) -> ValidateResult {
        if !display.has_pipeline() {
            trace!("Display is headless, nothing to validate");
            return ValidateResult::default();
        }

        let (ids, forced, areas) = {
            let layers = display.layers_by_zpos();
            let ids = layers.iter().map(|(id, _)| *id).collect::<Vec<_>>();
            let forced = layers
                .iter()
                .map(|(_, layer)| self.is_client_layer(display, layer))
                .collect::<Vec<_>>();
            let areas = layers
                .iter()
                .map(|(_, layer)| layer.display_frame().area())
                .collect::<Vec<_>>();
            (ids, forced, areas)
        };
        let everything = 0..ids.len();

        if let Some(flattening) = display.flattening_controller() {
            let flatten = if ids.len() <= 1 {
                flattening.disable();
                false
            } else {
                flattening.new_frame()
            };
            if flatten {
                debug!(layers = ids.len(), "Flattening frame");
                display.stats_mut().frames_flattened += 1;
                mark_validated(display, &ids, &everything);
                return ValidateResult {
                    changes: true,
                    num_types: ids.len(),
                    num_requests: 0,
                };
            }
        }

        let planes = display.usable_plane_count();
        let mut client = extra_client_range(&areas, minimal_client_range(&forced), planes);
        mark_validated(display, &ids, &client);

        if client != everything {
            if let Err(err) = display.create_composition(true) {
                debug!(%err, "Test commit failed, compositing everything on the client");
                display.stats_mut().failed_kms_validate += 1;
                client = everything.clone();
                mark_validated(display, &ids, &client);
            }
        }

        let stats = display.stats_mut();
        stats.gpu_pixops = stats.gpu_pixops.saturating_add(pixops(&areas, &client));
        stats.total_pixops = stats.total_pixops.saturating_add(pixops(&areas, &everything));
        trace!(?client, layers = ids.len(), "Validated display");

        ValidateResult {
            changes: !client.is_empty(),
            num_types: client.len(),
            num_requests: 0,
        }
    }

    /// Whether `layer` has to be composited by the client regardless of the plane budget
    pub fn is_client_layer(&self, display: &HwcDisplay, layer: &Layer) -> bool {
        !layer.requested_type().is_hardware_eligible()
            || !layer.is_usable_as_device()
            || display.color_transform_by_gpu()
            || (layer.requires_scaling_or_phasing() && display.config().force_gpu_scaling)
    }
}

fn mark_validated(display: &mut HwcDisplay, ids: &[LayerId], client: &Range<usize>) {
    for (idx, id) in ids.iter().enumerate() {
        if let Some(layer) = display.layer_mut(*id) {
            layer.set_validated_type(if client.contains(&idx) {
                CompositionType::Client
            } else {
                CompositionType::Device
            });
        }
    }
}

/// Saturates instead of wrapping on huge frames
fn pixops(areas: &[u64], range: &Range<usize>) -> u64 {
    areas[range.clone()]
        .iter()
        .fold(0u64, |acc, area| acc.saturating_add(*area))
}

/// Smallest contiguous range covering every forced client layer
pub(crate) fn minimal_client_range(forced: &[bool]) -> Range<usize> {
    match (
        forced.iter().position(|f| *f),
        forced.iter().rposition(|f| *f),
    ) {
        (Some(first), Some(last)) => first..last + 1,
        _ => 0..0,
    }
}

/// Grow `client` until the remaining layers fit into `usable_planes`
///
/// `areas` holds the pixel area of every layer in z-order. If there are more layers than
/// planes, one plane is kept for the client target. The range grows by exactly as many layers
/// as do not fit, and the placement with the least client area is chosen, the lowest start
/// winning ties.
pub(crate) fn extra_client_range(
    areas: &[u64],
    client: Range<usize>,
    usable_planes: usize,
) -> Range<usize> {
    let layers = areas.len();
    let mut avail = usable_planes;
    if avail < layers {
        avail = avail.saturating_sub(1);
    }

    let extra = (layers - client.len()) as isize - avail as isize;
    if extra <= 0 {
        return client;
    }
    let extra = extra as usize;

    let (start, size, steps) = if client.is_empty() {
        (0, extra, 1 + layers - extra)
    } else {
        let prepend = client.start.min(extra);
        let append = (layers - client.end).min(extra);
        let start = client.start - prepend;
        let size = client.len() + extra;
        (start, size, 1 + append.min(prepend).min(layers - (start + size)))
    };

    let mut best = start;
    let mut best_pixops = u64::MAX;
    for candidate in start..start + steps {
        let po = pixops(areas, &(candidate..candidate + size));
        if po < best_pixops {
            best_pixops = po;
            best = candidate;
        }
    }
    best..best + size
}

#[cfg(test)]
mod tests {
    use std::ops::Range;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::{backend_for, extra_client_range, minimal_client_range, pixops, GENERIC_BACKEND};

    #[test]
    fn minimal_range_spans_forced_layers() {
        assert_eq!(minimal_client_range(&[false, false]), 0..0);
        assert_eq!(minimal_client_range(&[false, true, false, true, false]), 1..4);
        assert_eq!(minimal_client_range(&[true]), 0..1);
        assert_eq!(minimal_client_range(&[]), 0..0);
    }

    #[test]
    fn enough_planes_keep_the_minimal_range() {
        let areas = [100, 100, 100];
        assert_eq!(extra_client_range(&areas, 1..2, 3), 1..2);
        assert_eq!(extra_client_range(&areas, 0..0, 3), 0..0);
        // no plane is reserved for the client target if planes and layers match
        assert_eq!(extra_client_range(&areas, 0..0, 5), 0..0);
    }

    #[test]
    fn growth_prefers_the_cheaper_side() {
        // 5 layers, 1 and 2 forced, 3 planes: one plane for the client target,
        // one more layer has to join the client range
        let cheap_front = [10, 500, 500, 4000, 4000];
        assert_eq!(extra_client_range(&cheap_front, 1..3, 3), 0..3);

        let cheap_back = [4000, 500, 500, 10, 4000];
        assert_eq!(extra_client_range(&cheap_back, 1..3, 3), 1..4);

        // ties keep the lowest start
        let even = [10, 500, 500, 10, 4000];
        assert_eq!(extra_client_range(&even, 1..3, 3), 0..3);
    }

    #[test]
    fn empty_range_slides_over_all_layers() {
        let areas = [100, 5, 5, 5, 5, 900];
        // 6 layers, 3 planes: 2 usable for layers, 4 layers go to the client
        assert_eq!(extra_client_range(&areas, 0..0, 3), 1..5);
        let areas = [900, 800, 5, 5, 700, 600];
        assert_eq!(extra_client_range(&areas, 0..0, 3), 2..6);
    }

    #[test]
    fn range_at_the_edge_only_grows_inwards() {
        let areas = [5, 5, 1, 1000];
        assert_eq!(extra_client_range(&areas, 0..1, 2), 0..3);
        assert_eq!(extra_client_range(&areas, 3..4, 2), 1..4);
    }

    fn is_superset(outer: &Range<usize>, inner: &Range<usize>) -> bool {
        inner.is_empty() || (outer.start <= inner.start && inner.end <= outer.end)
    }

    #[test]
    fn random_frames_respect_the_plane_budget() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..2000 {
            let layers = rng.gen_range(0..12usize);
            let areas = (0..layers).map(|_| rng.gen_range(0..10_000u64)).collect::<Vec<_>>();
            let forced = (0..layers).map(|_| rng.gen_bool(0.2)).collect::<Vec<_>>();
            let planes = rng.gen_range(1..8usize);

            let minimal = minimal_client_range(&forced);
            let client = extra_client_range(&areas, minimal.clone(), planes);

            assert!(client.end <= layers);
            assert!(is_superset(&client, &minimal));

            let mut avail = planes;
            if avail < layers {
                avail -= 1;
            }
            let extra = (layers - minimal.len()) as isize - avail as isize;
            if extra <= 0 {
                assert_eq!(client, minimal);
            } else {
                assert_eq!(client.len(), minimal.len() + extra as usize);
                assert_eq!(layers - client.len(), avail);
            }
        }
    }

    #[test]
    fn huge_areas_saturate() {
        let full = u32::MAX as u64 * u32::MAX as u64;
        let areas = [full, full, 10];
        assert_eq!(pixops(&areas, &(0..2)), u64::MAX);
        assert_eq!(pixops(&areas, &(1..3)), full + 10);
        assert_eq!(extra_client_range(&areas, 0..0, 2), 1..3);
    }

    #[test]
    fn unknown_backends_fall_back_to_generic() {
        assert_eq!(backend_for("generic").name(), GENERIC_BACKEND);
        assert_eq!(backend_for("vendor-specific").name(), GENERIC_BACKEND);
    }
}
