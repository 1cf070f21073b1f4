//! Runtime configuration
//!
//! All knobs have sensible defaults and can be overridden through environment variables,
//! which is how they are usually set on a running system:
//!
//! | Variable                     | Field                          | Default |
//! |------------------------------|--------------------------------|---------|
//! | `DRMHWC_USE_OVERLAY_PLANES`  | [`Config::use_overlay_planes`] | `true`  |
//! | `DRMHWC_FORCE_GPU_SCALING`   | [`Config::force_gpu_scaling`]  | `false` |
//! | `DRMHWC_AVOID_ALPHA`         | [`Config::avoid_alpha_for_framebuffer`] | `false` |
//! | `DRMHWC_FLATTENING_TIMEOUT_MS` | [`Config::flattening_timeout`] | `3000` |

use std::time::Duration;

use tracing::{info, warn};

const USE_OVERLAY_PLANES: &str = "DRMHWC_USE_OVERLAY_PLANES";
const FORCE_GPU_SCALING: &str = "DRMHWC_FORCE_GPU_SCALING";
const AVOID_ALPHA: &str = "DRMHWC_AVOID_ALPHA";
const FLATTENING_TIMEOUT_MS: &str = "DRMHWC_FLATTENING_TIMEOUT_MS";

/// Runtime configuration of the composition core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Offer overlay planes to the composition planner.
    ///
    /// If disabled only the primary plane is used and every frame with more
    /// than one layer falls back to client composition.
    pub use_overlay_planes: bool,
    /// Composite every layer requiring scaling or sub-pixel phasing on the GPU
    pub force_gpu_scaling: bool,
    /// Scan out buffers with an alpha channel using the matching opaque format
    pub avoid_alpha_for_framebuffer: bool,
    /// Time without a new frame after which a display may be flattened
    pub flattening_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            use_overlay_planes: true,
            force_gpu_scaling: false,
            avoid_alpha_for_framebuffer: false,
            flattening_timeout: Duration::from_secs(3),
        }
    }
}

impl Config {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration from an arbitrary key-value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();

        if let Some(value) = lookup(USE_OVERLAY_PLANES) {
            config.use_overlay_planes = parse_flag(USE_OVERLAY_PLANES, &value, config.use_overlay_planes);
        }
        if let Some(value) = lookup(FORCE_GPU_SCALING) {
            config.force_gpu_scaling = parse_flag(FORCE_GPU_SCALING, &value, config.force_gpu_scaling);
        }
        if let Some(value) = lookup(AVOID_ALPHA) {
            config.avoid_alpha_for_framebuffer =
                parse_flag(AVOID_ALPHA, &value, config.avoid_alpha_for_framebuffer);
        }
        if let Some(value) = lookup(FLATTENING_TIMEOUT_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) => config.flattening_timeout = Duration::from_millis(ms),
                Err(err) => {
                    warn!(key = FLATTENING_TIMEOUT_MS, value = %value, ?err, "Ignoring invalid value")
                }
            }
        }

        info!(?config, "Loaded configuration");
        config
    }
}

fn parse_flag(key: &str, value: &str, default: bool) -> bool {
    let value = value.trim().to_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            warn!(key, value = %value, "Ignoring invalid boolean value");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::Config;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(config_from(&[]), Config::default());
    }

    #[test]
    fn flags_accept_common_spellings() {
        let config = config_from(&[
            ("DRMHWC_USE_OVERLAY_PLANES", "No"),
            ("DRMHWC_FORCE_GPU_SCALING", "y"),
            ("DRMHWC_AVOID_ALPHA", "TRUE"),
        ]);
        assert!(!config.use_overlay_planes);
        assert!(config.force_gpu_scaling);
        assert!(config.avoid_alpha_for_framebuffer);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = config_from(&[
            ("DRMHWC_USE_OVERLAY_PLANES", "maybe"),
            ("DRMHWC_FLATTENING_TIMEOUT_MS", "soon"),
        ]);
        assert!(config.use_overlay_planes);
        assert_eq!(config.flattening_timeout, Duration::from_secs(3));

        let config = config_from(&[("DRMHWC_FLATTENING_TIMEOUT_MS", "250")]);
        assert_eq!(config.flattening_timeout, Duration::from_millis(250));
    }
}
