use serde::{Deserialize, Serialize};

use crate::models::LatLng;

pub const DEFAULT_CLUSTER_ZOOM_THRESHOLD: u32 = 16;
pub const DEFAULT_ZOOM: u32 = 16;

/// 강남구
pub const DEFAULT_CENTER: LatLng = LatLng {
    lat: 37.4979,
    lng: 127.0276,
};

/// Map view settings, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    pub cluster_zoom_threshold: u32,
    pub default_zoom: u32,
    pub default_center: LatLng,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            cluster_zoom_threshold: DEFAULT_CLUSTER_ZOOM_THRESHOLD,
            default_zoom: DEFAULT_ZOOM,
            default_center: DEFAULT_CENTER,
        }
    }
}

impl ViewConfig {
    /// Read `CLUSTER_ZOOM_THRESHOLD`, `DEFAULT_ZOOM`, `DEFAULT_CENTER_LAT` and
    /// `DEFAULT_CENTER_LNG` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup. Missing, unparseable, zero or
    /// past-[`MAX_ZOOM`](crate::cluster::MAX_ZOOM) values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let zoom = |key: &str, default: u32| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|&z| z > 0 && z <= crate::cluster::MAX_ZOOM)
                .unwrap_or(default)
        };
        let coord = |key: &str, default: f64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|c| c.is_finite() && *c != 0.0)
                .unwrap_or(default)
        };

        let default_center = LatLng::new(
            coord("DEFAULT_CENTER_LAT", DEFAULT_CENTER.lat),
            coord("DEFAULT_CENTER_LNG", DEFAULT_CENTER.lng),
        );
        let default_center = if crate::geo::is_valid_coordinate(default_center.lat, default_center.lng)
        {
            default_center
        } else {
            tracing::warn!(?default_center, "Ignoring out-of-range default center");
            DEFAULT_CENTER
        };

        ViewConfig {
            cluster_zoom_threshold: zoom("CLUSTER_ZOOM_THRESHOLD", DEFAULT_CLUSTER_ZOOM_THRESHOLD),
            default_zoom: zoom("DEFAULT_ZOOM", DEFAULT_ZOOM),
            default_center,
        }
    }

    pub fn is_cluster_mode(&self, zoom: u32) -> bool {
        crate::cluster::is_cluster_mode(zoom, self.cluster_zoom_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(ViewConfig::from_lookup(lookup(&[])), ViewConfig::default());
    }

    #[test]
    fn test_reads_overrides() {
        let cfg = ViewConfig::from_lookup(lookup(&[
            ("CLUSTER_ZOOM_THRESHOLD", "15"),
            ("DEFAULT_ZOOM", "13"),
            ("DEFAULT_CENTER_LAT", "35.1796"),
            ("DEFAULT_CENTER_LNG", "129.0756"),
        ]));
        assert_eq!(cfg.cluster_zoom_threshold, 15);
        assert_eq!(cfg.default_zoom, 13);
        assert_eq!(cfg.default_center, LatLng::new(35.1796, 129.0756));
    }

    #[test]
    fn test_garbage_and_zero_fall_back() {
        let cfg = ViewConfig::from_lookup(lookup(&[
            ("CLUSTER_ZOOM_THRESHOLD", "abc"),
            ("DEFAULT_ZOOM", "0"),
        ]));
        assert_eq!(cfg.cluster_zoom_threshold, DEFAULT_CLUSTER_ZOOM_THRESHOLD);
        assert_eq!(cfg.default_zoom, DEFAULT_ZOOM);
    }

    #[test]
    fn test_zoom_past_max_falls_back() {
        let cfg = ViewConfig::from_lookup(lookup(&[("DEFAULT_ZOOM", "2000")]));
        assert_eq!(cfg.default_zoom, DEFAULT_ZOOM);
    }

    #[test]
    fn test_out_of_range_center_falls_back() {
        let cfg = ViewConfig::from_lookup(lookup(&[("DEFAULT_CENTER_LAT", "123.0")]));
        assert_eq!(cfg.default_center, DEFAULT_CENTER);
    }

    #[test]
    fn test_is_cluster_mode_uses_threshold() {
        let cfg = ViewConfig::default();
        assert!(cfg.is_cluster_mode(15));
        assert!(!cfg.is_cluster_mode(16));
    }
}
