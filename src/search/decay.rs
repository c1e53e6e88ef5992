//! Gaussian distance decay and great-circle distance.

use crate::model::Location;

/// Mean Earth radius used for haversine distances.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two points in meters.
pub fn haversine_distance(a: Location, b: Location) -> f64 {
    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Gaussian decay over distance.
///
/// Full weight inside `offset_m`; beyond it the weight falls along a gaussian
/// whose width is chosen so that `weight(offset_m + scale_m) == decay`. The
/// curve only approaches zero, so it reorders results and never filters them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoDecay {
    pub offset_m: f64,
    pub scale_m: f64,
    /// Weight reached at `offset_m + scale_m`, in (0, 1).
    pub decay: f64,
}

impl Default for GeoDecay {
    fn default() -> Self {
        Self::from_km(5.0, 10.0)
    }
}

impl GeoDecay {
    pub fn from_km(offset_km: f64, scale_km: f64) -> Self {
        Self {
            offset_m: offset_km * 1000.0,
            scale_m: scale_km * 1000.0,
            decay: 0.5,
        }
    }

    /// Variance of the gaussian, `-scale² / (2·ln(decay))`.
    pub fn sigma_squared(&self) -> f64 {
        -self.scale_m.powi(2) / (2.0 * self.decay.ln())
    }

    /// Multiplier for a document `distance_m` meters from the origin.
    ///
    /// Underflows to `0.0` a few hundred kilometers out with the default
    /// shape; rank on [`GeoDecay::log_weight`] when far matches must stay
    /// ordered.
    pub fn weight(&self, distance_m: f64) -> f64 {
        self.log_weight(distance_m).exp()
    }

    /// Natural log of [`GeoDecay::weight`], finite for any finite distance.
    pub fn log_weight(&self, distance_m: f64) -> f64 {
        let excess = (distance_m.abs() - self.offset_m).max(0.0);
        if excess == 0.0 {
            return 0.0;
        }
        -(excess * excess) / (2.0 * self.sigma_squared())
    }

    pub fn weight_between(&self, origin: Location, target: Location) -> f64 {
        self.weight(haversine_distance(origin, target))
    }

    pub fn log_weight_between(&self, origin: Location, target: Location) -> f64 {
        self.log_weight(haversine_distance(origin, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn full_weight_inside_offset() {
        let decay = GeoDecay::default();
        assert_eq!(decay.weight(0.0), 1.0);
        assert_eq!(decay.weight(4_999.0), 1.0);
        assert_eq!(decay.weight(5_000.0), 1.0);
    }

    #[test]
    fn half_weight_at_offset_plus_scale() {
        let decay = GeoDecay::default();
        assert!((decay.weight(15_000.0) - 0.5).abs() < EPS);

        let tighter = GeoDecay::from_km(2.0, 3.0);
        assert!((tighter.weight(5_000.0) - 0.5).abs() < EPS);
    }

    #[test]
    fn weight_decreases_monotonically_and_stays_positive() {
        let decay = GeoDecay::default();
        let mut previous = 1.0;
        for km in 6..=60 {
            let w = decay.weight(km as f64 * 1000.0);
            assert!(w < previous, "{km} km: {w} !< {previous}");
            assert!(w > 0.0, "{km} km weight collapsed to zero");
            previous = w;
        }
    }

    #[test]
    fn log_weight_stays_finite_and_ordered_at_antipodal_range() {
        let decay = GeoDecay::default();
        assert_eq!(decay.log_weight(1_000.0), 0.0);
        assert!((decay.log_weight(15_000.0) - 0.5_f64.ln()).abs() < EPS);

        let near = decay.log_weight(15_000_000.0);
        let far = decay.log_weight(20_000_000.0);
        assert!(near.is_finite() && far.is_finite());
        assert!(far < near);
        assert_eq!(decay.weight(20_000_000.0), 0.0);
    }

    #[test]
    fn haversine_matches_known_distances() {
        let london = Location::new(51.5074, -0.1278);
        let paris = Location::new(48.8566, 2.3522);
        let d = haversine_distance(london, paris);
        assert!((d - 343_500.0).abs() < 1_500.0, "london-paris {d}");

        assert!(haversine_distance(london, london).abs() < EPS);

        // One degree of latitude is ~111.19 km on this sphere.
        let one_degree = haversine_distance(Location::new(0.0, 0.0), Location::new(1.0, 0.0));
        assert!((one_degree - 111_194.9).abs() < 1.0, "{one_degree}");
    }

    #[test]
    fn weight_between_uses_great_circle_distance() {
        let decay = GeoDecay::default();
        let origin = Location::new(51.0, 0.0);
        assert_eq!(decay.weight_between(origin, Location::new(51.01, 0.0)), 1.0);
        assert!(decay.weight_between(origin, Location::new(52.0, 0.0)) < 1e-10);
    }
}
