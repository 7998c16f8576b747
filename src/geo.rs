//! Great-circle distance between stop coordinates.

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometers between two points given in degrees.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        assert_eq!(distance_km(22.3, 114.2, 22.3, 114.2), 0.0);
    }

    #[test]
    fn test_known_distance() {
        // Tsim Sha Tsui ferry pier to Central pier, roughly 1.1 km across the harbour
        let d = distance_km(22.2938, 114.1694, 22.2872, 114.1610);
        assert!((d - 1.13).abs() < 0.1, "unexpected distance {d}");
    }

    #[test]
    fn test_symmetry() {
        let a = distance_km(22.32, 114.17, 22.28, 114.19);
        let b = distance_km(22.28, 114.19, 22.32, 114.17);
        assert!((a - b).abs() < 1e-12);
    }
}
