///! Great-circle distance helpers for edge shapes

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance between two (lat, lng) points in meters
pub fn haversine_distance(lat1_deg: f64, lng1_deg: f64, lat2_deg: f64, lng2_deg: f64) -> f64 {
    let lat1 = lat1_deg.to_radians();
    let lat2 = lat2_deg.to_radians();
    let delta_lat = (lat2_deg - lat1_deg).to_radians();
    let delta_lng = (lng2_deg - lng1_deg).to_radians();

    let a =
        (delta_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Length of a polyline of (lat, lng) points in meters
pub fn polyline_length(shape: &[(f64, f64)]) -> f64 {
    shape
        .windows(2)
        .map(|w| haversine_distance(w[0].0, w[0].1, w[1].0, w[1].1))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_one_degree_longitude_at_equator() {
        let d = haversine_distance(0.0, 0.0, 0.0, 1.0);
        // One degree of longitude at the equator is ~111.2 km
        assert!((d - 111_195.0).abs() < 100.0);
    }

    #[test]
    fn test_polyline_length_sums_segments() {
        let shape = [(0.0, 0.0), (0.0, 0.5), (0.0, 1.0)];
        let total = polyline_length(&shape);
        let direct = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((total - direct).abs() < 1.0);
    }

    #[test]
    fn test_polyline_length_degenerate() {
        assert_eq!(polyline_length(&[]), 0.0);
        assert_eq!(polyline_length(&[(52.0, 13.0)]), 0.0);
    }
}
