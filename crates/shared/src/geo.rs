use crate::models::{Bounds, LatLng};

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine great-circle distance in kilometers.
pub fn distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Squared Euclidean distance in raw degree space.
///
/// Cheap stand-in for geodesic distance when ranking nearby points at city scale.
/// Not haversine-accurate; ordering and tie-breaks depend on this exact metric.
pub fn planar_distance_sq(a: LatLng, b: LatLng) -> f64 {
    let d_lat = a.lat - b.lat;
    let d_lng = a.lng - b.lng;
    d_lat * d_lat + d_lng * d_lng
}

pub fn is_valid_coordinate(lat: f64, lng: f64) -> bool {
    lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng)
}

/// Inclusive on all four edges.
pub fn within_bounds(point: LatLng, bounds: &Bounds) -> bool {
    point.lat >= bounds.south
        && point.lat <= bounds.north
        && point.lng >= bounds.west
        && point.lng <= bounds.east
}

/// Grow each edge outward by `ratio` of the span along the same axis.
pub fn pad_bounds(bounds: &Bounds, ratio: f64) -> Bounds {
    let lat_pad = bounds.lat_span() * ratio;
    let lng_pad = bounds.lng_span() * ratio;
    Bounds {
        north: bounds.north + lat_pad,
        south: bounds.south - lat_pad,
        east: bounds.east + lng_pad,
        west: bounds.west - lng_pad,
    }
}

pub fn bounds_center(bounds: &Bounds) -> LatLng {
    LatLng::new(
        (bounds.north + bounds.south) / 2.0,
        (bounds.east + bounds.west) / 2.0,
    )
}

/// The square covering one clustering cell at `zoom`, centered on `(lat, lng)`.
pub fn cluster_cell_bounds(lat: f64, lng: f64, zoom: u32) -> Bounds {
    let half = crate::cluster::cell_size(zoom) / 2.0;
    Bounds {
        north: lat + half,
        south: lat - half,
        east: lng + half,
        west: lng - half,
    }
}
