pub mod source;

use serde::{Deserialize, Serialize};

use crate::models::location::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Sum of great-circle legs between consecutive points of a trail.
pub fn route_distance_km(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|leg| haversine_km(&leg[0], &leg[1]))
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub south_west: GeoPoint,
    pub north_east: GeoPoint,
}

impl Bounds {
    pub fn around<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut bounds = Bounds {
            south_west: *first,
            north_east: *first,
        };

        for point in points {
            bounds.south_west.lat = bounds.south_west.lat.min(point.lat);
            bounds.south_west.lng = bounds.south_west.lng.min(point.lng);
            bounds.north_east.lat = bounds.north_east.lat.max(point.lat);
            bounds.north_east.lng = bounds.north_east.lng.max(point.lng);
        }

        Some(bounds)
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.south_west.lat..=self.north_east.lat).contains(&point.lat)
            && (self.south_west.lng..=self.north_east.lng).contains(&point.lng)
    }
}

#[cfg(test)]
mod tests {
    use super::{Bounds, haversine_km, route_distance_km};
    use crate::models::location::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: -23.5505,
            lng: -46.6333,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn sao_paulo_to_rio_is_around_357_km() {
        let sao_paulo = GeoPoint {
            lat: -23.5505,
            lng: -46.6333,
        };
        let rio = GeoPoint {
            lat: -22.9068,
            lng: -43.1729,
        };
        let distance = haversine_km(&sao_paulo, &rio);
        assert!((distance - 357.0).abs() < 5.0);
    }

    #[test]
    fn route_distance_sums_consecutive_legs() {
        let a = GeoPoint::new(-23.5505, -46.6333);
        let b = GeoPoint::new(-23.5605, -46.6333);
        let c = GeoPoint::new(-23.5605, -46.6433);

        let expected = haversine_km(&a, &b) + haversine_km(&b, &c);
        assert!((route_distance_km(&[a, b, c]) - expected).abs() < 1e-9);
    }

    #[test]
    fn route_distance_of_single_point_is_zero() {
        assert_eq!(route_distance_km(&[GeoPoint::new(1.0, 1.0)]), 0.0);
        assert_eq!(route_distance_km(&[]), 0.0);
    }

    #[test]
    fn bounds_cover_every_point() {
        let points = [
            GeoPoint::new(-23.55, -46.63),
            GeoPoint::new(-23.60, -46.70),
            GeoPoint::new(-23.50, -46.60),
        ];

        let bounds = Bounds::around(&points).unwrap();

        assert_eq!(bounds.south_west, GeoPoint::new(-23.60, -46.70));
        assert_eq!(bounds.north_east, GeoPoint::new(-23.50, -46.60));
        assert!(points.iter().all(|p| bounds.contains(p)));
        assert!(Bounds::around(&[]).is_none());
    }
}
