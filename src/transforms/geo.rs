//! Great-circle distance and area matching.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Haversine distance between two points in metres.
pub fn distance(a: Position, b: Position) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// A circular region bound to a set of overlay services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    #[serde(default)]
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Radius in metres.
    pub radius: f64,
    #[serde(default)]
    pub service_ids: Vec<u32>,
}

impl Area {
    pub fn center(&self) -> Position {
        Position::new(self.lat, self.lon)
    }

    pub fn contains(&self, point: Position) -> bool {
        distance(self.center(), point) <= self.radius
    }
}

/// First area in declaration order that contains `point`.
pub fn select_area(areas: &[Area], point: Position) -> Option<&Area> {
    areas.iter().find(|area| area.contains(point))
}

/// Service ids to show for `point`: the first matching area's ids, sorted and
/// de-duplicated. Empty when no area matches.
pub fn selected_services(areas: &[Area], point: Position) -> Vec<u32> {
    let mut ids = select_area(areas, point)
        .map(|area| area.service_ids.clone())
        .unwrap_or_default();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn area(name: &str, lat: f64, lon: f64, radius: f64, ids: &[u32]) -> Area {
        Area {
            name: name.to_string(),
            lat,
            lon,
            radius,
            service_ids: ids.to_vec(),
        }
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = distance(Position::new(50.0, 14.0), Position::new(51.0, 14.0));
        let reference = 111_195.0;
        assert!((d - reference).abs() / reference < 0.005, "got {d}");
    }

    #[test]
    fn first_declared_area_wins() {
        let areas = vec![
            area("outer", 50.0, 14.0, 5_000.0, &[3, 1]),
            area("inner", 50.0, 14.0, 100.0, &[2]),
        ];
        let hit = select_area(&areas, Position::new(50.0, 14.0)).unwrap();
        assert_eq!(hit.name, "outer");
        assert_eq!(selected_services(&areas, Position::new(50.0, 14.0)), vec![1, 3]);
    }

    #[test]
    fn point_outside_every_area_selects_nothing() {
        let areas = vec![area("home", 50.0, 14.0, 1_000.0, &[7])];
        // roughly 10 km north
        let away = Position::new(50.09, 14.0);
        assert!(select_area(&areas, away).is_none());
        assert!(selected_services(&areas, away).is_empty());
    }

    #[test]
    fn duplicate_ids_collapse() {
        let areas = vec![area("a", 0.0, 0.0, 10.0, &[5, 5, 4])];
        assert_eq!(selected_services(&areas, Position::new(0.0, 0.0)), vec![4, 5]);
    }

    proptest! {
        #[test]
        fn distance_to_self_is_zero(lat in -89.0f64..89.0, lon in -179.0f64..179.0) {
            let p = Position::new(lat, lon);
            prop_assert!(distance(p, p).abs() < 1e-6);
        }

        #[test]
        fn distance_is_symmetric(
            lat1 in -89.0f64..89.0, lon1 in -179.0f64..179.0,
            lat2 in -89.0f64..89.0, lon2 in -179.0f64..179.0,
        ) {
            let a = Position::new(lat1, lon1);
            let b = Position::new(lat2, lon2);
            prop_assert!((distance(a, b) - distance(b, a)).abs() < 1e-6);
        }
    }
}
