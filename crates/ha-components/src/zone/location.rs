//! Containment engine
//!
//! Pure functions over zones and points. Distances are great-circle
//! distances on a spherical earth, in meters.

use ha_core::{attrs, State};

use super::model::{Point, Zone};
use super::{ATTR_PASSIVE, ATTR_RADIUS};

/// Mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two points in meters
pub fn distance(a: Point, b: Point) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h slightly above 1 for antipodal points
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Whether `point` lies inside the zone; the boundary counts as inside
pub fn contains(zone: &Zone, point: Point) -> bool {
    distance(zone.center(), point) <= zone.radius
}

/// Whether an accuracy circle of `accuracy` meters around `point` touches the zone
pub fn contains_with_accuracy(zone: &Zone, point: Point, accuracy: f64) -> bool {
    distance(zone.center(), point) - accuracy <= zone.radius
}

/// Smallest non-passive zone containing `point`
///
/// Zones are considered in the order given; on equal radius the first one wins.
pub fn resolve_active<'a, I>(zones: I, point: Point) -> Option<&'a Zone>
where
    I: IntoIterator<Item = &'a Zone>,
{
    resolve_active_with_accuracy(zones, point, 0.0)
}

/// [`resolve_active`] with a GPS accuracy circle around the point
pub fn resolve_active_with_accuracy<'a, I>(zones: I, point: Point, accuracy: f64) -> Option<&'a Zone>
where
    I: IntoIterator<Item = &'a Zone>,
{
    let mut closest: Option<&Zone> = None;
    for zone in zones {
        if zone.passive || !contains_with_accuracy(zone, point, accuracy) {
            continue;
        }
        match closest {
            Some(current) if current.radius <= zone.radius => {}
            _ => closest = Some(zone),
        }
    }
    closest
}

/// Evaluate containment directly from a published zone state
///
/// Unavailable or unknown zones, and states without coordinates, are never
/// "in". Passive zones still count here.
pub fn in_zone(zone_state: &State, latitude: f64, longitude: f64, accuracy: f64) -> bool {
    if zone_state.is_unavailable() || zone_state.is_unknown() {
        return false;
    }

    let (Some(zone_lat), Some(zone_lon)) = (
        zone_state.attribute::<f64>(attrs::ATTR_LATITUDE),
        zone_state.attribute::<f64>(attrs::ATTR_LONGITUDE),
    ) else {
        return false;
    };
    let radius = zone_state.attribute::<f64>(ATTR_RADIUS).unwrap_or(0.0);

    let dist = distance(Point::new(zone_lat, zone_lon), Point::new(latitude, longitude));
    dist - accuracy <= radius
}

/// Passive flag of a published zone state
pub fn is_passive(zone_state: &State) -> bool {
    zone_state.attribute::<bool>(ATTR_PASSIVE).unwrap_or(false)
}
