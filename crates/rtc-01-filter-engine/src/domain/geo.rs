//! Geo primitives
//!
//! Points, shapes, distance parsing and the hierarchical grid used to
//! bucket geo conditions in the field index.

use serde_json::{json, Value};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS84 point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Create a point, rejecting out-of-range coordinates.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }

    /// Read a point from `{lat, lon}`, `{lat, lng}`, `[lat, lon]` or `"lat,lon"`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => {
                let lat = map.get("lat")?.as_f64()?;
                let lon = map.get("lon").or_else(|| map.get("lng"))?.as_f64()?;
                Self::new(lat, lon)
            }
            Value::Array(items) if items.len() == 2 => {
                Self::new(items[0].as_f64()?, items[1].as_f64()?)
            }
            Value::String(s) => {
                let (lat, lon) = s.split_once(',')?;
                Self::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?)
            }
            _ => None,
        }
    }

    /// Canonical JSON form.
    pub fn to_json(&self) -> Value {
        json!({"lat": self.lat, "lon": self.lon})
    }

    /// Great-circle distance in metres (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }
}

/// Axis-aligned box; `left > right` means the box crosses the antimeridian.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

impl BoundingBox {
    /// Whether the point lies inside the box (edges included).
    pub fn contains(&self, point: &GeoPoint) -> bool {
        if point.lat < self.bottom || point.lat > self.top {
            return false;
        }
        if self.left <= self.right {
            point.lon >= self.left && point.lon <= self.right
        } else {
            point.lon >= self.left || point.lon <= self.right
        }
    }

    /// Box around a circle, widened to the whole longitude span near the poles.
    pub fn around(center: &GeoPoint, radius_m: f64) -> Self {
        let angular = radius_m / EARTH_RADIUS_M;
        let dlat = angular.to_degrees();
        let top = (center.lat + dlat).min(90.0);
        let bottom = (center.lat - dlat).max(-90.0);
        let ratio = angular.sin() / center.lat.to_radians().cos();
        if top >= 90.0 || bottom <= -90.0 || angular >= std::f64::consts::FRAC_PI_2 || ratio >= 1.0 {
            return Self { top, left: -180.0, bottom, right: 180.0 };
        }

        let dlon = ratio.asin().to_degrees();
        let mut left = center.lon - dlon;
        let mut right = center.lon + dlon;
        if left < -180.0 {
            left += 360.0;
        }
        if right > 180.0 {
            right -= 360.0;
        }
        Self { top, left, bottom, right }
    }

    /// Smallest box holding every vertex.
    pub fn enclosing(points: &[GeoPoint]) -> Self {
        let mut bbox = Self { top: -90.0, left: 180.0, bottom: 90.0, right: -180.0 };
        for p in points {
            bbox.top = bbox.top.max(p.lat);
            bbox.bottom = bbox.bottom.min(p.lat);
            bbox.left = bbox.left.min(p.lon);
            bbox.right = bbox.right.max(p.lon);
        }
        bbox
    }
}

/// Ray-casting point-in-polygon test (longitude as x, latitude as y).
pub fn polygon_contains(vertices: &[GeoPoint], point: &GeoPoint) -> bool {
    let mut inside = false;
    let mut j = vertices.len().wrapping_sub(1);
    for i in 0..vertices.len() {
        let (a, b) = (&vertices[i], &vertices[j]);
        if (a.lat > point.lat) != (b.lat > point.lat) {
            let cross = (b.lon - a.lon) * (point.lat - a.lat) / (b.lat - a.lat) + a.lon;
            if point.lon < cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Parse a distance: metres as a number, or a string with a unit suffix.
pub fn parse_distance(value: &Value) -> Option<f64> {
    let metres = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            let split = s
                .find(|c: char| c.is_ascii_alphabetic())
                .unwrap_or(s.len());
            let (number, unit) = s.split_at(split);
            let number: f64 = number.trim().parse().ok()?;
            let factor = match unit.trim() {
                "" | "m" => 1.0,
                "km" => 1_000.0,
                "mi" => 1_609.344,
                "yd" => 0.9144,
                "ft" => 0.3048,
                _ => return None,
            };
            number * factor
        }
        _ => return None,
    };
    (metres.is_finite() && metres >= 0.0).then_some(metres)
}

/// A cell of the hierarchical lat/lon grid.
///
/// Level `n` splits the world into `2^n x 2^n` cells; level 0 is the whole world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCell {
    pub level: u8,
    pub x: u32,
    pub y: u32,
}

impl GridCell {
    /// The cell holding a point at a given level.
    pub fn containing(point: &GeoPoint, level: u8) -> Self {
        let cells = 1u64 << level;
        let scale = |offset: f64, span: f64| -> u32 {
            let idx = (offset / span * cells as f64).floor() as u64;
            idx.min(cells - 1) as u32
        };
        Self {
            level,
            x: scale(point.lon + 180.0, 360.0),
            y: scale(point.lat + 90.0, 180.0),
        }
    }

    /// The deepest cell (at most `max_level`) holding the whole box.
    pub fn covering(bbox: &BoundingBox, max_level: u8) -> Self {
        if bbox.left > bbox.right {
            return Self { level: 0, x: 0, y: 0 };
        }
        let (Some(low), Some(high)) = (
            GeoPoint::new(bbox.bottom, bbox.left),
            GeoPoint::new(bbox.top, bbox.right),
        ) else {
            return Self { level: 0, x: 0, y: 0 };
        };

        (0..=max_level)
            .rev()
            .map(|level| (Self::containing(&low, level), Self::containing(&high, level)))
            .find(|(a, b)| a == b)
            .map(|(cell, _)| cell)
            .unwrap_or(Self { level: 0, x: 0, y: 0 })
    }
}
