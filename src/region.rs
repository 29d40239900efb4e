use crate::error::{AppError, Result};
use geo::{Area, ChamberlainDuquetteArea, Polygon, Rect};
use serde::{Deserialize, Serialize};

/// Axis-aligned region of interest in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBoundingBox")]
pub struct BoundingBox {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

#[derive(Deserialize)]
struct RawBoundingBox {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

impl TryFrom<RawBoundingBox> for BoundingBox {
    type Error = AppError;

    fn try_from(raw: RawBoundingBox) -> Result<Self> {
        BoundingBox::new(raw.min_lat, raw.max_lat, raw.min_lon, raw.max_lon)
    }
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Result<Self> {
        let coords = [min_lat, max_lat, min_lon, max_lon];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(AppError::Config(
                "Bounding box coordinates must be finite numbers".to_string(),
            ));
        }

        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            return Err(AppError::Config(format!(
                "Latitudes must be within [-90, 90], got {} and {}",
                min_lat, max_lat
            )));
        }

        if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
            return Err(AppError::Config(format!(
                "Longitudes must be within [-180, 180], got {} and {}",
                min_lon, max_lon
            )));
        }

        if min_lat >= max_lat || min_lon >= max_lon {
            return Err(AppError::Config(format!(
                "Bounding box is empty: lat [{}, {}], lon [{}, {}]",
                min_lat, max_lat, min_lon, max_lon
            )));
        }

        Ok(Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        })
    }

    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }

    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }

    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }

    pub fn max_lon(&self) -> f64 {
        self.max_lon
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new((self.min_lon, self.min_lat), (self.max_lon, self.max_lat))
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        self.to_rect().to_polygon()
    }

    /// Closed ring of `(lon, lat)` vertices.
    pub fn vertices(&self) -> Vec<(f64, f64)> {
        self.to_polygon()
            .exterior()
            .coords()
            .map(|c| (c.x, c.y))
            .collect()
    }

    /// Area in square degrees.
    pub fn planar_area(&self) -> f64 {
        self.to_rect().unsigned_area()
    }

    /// Area in square metres on the WGS84 equatorial sphere.
    pub fn geodesic_area(&self) -> f64 {
        self.to_polygon().chamberlain_duquette_unsigned_area()
    }

    pub fn to_geojson(&self) -> serde_json::Value {
        let geometry = geojson::Geometry::new(geojson::Value::from(&self.to_polygon()));
        serde_json::Value::Object(geojson::JsonObject::from(&geometry))
    }
}
