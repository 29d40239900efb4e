use crate::error::{AppError, Result};
use crate::geometry::spherical_area;
use geo::MultiPolygon;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Exclusive pixel-count bounds: a basin is kept when `min < count < max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRange {
    pub min: u64,
    pub max: u64,
}

impl PixelRange {
    pub fn new(min: u64, max: u64) -> Result<Self> {
        if min >= max {
            return Err(AppError::Config(format!(
                "Pixel range ({}, {}) is empty",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, count: u64) -> bool {
        count > self.min && count < self.max
    }
}

impl fmt::Display for PixelRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.min, self.max)
    }
}

/// A water body extracted from the maximum-extent raster.
#[derive(Debug, Clone)]
pub struct Basin {
    pub id: String,
    pub pixel_count: u64,
    pub geometry: Option<MultiPolygon<f64>>,
    pub shape_metric: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct GeometryFailure {
    pub basin_id: String,
    pub row: usize,
    pub reason: String,
}

/// Basins in export order. Column `i` of every time-series table refers to `basins[i]`.
#[derive(Debug, Clone)]
pub struct BasinTable {
    pub basins: Vec<Basin>,
    pub geometry_failures: Vec<GeometryFailure>,
}

impl BasinTable {
    pub fn len(&self) -> usize {
        self.basins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.basins.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.basins.iter().map(|b| b.id.clone()).collect()
    }

    pub fn pixel_counts(&self) -> Vec<f64> {
        self.basins.iter().map(|b| b.pixel_count as f64).collect()
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        writer.write_record(["basin", "pixel_count", "area_m2", "shape_metric", "geometry_error"])?;

        for basin in &self.basins {
            let error = self
                .geometry_failures
                .iter()
                .find(|f| f.basin_id == basin.id)
                .map(|f| f.reason.clone())
                .unwrap_or_default();
            let area = basin
                .geometry
                .as_ref()
                .map(|g| format!("{:.1}", spherical_area(g)))
                .unwrap_or_default();
            let metric = basin
                .shape_metric
                .map(|m| format!("{:.6}", m))
                .unwrap_or_default();

            let count = basin.pixel_count.to_string();
            writer.write_record([
                basin.id.as_str(),
                count.as_str(),
                area.as_str(),
                metric.as_str(),
                error.as_str(),
            ])?;
        }

        writer.flush()?;
        Ok(())
    }
}
