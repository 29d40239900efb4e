use crate::error::{AppError, Result};
use chrono::NaiveDate;
use std::path::Path;
use tracing::info;

/// Values indexed by `(timestep, basin)`. `None` marks an undefined cell.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesTable {
    pub variable: String,
    pub labels: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub basin_ids: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl TimeSeriesTable {
    pub fn new(
        variable: &str,
        labels: Vec<String>,
        dates: Vec<NaiveDate>,
        basin_ids: Vec<String>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Result<Self> {
        if labels.len() != dates.len() || dates.len() != values.len() {
            return Err(AppError::InvalidData(format!(
                "Table '{}': {} labels, {} dates and {} rows do not line up",
                variable,
                labels.len(),
                dates.len(),
                values.len()
            )));
        }

        if let Some((i, row)) = values
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != basin_ids.len())
        {
            return Err(AppError::InvalidData(format!(
                "Table '{}': row {} has {} values for {} basins",
                variable,
                i,
                row.len(),
                basin_ids.len()
            )));
        }

        Ok(Self {
            variable: variable.to_string(),
            labels,
            dates,
            basin_ids,
            values,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.values.len()
    }

    pub fn n_basins(&self) -> usize {
        self.basin_ids.len()
    }

    pub fn get(&self, row: usize, basin: usize) -> Option<f64> {
        self.values.get(row).and_then(|r| r.get(basin)).copied().flatten()
    }

    pub fn undefined_count(&self) -> usize {
        self.values.iter().flatten().filter(|v| v.is_none()).count()
    }

    fn ensure_same_axes(&self, other: &TimeSeriesTable) -> Result<()> {
        if self.basin_ids != other.basin_ids {
            return Err(AppError::InvalidData(format!(
                "Tables '{}' and '{}' have different basin columns",
                self.variable, other.variable
            )));
        }
        if self.dates != other.dates {
            return Err(AppError::InvalidData(format!(
                "Tables '{}' ({} timesteps) and '{}' ({} timesteps) have different timesteps",
                self.variable,
                self.n_rows(),
                other.variable,
                other.n_rows()
            )));
        }
        Ok(())
    }

    /// Undefine every cell whose missing-data fraction is above zero.
    ///
    /// A cell whose missing fraction is itself undefined is also undefined.
    pub fn mask_missing(&self, missing: &TimeSeriesTable) -> Result<TimeSeriesTable> {
        self.ensure_same_axes(missing)?;

        let values = self
            .values
            .iter()
            .zip(&missing.values)
            .map(|(water_row, missing_row)| {
                water_row
                    .iter()
                    .zip(missing_row)
                    .map(|(water, missing)| match missing {
                        Some(m) if *m <= 0.0 => *water,
                        _ => None,
                    })
                    .collect()
            })
            .collect();

        let masked = TimeSeriesTable {
            variable: format!("{}_masked", self.variable),
            labels: self.labels.clone(),
            dates: self.dates.clone(),
            basin_ids: self.basin_ids.clone(),
            values,
        };

        info!(
            "Masked {}: {} of {} cells undefined",
            self.variable,
            masked.undefined_count(),
            masked.n_rows() * masked.n_basins()
        );

        Ok(masked)
    }

    /// Multiply each basin column by that basin's pixel count.
    pub fn derive_area(&self, pixel_counts: &[f64]) -> Result<TimeSeriesTable> {
        if pixel_counts.len() != self.n_basins() {
            return Err(AppError::InvalidData(format!(
                "Table '{}' has {} basins but {} pixel counts were given",
                self.variable,
                self.n_basins(),
                pixel_counts.len()
            )));
        }

        let values = self
            .values
            .iter()
            .map(|row| {
                row.iter()
                    .zip(pixel_counts)
                    .map(|(fraction, count)| fraction.map(|f| f * count))
                    .collect()
            })
            .collect();

        Ok(TimeSeriesTable {
            variable: format!("{}_area", self.variable.trim_end_matches("_masked")),
            labels: self.labels.clone(),
            dates: self.dates.clone(),
            basin_ids: self.basin_ids.clone(),
            values,
        })
    }

    /// Wide CSV: `date,label,<basin ids...>`, undefined cells left empty.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;

        let mut header = vec!["date".to_string(), "label".to_string()];
        header.extend(self.basin_ids.iter().cloned());
        writer.write_record(&header)?;

        for ((date, label), row) in self.dates.iter().zip(&self.labels).zip(&self.values) {
            let mut record = vec![date.format("%Y-%m-%d").to_string(), label.clone()];
            record.extend(
                row.iter()
                    .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
            );
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}
