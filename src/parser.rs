use crate::basins::{Basin, BasinTable, GeometryFailure, PixelRange};
use crate::error::{AppError, Result};
use crate::geometry::{compactness, decode_geometry};
use crate::timeseries::TimeSeriesTable;
use chrono::{Datelike, NaiveDate};
use csv::{ReaderBuilder, StringRecord};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use tracing::{debug, info, warn};

/// Value the backend substitutes for reductions with no valid pixels.
pub const NO_DATA: f64 = -9999.0;

pub const INDEX_COLUMN: &str = "system:index";
pub const STATS_COLUMN: &str = "zonal_statistics";
pub const COUNT_COLUMN: &str = "count";
pub const GEO_COLUMN: &str = ".geo";

/// How a dataset encodes its timestep in `system:index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TimestepFormat {
    /// `201503`
    #[serde(rename = "yyyymm")]
    Yyyymm,
    /// `2015_03`
    #[serde(rename = "yyyy_mm")]
    YyyyMm,
    /// `2015`, month defaults to January
    #[serde(rename = "yyyy")]
    Yyyy,
}

impl TimestepFormat {
    /// Decode a timestep label into the first day of its month.
    pub fn decode(&self, label: &str) -> Result<NaiveDate> {
        let label = label.trim();
        let digits = |s: &str, n: usize| s.len() == n && s.bytes().all(|b| b.is_ascii_digit());

        let (year, month) = match self {
            TimestepFormat::Yyyymm if digits(label, 6) => (&label[..4], &label[4..]),
            TimestepFormat::YyyyMm => match label.split_once('_') {
                Some((y, m)) if digits(y, 4) && digits(m, 2) => (y, m),
                _ => return Err(bad_label(label, self)),
            },
            TimestepFormat::Yyyy if digits(label, 4) => (label, "01"),
            _ => return Err(bad_label(label, self)),
        };

        let year: i32 = year.parse().map_err(|_| bad_label(label, self))?;
        let month: u32 = month.parse().map_err(|_| bad_label(label, self))?;

        NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            AppError::Parse(format!(
                "Timestep label '{}' has invalid month {}",
                label, month
            ))
        })
    }

    /// First day of the timestep containing `date`.
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        let month = match self {
            TimestepFormat::Yyyy => 1,
            TimestepFormat::Yyyymm | TimestepFormat::YyyyMm => date.month(),
        };
        NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
    }
}

fn bad_label(label: &str, format: &TimestepFormat) -> AppError {
    AppError::Parse(format!(
        "Timestep label '{}' does not match format {:?}",
        label, format
    ))
}

/// Parse a bracketed, comma-separated numeric vector such as `[0.2, null, 0.9]`.
///
/// `null`, `NaN` and the [`NO_DATA`] sentinel become `None`.
pub fn parse_vector(text: &str, expected_len: usize) -> Result<Vec<Option<f64>>> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| {
            AppError::Parse(format!("Vector '{}' is not enclosed in brackets", text))
        })?
        .trim();

    let values = if inner.is_empty() {
        Vec::new()
    } else {
        inner
            .split(',')
            .map(parse_element)
            .collect::<Result<Vec<_>>>()?
    };

    if values.len() != expected_len {
        return Err(AppError::Parse(format!(
            "Expected {} values, got {}",
            expected_len,
            values.len()
        )));
    }

    Ok(values)
}

fn parse_element(token: &str) -> Result<Option<f64>> {
    let token = token.trim();
    match token {
        "null" | "None" | "NaN" | "nan" => return Ok(None),
        "" => return Err(AppError::Parse("Empty vector element".to_string())),
        _ => {}
    }

    let value = token
        .parse::<f64>()
        .map_err(|e| AppError::Parse(format!("Failed to parse number '{}': {}", token, e)))?;

    if value.is_nan() || (value - NO_DATA).abs() < 1e-9 {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}

/// Inverse of [`parse_vector`]; undefined values are written as `null`.
pub fn encode_vector(values: &[Option<f64>]) -> String {
    let parts: Vec<String> = values
        .iter()
        .map(|v| match v {
            Some(x) => x.to_string(),
            None => "null".to_string(),
        })
        .collect();
    format!("[{}]", parts.join(", "))
}

fn column_index(headers: &StringRecord, name: &str, table: &str) -> Result<usize> {
    headers.iter().position(|h| h == name).ok_or_else(|| {
        AppError::InvalidData(format!(
            "Table '{}' is missing required column '{}'",
            table, name
        ))
    })
}

/// Parses one exported time-series table for a single variable.
pub struct TimeSeriesParser<'a> {
    variable: &'a str,
    format: TimestepFormat,
    drop_labels: &'a [String],
    window: Option<(NaiveDate, NaiveDate)>,
}

impl<'a> TimeSeriesParser<'a> {
    pub fn new(variable: &'a str, format: TimestepFormat, drop_labels: &'a [String]) -> Self {
        Self {
            variable,
            format,
            drop_labels,
            window: None,
        }
    }

    /// Only accept timesteps that fall within the requested `[start, end]` range.
    pub fn with_window(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.window = Some((self.format.period_start(start), end));
        self
    }

    /// Build a `(timestep, basin)` table. Every row must carry exactly
    /// `basin_ids.len()` values; any mismatch aborts the whole table, as
    /// does a table with no timesteps or a timestep outside the window.
    pub fn parse<R: Read>(&self, reader: R, basin_ids: &[String]) -> Result<TimeSeriesTable> {
        let mut csv = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = csv.headers()?.clone();
        let index_col = column_index(&headers, INDEX_COLUMN, self.variable)?;
        let stats_col = column_index(&headers, STATS_COLUMN, self.variable)?;

        let mut labels = Vec::new();
        let mut dates = Vec::new();
        let mut values = Vec::new();
        let mut seen_dates = HashSet::new();
        let mut dropped = 0usize;

        for (row_num, record) in csv.records().enumerate() {
            let record = record.map_err(|e| {
                AppError::Parse(format!(
                    "Table '{}': malformed CSV at row {}: {}",
                    self.variable,
                    row_num + 1,
                    e
                ))
            })?;
            let label = record.get(index_col).unwrap_or_default().trim();

            if self.drop_labels.iter().any(|d| d == label) {
                debug!("Dropping anomalous label '{}' from {}", label, self.variable);
                dropped += 1;
                continue;
            }

            let date = self.format.decode(label).map_err(|e| {
                AppError::Parse(format!("Table '{}' row {}: {}", self.variable, row_num + 1, e))
            })?;

            // A stale export from another date range must not be mixed in
            if let Some((start, end)) = self.window {
                if date < start || date > end {
                    return Err(AppError::Parse(format!(
                        "Table '{}': label '{}' ({}) is outside the requested range {} to {}",
                        self.variable, label, date, start, end
                    )));
                }
            }

            if !seen_dates.insert(date) {
                return Err(AppError::Parse(format!(
                    "Table '{}': label '{}' decodes to {} which appears more than once",
                    self.variable, label, date
                )));
            }

            let row = parse_vector(record.get(stats_col).unwrap_or_default(), basin_ids.len())
                .map_err(|e| {
                    AppError::Parse(format!(
                        "Table '{}' timestep '{}': {}",
                        self.variable, label, e
                    ))
                })?;

            labels.push(label.to_string());
            dates.push(date);
            values.push(row);
        }

        if values.is_empty() {
            return Err(AppError::InvalidData(format!(
                "Table '{}' has no timesteps ({} anomalous labels dropped); the export is empty or incomplete",
                self.variable, dropped
            )));
        }

        info!(
            "Parsed {}: {} timesteps x {} basins ({} anomalous labels dropped)",
            self.variable,
            values.len(),
            basin_ids.len(),
            dropped
        );

        TimeSeriesTable::new(self.variable, labels, dates, basin_ids.to_vec(), values)
    }
}

/// Parse the basin export. Malformed geometry fails only its own row: the
/// basin is kept (its pixel count is still needed) with no geometry.
pub fn parse_basins<R: Read>(reader: R, range: PixelRange) -> Result<BasinTable> {
    let mut csv = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = csv.headers()?.clone();
    let index_col = column_index(&headers, INDEX_COLUMN, "basins")?;
    let count_col = column_index(&headers, COUNT_COLUMN, "basins")?;
    let geo_col = column_index(&headers, GEO_COLUMN, "basins")?;

    let mut basins = Vec::new();
    let mut geometry_failures = Vec::new();
    let mut seen_ids = HashSet::new();

    for (row_num, record) in csv.records().enumerate() {
        let record = record.map_err(|e| {
            AppError::Parse(format!("Table 'basins': malformed CSV at row {}: {}", row_num + 1, e))
        })?;

        let id = record.get(index_col).unwrap_or_default().trim().to_string();
        if id.is_empty() || !seen_ids.insert(id.clone()) {
            return Err(AppError::InvalidData(format!(
                "Table 'basins' row {}: missing or duplicate id '{}'",
                row_num + 1,
                id
            )));
        }

        let pixel_count = parse_count(record.get(count_col).unwrap_or_default()).map_err(|e| {
            AppError::Parse(format!("Table 'basins' basin '{}': {}", id, e))
        })?;

        if !range.contains(pixel_count) {
            return Err(AppError::InvalidData(format!(
                "Basin '{}' has {} pixels, outside the configured filter {}",
                id, pixel_count, range
            )));
        }

        let (geometry, shape_metric) =
            match decode_geometry(record.get(geo_col).unwrap_or_default()) {
                Ok(geometry) => {
                    let metric = compactness(&geometry);
                    (Some(geometry), metric)
                }
                Err(e) => {
                    warn!("Basin '{}' has unreadable geometry: {}", id, e);
                    geometry_failures.push(GeometryFailure {
                        basin_id: id.clone(),
                        row: row_num + 1,
                        reason: e.to_string(),
                    });
                    (None, None)
                }
            };

        basins.push(Basin {
            id,
            pixel_count,
            geometry,
            shape_metric,
        });
    }

    info!(
        "Parsed {} basins ({} with unreadable geometry)",
        basins.len(),
        geometry_failures.len()
    );

    Ok(BasinTable {
        basins,
        geometry_failures,
    })
}

fn parse_count(s: &str) -> Result<u64> {
    let value = s
        .trim()
        .parse::<f64>()
        .map_err(|e| AppError::Parse(format!("Failed to parse count '{}': {}", s, e)))?;

    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
        return Err(AppError::Parse(format!(
            "Count '{}' is not a non-negative integer",
            s
        )));
    }

    Ok(value as u64)
}
