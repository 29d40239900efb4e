//! Typed descriptions of the computations submitted to the analytics backend.
//!
//! Every request serializes to JSON. The backend evaluates the nested
//! description (vectorize, filter, buffer, reduce) and exports the resulting
//! table. `Reducer::apply` is the only local evaluation, used to check
//! reduced values against the pixels they came from.

use crate::basins::PixelRange;
use crate::config::{Config, VariableConfig};
use crate::error::{AppError, Result};
use crate::parser::{COUNT_COLUMN, GEO_COLUMN, INDEX_COLUMN, NO_DATA, STATS_COLUMN};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

pub const BASINS_JOB: &str = "basins";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Mean,
    Mode,
}

impl Reducer {
    /// Reduce the pixel values of one basin.
    ///
    /// Undefined and NaN pixels are skipped. `Mean` averages what is left;
    /// `Mode` returns the most frequent value, the smallest one on ties.
    /// A basin with no valid pixels reduces to `None`, which the backend
    /// exports as the no-data sentinel.
    pub fn apply(&self, values: &[Option<f64>]) -> Option<f64> {
        let mut valid: Vec<f64> = values
            .iter()
            .flatten()
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        if valid.is_empty() {
            return None;
        }

        match self {
            Reducer::Mean => Some(valid.iter().sum::<f64>() / valid.len() as f64),
            Reducer::Mode => {
                valid.sort_by(|a, b| a.total_cmp(b));
                let mut best = (valid[0], 0usize);
                let mut run = (valid[0], 0usize);
                for &v in &valid {
                    if v == run.0 {
                        run.1 += 1;
                    } else {
                        run = (v, 1);
                    }
                    // Strictly greater keeps the smallest value on ties
                    if run.1 > best.1 {
                        best = run;
                    }
                }
                Some(best.0)
            }
        }
    }
}

/// One band of a raster asset, clipped to the region and optionally remapped
/// to a 0/1 indicator of `band == equals`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSource {
    pub asset: String,
    pub band: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equals: Option<f64>,
    pub region: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyFilter {
    pub property: String,
    /// Exclusive lower bound
    pub greater_than: u64,
    /// Exclusive upper bound
    pub less_than: u64,
}

impl PropertyFilter {
    pub fn pixel_count(range: PixelRange) -> Self {
        Self {
            property: COUNT_COLUMN.to_string(),
            greater_than: range.min,
            less_than: range.max,
        }
    }
}

/// Water polygons: threshold the maximum-extent raster, vectorize, keep
/// polygons within the pixel-count range, optionally buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasinQuery {
    pub image: ImageSource,
    pub threshold: f64,
    pub scale: f64,
    pub max_pixels: u64,
    pub count_property: String,
    pub filter: PropertyFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_meters: Option<f64>,
}

impl BasinQuery {
    pub fn from_config(config: &Config, buffered: bool) -> Result<Self> {
        let basins = &config.basins;
        let range = PixelRange::new(basins.min_pixels, basins.max_pixel_count)?;

        Ok(Self {
            image: ImageSource {
                asset: basins.image.clone(),
                band: basins.band.clone(),
                equals: None,
                region: config.region.to_geojson(),
            },
            threshold: basins.threshold,
            scale: basins.scale,
            max_pixels: basins.max_pixels,
            count_property: COUNT_COLUMN.to_string(),
            filter: PropertyFilter::pixel_count(range),
            buffer_meters: if buffered { basins.buffer_meters } else { None },
        })
    }
}

/// Reduce one raster over every basin.
///
/// With `values_only` the result is a single list column holding one value
/// per basin in basin order; basins without valid pixels get `no_data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZonalRequest {
    pub image: ImageSource,
    pub basins: BasinQuery,
    pub reducer: Reducer,
    pub scale: f64,
    pub values_only: bool,
    pub no_data: f64,
    pub output_column: String,
}

/// Apply a [`ZonalRequest`] to each snapshot of a collection in `[start, end)`,
/// one output row per snapshot tagged with the snapshot's index, in
/// collection order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesRequest {
    pub collection: String,
    pub start: NaiveDate,
    pub end_exclusive: NaiveDate,
    pub per_snapshot: ZonalRequest,
}

impl TimeSeriesRequest {
    pub fn from_variable(config: &Config, variable: &VariableConfig) -> Result<Self> {
        let basins = BasinQuery::from_config(config, variable.buffered)?;

        Ok(Self {
            collection: variable.collection.clone(),
            start: variable.start,
            end_exclusive: variable
                .end
                .checked_add_days(Days::new(1))
                .unwrap_or(variable.end),
            per_snapshot: ZonalRequest {
                image: ImageSource {
                    asset: variable.collection.clone(),
                    band: variable.band.clone(),
                    equals: variable.equals,
                    region: config.region.to_geojson(),
                },
                basins,
                reducer: variable.reducer,
                scale: variable.scale,
                values_only: true,
                no_data: NO_DATA,
                output_column: STATS_COLUMN.to_string(),
            },
        })
    }

    /// The single-snapshot request for one image of the collection.
    pub fn for_snapshot(&self, snapshot_index: &str) -> ZonalRequest {
        let mut request = self.per_snapshot.clone();
        request.image.asset = format!("{}/{}", self.collection, snapshot_index);
        request
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableRequest {
    Basins(BasinQuery),
    Zonal(ZonalRequest),
    TimeSeries(TimeSeriesRequest),
}

/// Export a computed table as CSV to a cloud folder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRequest {
    pub description: String,
    pub folder: String,
    pub file_name_prefix: String,
    pub file_format: String,
    pub selectors: Vec<String>,
    pub table: TableRequest,
}

impl ExportRequest {
    fn csv(config: &Config, variable: &str, selectors: &[&str], table: TableRequest) -> Self {
        let name = config.export.export_name(variable);
        Self {
            description: name.clone(),
            folder: config.export.folder.clone(),
            file_name_prefix: name,
            file_format: "CSV".to_string(),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            table,
        }
    }
}

/// Build every export for a run, keyed by job name: the basin table first,
/// then one time series per configured variable.
pub fn build_requests(config: &Config) -> Result<Vec<(String, ExportRequest)>> {
    let mut requests = Vec::with_capacity(config.variables.len() + 1);

    // Basin geometry is always exported unbuffered
    let basins = BasinQuery::from_config(config, false)?;
    requests.push((
        BASINS_JOB.to_string(),
        ExportRequest::csv(
            config,
            BASINS_JOB,
            &[INDEX_COLUMN, COUNT_COLUMN, GEO_COLUMN],
            TableRequest::Basins(basins),
        ),
    ));

    for variable in &config.variables {
        let series = TimeSeriesRequest::from_variable(config, variable)?;
        requests.push((
            variable.name.clone(),
            ExportRequest::csv(
                config,
                &variable.name,
                &[INDEX_COLUMN, STATS_COLUMN],
                TableRequest::TimeSeries(series),
            ),
        ));
    }

    Ok(requests)
}

/// A one-off export reducing a single snapshot of `variable`, useful for
/// checking a dataset before committing to the full time series.
pub fn build_snapshot_request(
    config: &Config,
    variable: &str,
    snapshot_index: &str,
) -> Result<(String, ExportRequest)> {
    let variable = config.variable(variable).ok_or_else(|| {
        AppError::Config(format!("Unknown variable '{}'", variable))
    })?;
    let zonal = TimeSeriesRequest::from_variable(config, variable)?.for_snapshot(snapshot_index);
    let name = format!("{}_{}", variable.name, snapshot_index);

    Ok((
        name.clone(),
        ExportRequest::csv(config, &name, &[STATS_COLUMN], TableRequest::Zonal(zonal)),
    ))
}
