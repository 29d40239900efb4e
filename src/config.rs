use crate::error::{AppError, Result};
use crate::parser::TimestepFormat;
use crate::region::BoundingBox;
use crate::request::Reducer;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub region: BoundingBox,
    pub basins: BasinConfig,
    pub variables: Vec<VariableConfig>,
    pub export: ExportConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub project: String,
    pub token: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    60
}

/// Settings for extracting water polygons from the maximum-extent raster.
#[derive(Debug, Deserialize, Clone)]
pub struct BasinConfig {
    pub image: String,
    pub band: String,
    /// Pixels with a band value >= threshold count as water.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    pub scale: f64,
    #[serde(deserialize_with = "deserialize_pixel_budget")]
    pub max_pixels: u64,
    pub min_pixels: u64,
    pub max_pixel_count: u64,
    #[serde(default)]
    pub buffer_meters: Option<f64>,
}

fn default_threshold() -> f64 {
    1.0
}

/// Custom deserializer for the processing budget
///
/// Accepts:
/// - `max_pixels: 10000000000000` (integer)
/// - `max_pixels: 1e13` (float in scientific notation)
/// - `max_pixels: "1e13"` (string, e.g. after env var substitution)
fn deserialize_pixel_budget<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BudgetValue {
        Integer(u64),
        Float(f64),
        String(String),
    }

    let as_u64 = |f: f64| -> Option<u64> {
        if f.is_finite() && f >= 1.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
            Some(f as u64)
        } else {
            None
        }
    };

    match BudgetValue::deserialize(deserializer)? {
        BudgetValue::Integer(n) => Ok(n),
        BudgetValue::Float(f) => as_u64(f).ok_or_else(|| {
            serde::de::Error::custom(format!("Invalid pixel budget: '{}'", f))
        }),
        BudgetValue::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(as_u64)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid pixel budget: '{}'", s))),
    }
}

/// One gridded dataset reduced over every basin at every timestep.
#[derive(Debug, Deserialize, Clone)]
pub struct VariableConfig {
    pub name: String,
    pub collection: String,
    pub band: String,
    pub reducer: Reducer,
    /// Remap pixels to 1 where the band equals this value and 0 elsewhere.
    #[serde(default)]
    pub equals: Option<f64>,
    pub scale: f64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub timestep_format: TimestepFormat,
    /// Index labels known to be anomalous in this dataset; dropped before parsing.
    #[serde(default)]
    pub drop_labels: Vec<String>,
    /// Reduce over buffered basins, for grids much coarser than the water raster.
    #[serde(default)]
    pub buffered: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    pub run_prefix: String,
    pub folder: String,
    pub local_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub registry_file: Option<PathBuf>,
}

impl ExportConfig {
    /// Export name used both remotely and for the synced file: `<run_prefix><variable>`.
    pub fn export_name(&self, variable: &str) -> String {
        format!("{}{}", self.run_prefix, variable)
    }

    pub fn local_path(&self, variable: &str) -> PathBuf {
        self.local_dir
            .join(format!("{}.csv", self.export_name(variable)))
    }

    pub fn output_path(&self, table: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.csv", self.export_name(table)))
    }

    pub fn registry_path(&self) -> PathBuf {
        match &self.registry_file {
            Some(path) => path.clone(),
            None => self
                .local_dir
                .join(format!("{}jobs.json", self.run_prefix)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssemblyConfig {
    #[serde(default = "default_water_variable")]
    pub water_variable: String,
    #[serde(default = "default_missing_variable")]
    pub missing_variable: String,
}

fn default_water_variable() -> String {
    "water".to_string()
}

fn default_missing_variable() -> String {
    "missing".to_string()
}

impl AssemblyConfig {
    pub fn masked_table(&self) -> String {
        format!("{}_masked", self.water_variable)
    }

    pub fn area_table(&self) -> String {
        format!("{}_area", self.water_variable)
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            water_variable: default_water_variable(),
            missing_variable: default_missing_variable(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    pub fn variable(&self, name: &str) -> Option<&VariableConfig> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Unexpanded environment variables
    /// - HTTPS backend URL
    /// - Pixel-count filter bounds
    /// - Unique, non-empty variable names with ordered date ranges
    /// - Masking variables that exist and derived tables that collide with nothing
    /// - Separate synced and output directories
    fn validate(&self) -> Result<()> {
        // Check required string fields for unexpanded environment variables
        let fields_to_check = [
            ("backend.base_url", &self.backend.base_url),
            ("backend.project", &self.backend.project),
            ("backend.token", &self.backend.token),
            ("export.run_prefix", &self.export.run_prefix),
            ("export.folder", &self.export.folder),
        ];

        for (field_name, value) in &fields_to_check {
            if value.contains("${") {
                return Err(AppError::Config(format!(
                    "{} contains an unexpanded environment variable",
                    field_name
                )));
            }
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("{} cannot be empty", field_name)));
            }
        }

        // Validate base URL format and scheme
        let parsed = url::Url::parse(&self.backend.base_url).map_err(|e| {
            AppError::Config(format!(
                "Invalid backend base_url '{}': {}",
                self.backend.base_url, e
            ))
        })?;
        if parsed.scheme() != "https" {
            return Err(AppError::Config(format!(
                "Backend base_url must use HTTPS, got: {}",
                parsed.scheme()
            )));
        }

        if self.backend.timeout_seconds == 0 {
            return Err(AppError::Config(
                "Backend timeout_seconds must be greater than 0".to_string(),
            ));
        }

        // Validate the pixel-count filter is a non-empty open interval
        if self.basins.min_pixels >= self.basins.max_pixel_count {
            return Err(AppError::Config(format!(
                "basins.min_pixels ({}) must be less than basins.max_pixel_count ({})",
                self.basins.min_pixels, self.basins.max_pixel_count
            )));
        }

        if self.basins.scale <= 0.0 {
            return Err(AppError::Config("basins.scale must be positive".to_string()));
        }

        if let Some(buffer) = self.basins.buffer_meters {
            if !(buffer > 0.0) {
                return Err(AppError::Config(format!(
                    "basins.buffer_meters must be positive, got {}",
                    buffer
                )));
            }
        }

        if self.variables.is_empty() {
            return Err(AppError::Config(
                "At least one variable must be configured".to_string(),
            ));
        }

        // Output tables share the export naming scheme, so names must not collide
        let derived = [
            self.assembly.masked_table(),
            self.assembly.area_table(),
        ];

        let mut seen = HashSet::new();
        for variable in &self.variables {
            if variable.name.trim().is_empty() {
                return Err(AppError::Config("Variable name cannot be empty".to_string()));
            }
            if variable.name == "basins" {
                return Err(AppError::Config(
                    "Variable name 'basins' is reserved for the basin export".to_string(),
                ));
            }
            if derived.contains(&variable.name) {
                return Err(AppError::Config(format!(
                    "Variable name '{}' is reserved for a derived output table",
                    variable.name
                )));
            }
            if !seen.insert(variable.name.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate variable name '{}'",
                    variable.name
                )));
            }

            // Validate date range and resolution
            if variable.start > variable.end {
                return Err(AppError::Config(format!(
                    "Variable '{}' starts ({}) after it ends ({})",
                    variable.name, variable.start, variable.end
                )));
            }
            if variable.scale <= 0.0 {
                return Err(AppError::Config(format!(
                    "Variable '{}' scale must be positive",
                    variable.name
                )));
            }

            // Warn if buffering was requested without a buffer distance
            if variable.buffered && self.basins.buffer_meters.is_none() {
                tracing::warn!(
                    "Variable '{}' requests buffered basins but basins.buffer_meters is unset; unbuffered basins will be used",
                    variable.name
                );
            }
        }

        for name in [
            &self.assembly.water_variable,
            &self.assembly.missing_variable,
        ] {
            if self.variable(name).is_none() {
                return Err(AppError::Config(format!(
                    "assembly refers to unknown variable '{}'",
                    name
                )));
            }
        }

        // Outputs written into the synced directory would overwrite the exports
        if same_directory(&self.export.local_dir, &self.export.output_dir) {
            return Err(AppError::Config(format!(
                "export.output_dir must differ from export.local_dir ({})",
                self.export.local_dir.display()
            )));
        }

        Ok(())
    }
}

/// Compare directories literally, and by canonical path when both exist.
fn same_directory(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| AppError::Config(format!("Invalid env var pattern: {}", e)))?;

    let mut missing_vars = Vec::new();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                missing_vars.push(var_name.to_string());
            }
        }
    }

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root (copy .env.example)\n\
             2. Or set {} in your environment before running",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}
