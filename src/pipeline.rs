use crate::backend::Backend;
use crate::basins::{BasinTable, PixelRange};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::jobs::{JobHandle, JobRegistry, JobState, PollSummary, SubmitSummary};
use crate::parser::{parse_basins, TimeSeriesParser};
use crate::request::{build_requests, ExportRequest, BASINS_JOB};
use crate::timeseries::TimeSeriesTable;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

/// Everything produced by a successful assembly.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub basins: BasinTable,
    pub tables: Vec<TimeSeriesTable>,
    pub masked: TimeSeriesTable,
    pub area: TimeSeriesTable,
}

impl Assembly {
    pub fn table(&self, variable: &str) -> Option<&TimeSeriesTable> {
        self.tables.iter().find(|t| t.variable == variable)
    }
}

pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn plan(&self) -> Result<Vec<(String, ExportRequest)>> {
        build_requests(&self.config)
    }

    pub fn load_registry(&self) -> Result<JobRegistry> {
        JobRegistry::load(self.config.export.registry_path())
    }

    /// Submit every job of the run that has not been submitted yet.
    pub async fn submit(&self, backend: &Backend) -> Result<(JobRegistry, SubmitSummary)> {
        let requests = self.plan()?;
        let path = self.config.export.registry_path();
        let mut registry = JobRegistry::load(&path)?;

        let outcome = registry.submit_all(backend, &requests).await;
        // Persist whatever was submitted, even if a later submission failed
        registry.save(&path)?;
        let summary = outcome?;

        info!(
            "Submitted {} jobs, {} already known",
            summary.submitted.len(),
            summary.skipped.len()
        );
        Ok((registry, summary))
    }

    /// Poll every unfinished job once and persist the new states.
    pub async fn status(&self, backend: &Backend) -> Result<(JobRegistry, PollSummary)> {
        let path = self.config.export.registry_path();
        let mut registry = JobRegistry::load(&path)?;
        if registry.is_empty() {
            warn!("No jobs registered at {}; run submit first", path.display());
        }

        let summary = registry.poll(backend).await;
        registry.save(&path)?;
        Ok((registry, summary))
    }

    /// Submit a fresh job for a failed export.
    pub async fn resubmit(&self, backend: &Backend, name: &str) -> Result<JobHandle> {
        let requests = self.plan()?;
        let (_, request) = requests
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| AppError::Job(format!("No job named '{}' in this run", name)))?;

        let path = self.config.export.registry_path();
        let mut registry = JobRegistry::load(&path)?;
        let job = registry.resubmit(backend, name, request).await?;
        registry.save(&path)?;
        Ok(job)
    }

    /// Check that every export of the run is ready to be read: its job is
    /// completed and its file is present in the synced directory.
    pub fn check_ready(&self, registry: &JobRegistry) -> Result<()> {
        let export = &self.config.export;
        let names = std::iter::once(BASINS_JOB)
            .chain(self.config.variables.iter().map(|v| v.name.as_str()));

        // Report every problem, not just the first
        let mut problems = Vec::new();
        for name in names {
            match registry.status(name) {
                Some(JobState::Completed) => {}
                Some(state) => problems.push(format!("job '{}' is {}", name, state)),
                None => problems.push(format!("job '{}' was never submitted", name)),
            }

            // A completed job is not enough; the sync may not have delivered the file yet
            let path = export.local_path(name);
            if !path.is_file() {
                problems.push(format!("export file {} is missing", path.display()));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::InvalidData(format!(
                "Run '{}' is not ready to assemble: {}",
                export.run_prefix,
                problems.join("; ")
            )))
        }
    }

    /// Parse all exports, mask water by missing data, derive inundated area
    /// and write every table to the output directory.
    pub fn assemble(&self) -> Result<Assembly> {
        let registry = self.load_registry()?;
        self.check_ready(&registry)?;

        let assembly = self.assemble_files()?;
        self.write_outputs(&assembly)?;
        Ok(assembly)
    }

    /// Parse exports from the synced directory without consulting the job registry.
    pub fn assemble_files(&self) -> Result<Assembly> {
        let export = &self.config.export;
        let range = PixelRange::new(
            self.config.basins.min_pixels,
            self.config.basins.max_pixel_count,
        )?;

        // Basins first: their order fixes the column order of every table
        let basins = parse_basins(open_export(&export.local_path(BASINS_JOB))?, range)?;
        if basins.is_empty() {
            return Err(AppError::InvalidData(
                "Basin export contains no basins".to_string(),
            ));
        }
        let basin_ids = basins.ids();

        // Any unreadable table aborts the whole assembly
        let mut tables = Vec::with_capacity(self.config.variables.len());
        for variable in &self.config.variables {
            let reader = open_export(&export.local_path(&variable.name))?;
            let table =
                TimeSeriesParser::new(&variable.name, variable.timestep_format, &variable.drop_labels)
                    .with_window(variable.start, variable.end)
                    .parse(reader, &basin_ids)?;
            tables.push(table);
        }

        let find = |name: &str| {
            tables.iter().find(|t| t.variable == name).ok_or_else(|| {
                AppError::Config(format!("Variable '{}' is not configured", name))
            })
        };
        let water = find(&self.config.assembly.water_variable)?;
        let missing = find(&self.config.assembly.missing_variable)?;

        let masked = water.mask_missing(missing)?;
        let area = masked.derive_area(&basins.pixel_counts())?;

        info!(
            "Assembled {} basins across {} variables",
            basins.len(),
            tables.len()
        );

        Ok(Assembly {
            basins,
            tables,
            masked,
            area,
        })
    }

    /// Write the basin table, every variable table and the masked and area
    /// tables as `<run_prefix><name>.csv` under the output directory.
    pub fn write_outputs(&self, assembly: &Assembly) -> Result<()> {
        let export = &self.config.export;
        std::fs::create_dir_all(&export.output_dir)?;

        assembly.basins.write_csv(export.output_path(BASINS_JOB))?;
        for table in assembly
            .tables
            .iter()
            .chain([&assembly.masked, &assembly.area])
        {
            let path = export.output_path(&table.variable);
            table.write_csv(&path)?;
            info!("Wrote {}", path.display());
        }
        Ok(())
    }
}

fn open_export(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| {
        AppError::InvalidData(format!("Cannot open export {}: {}", path.display(), e))
    })?;
    Ok(BufReader::new(file))
}
