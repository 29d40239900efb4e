#![allow(dead_code)]

use basin_hydro::config::Config;
use std::path::Path;

/// A three-variable run rooted in `dir` (synced exports in `dir/synced`,
/// outputs in `dir/out`).
pub fn sample_config(dir: &Path) -> Config {
    Config::from_yaml(&sample_yaml(dir)).expect("sample config should be valid")
}

pub fn sample_yaml(dir: &Path) -> String {
    format!(
        r#"
backend:
  base_url: https://analytics.example.com/v1
  project: hydro-test
  token: test-token
region:
  min_lat: -16.0
  max_lat: -15.0
  min_lon: 27.0
  max_lon: 28.0
basins:
  image: JRC/GSW1_4/GlobalSurfaceWater
  band: max_extent
  scale: 30
  max_pixels: 1e13
  min_pixels: 1
  max_pixel_count: 1000
  buffer_meters: 2000
variables:
  - name: water
    collection: JRC/GSW1_4/MonthlyHistory
    band: water
    reducer: mean
    equals: 2
    scale: 30
    start: 2015-01-01
    end: 2015-02-28
    timestep_format: yyyy_mm
  - name: missing
    collection: JRC/GSW1_4/MonthlyHistory
    band: water
    reducer: mean
    equals: 0
    scale: 30
    start: 2015-01-01
    end: 2015-02-28
    timestep_format: yyyy_mm
  - name: cropland
    collection: USDA/NASS/CDL
    band: cropland
    reducer: mode
    scale: 30
    start: 2014-01-01
    end: 2015-12-31
    timestep_format: yyyy
    drop_labels: ["2014a"]
    buffered: true
export:
  run_prefix: test_
  folder: hydro_exports
  local_dir: {synced}
  output_dir: {out}
"#,
        synced = dir.join("synced").display(),
        out = dir.join("out").display(),
    )
}

pub const BASINS_CSV: &str = "system:index,count,.geo\n\
0000000000000000000a,10,\"{\"\"type\"\":\"\"Polygon\"\",\"\"coordinates\"\":[[[27.1,-15.5],[27.11,-15.5],[27.11,-15.49],[27.1,-15.49],[27.1,-15.5]]]}\"\n\
0000000000000000000b,20,\"{\"\"type\"\":\"\"Polygon\"\",\"\"coordinates\"\":[[[27.2,-15.5],[27.21,-15.5]]]}\"\n\
0000000000000000000c,5.0,\"{\"\"type\"\":\"\"MultiPolygon\"\",\"\"coordinates\"\":[[[[27.3,-15.5],[27.31,-15.5],[27.31,-15.49],[27.3,-15.49],[27.3,-15.5]]]]}\"\n";

pub const WATER_CSV: &str = "system:index,zonal_statistics,.geo\n\
2015_01,\"[0.2, 0.0, 0.9]\",\"{\"\"type\"\":\"\"MultiPoint\"\",\"\"coordinates\"\":[]}\"\n\
2015_02,\"[0.5, 0.25, null]\",\"{\"\"type\"\":\"\"MultiPoint\"\",\"\"coordinates\"\":[]}\"\n";

pub const MISSING_CSV: &str = "system:index,zonal_statistics,.geo\n\
2015_01,\"[0.0, 1.0, 0.0]\",\"{\"\"type\"\":\"\"MultiPoint\"\",\"\"coordinates\"\":[]}\"\n\
2015_02,\"[0.0, 0.0, 0.0]\",\"{\"\"type\"\":\"\"MultiPoint\"\",\"\"coordinates\"\":[]}\"\n";

pub const CROPLAND_CSV: &str = "system:index,zonal_statistics\n\
2014,\"[1, 5, -9999]\"\n\
2014a,\"[1, 5]\"\n\
2015,\"[1, 36, 24]\"\n";
