//! Runtime settings and the fixed NOMADS request parameter tables.
//!
//! The level and variable lists are immutable constants injected at
//! construction; nothing in the service mutates them.

use std::path::PathBuf;
use std::time::Duration;

use crate::cycle::ForecastCycle;

/// NOMADS GFS 0.50 degree filter CGI.
pub const BASE_URL: &str = "https://nomads.ncep.noaa.gov/cgi-bin/filter_gfs_0p50.pl?";

/// Whole-globe bounding box, fixed for every request.
pub const GLOBAL_BBOX: [&str; 4] = ["leftlon=0", "rightlon=360", "toplat=90", "bottomlat=-90"];

/// Levels requested from the filter: the pressure surfaces the wind
/// profile is built from plus the named cloud bands and mean sea level.
pub const LEVELS: [&str; 18] = [
    "700_mb", // FL100
    "600_mb", // FL140
    "500_mb", // FL180
    "400_mb", // FL235
    "300_mb", // FL300
    "200_mb", // FL380
    "150_mb", // FL443
    "100_mb", // FL518
    "high_cloud_bottom_level",
    "high_cloud_layer",
    "high_cloud_top_level",
    "low_cloud_bottom_level",
    "low_cloud_layer",
    "low_cloud_top_level",
    "mean_sea_level",
    "middle_cloud_bottom_level",
    "middle_cloud_layer",
    "middle_cloud_top_level",
];

/// Variable codes requested from the filter.
pub const VARIABLES: [&str; 6] = ["PRES", "TCDC", "UGRD", "VGRD", "TMP", "PRMSL"];

/// Settings for the acquisition pipeline.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Root of the grid file cache; one subdirectory per cycle.
    pub cache_root: PathBuf,
    /// Path to the wgrib2 binary.
    pub wgrib2: PathBuf,
    pub base_url: String,
    /// Interval between acquisition loop ticks.
    pub poll_interval: Duration,
    /// Wait after a failed download before another attempt may start.
    pub failure_cooldown: Duration,
    /// HTTP request timeout for a grid file transfer.
    pub request_timeout: Duration,
    /// Administrative switch; when false the loop never starts fetches.
    pub download_enabled: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("cache"),
            wgrib2: PathBuf::from("wgrib2"),
            base_url: BASE_URL.to_string(),
            poll_interval: Duration::from_secs(10),
            failure_cooldown: Duration::from_secs(60),
            request_timeout: Duration::from_secs(600),
            download_enabled: true,
        }
    }
}

impl FetcherConfig {
    /// Build the filter CGI URL for one cycle's grid file.
    pub fn request_url(&self, cycle: &ForecastCycle) -> String {
        let mut params: Vec<String> = GLOBAL_BBOX.iter().map(|p| p.to_string()).collect();
        params.push(format!("dir=%2Fgfs.{}", cycle.id()));
        params.push(format!("file={}", cycle.filename()));
        for level in LEVELS {
            params.push(format!("lev_{level}=1"));
        }
        for var in VARIABLES {
            params.push(format!("var_{var}=1"));
        }
        format!("{}{}", self.base_url, params.join("&"))
    }
}
