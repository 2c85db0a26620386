//! wgrib2 invocation and point-profile decoding.
//!
//! Runs the external wgrib2 tool against a cached grid file, asking for
//! the nearest-grid-point values at one coordinate, and turns its
//! line-oriented short inventory into sorted wind and cloud layers plus
//! the sea-level pressure. The tool's output format is a contract
//! boundary: each line is colon-delimited with at least 8 fields, field 3
//! holding the variable code, field 4 the space-tokenised level
//! descriptor and field 7 a comma trailer whose third sub-field carries
//! `val=<number>`. Lines that don't fit are skipped; a run that produces
//! no usable records is an empty profile, not an error.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::{debug, trace};

use atmos_units as units;

use crate::cycle::CachedGridFile;
use crate::state::{CloudLayer, ParsedProfile, SharedWeather, WindLayer};

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Contract violation: the caller handed a file that is not cached.
    #[error("cached grid file not found: {0}")]
    MissingFile(PathBuf),

    #[error("failed to run wgrib2: {0}")]
    ToolSpawn(#[from] std::io::Error),

    #[error("wgrib2 exited abnormally: {0}")]
    ToolFailed(std::process::ExitStatus),

    #[error("wgrib2 produced non-UTF-8 output")]
    ToolOutput,
}

/// Decodes cached grid files into point profiles and publishes them.
pub struct GridDecoder {
    wgrib2: PathBuf,
    cache_root: PathBuf,
    shared: SharedWeather,
}

impl GridDecoder {
    pub fn new(wgrib2: PathBuf, cache_root: PathBuf, shared: SharedWeather) -> Self {
        Self {
            wgrib2,
            cache_root,
            shared,
        }
    }

    /// Decode the cached file at `(lat, lon)` and publish the result.
    ///
    /// Blocks its caller for the duration of the tool invocation; callers
    /// needing responsiveness should decode from a worker task. A failed
    /// decode publishes nothing.
    pub fn decode(
        &self,
        file: &CachedGridFile,
        lat: f64,
        lon: f64,
    ) -> Result<ParsedProfile, DecodeError> {
        let path = file.path_under(&self.cache_root);
        if !path.exists() {
            return Err(DecodeError::MissingFile(path));
        }

        let output = Command::new(&self.wgrib2)
            .arg("-s")
            .arg("-lon")
            .arg(format!("{lon:.6}"))
            .arg(format!("{lat:.6}"))
            .arg(&path)
            .output()?;

        if !output.status.success() {
            return Err(DecodeError::ToolFailed(output.status));
        }

        let stdout = std::str::from_utf8(&output.stdout).map_err(|_| DecodeError::ToolOutput)?;
        let profile = build_profile(stdout, lat, lon);

        debug!(
            winds = profile.winds.len(),
            clouds = profile.clouds.len(),
            pressure = ?profile.sea_level_pressure_inhg,
            lat,
            lon,
            "decoded grid file"
        );

        self.shared.publish_profile(profile.clone());
        Ok(profile)
    }
}

/// One usable line of wgrib2 short output.
#[derive(Debug, PartialEq)]
struct Record<'a> {
    variable: &'a str,
    level: Vec<&'a str>,
    value: f64,
}

/// Parse a single inventory line, or `None` if it doesn't fit the grammar.
fn parse_record(line: &str) -> Option<Record<'_>> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 8 {
        return None;
    }

    let variable = fields[3];
    let level: Vec<&str> = fields[4].split(' ').collect();
    let value = fields[7]
        .split(',')
        .nth(2)?
        .split('=')
        .nth(1)?
        .trim()
        .parse()
        .ok()?;

    Some(Record {
        variable,
        level,
        value,
    })
}

/// Bucket the tool output by level and convert to the published profile.
fn build_profile(output: &str, lat: f64, lon: f64) -> ParsedProfile {
    // BTreeMaps keep the walk order stable so identical output always
    // yields an identical profile.
    let mut wind_levels: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();
    let mut cloud_bands: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();
    let mut pressure_inhg = None;

    for line in output.lines() {
        let Some(record) = parse_record(line) else {
            trace!(line, "skipping unparseable inventory line");
            continue;
        };

        if record.level.len() < 2 {
            continue;
        }

        if record.level[1] == "cloud" {
            let band = cloud_bands.entry(record.level[0]).or_default();
            if record.variable == "PRES" && record.level.len() > 3 {
                // Boundary pressure, keyed by its "top"/"bottom" token.
                band.insert(record.level[2], record.value);
            } else {
                band.insert(record.variable, record.value);
            }
        } else if record.level[1] == "mb" {
            wind_levels
                .entry(record.level[0])
                .or_default()
                .insert(record.variable, record.value);
        } else if record.level[0] == "mean" && record.variable == "PRMSL" {
            pressure_inhg = Some(units::pa_to_inhg(record.value));
        }
    }

    let mut winds = Vec::new();
    for (level, vars) in &wind_levels {
        let (Some(&u), Some(&v)) = (vars.get("UGRD"), vars.get("VGRD")) else {
            continue;
        };
        let Ok(mb) = level.parse::<f64>() else {
            continue;
        };

        let (heading_deg, speed_ms) = units::wind_to_polar(u, v);
        let altitude_ft = units::mb_to_feet(mb);
        let temperature_c = vars
            .get("TMP")
            .map(|&kelvin| units::oat_to_msl_celsius(kelvin, altitude_ft));

        winds.push(WindLayer {
            altitude_ft,
            heading_deg,
            speed_kt: units::ms_to_knots(speed_ms),
            temperature_c,
            visibility_m: None,
        });
    }

    let mut clouds = Vec::new();
    for vars in cloud_bands.values() {
        let (Some(&top_pa), Some(&bottom_pa), Some(&cover)) =
            (vars.get("top"), vars.get("bottom"), vars.get("TCDC"))
        else {
            continue;
        };

        // Boundary pressures arrive in pascals.
        clouds.push(CloudLayer {
            base_m: units::feet_to_meters(units::mb_to_feet(bottom_pa * 0.01)),
            top_m: units::feet_to_meters(units::mb_to_feet(top_pa * 0.01)),
            coverage: units::coverage_code(cover),
        });
    }

    winds.sort_by(|a, b| a.altitude_ft.total_cmp(&b.altitude_ft));
    clouds.sort_by(|a, b| {
        b.base_m
            .total_cmp(&a.base_m)
            .then(b.top_m.total_cmp(&a.top_m))
    });

    ParsedProfile {
        winds,
        clouds,
        sea_level_pressure_inhg: pressure_inhg,
        lat,
        lon,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Short inventory plus the -lon trailer, as wgrib2 emits it.
    const SAMPLE_OUTPUT: &str = "\
1:0:d=2024030100:UGRD:700 mb:3 hour fcst::lon=136.500000,lat=35.500000,val=5
2:120:d=2024030100:VGRD:700 mb:3 hour fcst::lon=136.500000,lat=35.500000,val=5
3:240:d=2024030100:TMP:700 mb:3 hour fcst::lon=136.500000,lat=35.500000,val=268
4:360:d=2024030100:UGRD:500 mb:3 hour fcst::lon=136.500000,lat=35.500000,val=0
5:480:d=2024030100:VGRD:500 mb:3 hour fcst::lon=136.500000,lat=35.500000,val=10
6:600:d=2024030100:UGRD:200 mb:3 hour fcst::lon=136.500000,lat=35.500000,val=30
7:720:d=2024030100:PRES:low cloud bottom level:3 hour fcst::lon=136.500000,lat=35.500000,val=85000
8:840:d=2024030100:PRES:low cloud top level:3 hour fcst::lon=136.500000,lat=35.500000,val=80000
9:960:d=2024030100:TCDC:low cloud layer:3 hour fcst::lon=136.500000,lat=35.500000,val=75
10:1080:d=2024030100:PRES:high cloud bottom level:3 hour fcst::lon=136.500000,lat=35.500000,val=30000
11:1200:d=2024030100:PRES:high cloud top level:3 hour fcst::lon=136.500000,lat=35.500000,val=25000
12:1320:d=2024030100:TCDC:high cloud layer:3 hour fcst::lon=136.500000,lat=35.500000,val=95
13:1440:d=2024030100:PRES:middle cloud bottom level:3 hour fcst::lon=136.500000,lat=35.500000,val=60000
14:1560:d=2024030100:TCDC:middle cloud layer:3 hour fcst::lon=136.500000,lat=35.500000,val=40
15:1680:d=2024030100:PRMSL:mean sea level:3 hour fcst::lon=136.500000,lat=35.500000,val=101325
";

    #[test]
    fn test_parse_record_grammar() {
        let record = parse_record(
            "291:188733131:d=2024030100:TMP:500 mb:3 hour fcst::lon=136.500000,lat=35.500000,val=280.5",
        )
        .unwrap();
        assert_eq!(record.variable, "TMP");
        assert_eq!(record.level, vec!["500", "mb"]);
        assert_eq!(record.value, 280.5);
    }

    #[test]
    fn test_parse_record_rejects_malformed() {
        let malformed = [
            "",
            "garbage",
            "1:0:d=2024030100:TMP:500 mb:anl", // too few fields
            "1:0:d=2024030100:TMP:500 mb:3 hour fcst::lon=136.5,lat=35.5", // no value sub-field
            "1:0:d=2024030100:TMP:500 mb:3 hour fcst::lon=136.5,lat=35.5,val=abc",
            ":::::::",
            "1:0:d=2024030100:TMP:500 mb:3 hour fcst::,,",
            "::::::::::::::::",
        ];
        for line in malformed {
            assert!(parse_record(line).is_none(), "accepted: {line:?}");
        }
    }

    #[test]
    fn test_build_profile_winds() {
        let profile = build_profile(SAMPLE_OUTPUT, 35.5, 136.5);

        // 200 mb has no VGRD and never becomes a layer.
        assert_eq!(profile.winds.len(), 2);

        // Ascending by altitude: 700 mb below 500 mb.
        let low = &profile.winds[0];
        let high = &profile.winds[1];
        assert!(low.altitude_ft < high.altitude_ft);

        // 700 mb: equal positive components blow from the southwest.
        assert!((low.heading_deg - 225.0).abs() < 0.001);
        assert!((low.speed_kt - atmos_units::ms_to_knots(50.0_f64.sqrt())).abs() < 0.001);
        assert!(low.temperature_c.is_some());
        assert!(low.visibility_m.is_none());

        // 500 mb has no TMP record.
        assert!((high.heading_deg - 180.0).abs() < 0.001);
        assert!(high.temperature_c.is_none());
    }

    #[test]
    fn test_build_profile_clouds() {
        let profile = build_profile(SAMPLE_OUTPUT, 35.5, 136.5);

        // The middle band is missing its top boundary and is dropped.
        assert_eq!(profile.clouds.len(), 2);

        // Descending by (base, top): the high band is listed first.
        let first = &profile.clouds[0];
        let second = &profile.clouds[1];
        assert!(first.base_m > second.base_m);
        assert!(first.top_m > first.base_m);
        assert_eq!(first.coverage, 4); // 95% clips to the top bucket
        assert_eq!(second.coverage, 3); // 75%
    }

    #[test]
    fn test_build_profile_pressure_and_coordinate() {
        let profile = build_profile(SAMPLE_OUTPUT, 35.5, 136.5);
        let inhg = profile.sea_level_pressure_inhg.unwrap();
        assert!((inhg - 29.92).abs() < 0.01);
        assert_eq!(profile.lat, 35.5);
        assert_eq!(profile.lon, 136.5);
    }

    #[test]
    fn test_build_profile_deterministic() {
        let a = build_profile(SAMPLE_OUTPUT, 35.5, 136.5);
        let b = build_profile(SAMPLE_OUTPUT, 35.5, 136.5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_output_is_valid_empty_profile() {
        let profile = build_profile("", 35.5, 136.5);
        assert!(profile.winds.is_empty());
        assert!(profile.clouds.is_empty());
        assert!(profile.sea_level_pressure_inhg.is_none());
    }

    #[test]
    fn test_malformed_lines_are_skipped_not_fatal() {
        let noisy = format!(
            "not an inventory line\n{SAMPLE_OUTPUT}\x00:\u{fffd}::::\n1:2:3:4:5:6:7:8:9:10\n"
        );
        let clean = build_profile(SAMPLE_OUTPUT, 35.5, 136.5);
        let from_noisy = build_profile(&noisy, 35.5, 136.5);
        assert_eq!(clean, from_noisy);
    }

    #[test]
    fn test_missing_decoder_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = GridDecoder::new(
            PathBuf::from("wgrib2"),
            dir.path().to_path_buf(),
            SharedWeather::new(),
        );
        let file = CachedGridFile {
            date_cycle: "2024030100".to_string(),
            filename: "gfs.t00z.pgrb2full.0p50.f003.grib2".to_string(),
        };

        let err = decoder.decode(&file, 35.5, 136.5).unwrap_err();
        assert!(matches!(err, DecodeError::MissingFile(_)));
        // A failed decode publishes nothing.
        assert!(decoder.shared.profile().is_none());
    }
}
