//! Forecast cycle computation.
//!
//! GFS cycles are published at 00/06/12/18 UTC with roughly a four hour
//! publication delay. Everything here is a pure function of the wall-clock
//! instant so the schedule can be tested deterministically.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// Hours of day at which GFS cycles are published.
pub const CYCLE_HOURS: [u32; 4] = [0, 6, 12, 18];

/// Assumed delay between a cycle's nominal time and its publication.
const PUBLICATION_DELAY_HOURS: i64 = 4;

/// The latest published forecast cycle and the forecast hour to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastCycle {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// Published cycle hour, one of [`CYCLE_HOURS`].
    pub hour: u32,
    /// Hours ahead of the cycle's nominal time, a multiple of 3.
    pub forecast_offset: u32,
}

impl ForecastCycle {
    /// Compute the latest cycle assumed published at the given instant.
    ///
    /// The cycle date and hour come from the instant shifted back by the
    /// publication delay; the forecast offset comes from the unshifted hour,
    /// plus a day's worth of hours when the shift crossed midnight, floored
    /// to the 3-hour step grid files are published at.
    pub fn latest(now: DateTime<Utc>) -> Self {
        let adjusted = now - Duration::hours(PUBLICATION_DELAY_HOURS);

        let hour = CYCLE_HOURS
            .iter()
            .copied()
            .filter(|&c| c <= adjusted.hour())
            .max()
            .unwrap_or(0);

        let rollover = if adjusted.day() != now.day() { 24 } else { 0 };
        let forecast_offset = (rollover + now.hour() - hour) / 3 * 3;

        Self {
            year: adjusted.year(),
            month: adjusted.month(),
            day: adjusted.day(),
            hour,
            forecast_offset,
        }
    }

    /// Sortable cycle identifier, `YYYYMMDDHH`.
    pub fn id(&self) -> String {
        format!(
            "{}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour
        )
    }

    /// Grid file name on the NOMADS filter for this cycle and offset.
    pub fn filename(&self) -> String {
        format!(
            "gfs.t{:02}z.pgrb2full.0p50.f0{:02}",
            self.hour, self.forecast_offset
        )
    }
}

/// Identity of a downloaded grid file in the local cache.
///
/// Equality against the last downloaded reference decides whether a new
/// download is needed. Files are never deleted here; retention is an
/// external concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedGridFile {
    /// Cycle identifier, doubles as the cache subdirectory name.
    pub date_cycle: String,
    pub filename: String,
}

impl CachedGridFile {
    pub fn for_cycle(cycle: &ForecastCycle) -> Self {
        Self {
            date_cycle: cycle.id(),
            filename: format!("{}.grib2", cycle.filename()),
        }
    }

    /// Absolute path of this file below the cache root.
    pub fn path_under(&self, cache_root: &Path) -> PathBuf {
        cache_root.join(&self.date_cycle).join(&self.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_mid_morning_cycle() {
        // 05:10Z shifts to 01:10Z, resolving cycle 00 with offset 3.
        let cycle = ForecastCycle::latest(at(2024, 3, 1, 5, 10));
        assert_eq!(cycle.id(), "2024030100");
        assert_eq!(cycle.hour, 0);
        assert_eq!(cycle.forecast_offset, 3);
    }

    #[test]
    fn test_midnight_rollover() {
        // 02:00Z shifts to the previous day's 22:00Z: cycle 18 of the
        // previous day, offset picks up the +24 hour adjustment.
        let cycle = ForecastCycle::latest(at(2024, 3, 1, 2, 0));
        assert_eq!(cycle.id(), "2024022918");
        assert_eq!(cycle.hour, 18);
        assert_eq!(cycle.forecast_offset, 6);
    }

    #[test]
    fn test_late_evening_cycle() {
        let cycle = ForecastCycle::latest(at(2024, 3, 1, 23, 59));
        assert_eq!(cycle.id(), "2024030118");
        assert_eq!(cycle.forecast_offset, 3);
    }

    #[test]
    fn test_offset_always_multiple_of_three() {
        for hour in 0..24 {
            for minute in [0, 29, 59] {
                let cycle = ForecastCycle::latest(at(2024, 7, 15, hour, minute));
                assert_eq!(cycle.forecast_offset % 3, 0, "hour {hour}:{minute}");
                assert!(CYCLE_HOURS.contains(&cycle.hour));
            }
        }
    }

    #[test]
    fn test_deterministic_for_same_instant() {
        let instant = at(2025, 11, 30, 9, 41);
        assert_eq!(
            ForecastCycle::latest(instant),
            ForecastCycle::latest(instant)
        );
    }

    #[test]
    fn test_filename_format() {
        let cycle = ForecastCycle::latest(at(2024, 3, 1, 5, 10));
        assert_eq!(cycle.filename(), "gfs.t00z.pgrb2full.0p50.f003");
    }

    #[test]
    fn test_cached_file_identity() {
        let cycle = ForecastCycle::latest(at(2024, 3, 1, 5, 10));
        let a = CachedGridFile::for_cycle(&cycle);
        let b = CachedGridFile::for_cycle(&ForecastCycle::latest(at(2024, 3, 1, 5, 55)));
        // Same cycle window, same identity: no re-download.
        assert_eq!(a, b);
        assert_eq!(
            a.path_under(Path::new("/cache")),
            PathBuf::from("/cache/2024030100/gfs.t00z.pgrb2full.0p50.f003.grib2")
        );
    }
}
