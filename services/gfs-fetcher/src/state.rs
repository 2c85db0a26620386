//! Published weather state shared between the pipeline and its consumers.
//!
//! One lock guards exactly the pair that must stay consistent: the
//! published point profile and the last known-good grid file with its
//! new-data flag. Snapshots are replaced whole; a reader never observes
//! half-old, half-new fields, and never sees the flag raised before the
//! file reference is valid.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::cycle::CachedGridFile;

/// Wind at one pressure level, unit-normalized for the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct WindLayer {
    pub altitude_ft: f64,
    /// Direction the wind blows from, degrees.
    pub heading_deg: f64,
    pub speed_kt: f64,
    /// Mean-sea-level-referenced temperature, when the source carried TMP.
    pub temperature_c: Option<f64>,
    /// Humidity-derived visibility; extension point, currently never set.
    pub visibility_m: Option<f64>,
}

/// One cloud band with its boundaries in meters and coverage code.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudLayer {
    pub base_m: f64,
    pub top_m: f64,
    /// Coverage on the consumer code scale, 0..=4.
    pub coverage: u8,
}

/// The externally visible decode result for one coordinate.
///
/// `lat`/`lon` always match the layers they were computed with.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProfile {
    /// Ascending by altitude.
    pub winds: Vec<WindLayer>,
    /// Descending by (base, top); highest-based layer first.
    pub clouds: Vec<CloudLayer>,
    pub sea_level_pressure_inhg: Option<f64>,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Default)]
struct WeatherInner {
    profile: Option<ParsedProfile>,
    last_grib: Option<CachedGridFile>,
    new_data: bool,
    reparse_requested: bool,
}

/// Cloneable handle to the published state; all clones share one lock.
#[derive(Clone, Default)]
pub struct SharedWeather {
    inner: Arc<Mutex<WeatherInner>>,
}

impl SharedWeather {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WeatherInner> {
        // A poisoned lock only means a writer panicked mid-publish; the
        // guarded data is still a whole snapshot.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current published profile, if any decode has completed.
    pub fn profile(&self) -> Option<ParsedProfile> {
        self.lock().profile.clone()
    }

    pub fn last_grib(&self) -> Option<CachedGridFile> {
        self.lock().last_grib.clone()
    }

    /// Record a freshly downloaded grid file and raise the new-data flag,
    /// as a single update.
    pub fn publish_grib(&self, file: CachedGridFile) {
        let mut inner = self.lock();
        inner.last_grib = Some(file);
        inner.new_data = true;
    }

    /// Replace the published profile atomically.
    pub fn publish_profile(&self, profile: ParsedProfile) {
        self.lock().profile = Some(profile);
    }

    /// Consume the new-data flag; true at most once per downloaded file.
    pub fn take_new_data(&self) -> bool {
        std::mem::take(&mut self.lock().new_data)
    }

    /// Force the next decode even if the coordinate is unchanged.
    pub fn request_reparse(&self) {
        self.lock().reparse_requested = true;
    }

    pub fn take_reparse_request(&self) -> bool {
        std::mem::take(&mut self.lock().reparse_requested)
    }
}
