//! Band-limited read cache and the reflectance/absorbance conversion.
//!
//! [`BandCache`] memoizes `read_band_range` + mode conversion per
//! `(source id, epoch, band range, mode)`. Each key owns a once-cell, so
//! concurrent requests for the same key compute once while the map lock is
//! only held for the lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::constants::ABSORBANCE_FLOOR;
use crate::data::{BandRange, CubeSource, SourceId};
use crate::error::RangeError;

/// Spectral display mode, applied session-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Stored values as read from the source
    #[default]
    Reflectance,
    /// `-log10(clamp(R * scale, 1e-8, 1))`
    Absorbance,
}

impl Mode {
    /// The other mode.
    pub fn toggled(self) -> Self {
        match self {
            Mode::Reflectance => Mode::Absorbance,
            Mode::Absorbance => Mode::Reflectance,
        }
    }

    /// Lowercase name as used in snapshots and CSV comments.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Reflectance => "reflectance",
            Mode::Absorbance => "absorbance",
        }
    }

    /// Convert one stored reflectance value into this mode.
    pub fn convert(self, value: f32, reflectance_scale: f32) -> f32 {
        match self {
            Mode::Reflectance => value,
            Mode::Absorbance => absorbance(value, reflectance_scale),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Absorbance of one reflectance sample.
///
/// Non-finite input stays non-finite so masked pixels remain visible as such.
pub fn absorbance(reflectance: f32, reflectance_scale: f32) -> f32 {
    let r = reflectance * reflectance_scale;
    if r.is_nan() {
        return f32::NAN;
    }
    -r.clamp(ABSORBANCE_FLOOR, 1.0).log10()
}

type CacheKey = (SourceId, u64, BandRange, Mode);
type Slot = Arc<OnceLock<Result<Arc<Array3<f32>>, RangeError>>>;

/// Hit/miss counters and entry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Memoized band-range reads per source, epoch, range and mode.
///
/// The cache never owns a [`CubeSource`]; entries are keyed by id and epoch
/// only, and [`invalidate`](BandCache::invalidate) drops everything stored
/// for an id when the source is reloaded or closed.
#[derive(Debug, Default)]
pub struct BandCache {
    entries: Mutex<HashMap<CacheKey, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BandCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the converted band range, computing it on first use.
    ///
    /// Repeated calls with the same key return the same `Arc`.
    pub fn get(
        &self,
        source: &CubeSource,
        range: BandRange,
        mode: Mode,
    ) -> Result<Arc<Array3<f32>>, RangeError> {
        source.check_range(range)?;

        let key = (source.id().clone(), source.epoch(), range, mode);
        let slot = Arc::clone(self.lock().entry(key).or_default());

        let mut computed = false;
        let value = slot.get_or_init(|| {
            computed = true;
            Self::compute(source, range, mode).map(Arc::new)
        });

        if computed {
            self.misses.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "BandCache miss: {} epoch {} bands {} ({})",
                source.id(),
                source.epoch(),
                range,
                mode
            );
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        value.clone()
    }

    fn compute(
        source: &CubeSource,
        range: BandRange,
        mode: Mode,
    ) -> Result<Array3<f32>, RangeError> {
        let scale = source.reflectance_scale();
        let mut block = source.read_range(range)?;
        if mode == Mode::Absorbance {
            block.mapv_inplace(|v| absorbance(v, scale));
        }
        Ok(block)
    }

    /// Drop every entry for a source id, across all epochs.
    pub fn invalidate(&self, id: &SourceId) {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(source, _, _, _), _| source != id);
        log::debug!(
            "BandCache: invalidated {} entries for {}",
            before - entries.len(),
            id
        );
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn source(id: &str, value: f32) -> CubeSource {
        let data = Array3::from_elem((5, 5, 4), value);
        CubeSource::from_array(
            SourceId::new(id),
            "mem://cache",
            data,
            Some(vec![450.0, 550.0, 650.0, 750.0]),
        )
        .unwrap()
    }

    #[test]
    fn test_absorbance_formula() {
        assert!((absorbance(0.1, 1.0) - 1.0).abs() < 1e-6);
        assert!((absorbance(1.0, 1.0)).abs() < 1e-6);
        // Clamped to the floor and to 1.0
        assert!((absorbance(0.0, 1.0) - 8.0).abs() < 1e-4);
        assert!((absorbance(2.0, 1.0)).abs() < 1e-6);
        assert!(absorbance(f32::NAN, 1.0).is_nan());
    }

    #[test]
    fn test_mode_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Absorbance).unwrap(), "\"absorbance\"");
        let mode: Mode = serde_json::from_str("\"reflectance\"").unwrap();
        assert_eq!(mode, Mode::Reflectance);
        assert_eq!(Mode::Reflectance.toggled(), Mode::Absorbance);
    }

    #[test]
    fn test_hit_returns_same_arc() {
        let cache = BandCache::new();
        let src = source("src1", 0.5);
        let range = BandRange::new(1, 3);

        let first = cache.get(&src, range, Mode::Absorbance).unwrap();
        let second = cache.get(&src, range, Mode::Absorbance).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.dim(), (5, 5, 2));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_cached_equals_direct_read() {
        let cache = BandCache::new();
        let src = source("src1", 0.1);
        let range = src.full_range();

        let refl = cache.get(&src, range, Mode::Reflectance).unwrap();
        assert_eq!(*refl, src.read_range(range).unwrap());

        let abs = cache.get(&src, range, Mode::Absorbance).unwrap();
        assert!(abs.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_invalid_range_inserts_nothing() {
        let cache = BandCache::new();
        let src = source("src1", 0.5);
        assert!(cache.get(&src, BandRange::new(2, 9), Mode::Reflectance).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reload_does_not_share_entries() {
        let cache = BandCache::new();
        let old = source("src1", 0.5);
        let range = old.full_range();
        let before = cache.get(&old, range, Mode::Reflectance).unwrap();

        let reloaded = source("src1", 0.25);
        let after = cache.get(&reloaded, range, Mode::Reflectance).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after[[0, 0, 0]], 0.25);
    }

    #[test]
    fn test_invalidate_drops_only_that_source() {
        let cache = BandCache::new();
        let a = source("a", 0.5);
        let b = source("b", 0.5);
        cache.get(&a, a.full_range(), Mode::Reflectance).unwrap();
        cache.get(&a, a.full_range(), Mode::Absorbance).unwrap();
        cache.get(&b, b.full_range(), Mode::Reflectance).unwrap();

        cache.invalidate(a.id());
        assert_eq!(cache.len(), 1);

        cache.get(&a, a.full_range(), Mode::Reflectance).unwrap();
        assert_eq!(cache.stats().misses, 4);
    }

    #[test]
    fn test_concurrent_gets_compute_once() {
        let cache = BandCache::new();
        let src = source("src1", 0.5);
        let range = src.full_range();

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| cache.get(&src, range, Mode::Absorbance).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.stats().misses, 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
