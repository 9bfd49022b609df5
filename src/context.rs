//! Per-call immutable context shared by every composition pass, plus the
//! deterministic gate hash used wherever a pass needs a coin flip.

use crate::analysis::SpectralProfile;
use crate::analysis::features::SongFeatures;
use crate::analysis::onsets::{Band, TimedOnset};
use crate::analysis::tempo::BeatGrid;
use crate::chart::{Difficulty, Section, SectionKind};
use crate::config::{GenOptions, RuntimePerf};

// ── Deterministic gating ──────────────────────────────────────────────

const LANE_SALT: u64 = 0x9e37_79b9_7f4a_7c15;
const INDEX_SALT: u64 = 0xbf58_476d_1ce4_e5b9;

/// Splittable integer hash over (time, lane, index). Identical inputs
/// yield identical charts; no RNG exists anywhere in the pipeline.
pub fn det_hash(time: f64, lane: usize, index: usize) -> u64 {
    let mut x = ((time * 1000.0).round() as i64 as u64)
        .wrapping_add((lane as u64).wrapping_mul(LANE_SALT))
        .wrapping_add((index as u64).wrapping_mul(INDEX_SALT));
    // splitmix64 finalizer
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    x
}

/// 1-in-`modulo` deterministic gate.
pub fn det_gate(time: f64, lane: usize, index: usize, modulo: u64) -> bool {
    modulo <= 1 || det_hash(time, lane, index) % modulo == 0
}

// ── Band weights ──────────────────────────────────────────────────────

/// Per-section weighting of the low/mid/high onset bands. Normalized to
/// sum 1 with a 0.05 floor per band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandWeights {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl BandWeights {
    fn normalized(low: f64, mid: f64, high: f64) -> BandWeights {
        let (low, mid, high) = (low.max(0.05), mid.max(0.05), high.max(0.05));
        let sum = low + mid + high;
        BandWeights {
            low: low / sum,
            mid: mid / sum,
            high: high / sum,
        }
    }

    pub fn weight(&self, band: Band) -> f64 {
        match band {
            Band::Low => self.low,
            Band::Mid => self.mid,
            Band::High => self.high,
            // A mixed onset has no band identity; give it the mean weight.
            Band::Mixed => (self.low + self.mid + self.high) / 3.0,
        }
    }
}

/// Which bands matter where: drops and choruses are kick/snare-driven,
/// verses and bridges lean on the mids.
pub fn band_weights(kind: SectionKind) -> BandWeights {
    match kind {
        SectionKind::Drop => BandWeights::normalized(0.46, 0.20, 0.34),
        SectionKind::Chorus => BandWeights::normalized(0.38, 0.28, 0.34),
        SectionKind::Verse => BandWeights::normalized(0.30, 0.44, 0.26),
        SectionKind::Bridge => BandWeights::normalized(0.26, 0.50, 0.24),
        SectionKind::Intro => BandWeights::normalized(0.34, 0.38, 0.28),
        SectionKind::Outro => BandWeights::normalized(0.34, 0.38, 0.28),
        SectionKind::Interlude => BandWeights::normalized(0.30, 0.42, 0.28),
    }
}

// ── Onset statistics ──────────────────────────────────────────────────

/// Percentile of a slice. `values` need not be sorted; p in [0, 100].
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Strength thresholds and band shares memoized once per call so every
/// pass gates against the same numbers.
#[derive(Debug, Clone, Default)]
pub struct OnsetStats {
    pub count: usize,
    pub low_share: f64,
    pub mid_share: f64,
    pub high_share: f64,
    pub median_strength: f64,
    pub p40: f64,
    pub p68: f64,
    pub p78: f64,
    pub p88: f64,
}

impl OnsetStats {
    pub fn from_timeline(onsets: &[TimedOnset]) -> OnsetStats {
        if onsets.is_empty() {
            return OnsetStats::default();
        }
        let strengths: Vec<f64> = onsets.iter().map(|o| o.strength).collect();
        let total = onsets.len() as f64;
        let share = |band: Band| onsets.iter().filter(|o| o.band == band).count() as f64 / total;
        OnsetStats {
            count: onsets.len(),
            low_share: share(Band::Low),
            mid_share: share(Band::Mid),
            high_share: share(Band::High),
            median_strength: percentile(&strengths, 50.0),
            p40: percentile(&strengths, 40.0),
            p68: percentile(&strengths, 68.0),
            p78: percentile(&strengths, 78.0),
            p88: percentile(&strengths, 88.0),
        }
    }
}

// ── Context ───────────────────────────────────────────────────────────

/// Everything a composition pass may read. Built once per generate call
/// and dropped on return; passes never mutate it.
#[derive(Debug, Clone)]
pub struct Context {
    pub duration: f64,
    pub difficulty: Difficulty,
    pub sections: Vec<Section>,
    pub beats: BeatGrid,
    pub onsets: Vec<TimedOnset>,
    pub onset_stats: OnsetStats,
    pub profiles: Vec<SpectralProfile>,
    pub features: SongFeatures,
    pub perf: RuntimePerf,
    pub options: GenOptions,
}

impl Context {
    pub fn beat_interval(&self) -> f64 {
        self.beats.interval()
    }

    pub fn half_beat(&self) -> f64 {
        self.beats.interval() * 0.5
    }

    /// Section containing `time`, by binary search over sorted starts.
    pub fn section_at(&self, time: f64) -> Option<&Section> {
        let idx = self.sections.partition_point(|s| s.start <= time);
        if idx == 0 {
            return None;
        }
        let sec = &self.sections[idx - 1];
        sec.contains(time).then_some(sec)
    }

    /// Like `section_at` but substituting Verse when no section covers
    /// the time (the analyzer-failure default).
    pub fn section_kind_at(&self, time: f64) -> SectionKind {
        self.section_at(time).map_or(SectionKind::Verse, |s| s.kind)
    }

    pub fn section_energy_at(&self, time: f64) -> f64 {
        self.section_at(time).map_or(0.5, |s| s.avg_energy)
    }

    /// Nearest spectral sample point to `time`.
    pub fn nearest_profile(&self, time: f64) -> Option<&SpectralProfile> {
        if self.profiles.is_empty() {
            return None;
        }
        let idx = self.profiles.partition_point(|p| p.time < time);
        let mut best = idx.min(self.profiles.len() - 1);
        if idx > 0 {
            let before = idx - 1;
            if (self.profiles[before].time - time).abs() < (self.profiles[best].time - time).abs() {
                best = before;
            }
        }
        Some(&self.profiles[best])
    }

    /// Nearest onset to `time` satisfying `pred`, scanning outward from
    /// the insertion point. Returns the onset and its absolute distance.
    pub fn nearest_onset_where<F>(&self, time: f64, max_dist: f64, pred: F) -> Option<(&TimedOnset, f64)>
    where
        F: Fn(&TimedOnset) -> bool,
    {
        let split = self.onsets.partition_point(|o| o.time < time);
        let mut left = split;
        let mut right = split;
        // Walk outward by increasing distance; the first match is the nearest.
        loop {
            let ld = left.checked_sub(1).map(|i| (time - self.onsets[i].time).abs());
            let rd = (right < self.onsets.len()).then(|| (self.onsets[right].time - time).abs());
            let (idx, d, from_left) = match (ld, rd) {
                (Some(a), Some(b)) if a <= b => (left - 1, a, true),
                (Some(_), Some(b)) => (right, b, false),
                (Some(a), None) => (left - 1, a, true),
                (None, Some(b)) => (right, b, false),
                (None, None) => return None,
            };
            if d > max_dist {
                return None;
            }
            let o = &self.onsets[idx];
            if pred(o) {
                return Some((o, d));
            }
            if from_left {
                left -= 1;
            } else {
                right += 1;
            }
        }
    }

    /// First onset strictly after `time`.
    pub fn next_onset_after(&self, time: f64) -> Option<&TimedOnset> {
        let idx = self.onsets.partition_point(|o| o.time <= time);
        self.onsets.get(idx)
    }

    /// Onsets with time in [start, end).
    pub fn onsets_in(&self, start: f64, end: f64) -> &[TimedOnset] {
        let lo = self.onsets.partition_point(|o| o.time < start);
        let hi = self.onsets.partition_point(|o| o.time < end);
        &self.onsets[lo..hi]
    }
}
