//! Tempo refinement: phase search, BPM-multiple search, adaptive
//! piecewise-constant tempo segments, and the beat-grid math shared with
//! hosts (`generate_beat_positions`, `quantize_onsets`).

use thiserror::Error;

use crate::chart::TempoSegment;

pub const MIN_BPM: f64 = 60.0;
pub const MAX_BPM: f64 = 200.0;

/// Phase candidates evaluated across one beat interval.
const PHASE_STEPS: usize = 48;

/// Onsets earlier than this or weaker than this don't vote on phase.
const PHASE_MIN_TIME: f64 = 0.25;
const PHASE_MIN_STRENGTH: f64 = 0.25;

#[derive(Error, Debug)]
pub enum TempoError {
    #[error("not enough usable onsets to refine tempo")]
    NoData,
}

// ── Sorted-slice helpers ──────────────────────────────────────────────

/// Nearest value in a sorted slice: (index, absolute distance).
pub(crate) fn nearest_in_sorted(sorted: &[f64], t: f64) -> Option<(usize, f64)> {
    if sorted.is_empty() {
        return None;
    }
    let idx = sorted.partition_point(|&v| v < t);
    let mut best = idx.min(sorted.len() - 1);
    if idx > 0 && (sorted[idx - 1] - t).abs() < (sorted[best] - t).abs() {
        best = idx - 1;
    }
    Some((best, (sorted[best] - t).abs()))
}

/// Beat positions for a constant tempo: `offset + k·interval/subdivisions`
/// for all k with the position inside [0, duration).
pub fn generate_beat_positions(bpm: f64, duration: f64, offset: f64, subdivisions: usize) -> Vec<f64> {
    if bpm <= 0.0 || duration <= 0.0 {
        return Vec::new();
    }
    let interval = 60.0 / bpm;
    let step = interval / subdivisions.max(1) as f64;
    let mut t = offset.rem_euclid(interval);
    let mut out = Vec::with_capacity((duration / step) as usize + 1);
    while t < duration {
        out.push(t);
        t += step;
    }
    out
}

/// Snap each time to the nearest grid position. Grid must be sorted.
pub fn quantize_onsets(times: &[f64], grid: &[f64]) -> Vec<f64> {
    times
        .iter()
        .map(|&t| match nearest_in_sorted(grid, t) {
            Some((i, _)) => grid[i],
            None => t,
        })
        .collect()
}

// ── Beat grid ─────────────────────────────────────────────────────────

/// The refined beat grid: base tempo plus adaptive beat positions walked
/// from the piecewise tempo segments.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatGrid {
    pub bpm: f64,
    pub offset: f64,
    pub beats: Vec<f64>,
    pub segments: Vec<TempoSegment>,
}

impl BeatGrid {
    /// Constant-tempo grid.
    pub fn fixed(bpm: f64, offset: f64, duration: f64) -> BeatGrid {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        BeatGrid {
            bpm,
            offset,
            beats: generate_beat_positions(bpm, duration, offset, 1),
            segments: vec![TempoSegment {
                start: 0.0,
                end: duration.max(0.0),
                bpm,
                confidence: 0.5,
            }],
        }
    }

    /// Walk beat positions through piecewise tempo segments.
    pub fn from_segments(base_bpm: f64, offset: f64, duration: f64, segments: Vec<TempoSegment>) -> BeatGrid {
        if segments.is_empty() {
            return BeatGrid::fixed(base_bpm, offset, duration);
        }
        let base_bpm = base_bpm.clamp(MIN_BPM, MAX_BPM);
        let interval0 = 60.0 / base_bpm;
        let mut beats = Vec::new();
        let mut t = offset.rem_euclid(interval0);
        while t < duration {
            beats.push(t);
            let idx = segments.partition_point(|s| s.start <= t);
            let seg = &segments[idx.saturating_sub(1).min(segments.len() - 1)];
            t += 60.0 / seg.bpm.clamp(MIN_BPM, MAX_BPM);
        }
        BeatGrid {
            bpm: base_bpm,
            offset,
            beats,
            segments,
        }
    }

    /// Nominal beat interval at the base tempo.
    pub fn interval(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Nearest beat: (beat index, absolute distance).
    pub fn nearest_beat(&self, t: f64) -> Option<(usize, f64)> {
        nearest_in_sorted(&self.beats, t)
    }

    /// Index of the beat at or before `t` (0 when `t` precedes all beats).
    pub fn beat_index_at(&self, t: f64) -> usize {
        self.beats.partition_point(|&b| b <= t).saturating_sub(1)
    }

    /// The grid as a sorted position list: beats, plus optional halves,
    /// quarters, and thirds between consecutive beats.
    pub fn grid_points(&self, halves: bool, quarters: bool, thirds: bool) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.beats.len() * 4);
        for w in self.beats.windows(2) {
            let (a, b) = (w[0], w[1]);
            let span = b - a;
            out.push(a);
            if halves {
                out.push(a + span * 0.5);
            }
            if quarters {
                out.push(a + span * 0.25);
                out.push(a + span * 0.75);
            }
            if thirds {
                out.push(a + span / 3.0);
                out.push(a + span * 2.0 / 3.0);
            }
        }
        if let Some(&last) = self.beats.last() {
            out.push(last);
        }
        out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        out.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        out
    }
}

// ── Phase refinement ──────────────────────────────────────────────────

/// Distance from `t` to the grid `phase + k·interval`.
fn grid_distance(t: f64, phase: f64, interval: f64) -> f64 {
    let r = (t - phase).rem_euclid(interval);
    r.min(interval - r)
}

/// Search 48 phase offsets across one beat interval for the one that
/// minimizes strength-weighted onset-to-grid distance. Half-beat hits
/// count at a 1.15 distance penalty so offbeat-heavy material doesn't
/// pull the phase off the downbeat.
pub fn refine_beat_offset(
    initial: f64,
    bpm: f64,
    onsets: &[f64],
    strengths: &[f64],
) -> Result<f64, TempoError> {
    let interval = 60.0 / bpm.clamp(MIN_BPM, MAX_BPM);
    let usable: Vec<(f64, f64)> = onsets
        .iter()
        .zip(strengths.iter())
        .filter(|(t, s)| **t >= PHASE_MIN_TIME && **s >= PHASE_MIN_STRENGTH)
        .map(|(t, s)| (*t, *s))
        .collect();
    if usable.len() < 8 {
        return Err(TempoError::NoData);
    }

    let mut best_phase = initial.rem_euclid(interval);
    let mut best_cost = f64::INFINITY;
    for k in 0..PHASE_STEPS {
        let phase = (initial + k as f64 / PHASE_STEPS as f64 * interval).rem_euclid(interval);
        let cost: f64 = usable
            .iter()
            .map(|&(t, s)| {
                let on_beat = grid_distance(t, phase, interval);
                let off_beat = 1.15 * grid_distance(t, phase + interval * 0.5, interval);
                on_beat.min(off_beat) * (0.5 + s)
            })
            .sum();
        if cost < best_cost {
            best_cost = cost;
            best_phase = phase;
        }
    }
    Ok(best_phase)
}

// ── BPM-multiple search ───────────────────────────────────────────────

const TEMPO_RATIOS: [f64; 8] = [0.5, 2.0 / 3.0, 0.75, 1.0, 1.25, 4.0 / 3.0, 1.5, 2.0];
const TEMPO_DELTAS: [f64; 9] = [-0.06, -0.04, -0.02, -0.01, 0.0, 0.01, 0.02, 0.04, 0.06];

/// Evaluate BPM multiples and detunes around the seed, each with its own
/// refined phase, and pick the (bpm, offset) pair whose grid hugs the
/// onsets best. A small `0.0007·|bpm − base|` term keeps the search from
/// wandering when candidates tie.
pub fn select_best_tempo_grid(
    base_bpm: f64,
    base_offset: f64,
    onsets: &[f64],
    strengths: &[f64],
) -> (f64, f64) {
    let mut best = (
        base_bpm.clamp(MIN_BPM, MAX_BPM),
        base_offset.rem_euclid(60.0 / base_bpm.clamp(MIN_BPM, MAX_BPM)),
    );
    let mut best_cost = f64::INFINITY;

    for &ratio in &TEMPO_RATIOS {
        for &delta in &TEMPO_DELTAS {
            let bpm = (base_bpm * ratio * (1.0 + delta)).clamp(MIN_BPM, MAX_BPM);
            let interval = 60.0 / bpm;
            let offset = refine_beat_offset(base_offset, bpm, onsets, strengths)
                .unwrap_or_else(|_| base_offset.rem_euclid(interval));

            let mut weight_sum = 0.0;
            let mut dist_sum = 0.0;
            for (t, s) in onsets.iter().zip(strengths.iter()) {
                if *t < PHASE_MIN_TIME || *s < PHASE_MIN_STRENGTH {
                    continue;
                }
                let w = 0.5 + s;
                let on_beat = grid_distance(*t, offset, interval);
                let off_beat = 1.15 * grid_distance(*t, offset + interval * 0.5, interval);
                dist_sum += on_beat.min(off_beat) * w;
                weight_sum += w;
            }
            if weight_sum <= 0.0 {
                continue;
            }
            let cost = dist_sum / weight_sum + 0.0007 * (bpm - base_bpm).abs();
            if cost < best_cost {
                best_cost = cost;
                best = (bpm, offset);
            }
        }
    }
    best
}

// ── Adaptive tempo segments ───────────────────────────────────────────

/// Sliding-window tempo estimate: 10–18 s windows every half-window.
/// Each window's median strong inter-onset interval is normalized to the
/// nearest octave of the previous segment's tempo (no octave flips) and
/// bounded to ±max(7, 16%) of it, then the sequence is smoothed with a
/// 1-2-1 kernel.
pub fn build_adaptive_tempo_segments(
    onsets: &[f64],
    strengths: &[f64],
    base_bpm: f64,
    duration: f64,
) -> Vec<TempoSegment> {
    let base_bpm = base_bpm.clamp(MIN_BPM, MAX_BPM);
    if duration <= 0.0 {
        return Vec::new();
    }
    let window = (duration / 8.0).clamp(10.0, 18.0);
    let step = window * 0.5;
    if duration <= window {
        return vec![TempoSegment {
            start: 0.0,
            end: duration,
            bpm: base_bpm,
            confidence: 0.5,
        }];
    }

    let mut starts = Vec::new();
    let mut t = 0.0;
    while t < duration {
        starts.push(t);
        t += step;
    }

    let mut bpms = Vec::with_capacity(starts.len());
    let mut confidences = Vec::with_capacity(starts.len());
    let mut prev = base_bpm;
    for &w0 in &starts {
        let w1 = (w0 + window).min(duration);
        let (bpm, confidence) = window_bpm(onsets, strengths, w0, w1, prev, base_bpm);
        bpms.push(bpm);
        confidences.push(confidence);
        prev = bpm;
    }

    // 1-2-1 smoothing.
    let smoothed: Vec<f64> = (0..bpms.len())
        .map(|i| {
            let a = bpms[i.saturating_sub(1)];
            let b = bpms[i];
            let c = bpms[(i + 1).min(bpms.len() - 1)];
            (a + 2.0 * b + c) / 4.0
        })
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, &s)| TempoSegment {
            start: s,
            end: if i + 1 < starts.len() { starts[i + 1] } else { duration },
            bpm: smoothed[i].clamp(MIN_BPM, MAX_BPM),
            confidence: confidences[i],
        })
        .collect()
}

fn window_bpm(
    onsets: &[f64],
    strengths: &[f64],
    w0: f64,
    w1: f64,
    prev_bpm: f64,
    base_bpm: f64,
) -> (f64, f64) {
    let in_window: Vec<(f64, f64)> = onsets
        .iter()
        .zip(strengths.iter())
        .filter(|(t, _)| **t >= w0 && **t < w1)
        .map(|(t, s)| (*t, *s))
        .collect();
    if in_window.len() < 4 {
        return (prev_bpm, 0.2);
    }

    let mut ss: Vec<f64> = in_window.iter().map(|(_, s)| *s).collect();
    ss.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_strength = ss[ss.len() / 2];
    let strong: Vec<f64> = in_window
        .iter()
        .filter(|(_, s)| *s >= median_strength)
        .map(|(t, _)| *t)
        .collect();
    if strong.len() < 3 {
        return (prev_bpm, 0.2);
    }

    let mut iois: Vec<f64> = strong.windows(2).map(|w| w[1] - w[0]).collect();
    iois.retain(|&d| d > 0.05 && d < 4.0);
    if iois.is_empty() {
        return (prev_bpm, 0.2);
    }
    iois.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_ioi = iois[iois.len() / 2];
    let raw = 60.0 / median_ioi;

    // Octave-normalize against the previous segment.
    let candidate = [raw * 0.5, raw, raw * 2.0]
        .into_iter()
        .min_by(|a, b| {
            (a - prev_bpm)
                .abs()
                .partial_cmp(&(b - prev_bpm).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(raw);
    let bound = (prev_bpm * 0.16).max(7.0);
    let bpm = candidate.clamp(prev_bpm - bound, prev_bpm + bound);

    // Confidence: fraction of expected beats represented by strong onsets.
    let expected = ((w1 - w0) * base_bpm / 60.0).max(1.0);
    let confidence = (strong.len() as f64 / expected).clamp(0.0, 1.0);
    (bpm, confidence)
}
