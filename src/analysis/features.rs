//! Song-feature summarizer: reduces per-frame spectral/onset statistics
//! to ten scalar features in [0, 1] that parameterize every downstream
//! composition pass.

use crate::analysis::{OnsetResult, SpectralProfile};
use crate::chart::Section;

/// The ten song-level feature scalars. Fixed arity; every value in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SongFeatures {
    pub percussive_focus: f64,
    pub melodic_focus: f64,
    pub bass_weight: f64,
    pub drive_score: f64,
    pub slide_affinity: f64,
    pub sustained_focus: f64,
    pub calm_confidence: f64,
    pub intro_quietness: f64,
    pub dynamic_range: f64,
    pub sharpness_score: f64,
}

/// Normalized observables the feature formulas draw from. Extracted once
/// so every feature reads the same numbers.
#[derive(Debug, Clone, Copy, Default)]
struct Observables {
    low_share: f64,
    mid_share: f64,
    high_share: f64,
    avg_transient: f64,
    avg_percussive: f64,
    avg_tonal: f64,
    avg_brightness: f64,
    avg_low_ratio: f64,
    bpm_norm: f64,
    energy_var_norm: f64,
    intro_percussive: f64,
    highlight_lift: f64,
    intro_density_q: f64,
    intro_strong_q: f64,
    intro_sparsity_q: f64,
    energy_spread: f64,
}

/// Summarize a song into its ten feature scalars.
pub fn summarize(
    onsets: &OnsetResult,
    profiles: &[SpectralProfile],
    sections: &[Section],
    bpm: f64,
    duration: f64,
) -> SongFeatures {
    let obs = extract_observables(onsets, profiles, sections, bpm, duration);

    let percussive_focus = percussive_focus(&obs);
    let drive_score = drive_score(&obs, percussive_focus);
    let melodic_focus = melodic_focus(&obs);
    let sustained_focus = sustained_focus(&obs);
    let intro_quietness = intro_quietness(&obs);
    let dynamic_range = obs.energy_spread;

    SongFeatures {
        percussive_focus,
        melodic_focus,
        bass_weight: bass_weight(&obs),
        drive_score,
        slide_affinity: slide_affinity(&obs),
        sustained_focus,
        calm_confidence: calm_confidence(
            melodic_focus,
            sustained_focus,
            intro_quietness,
            drive_score,
            percussive_focus,
            dynamic_range,
        ),
        intro_quietness,
        dynamic_range,
        sharpness_score: sharpness_score(&obs),
    }
}

// ── Feature formulas ──────────────────────────────────────────────────
// Weighted sums of normalized observables, clamped to [0, 1].

fn percussive_focus(o: &Observables) -> f64 {
    (0.32 * o.high_share
        + 0.08 * o.mid_share
        + 0.24 * o.avg_transient
        + 0.28 * o.avg_percussive
        + 0.04 * o.intro_percussive
        + 0.08 * o.bpm_norm)
        .clamp(0.0, 1.0)
}

fn melodic_focus(o: &Observables) -> f64 {
    (0.33 * o.mid_share
        + 0.12 * (1.0 - o.high_share)
        + 0.33 * o.avg_tonal
        + 0.12 * (1.0 - o.avg_percussive)
        + 0.10 * (1.0 - o.bpm_norm))
        .clamp(0.0, 1.0)
}

fn bass_weight(o: &Observables) -> f64 {
    (0.56 * o.low_share + 0.34 * o.avg_low_ratio + 0.10 * (1.0 - o.avg_brightness))
        .clamp(0.0, 1.0)
}

fn drive_score(o: &Observables, percussive_focus: f64) -> f64 {
    (0.24 * o.bpm_norm
        + 0.18 * o.avg_brightness
        + 0.26 * percussive_focus
        + 0.18 * o.energy_var_norm
        + 0.10 * o.high_share
        + 0.04 * o.highlight_lift)
        .clamp(0.0, 1.0)
}

fn sustained_focus(o: &Observables) -> f64 {
    (0.48 * o.avg_tonal
        + 0.26 * (1.0 - o.avg_transient)
        + 0.18 * (1.0 - o.avg_percussive)
        + 0.08 * o.mid_share)
        .clamp(0.0, 1.0)
}

fn intro_quietness(o: &Observables) -> f64 {
    (0.58 * o.intro_density_q + 0.26 * o.intro_strong_q + 0.16 * o.intro_sparsity_q)
        .clamp(0.0, 1.0)
}

fn calm_confidence(
    melodic: f64,
    sustained: f64,
    intro_quiet: f64,
    drive: f64,
    percussive: f64,
    dynamic_range: f64,
) -> f64 {
    (0.26 * melodic
        + 0.22 * sustained
        + 0.18 * intro_quiet
        + 0.17 * (1.0 - drive)
        + 0.17 * (1.0 - percussive)
        - 0.25 * dynamic_range)
        .clamp(0.0, 1.0)
}

fn slide_affinity(o: &Observables) -> f64 {
    (0.38 * o.avg_tonal
        + 0.22 * (1.0 - o.avg_transient)
        + 0.22 * o.mid_share
        + 0.18 * (1.0 - o.bpm_norm))
        .clamp(0.0, 1.0)
}

fn sharpness_score(o: &Observables) -> f64 {
    (0.45 * o.avg_transient + 0.30 * o.high_share + 0.25 * o.avg_brightness).clamp(0.0, 1.0)
}

// ── Observable extraction ─────────────────────────────────────────────

fn extract_observables(
    onsets: &OnsetResult,
    profiles: &[SpectralProfile],
    sections: &[Section],
    bpm: f64,
    duration: f64,
) -> Observables {
    let mut o = Observables::default();

    // Band shares: onset counts per band over the banded total.
    let low = onsets.low_onsets.len() as f64;
    let mid = onsets.mid_onsets.len() as f64;
    let high = onsets.high_onsets.len() as f64;
    let banded = low + mid + high;
    if banded > 0.0 {
        o.low_share = low / banded;
        o.mid_share = mid / banded;
        o.high_share = high / banded;
    }

    // Spectral means.
    if !profiles.is_empty() {
        let n = profiles.len() as f64;
        o.avg_transient = profiles.iter().map(|p| p.transient).sum::<f64>() / n;
        o.avg_percussive = profiles.iter().map(|p| p.percussive).sum::<f64>() / n;
        o.avg_tonal = profiles.iter().map(|p| p.tonal).sum::<f64>() / n;
        o.avg_brightness = profiles.iter().map(|p| p.brightness).sum::<f64>() / n;
        o.avg_low_ratio = profiles
            .iter()
            .map(|p| {
                let total = p.low + p.mid + p.high;
                if total > 1e-9 { p.low / total } else { 0.0 }
            })
            .sum::<f64>()
            / n;

        // Energy spread as a dynamic-range proxy: p90 − p10 over 0.7.
        let energies: Vec<f64> = profiles.iter().map(|p| p.energy).collect();
        let spread = crate::context::percentile(&energies, 90.0)
            - crate::context::percentile(&energies, 10.0);
        o.energy_spread = (spread / 0.7).clamp(0.0, 1.0);
    }

    o.bpm_norm = ((bpm - 95.0) / 95.0).clamp(0.0, 1.0);

    // Section energy variance, calibrated so var 0.12 saturates.
    if sections.len() >= 2 {
        let energies: Vec<f64> = sections.iter().map(|s| s.avg_energy).collect();
        let mean = energies.iter().sum::<f64>() / energies.len() as f64;
        let var = energies.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / energies.len() as f64;
        o.energy_var_norm = (var / 0.12).clamp(0.0, 1.0);

        let highlight: Vec<f64> = sections
            .iter()
            .filter(|s| s.kind.is_highlight())
            .map(|s| s.avg_energy)
            .collect();
        if !highlight.is_empty() {
            let hmean = highlight.iter().sum::<f64>() / highlight.len() as f64;
            o.highlight_lift = (hmean - mean).clamp(0.0, 1.0);
        }
    }

    // Intro window: first min(12, 0.16·duration) seconds.
    let intro_end = 12.0_f64.min(0.16 * duration).max(0.0);
    if intro_end > 0.5 {
        let in_intro = |t: &&f64| **t < intro_end;
        let intro_count = onsets.onsets.iter().filter(in_intro).count() as f64;
        let strong_count = onsets
            .onsets
            .iter()
            .zip(onsets.strengths.iter())
            .filter(|(t, s)| **t < intro_end && **s >= 0.6)
            .count() as f64;
        let density = intro_count / intro_end;
        let strong_density = strong_count / intro_end;
        // Quietness transforms: ~3 onsets/s and ~1.5 strong/s saturate "busy".
        o.intro_density_q = (1.0 - density / 3.0).clamp(0.0, 1.0);
        o.intro_strong_q = (1.0 - strong_density / 1.5).clamp(0.0, 1.0);

        // Fraction of whole intro seconds containing no onset at all.
        let secs = intro_end.floor().max(1.0) as usize;
        let mut silent = 0usize;
        for s in 0..secs {
            let lo = s as f64;
            let hi = lo + 1.0;
            if !onsets.onsets.iter().any(|t| *t >= lo && *t < hi) {
                silent += 1;
            }
        }
        o.intro_sparsity_q = silent as f64 / secs as f64;

        let intro_profiles: Vec<&SpectralProfile> =
            profiles.iter().filter(|p| p.time < intro_end).collect();
        if !intro_profiles.is_empty() {
            o.intro_percussive = intro_profiles.iter().map(|p| p.percussive).sum::<f64>()
                / intro_profiles.len() as f64;
        }
    } else {
        // Degenerate song: nothing to be quiet about.
        o.intro_density_q = 1.0;
        o.intro_strong_q = 1.0;
        o.intro_sparsity_q = 1.0;
    }

    o
}
