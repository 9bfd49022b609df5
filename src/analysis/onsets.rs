//! Onset timeline builder: merges the mixed and per-band onset streams
//! into a single deduplicated, section-budgeted, grid-snapped timeline
//! the beat mapper composes from.

use log::debug;

use crate::analysis::features::SongFeatures;
use crate::analysis::tempo::{BeatGrid, nearest_in_sorted};
use crate::analysis::{OnsetResult, SpectralProfile};
use crate::chart::{Difficulty, Section};
use crate::context::{band_weights, percentile};

/// Frequency class of an onset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    Low,
    Mid,
    High,
    Mixed,
}

/// One event on the merged onset timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedOnset {
    pub time: f64,
    pub strength: f64,
    pub band: Band,
}

/// Everything the builder reads. All borrowed; the timeline is the only
/// allocation that escapes.
pub struct TimelineInputs<'a> {
    pub onsets: &'a OnsetResult,
    pub sections: &'a [Section],
    pub profiles: &'a [SpectralProfile],
    pub grid: &'a BeatGrid,
    pub difficulty: Difficulty,
    pub features: &'a SongFeatures,
}

#[derive(Debug, Clone, Copy)]
struct ScoredOnset {
    time: f64,
    strength: f64,
    band: Band,
    score: f64,
    section: Option<usize>,
}

/// If the merged timeline keeps fewer than this fraction of the mixed
/// stream, the filtering is judged too aggressive and the raw mixed
/// stream is returned unchanged.
const FALLBACK_KEEP_RATIO: f64 = 0.28;

pub fn build_timeline(inputs: &TimelineInputs) -> Vec<TimedOnset> {
    let interval = inputs.grid.interval();
    let features = inputs.features;

    // 1. Fine grid: beats + halves, quarters on hard tiers, thirds for
    //    melodic or sustained material.
    let thirds = features.melodic_focus >= 0.56 || features.sustained_focus >= 0.56;
    let fine_grid =
        inputs
            .grid
            .grid_points(true, inputs.difficulty.uses_quarter_grid(), thirds);

    // 2. Candidate events from every stream.
    let mut candidates: Vec<(f64, f64, Band)> = Vec::with_capacity(inputs.onsets.combined_count());
    let mut extend = |times: &[f64], strengths: &[f64], band: Band| {
        for (t, s) in times.iter().zip(strengths.iter()) {
            candidates.push((*t, s.clamp(0.0, 1.0), band));
        }
    };
    extend(&inputs.onsets.low_onsets, &inputs.onsets.low_strengths, Band::Low);
    extend(&inputs.onsets.mid_onsets, &inputs.onsets.mid_strengths, Band::Mid);
    extend(&inputs.onsets.high_onsets, &inputs.onsets.high_strengths, Band::High);
    extend(&inputs.onsets.onsets, &inputs.onsets.strengths, Band::Mixed);

    let all_strengths: Vec<f64> = candidates.iter().map(|c| c.1).collect();
    let ultra_strong = percentile(&all_strengths, 88.0);

    let snap_window = (inputs.difficulty.snap_beta() * interval).max(0.035);
    let intro_suppress = 0.6 * features.intro_quietness;

    let mut scored: Vec<ScoredOnset> = Vec::with_capacity(candidates.len());
    for &(time, strength, band) in &candidates {
        let section_idx = section_index(inputs.sections, time);
        let kind = section_idx.map(|i| inputs.sections[i].kind);

        // 3. Quiet sections only pass ultra-strong events.
        let quiet = kind.is_some_and(|k| k.is_quiet());
        if quiet && strength <= ultra_strong {
            continue;
        }

        let weights = band_weights(kind.unwrap_or(crate::chart::SectionKind::Verse));
        let affinity = band_affinity(inputs.profiles, time, band);
        let energy_lift = nearest_energy(inputs.profiles, time);
        let suppress_factor = match kind {
            Some(k) if k == crate::chart::SectionKind::Intro => 1.0,
            Some(k) if k.is_quiet() => 0.7,
            _ => 0.0,
        };
        let score = strength
            * weights.weight(band)
            * (0.64 + affinity * 0.24 + energy_lift * 0.12)
            * (1.0 - intro_suppress * suppress_factor);

        // 4. Snap to the fine grid, or keep raw only if ultra-strong.
        let time = match nearest_in_sorted(&fine_grid, time) {
            Some((i, d)) if d <= snap_window => fine_grid[i],
            _ if strength > ultra_strong => time,
            _ => continue,
        };

        scored.push(ScoredOnset {
            time,
            strength,
            band,
            score,
            section: section_idx,
        });
    }

    // 5. Bucketed dedup, best score wins.
    let bucket = (0.16 * interval).max(0.012);
    scored.sort_by(|a, b| {
        a.time
            .partial_cmp(&b.time)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut deduped: Vec<ScoredOnset> = Vec::with_capacity(scored.len());
    for ev in scored {
        match deduped.last_mut() {
            Some(last) if (ev.time - last.time).abs() < bucket => {
                if ev.score > last.score {
                    *last = ev;
                }
            }
            _ => deduped.push(ev),
        }
    }

    // 6. Per-section top-K budget.
    let budgeted = apply_section_budgets(deduped, inputs);

    // 7. Minimum neighbor gap, weaker score dropped.
    let min_gap = (0.16 * interval).max(0.016);
    let mut kept: Vec<ScoredOnset> = Vec::with_capacity(budgeted.len());
    for ev in budgeted {
        match kept.last_mut() {
            Some(last) if ev.time - last.time < min_gap => {
                if ev.score > last.score {
                    *last = ev;
                }
            }
            _ => kept.push(ev),
        }
    }

    // Fallback: filtering ate the song — serve the raw mixed stream.
    let mixed_len = inputs.onsets.onsets.len();
    if mixed_len > 0 && (kept.len() as f64) < FALLBACK_KEEP_RATIO * mixed_len as f64 {
        debug!(
            "onset timeline too sparse ({} of {} mixed), falling back to raw stream",
            kept.len(),
            mixed_len
        );
        return inputs
            .onsets
            .onsets
            .iter()
            .zip(inputs.onsets.strengths.iter())
            .map(|(t, s)| TimedOnset {
                time: *t,
                strength: s.clamp(0.0, 1.0),
                band: Band::Mixed,
            })
            .collect();
    }

    debug!(
        "onset timeline: {} events from {} candidates",
        kept.len(),
        inputs.onsets.combined_count()
    );
    kept.into_iter()
        .map(|e| TimedOnset {
            time: e.time,
            strength: e.strength,
            band: e.band,
        })
        .collect()
}

fn section_index(sections: &[Section], time: f64) -> Option<usize> {
    let idx = sections.partition_point(|s| s.start <= time);
    idx.checked_sub(1).filter(|&i| sections[i].contains(time))
}

/// How much the spectral balance at `time` agrees with the onset's band.
fn band_affinity(profiles: &[SpectralProfile], time: f64, band: Band) -> f64 {
    let Some(p) = nearest_profile(profiles, time) else {
        return 0.5;
    };
    let total = p.low + p.mid + p.high;
    if total <= 1e-9 {
        return 0.5;
    }
    match band {
        Band::Low => p.low / total,
        Band::Mid => p.mid / total,
        Band::High => p.high / total,
        Band::Mixed => 1.0 / 3.0,
    }
}

fn nearest_energy(profiles: &[SpectralProfile], time: f64) -> f64 {
    nearest_profile(profiles, time).map_or(0.5, |p| p.energy.clamp(0.0, 1.0))
}

fn nearest_profile(profiles: &[SpectralProfile], time: f64) -> Option<&SpectralProfile> {
    if profiles.is_empty() {
        return None;
    }
    let idx = profiles.partition_point(|p| p.time < time);
    let mut best = idx.min(profiles.len() - 1);
    if idx > 0 && (profiles[idx - 1].time - time).abs() < (profiles[best].time - time).abs() {
        best = idx - 1;
    }
    Some(&profiles[best])
}

/// Keep the top-K events per section by score, where K follows the
/// section's NPS budget at this difficulty scaled by its energy.
fn apply_section_budgets(events: Vec<ScoredOnset>, inputs: &TimelineInputs) -> Vec<ScoredOnset> {
    if inputs.sections.is_empty() {
        return events;
    }
    let base = inputs.difficulty.base_nps();
    let mut keep = vec![true; events.len()];
    for (si, section) in inputs.sections.iter().enumerate() {
        let energy_factor = 0.75 + 0.5 * section.avg_energy.clamp(0.0, 1.0);
        let k = (section.duration() * section.kind.nps_factor() * base * energy_factor).floor()
            as usize;
        let mut members: Vec<usize> = (0..events.len())
            .filter(|&i| events[i].section == Some(si))
            .collect();
        if members.len() <= k {
            continue;
        }
        // Weakest scores beyond the budget go.
        members.sort_by(|&a, &b| {
            events[b]
                .score
                .partial_cmp(&events[a].score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for &i in &members[k..] {
            keep[i] = false;
        }
    }
    events
        .into_iter()
        .zip(keep)
        .filter_map(|(e, k)| k.then_some(e))
        .collect()
}
