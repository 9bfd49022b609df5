//! Holistic rebalancing: after the cascade, per-section density and the
//! slide:tap mix are pushed toward their targets over a small number of
//! feedback-scored passes, keeping the best intermediate.

use log::debug;

use crate::chart::{Difficulty, Lane, Note, NoteKind, sort_notes};
use crate::context::{Context, det_gate};
use crate::finalize::passes;

/// Target share of slides in the final chart.
pub fn slide_target_ratio(ctx: &Context) -> f64 {
    let type_bias = match ctx.difficulty {
        Difficulty::Easy => -0.04,
        Difficulty::Normal => 0.0,
        Difficulty::Hard => 0.02,
        Difficulty::Expert => 0.03,
    };
    (0.10 + 0.20 * ctx.features.sustained_focus - 0.14 * ctx.features.percussive_focus
        + type_bias)
        .clamp(0.06, 0.32)
}

/// Per-section NPS target band: the difficulty band scaled by the
/// section's rebalance factor.
fn section_band(ctx: &Context, kind: crate::chart::SectionKind) -> (f64, f64) {
    let (lo, hi) = ctx.difficulty.nps_band();
    let f = kind.rebalance_factor();
    (lo * f, hi * f)
}

/// Run the feedback loop; the pass budget comes from the runtime tier.
/// The lowest-penalty intermediate wins.
pub fn holistic_rebalance(notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let budget = ctx.perf.rebalance_passes();
    let mut best = notes.clone();
    let mut best_penalty = penalty(&best, ctx);
    let mut current = notes;

    for round in 0..budget {
        current = rebalance_densities(current, ctx);
        current = rebalance_type_mix(current, ctx);
        // Keep the cascade's invariants intact after mutation.
        current = passes::resolve_long_note_collisions(current, ctx);
        current = passes::prune_impossible_nested_notes(current, ctx);

        let p = penalty(&current, ctx);
        debug!("rebalance round {round}: penalty {p:.3} (best {best_penalty:.3})");
        if p < best_penalty {
            best_penalty = p;
            best = current.clone();
        }
    }
    best
}

/// Sparse sections borrow their strongest unused onsets; dense sections
/// shed their weakest taps.
fn rebalance_densities(mut notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    for section in ctx.sections.iter().filter(|s| s.kind.is_playable()) {
        let dur = section.duration();
        if dur <= 0.0 {
            continue;
        }
        let (target_lo, target_hi) = section_band(ctx, section.kind);
        let count = notes
            .iter()
            .filter(|n| section.contains(n.time))
            .count();
        let nps = count as f64 / dur;

        if nps < target_lo {
            let want = ((target_lo - nps) * dur).ceil() as usize;
            let mut added = 0usize;
            // Strongest first.
            let mut candidates: Vec<&crate::analysis::onsets::TimedOnset> = ctx
                .onsets_in(section.start, section.end)
                .iter()
                .collect();
            candidates.sort_by(|a, b| {
                b.strength
                    .partial_cmp(&a.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for (ci, o) in candidates.into_iter().enumerate() {
                if added >= want {
                    break;
                }
                let used = notes.iter().any(|n| {
                    (n.time - o.time).abs() < 0.45 * interval
                        || (n.is_long() && n.time <= o.time && o.time <= n.end_time())
                });
                if used {
                    continue;
                }
                let lane = if det_gate(o.time, 0, ci, 2) {
                    Lane::Bottom
                } else {
                    Lane::Top
                };
                notes.push(Note::tap(o.time, lane, o.strength));
                added += 1;
            }
            // Highlight sections must reach their band even when every
            // onset is spoken for: fall back to free half-beat slots.
            if added < want && section.kind.is_highlight() {
                let grid = ctx.beats.grid_points(true, false, false);
                for (gi, &slot) in grid.iter().enumerate() {
                    if added >= want {
                        break;
                    }
                    if !section.contains(slot) {
                        continue;
                    }
                    let used = notes.iter().any(|n| {
                        (n.time - slot).abs() < 0.45 * interval
                            || (n.is_long() && n.time <= slot && slot <= n.end_time())
                    });
                    if used {
                        continue;
                    }
                    let lane = if det_gate(slot, 1, gi, 2) {
                        Lane::Bottom
                    } else {
                        Lane::Top
                    };
                    notes.push(Note::tap(slot, lane, 0.45));
                    added += 1;
                }
            }
            if added > 0 {
                sort_notes(&mut notes);
            }
        } else if nps > target_hi {
            let mut excess = ((nps - target_hi) * dur).ceil() as usize;
            while excess > 0 {
                let weakest = notes
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| n.kind == NoteKind::Tap && section.contains(n.time))
                    .min_by(|(_, a), (_, b)| {
                        a.strength
                            .partial_cmp(&b.strength)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(i, _)| i);
                match weakest {
                    Some(i) => {
                        notes.remove(i);
                        excess -= 1;
                    }
                    None => break,
                }
            }
        }
    }
    notes
}

/// Promote taps to straight slides (or demote the weakest slides) until
/// the slide share approaches its target.
fn rebalance_type_mix(mut notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    if ctx.difficulty == Difficulty::Easy {
        return notes;
    }
    let interval = ctx.beat_interval();
    let slide_min = crate::finalize::min_long_duration(NoteKind::Slide, interval);
    let target = slide_target_ratio(ctx);
    let total = notes.len().max(1) as f64;
    let current = notes.iter().filter(|n| n.kind == NoteKind::Slide).count() as f64 / total;

    // Promotion needs actual sustained material to justify slides; a
    // purely percussive track only ever demotes its excess.
    let promotable =
        ctx.features.sustained_focus >= 0.35 || ctx.features.slide_affinity >= 0.35;
    if current < target - 0.04 && promotable {
        let want = ((target - current) * total).ceil() as usize;
        let mut promoted = 0usize;
        let times: Vec<f64> = notes.iter().map(|n| n.time).collect();
        for i in 0..notes.len() {
            if promoted >= want {
                break;
            }
            let n = &notes[i];
            if n.kind != NoteKind::Tap || !ctx.section_kind_at(n.time).is_playable() {
                continue;
            }
            let gap = times.get(i + 1).map_or(f64::INFINITY, |t| t - n.time);
            let dur = (gap - 0.06).min(1.4 * interval);
            if dur < slide_min {
                continue;
            }
            if !det_gate(n.time, n.lane.index(), i, 2) {
                continue;
            }
            notes[i] = Note::slide(n.time, n.lane, n.strength, dur, n.lane);
            promoted += 1;
        }
    } else if current > target + 0.04 {
        let mut excess = ((current - target) * total).ceil() as usize;
        while excess > 0 {
            let weakest = notes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.kind == NoteKind::Slide)
                .min_by(|(_, a), (_, b)| {
                    a.strength
                        .partial_cmp(&b.strength)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i);
            match weakest {
                Some(i) => {
                    notes[i] = Note::tap(notes[i].time, notes[i].lane, notes[i].strength);
                    excess -= 1;
                }
                None => break,
            }
        }
    }
    notes
}

/// The loop's objective. Lower is better.
pub fn penalty(notes: &[Note], ctx: &Context) -> f64 {
    let mut sparse = 0usize;
    let mut dense = 0usize;
    for section in ctx.sections.iter().filter(|s| s.kind.is_playable()) {
        let dur = section.duration();
        if dur <= 0.0 {
            continue;
        }
        let (lo, hi) = section_band(ctx, section.kind);
        let nps = notes.iter().filter(|n| section.contains(n.time)).count() as f64 / dur;
        if nps < lo {
            sparse += 1;
        } else if nps > hi {
            dense += 1;
        }
    }

    let total = notes.len().max(1) as f64;
    let slide_ratio = notes.iter().filter(|n| n.kind == NoteKind::Slide).count() as f64 / total;
    let target = slide_target_ratio(ctx);
    let feedback = if slide_ratio <= 0.0 && target <= 0.0 {
        1.0
    } else {
        slide_ratio.min(target) / slide_ratio.max(target).max(1e-9)
    };
    let mix_penalty = (slide_ratio - target).abs() * 10.0;

    3.0 * sparse as f64 + 2.2 * dense as f64 + 4.5 * (1.0 - feedback).abs() + mix_penalty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::SongFeatures;
    use crate::analysis::onsets::{Band, TimedOnset};
    use crate::analysis::tempo::BeatGrid;
    use crate::chart::{Section, SectionKind};
    use crate::config::{GenOptions, RuntimePerf};
    use crate::context::OnsetStats;

    fn ctx_fixture(features: SongFeatures, onsets: Vec<TimedOnset>) -> Context {
        let stats = OnsetStats::from_timeline(&onsets);
        Context {
            duration: 40.0,
            difficulty: Difficulty::Normal,
            sections: vec![Section {
                start: 0.0,
                end: 40.0,
                kind: SectionKind::Verse,
                avg_energy: 0.6,
            }],
            beats: BeatGrid::fixed(120.0, 0.0, 40.0),
            onsets,
            onset_stats: stats,
            profiles: Vec::new(),
            features,
            perf: RuntimePerf { cores: 8, memory_gb: 16.0 },
            options: GenOptions::default(),
        }
    }

    fn beat_onsets(count: usize) -> Vec<TimedOnset> {
        (0..count)
            .map(|i| TimedOnset {
                time: i as f64 * 0.5,
                strength: 0.5 + 0.4 * ((i % 5) as f64 / 5.0),
                band: Band::Mixed,
            })
            .collect()
    }

    #[test]
    fn test_slide_target_ratio_bounds() {
        let mut ctx = ctx_fixture(SongFeatures::default(), vec![]);
        ctx.features.sustained_focus = 1.0;
        ctx.features.percussive_focus = 0.0;
        assert!(slide_target_ratio(&ctx) <= 0.32);
        ctx.features.sustained_focus = 0.0;
        ctx.features.percussive_focus = 1.0;
        assert!((slide_target_ratio(&ctx) - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_section_gets_injections() {
        // Verse band at Normal: (3.2, 5.6) × 0.94 ≈ (3.0, 5.3) NPS.
        // Four notes over 40 s is far below — the loop injects from
        // the onset pool.
        let ctx = ctx_fixture(SongFeatures::default(), beat_onsets(80));
        let notes: Vec<Note> = (0..4)
            .map(|i| Note::tap(i as f64 * 10.0, Lane::Bottom, 0.6))
            .collect();
        let before = notes.len();
        let balanced = holistic_rebalance(notes, &ctx);
        assert!(balanced.len() > before, "{} -> {}", before, balanced.len());
    }

    #[test]
    fn test_dense_section_sheds_weakest() {
        // 16 NPS is way above the Verse ceiling; weakest taps go.
        let notes: Vec<Note> = (0..640)
            .map(|i| {
                Note::tap(
                    i as f64 * 0.0625,
                    if i % 2 == 0 { Lane::Bottom } else { Lane::Top },
                    0.2 + (i % 7) as f64 * 0.1,
                )
            })
            .collect();
        let ctx = ctx_fixture(SongFeatures::default(), vec![]);
        let balanced = holistic_rebalance(notes.clone(), &ctx);
        assert!(balanced.len() < notes.len());
    }

    #[test]
    fn test_mix_rebalance_promotes_slides_for_sustained_songs() {
        let features = SongFeatures {
            sustained_focus: 0.9,
            percussive_focus: 0.1,
            ..SongFeatures::default()
        };
        let ctx = ctx_fixture(features, beat_onsets(80));
        // All taps, well spaced (one per second).
        let notes: Vec<Note> = (0..40)
            .map(|i| {
                Note::tap(i as f64, if i % 2 == 0 { Lane::Bottom } else { Lane::Top }, 0.6)
            })
            .collect();
        let balanced = holistic_rebalance(notes, &ctx);
        let slides = balanced.iter().filter(|n| n.kind == NoteKind::Slide).count();
        assert!(slides > 0, "no slides promoted");
    }

    #[test]
    fn test_penalty_prefers_balanced_charts() {
        let ctx = ctx_fixture(SongFeatures::default(), vec![]);
        // ~4 NPS inside the Verse band.
        let balanced: Vec<Note> = (0..160)
            .map(|i| Note::tap(i as f64 * 0.25, Lane::Bottom, 0.6))
            .collect();
        let sparse: Vec<Note> = (0..4)
            .map(|i| Note::tap(i as f64 * 10.0, Lane::Bottom, 0.6))
            .collect();
        assert!(penalty(&balanced, &ctx) < penalty(&sparse, &ctx));
    }

    #[test]
    fn test_rebalance_is_deterministic() {
        let ctx = ctx_fixture(SongFeatures::default(), beat_onsets(80));
        let notes: Vec<Note> = (0..10)
            .map(|i| Note::tap(i as f64 * 4.0, Lane::Bottom, 0.6))
            .collect();
        let a = holistic_rebalance(notes.clone(), &ctx);
        let b = holistic_rebalance(notes, &ctx);
        assert_eq!(a, b);
    }
}
