//! The ordered refinement passes. Each is a pure `Vec<Note> -> Vec<Note>`
//! function; ordering and non-overlap invariants hold at every pass exit.

use crate::analysis::tempo::nearest_in_sorted;
use crate::chart::{Difficulty, Lane, Note, NoteKind, sort_notes};
use crate::context::{Context, det_gate, det_hash};
use crate::finalize::{
    min_long_duration, occupied_lanes, pair_compatible, tap_inside_long_body,
};

/// Snap every note to the nearest beat/half-beat (quarters on hard
/// tiers) or onset time within tolerance.
pub fn align_to_music_grid(mut notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    let tol = (0.12 * interval).max(0.02);
    let mut targets = ctx
        .beats
        .grid_points(true, ctx.difficulty.uses_quarter_grid(), false);
    targets.extend(ctx.onsets.iter().map(|o| o.time));
    targets.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    for n in &mut notes {
        if let Some((i, d)) = nearest_in_sorted(&targets, n.time) {
            if d <= tol {
                n.time = targets[i];
            }
        }
    }
    sort_notes(&mut notes);
    notes
}

/// Taps that land inside a long's body shift past its end (re-snapped to
/// a beat when one is close), or drop. Long notes blocked at their start
/// shift past the blocker unless the two form a compatible slide pair.
pub fn enforce_physical_playability(notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    let snap_tol = (0.12 * interval).max(0.02);
    let mut out: Vec<Note> = Vec::with_capacity(notes.len());

    for note in notes {
        match note.kind {
            NoteKind::Tap => {
                let blocker = out
                    .iter()
                    .find(|l| tap_inside_long_body(note.time, note.lane, l, 0.01))
                    .cloned();
                match blocker {
                    None => out.push(note),
                    Some(long) => {
                        let mut t = long.end_time() + 0.02;
                        if let Some((bi, d)) = ctx.beats.nearest_beat(t) {
                            if d <= snap_tol {
                                t = ctx.beats.beats[bi].max(long.end_time() + 0.005);
                            }
                        }
                        let still_blocked = out
                            .iter()
                            .any(|l| tap_inside_long_body(t, note.lane, l, 0.01));
                        if !still_blocked {
                            let mut shifted = note.clone();
                            shifted.time = t;
                            out.push(shifted);
                        }
                    }
                }
            }
            _ if note.is_long() => {
                let lanes = occupied_lanes(&note);
                let blocking_end = out
                    .iter()
                    .filter(|l| {
                        l.is_long()
                            && l.time < note.time
                            && l.end_time() > note.time
                            && lanes_intersect(&lanes, &occupied_lanes(l))
                            && !pair_compatible(l, &note, interval)
                    })
                    .map(Note::end_time)
                    .fold(f64::NEG_INFINITY, f64::max);
                if blocking_end == f64::NEG_INFINITY {
                    out.push(note);
                } else {
                    let new_start = blocking_end + 0.02;
                    let dur = note.end_time() - new_start;
                    if dur >= min_long_duration(note.kind, interval) {
                        let mut shifted = note.clone();
                        shifted.time = new_start;
                        shifted.duration = Some(dur);
                        out.push(shifted);
                    }
                }
            }
            _ => out.push(note),
        }
    }
    sort_notes(&mut out);
    out
}

fn lanes_intersect(a: &[bool; 2], b: &[bool; 2]) -> bool {
    (a[0] && b[0]) || (a[1] && b[1])
}

/// Per-lane busy-until bookkeeping: shift conflicting longs forward,
/// trimming their durations, and drop the ones that shrink below the
/// minimum long duration.
pub fn resolve_long_note_collisions(notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    let mut busy_until = [f64::NEG_INFINITY; 2];
    let mut last_long: [Option<Note>; 2] = [None, None];
    let mut out: Vec<Note> = Vec::with_capacity(notes.len());

    for note in notes {
        if !note.is_long() {
            out.push(note);
            continue;
        }
        let lanes = occupied_lanes(&note);
        let mut start = note.time;
        for li in 0..2 {
            if !lanes[li] || busy_until[li] <= note.time {
                continue;
            }
            if let Some(prev) = &last_long[li] {
                if !pair_compatible(prev, &note, interval) {
                    start = start.max(busy_until[li] + 0.01);
                }
            }
        }
        let mut note = note;
        if start > note.time {
            let dur = note.end_time() - start;
            if dur < min_long_duration(note.kind, interval) {
                continue;
            }
            note.time = start;
            note.duration = Some(dur);
        }
        for li in 0..2 {
            if lanes[li] {
                busy_until[li] = note.end_time() + 0.02;
                last_long[li] = Some(note.clone());
            }
        }
        out.push(note);
    }
    sort_notes(&mut out);
    out
}

/// Drop taps that crowd a long's head or sit in its body where the
/// player's hand is already committed.
pub fn resolve_visual_note_overlaps(notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    let head_window = (0.18 * interval).max(0.055);
    let longs: Vec<Note> = notes.iter().filter(|n| n.is_long()).cloned().collect();

    notes
        .into_iter()
        .filter(|n| {
            if n.kind != NoteKind::Tap {
                return true;
            }
            let head_conflict = longs.iter().any(|l| {
                let same_head_lane = match l.kind {
                    NoteKind::Slide if !l.is_diagonal_slide() => true,
                    _ => l.lane == n.lane,
                };
                same_head_lane && (n.time - l.time).abs() < head_window
            });
            let body_conflict = longs
                .iter()
                .any(|l| tap_inside_long_body(n.time, n.lane, l, 0.012));
            !head_conflict && !body_conflict
        })
        .collect()
}

/// Pull taps toward nearby strong onsets.
pub fn polish_rhythm_sync_by_strong_onsets(mut notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    let tol = (0.10 * interval).max(0.026);
    let strong = ctx.onset_stats.p68;
    for n in &mut notes {
        if n.kind != NoteKind::Tap {
            continue;
        }
        if let Some((o, _)) = ctx.nearest_onset_where(n.time, tol, |o| o.strength >= strong) {
            let fraction = (0.84 - 0.28 * o.strength).max(0.58);
            n.time += (o.time - n.time) * fraction;
        }
    }
    sort_notes(&mut notes);
    notes
}

/// Re-snap with descending tolerances, prune weak off-music taps, and
/// cap the long-note ratio for the difficulty.
pub fn stabilize_generation_quality(mut notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    let strong = ctx.onset_stats.p68;
    let tol_strong = (0.12 * interval).max(0.03);
    let tol_onset = (0.09 * interval).max(0.024);
    let tol_grid = (0.07 * interval).max(0.02);
    let grid = ctx
        .beats
        .grid_points(true, ctx.difficulty.uses_quarter_grid(), false);

    for n in &mut notes {
        if let Some((o, _)) =
            ctx.nearest_onset_where(n.time, tol_strong, |o| o.strength >= strong)
        {
            n.time = o.time;
        } else if let Some((o, _)) = ctx.nearest_onset_where(n.time, tol_onset, |_| true) {
            n.time = o.time;
        } else if let Some((gi, d)) = nearest_in_sorted(&grid, n.time) {
            if d <= tol_grid {
                n.time = grid[gi];
            }
        }
    }
    sort_notes(&mut notes);

    // Weak taps far from any onset are deterministically thinned.
    let gate_modulo = match ctx.difficulty {
        Difficulty::Easy => 3,
        Difficulty::Normal | Difficulty::Hard => 4,
        Difficulty::Expert => 5,
    };
    let p40 = ctx.onset_stats.p40;
    let off_music_dist = 0.25 * interval;
    let mut idx = 0usize;
    notes.retain(|n| {
        idx += 1;
        if n.kind != NoteKind::Tap || n.strength >= p40 {
            return true;
        }
        let off_music = ctx
            .nearest_onset_where(n.time, off_music_dist, |_| true)
            .is_none();
        !(off_music && det_gate(n.time, n.lane.index(), idx, gate_modulo))
    });

    // Long-ratio cap: demote the weakest longs back to taps.
    let cap = ctx.difficulty.long_ratio_cap();
    loop {
        let total = notes.len().max(1);
        let long_count = notes.iter().filter(|n| n.is_long()).count();
        if long_count as f64 / total as f64 <= cap {
            break;
        }
        let weakest = notes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n.kind, NoteKind::Hold | NoteKind::Slide))
            .min_by(|(_, a), (_, b)| {
                a.strength
                    .partial_cmp(&b.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i);
        let Some(i) = weakest else { break };
        notes[i] = Note::tap(notes[i].time, notes[i].lane, notes[i].strength);
    }
    notes
}

/// Stricter snapping repeat, then drop weak non-highlight taps that sit
/// far from every onset.
pub fn enforce_final_music_anchoring(mut notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    let strong = ctx.onset_stats.p68;
    let tol_strong = (0.10 * interval).max(0.02);
    let tol_onset = (0.07 * interval).max(0.016);
    for n in &mut notes {
        if let Some((o, _)) =
            ctx.nearest_onset_where(n.time, tol_strong, |o| o.strength >= strong)
        {
            n.time = o.time;
        } else if let Some((o, _)) = ctx.nearest_onset_where(n.time, tol_onset, |_| true) {
            n.time = o.time;
        }
    }
    sort_notes(&mut notes);

    let drop_dist = (0.30 * interval).max(0.082);
    notes.retain(|n| {
        if n.kind != NoteKind::Tap || n.strength >= 0.3 {
            return true;
        }
        if ctx.section_kind_at(n.time).is_highlight() {
            return true;
        }
        ctx.nearest_onset_where(n.time, drop_dist, |_| true).is_some()
    });
    notes
}

/// Where a standout transient hits a sparse patch of a highlight
/// section, drop in a Burst.
pub fn inject_burst_breaker_notes(mut notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    if ctx.difficulty == Difficulty::Easy {
        return notes;
    }
    let interval = ctx.beat_interval();
    let duration_factor = match ctx.difficulty {
        Difficulty::Normal => 1.65,
        Difficulty::Hard => 1.95,
        Difficulty::Expert => 2.2,
        Difficulty::Easy => unreachable!(),
    };
    let burst_dur = (duration_factor * interval).max(0.72);
    let p78 = ctx.onset_stats.p78;
    let mut last_burst_end = f64::NEG_INFINITY;
    let mut added = Vec::new();

    for (oi, o) in ctx.onsets.iter().enumerate() {
        if o.strength < p78 || o.time < last_burst_end + 2.0 * interval {
            continue;
        }
        if !ctx.section_kind_at(o.time).is_highlight() {
            continue;
        }
        let transient = ctx
            .nearest_profile(o.time)
            .is_some_and(|p| p.transient >= 0.62);
        if !transient {
            continue;
        }
        // Sparse neighborhood and a clear window on both lanes.
        let window_lo = o.time - 0.45 * interval;
        let window_hi = o.time + burst_dur + 0.05;
        let clear = !notes.iter().chain(added.iter()).any(|n| {
            n.time < window_hi && n.end_time() > window_lo
        });
        if !clear {
            continue;
        }
        let lane = match o.band {
            crate::analysis::onsets::Band::Low => Lane::Bottom,
            crate::analysis::onsets::Band::High => Lane::Top,
            _ => {
                if det_gate(o.time, 0, oi, 2) {
                    Lane::Bottom
                } else {
                    Lane::Top
                }
            }
        };
        let hits = 4 + (det_hash(o.time, lane.index(), oi) % 5) as u32;
        added.push(Note::burst(o.time, lane, o.strength, burst_dur, hits));
        last_burst_end = o.time + burst_dur;
    }

    notes.extend(added);
    sort_notes(&mut notes);
    notes
}

/// Bursts never share their window with a long or crowd a tap.
pub fn enforce_burst_non_overlap(notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    let tap_window = 0.18 * interval;
    let others: Vec<Note> = notes
        .iter()
        .filter(|n| n.kind != NoteKind::Burst)
        .cloned()
        .collect();

    notes
        .into_iter()
        .filter(|n| {
            if n.kind != NoteKind::Burst {
                return true;
            }
            let window = (n.time - 0.04, n.end_time() + 0.05);
            let long_overlap = others.iter().any(|o| {
                o.is_long() && o.time < window.1 && o.end_time() > window.0
            });
            let tap_crowd = others.iter().any(|o| {
                o.kind == NoteKind::Tap && (o.time - n.time).abs() < tap_window
            });
            !long_overlap && !tap_crowd
        })
        .collect()
}

/// Re-clamp slide targets, enforce minimum long durations, and re-run
/// collision resolution so downstream passes see a clean interval set.
pub fn sanitize_final_long_notes(mut notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    for n in &mut notes {
        if n.kind == NoteKind::Slide && n.target_lane.is_none() {
            n.target_lane = Some(n.lane);
        }
        if n.kind != NoteKind::Slide {
            n.target_lane = None;
        }
    }
    notes.retain(|n| {
        !n.is_long() || n.duration.unwrap_or(0.0) >= min_long_duration(n.kind, interval)
    });
    resolve_long_note_collisions(notes, ctx)
}

/// Taps nested in long bodies go; same-lane same-kind near-duplicates
/// collapse to the stronger one.
pub fn prune_impossible_nested_notes(notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    let longs: Vec<Note> = notes.iter().filter(|n| n.is_long()).cloned().collect();
    let survivors: Vec<Note> = notes
        .into_iter()
        .filter(|n| {
            n.kind != NoteKind::Tap
                || !longs
                    .iter()
                    .any(|l| tap_inside_long_body(n.time, n.lane, l, 0.012))
        })
        .collect();

    let dup_window = (0.17 * interval).max(0.055);
    let mut out: Vec<Note> = Vec::with_capacity(survivors.len());
    for note in survivors {
        let dup = out.iter_mut().rev().take(6).find(|p| {
            p.lane == note.lane && p.kind == note.kind && (note.time - p.time).abs() < dup_window
        });
        match dup {
            Some(prev) => {
                if note.strength > prev.strength {
                    *prev = note;
                }
            }
            None => out.push(note),
        }
    }
    sort_notes(&mut out);
    out
}

/// Final strict sweep: no tap may sit strictly inside any long body
/// outside the baton window.
pub fn enforce_strict_long_body_exclusion(notes: Vec<Note>, _ctx: &Context) -> Vec<Note> {
    let longs: Vec<Note> = notes.iter().filter(|n| n.is_long()).cloned().collect();
    notes
        .into_iter()
        .filter(|n| {
            n.kind != NoteKind::Tap
                || !longs
                    .iter()
                    .any(|l| tap_inside_long_body(n.time, n.lane, l, 1e-9))
        })
        .collect()
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

    fn ctx_fixture(difficulty: Difficulty, onsets: Vec<TimedOnset>) -> Context {
        let stats = OnsetStats::from_timeline(&onsets);
        Context {
            duration: 30.0,
            difficulty,
            sections: vec![Section {
                start: 0.0,
                end: 30.0,
                kind: SectionKind::Chorus,
                avg_energy: 0.7,
            }],
            beats: BeatGrid::fixed(120.0, 0.0, 30.0),
            onsets,
            onset_stats: stats,
            profiles: Vec::new(),
            features: SongFeatures::default(),
            perf: RuntimePerf { cores: 4, memory_gb: 8.0 },
            options: GenOptions::default(),
        }
    }

    fn onset(time: f64, strength: f64) -> TimedOnset {
        TimedOnset { time, strength, band: Band::Mixed }
    }

    #[test]
    fn test_align_snaps_to_grid() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let notes = vec![Note::tap(1.03, Lane::Top, 0.5)];
        let aligned = align_to_music_grid(notes, &ctx);
        assert!((aligned[0].time - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_align_leaves_far_notes() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        // 0.11 from the nearest half-beat: beyond max(0.02, 0.06) tol,
        // but quarter-grid absence matters — Normal has halves at 0.25
        // spacing, so 1.115 is 0.115 from 1.0 and 0.135 from 1.25.
        let notes = vec![Note::tap(1.115, Lane::Top, 0.5)];
        let aligned = align_to_music_grid(notes, &ctx);
        assert!((aligned[0].time - 1.115).abs() < 1e-9);
    }

    #[test]
    fn test_playability_shifts_tap_out_of_hold() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let notes = vec![
            Note::hold(1.0, Lane::Top, 0.8, 1.0),
            Note::tap(1.5, Lane::Top, 0.5),
        ];
        let fixed = enforce_physical_playability(notes, &ctx);
        assert_eq!(fixed.len(), 2);
        let tap = fixed.iter().find(|n| n.kind == NoteKind::Tap).unwrap();
        assert!(tap.time >= 2.0, "tap at {}", tap.time);
    }

    #[test]
    fn test_playability_keeps_other_lane_tap() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let notes = vec![
            Note::hold(1.0, Lane::Top, 0.8, 1.0),
            Note::tap(1.5, Lane::Bottom, 0.5),
        ];
        let fixed = enforce_physical_playability(notes, &ctx);
        let tap = fixed.iter().find(|n| n.kind == NoteKind::Tap).unwrap();
        assert!((tap.time - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_long_collisions_shift_and_trim() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let notes = vec![
            Note::hold(1.0, Lane::Top, 0.8, 1.0),
            Note::hold(1.5, Lane::Top, 0.6, 1.5),
        ];
        let fixed = resolve_long_note_collisions(notes, &ctx);
        assert_eq!(fixed.len(), 2);
        // Second hold shifted past the first's end and trimmed.
        assert!(fixed[1].time >= 2.0);
        assert!((fixed[1].end_time() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_long_collisions_drop_too_short_remainder() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let notes = vec![
            Note::hold(1.0, Lane::Top, 0.8, 1.0),
            // Ends only 0.1 past the blocker: remainder below minimum.
            Note::hold(1.5, Lane::Top, 0.6, 0.6),
        ];
        let fixed = resolve_long_note_collisions(notes, &ctx);
        assert_eq!(fixed.len(), 1);
    }

    #[test]
    fn test_x_cross_slides_survive_collision_pass() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let notes = vec![
            Note::slide(1.0, Lane::Top, 0.7, 1.0, Lane::Bottom),
            Note::slide(1.05, Lane::Bottom, 0.7, 1.0, Lane::Top),
        ];
        let fixed = resolve_long_note_collisions(notes, &ctx);
        assert_eq!(fixed.len(), 2);
        assert!((fixed[1].time - 1.05).abs() < 1e-9, "pair was shifted");
    }

    #[test]
    fn test_visual_overlap_drops_head_crowding_tap() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let notes = vec![
            Note::tap(0.97, Lane::Top, 0.5),
            Note::hold(1.0, Lane::Top, 0.8, 1.0),
            Note::tap(0.97, Lane::Bottom, 0.5),
        ];
        let fixed = resolve_visual_note_overlaps(notes, &ctx);
        // Same-lane head crowd dropped, other lane kept for holds.
        assert_eq!(fixed.iter().filter(|n| n.kind == NoteKind::Tap).count(), 1);
        assert_eq!(
            fixed.iter().find(|n| n.kind == NoteKind::Tap).unwrap().lane,
            Lane::Bottom
        );
    }

    #[test]
    fn test_straight_slide_blocks_both_lanes() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let notes = vec![
            Note::slide(1.0, Lane::Top, 0.8, 1.0, Lane::Top),
            Note::tap(1.5, Lane::Bottom, 0.5),
        ];
        let fixed = resolve_visual_note_overlaps(notes, &ctx);
        assert!(fixed.iter().all(|n| n.kind != NoteKind::Tap));
    }

    #[test]
    fn test_baton_window_tap_survives() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let slide = Note::slide(1.0, Lane::Top, 0.8, 2.0, Lane::Bottom);
        let (lo, hi) = slide.baton_window().unwrap();
        let notes = vec![slide, Note::tap((lo + hi) * 0.5, Lane::Bottom, 0.5)];
        let fixed = resolve_visual_note_overlaps(notes, &ctx);
        assert_eq!(fixed.len(), 2);
        let strict = enforce_strict_long_body_exclusion(fixed, &ctx);
        assert_eq!(strict.len(), 2);
    }

    #[test]
    fn test_polish_moves_tap_toward_strong_onset() {
        // Ramped strengths so the 68th percentile sits above the onset
        // at t=5.0 and only the standout at 5.04 counts as strong.
        let mut onsets: Vec<TimedOnset> =
            (0..20).map(|i| onset(i as f64 * 0.5, 0.1 + 0.02 * i as f64)).collect();
        onsets.push(onset(5.04, 0.9));
        onsets.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
        let ctx = ctx_fixture(Difficulty::Normal, onsets);
        assert!(ctx.onset_stats.p68 > 0.3);
        let notes = vec![Note::tap(5.0, Lane::Top, 0.5)];
        let polished = polish_rhythm_sync_by_strong_onsets(notes, &ctx);
        let t = polished[0].time;
        assert!(t > 5.0 && t < 5.04, "t={t}");
    }

    #[test]
    fn test_stabilize_caps_long_ratio() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let mut notes: Vec<Note> = (0..10)
            .map(|i| Note::hold(i as f64, Lane::Top, 0.4 + 0.01 * i as f64, 0.4))
            .collect();
        notes.extend((0..2).map(|i| Note::tap(20.0 + i as f64, Lane::Bottom, 0.5)));
        let fixed = stabilize_generation_quality(notes, &ctx);
        let longs = fixed.iter().filter(|n| n.is_long()).count();
        let ratio = longs as f64 / fixed.len() as f64;
        assert!(ratio <= Difficulty::Normal.long_ratio_cap() + 1e-9, "ratio={ratio}");
    }

    #[test]
    fn test_burst_injection_and_non_overlap() {
        // One standout transient onset in a chorus with plenty of space.
        // Background strengths ramp so the 78th-percentile gate excludes
        // them, and only the 10.25 region reads as transient.
        let mut onsets: Vec<TimedOnset> =
            (0..28).map(|i| onset(i as f64, 0.1 + 0.01 * i as f64)).collect();
        onsets.push(onset(10.25, 0.95));
        onsets.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
        let mut ctx = ctx_fixture(Difficulty::Expert, onsets);
        let flat = crate::analysis::SpectralProfile {
            transient: 0.1,
            ..crate::analysis::SpectralProfile::default()
        };
        ctx.profiles = vec![
            crate::analysis::SpectralProfile { time: 0.0, ..flat },
            crate::analysis::SpectralProfile {
                time: 10.25,
                transient: 0.9,
                percussive: 0.8,
                ..crate::analysis::SpectralProfile::default()
            },
            crate::analysis::SpectralProfile { time: 10.6, ..flat },
        ];
        let notes = vec![Note::tap(2.0, Lane::Top, 0.5)];
        let with_bursts = inject_burst_breaker_notes(notes, &ctx);
        let bursts: Vec<&Note> =
            with_bursts.iter().filter(|n| n.kind == NoteKind::Burst).collect();
        assert_eq!(bursts.len(), 1);
        let b = bursts[0];
        assert!((4..=8).contains(&b.burst_hits_required.unwrap()));
        assert!(b.duration.unwrap() >= 0.72);

        // A tap inside the burst window kills the burst afterwards.
        let mut crowded = with_bursts.clone();
        crowded.push(Note::tap(b.time + 0.02, Lane::Bottom, 0.5));
        sort_notes(&mut crowded);
        let cleaned = enforce_burst_non_overlap(crowded, &ctx);
        assert!(cleaned.iter().all(|n| n.kind != NoteKind::Burst));
    }

    #[test]
    fn test_sanitize_drops_undersized_longs_and_restores_targets() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let mut broken = Note::slide(1.0, Lane::Top, 0.5, 1.0, Lane::Bottom);
        broken.target_lane = None;
        let notes = vec![
            broken,
            Note::hold(3.0, Lane::Top, 0.5, 0.05),
        ];
        let fixed = sanitize_final_long_notes(notes, &ctx);
        assert_eq!(fixed.len(), 1);
        assert_eq!(fixed[0].kind, NoteKind::Slide);
        assert_eq!(fixed[0].target_lane, Some(Lane::Top));
    }

    #[test]
    fn test_prune_dedups_same_lane_same_kind() {
        let ctx = ctx_fixture(Difficulty::Normal, vec![]);
        let notes = vec![
            Note::tap(1.0, Lane::Top, 0.4),
            Note::tap(1.04, Lane::Top, 0.8),
            Note::tap(1.04, Lane::Bottom, 0.5),
        ];
        let fixed = prune_impossible_nested_notes(notes, &ctx);
        assert_eq!(fixed.len(), 2);
        let top = fixed.iter().find(|n| n.lane == Lane::Top).unwrap();
        assert!((top.strength - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_collision_then_prune_idempotent() {
        let ctx = ctx_fixture(Difficulty::Hard, vec![]);
        let notes = vec![
            Note::hold(1.0, Lane::Top, 0.8, 1.0),
            Note::hold(1.4, Lane::Top, 0.7, 1.6),
            Note::tap(1.6, Lane::Bottom, 0.6),
            Note::tap(2.2, Lane::Top, 0.6),
            Note::slide(4.0, Lane::Bottom, 0.6, 1.0, Lane::Top),
            Note::tap(4.3, Lane::Top, 0.6),
        ];
        let once = prune_impossible_nested_notes(
            resolve_long_note_collisions(notes, &ctx),
            &ctx,
        );
        let twice = prune_impossible_nested_notes(
            resolve_long_note_collisions(once.clone(), &ctx),
            &ctx,
        );
        assert_eq!(once, twice);
    }
}
