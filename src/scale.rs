//! Difficulty scaler: culls notes that violate per-difficulty spacing,
//! strength, and lane-run contracts, and collapses long notes for the
//! easiest tier.

use log::debug;

use crate::chart::{Difficulty, Lane, Note, NoteKind};

/// Apply the difficulty's [`crate::chart::ScaleProfile`] to a sorted
/// note list. Returns a new list; the input order is preserved.
pub fn scale_chart(notes: &[Note], difficulty: Difficulty) -> Vec<Note> {
    let profile = difficulty.scale_profile();
    let mut out: Vec<Note> = Vec::with_capacity(notes.len());
    let mut last_in_lane = [f64::NEG_INFINITY; 2];
    let mut last_tap = f64::NEG_INFINITY;
    let mut run_lane: Option<Lane> = None;
    let mut run_len = 0usize;

    for note in notes {
        if note.strength < profile.min_strength {
            continue;
        }
        let mut note = note.clone();
        let was_long = note.is_long();

        if profile.simplify_longs && was_long {
            note = Note::tap(note.time, note.lane, note.strength);
        }

        // A tap about to reach the lane-run limit flips to the other lane.
        if note.kind == NoteKind::Tap
            && run_lane == Some(note.lane)
            && run_len + 1 >= profile.lane_run_limit
        {
            note.lane = note.lane.opposite();
        }

        // Per-lane spacing; notes that started out long need a little
        // extra room even after Easy collapses them to taps.
        let lane_gap = profile.min_lane_gap * if was_long { 1.12 } else { 1.0 };
        if note.time - last_in_lane[note.lane.index()] < lane_gap {
            continue;
        }

        // Global tap spacing across both lanes.
        if note.kind == NoteKind::Tap && note.time - last_tap < profile.min_global_tap_gap {
            continue;
        }

        if run_lane == Some(note.lane) {
            run_len += 1;
        } else {
            run_lane = Some(note.lane);
            run_len = 1;
        }
        last_in_lane[note.lane.index()] = note.time;
        if note.kind == NoteKind::Tap {
            last_tap = note.time;
        }
        out.push(note);
    }

    debug!(
        "scaler ({}): {} -> {} notes",
        difficulty.label(),
        notes.len(),
        out.len()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taps_on_lane(count: usize, step: f64, lane: Lane, strength: f64) -> Vec<Note> {
        (0..count)
            .map(|i| Note::tap(i as f64 * step, lane, strength))
            .collect()
    }

    #[test]
    fn test_weak_notes_dropped() {
        let mut notes = taps_on_lane(10, 0.5, Lane::Bottom, 0.5);
        notes[3].strength = 0.01;
        let scaled = scale_chart(&notes, Difficulty::Normal);
        assert_eq!(scaled.len(), 9);
    }

    #[test]
    fn test_easy_simplifies_longs() {
        let notes = vec![
            Note::hold(0.0, Lane::Top, 0.8, 1.0),
            Note::slide(2.0, Lane::Bottom, 0.7, 1.0, Lane::Top),
            Note::tap(4.0, Lane::Top, 0.9),
        ];
        let scaled = scale_chart(&notes, Difficulty::Easy);
        assert!(scaled.iter().all(|n| n.kind == NoteKind::Tap));
        assert_eq!(scaled.len(), 3);
    }

    #[test]
    fn test_lane_run_limit_flips() {
        // Ten bottom-lane taps on Normal (limit 5): the run never reaches
        // five in a row because the fifth tap flips to the top lane.
        let notes = taps_on_lane(10, 0.5, Lane::Bottom, 0.6);
        let scaled = scale_chart(&notes, Difficulty::Normal);
        assert_eq!(scaled.len(), 10);
        let mut longest = 0usize;
        let mut run = 0usize;
        let mut lane = None;
        for n in &scaled {
            if Some(n.lane) == lane {
                run += 1;
            } else {
                lane = Some(n.lane);
                run = 1;
            }
            longest = longest.max(run);
        }
        assert!(longest < 5, "longest run {longest}");
        assert!(scaled.iter().any(|n| n.lane == Lane::Top));
    }

    #[test]
    fn test_lane_gap_enforced() {
        let notes = vec![
            Note::tap(0.0, Lane::Bottom, 0.6),
            Note::tap(0.02, Lane::Bottom, 0.5),
            Note::tap(0.3, Lane::Bottom, 0.5),
        ];
        let scaled = scale_chart(&notes, Difficulty::Easy);
        // 0.02 violates Easy's 0.20 lane gap; 0.3 passes.
        assert_eq!(scaled.len(), 2);
        assert!((scaled[1].time - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_global_tap_gap_spans_lanes() {
        let notes = vec![
            Note::tap(0.0, Lane::Bottom, 0.6),
            Note::tap(0.01, Lane::Top, 0.6),
        ];
        let scaled = scale_chart(&notes, Difficulty::Expert);
        // 10 ms across lanes is under Expert's 15 ms global tap gap.
        assert_eq!(scaled.len(), 1);
    }
}
