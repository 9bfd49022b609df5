//! Finalization: an ordered cascade of pure refinement passes over the
//! note list, followed by a holistic rebalancing loop. Every pass takes
//! an immutable input list and returns a new ordered list; the long-note
//! interval bookkeeping is rebuilt per pass.

pub mod passes;
pub mod rebalance;

use log::debug;

use crate::chart::{Lane, Note, NoteKind};
use crate::context::Context;
use crate::{MIN_HOLD_DURATION_SEC, MIN_SLIDE_DURATION_SEC};

/// Run the full refinement cascade in its contractual order.
pub fn finalize_chart(notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let passes: [(&str, fn(Vec<Note>, &Context) -> Vec<Note>); 12] = [
        ("align_to_music_grid", passes::align_to_music_grid),
        ("enforce_physical_playability", passes::enforce_physical_playability),
        ("resolve_long_note_collisions", passes::resolve_long_note_collisions),
        ("resolve_visual_note_overlaps", passes::resolve_visual_note_overlaps),
        ("polish_rhythm_sync", passes::polish_rhythm_sync_by_strong_onsets),
        ("stabilize_generation_quality", passes::stabilize_generation_quality),
        ("enforce_final_music_anchoring", passes::enforce_final_music_anchoring),
        ("inject_burst_breakers", passes::inject_burst_breaker_notes),
        ("enforce_burst_non_overlap", passes::enforce_burst_non_overlap),
        ("sanitize_final_long_notes", passes::sanitize_final_long_notes),
        ("prune_impossible_nested_notes", passes::prune_impossible_nested_notes),
        ("enforce_strict_long_body_exclusion", passes::enforce_strict_long_body_exclusion),
    ];

    let mut notes = notes;
    for (name, pass) in passes {
        let before = notes.len();
        notes = pass(notes, ctx);
        if notes.len() != before {
            debug!("{name}: {before} -> {} notes", notes.len());
        }
    }
    notes
}

// ── Shared long-note helpers ──────────────────────────────────────────

/// Minimum surviving duration for a long of this kind.
pub(crate) fn min_long_duration(kind: NoteKind, interval: f64) -> f64 {
    match kind {
        NoteKind::Slide => MIN_SLIDE_DURATION_SEC.max(0.78 * interval),
        NoteKind::Hold => MIN_HOLD_DURATION_SEC.max(0.62 * interval),
        NoteKind::Burst => 0.72f64.max(0.62 * interval),
        NoteKind::Tap => 0.0,
    }
}

/// Lanes a long note occupies for long-vs-long collision purposes.
/// Slides involve both lanes (straight ones visually sweep the field,
/// diagonal ones land on the other lane).
pub(crate) fn occupied_lanes(note: &Note) -> [bool; 2] {
    match note.kind {
        NoteKind::Hold | NoteKind::Burst => {
            let mut lanes = [false; 2];
            lanes[note.lane.index()] = true;
            lanes
        }
        NoteKind::Slide => [true, true],
        NoteKind::Tap => [false; 2],
    }
}

/// Two concurrent slides are playable iff they form an X-cross (both
/// diagonal from opposite lanes) or a parallel pair (both straight on
/// different lanes) starting within 0.18 beats of each other.
pub(crate) fn pair_compatible(a: &Note, b: &Note, interval: f64) -> bool {
    if a.kind != NoteKind::Slide || b.kind != NoteKind::Slide {
        return false;
    }
    if (a.time - b.time).abs() > 0.18 * interval {
        return false;
    }
    let x_cross = a.is_diagonal_slide() && b.is_diagonal_slide() && a.lane != b.lane;
    let parallel = !a.is_diagonal_slide() && !b.is_diagonal_slide() && a.lane != b.lane;
    x_cross || parallel
}

/// Whether a tap at (`time`, `lane`) sits inside `long`'s body,
/// honoring the diagonal-slide baton window.
pub(crate) fn tap_inside_long_body(time: f64, lane: Lane, long: &Note, epsilon: f64) -> bool {
    if !long.is_long() || !long.body_blocks(lane) {
        return false;
    }
    if time < long.time + epsilon || time > long.end_time() - epsilon {
        return false;
    }
    if let Some((lo, hi)) = long.baton_window() {
        if Some(lane) == long.target_lane && time >= lo && time <= hi {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_long_durations() {
        // At 120 BPM the beat-relative floors dominate the host minima.
        assert!((min_long_duration(NoteKind::Slide, 0.5) - 0.39).abs() < 1e-9);
        assert!((min_long_duration(NoteKind::Hold, 0.5) - 0.31).abs() < 1e-9);
        assert_eq!(min_long_duration(NoteKind::Tap, 0.5), 0.0);
        // At very slow tempos the host minima take over.
        assert_eq!(min_long_duration(NoteKind::Hold, 0.1), MIN_HOLD_DURATION_SEC.max(0.062));
    }

    #[test]
    fn test_pair_compatible_shapes() {
        let i = 0.5;
        let x1 = Note::slide(1.0, Lane::Top, 0.5, 1.0, Lane::Bottom);
        let x2 = Note::slide(1.05, Lane::Bottom, 0.5, 1.0, Lane::Top);
        assert!(pair_compatible(&x1, &x2, i));

        let p1 = Note::slide(1.0, Lane::Top, 0.5, 1.0, Lane::Top);
        let p2 = Note::slide(1.0, Lane::Bottom, 0.5, 1.0, Lane::Bottom);
        assert!(pair_compatible(&p1, &p2, i));

        // Mixed shapes or late starts are not playable together.
        assert!(!pair_compatible(&x1, &p2, i));
        let late = Note::slide(1.5, Lane::Bottom, 0.5, 1.0, Lane::Top);
        assert!(!pair_compatible(&x1, &late, i));
    }

    #[test]
    fn test_tap_inside_long_body_baton_exempt() {
        let diag = Note::slide(10.0, Lane::Top, 0.5, 2.0, Lane::Bottom);
        // Inside the body on the start lane: blocked.
        assert!(tap_inside_long_body(11.0, Lane::Top, &diag, 0.01));
        // Inside the baton window on the target lane: allowed.
        assert!(!tap_inside_long_body(11.0, Lane::Bottom, &diag, 0.01));
        // On the target lane but outside the window: blocked.
        assert!(tap_inside_long_body(10.3, Lane::Bottom, &diag, 0.01));

        let hold = Note::hold(10.0, Lane::Top, 0.5, 2.0);
        assert!(tap_inside_long_body(11.0, Lane::Top, &hold, 0.01));
        assert!(!tap_inside_long_body(11.0, Lane::Bottom, &hold, 0.01));
    }
}
