//! Beat mapper: the primary composer. Walks the beat + half-beat grid,
//! picks at most one onset per grid slot, decides lane by instrument
//! class and type by spectral character, then humanizes the result
//! (chorus impact, bar anchors, density smoothing, streak breaking,
//! phrase-edge slides, breath insertion).

use std::collections::VecDeque;

use log::debug;

use crate::analysis::onsets::{Band, TimedOnset};
use crate::chart::{Difficulty, Lane, Note, NoteKind, SectionKind, sort_notes};
use crate::context::{Context, band_weights, det_gate};
use crate::{MIN_HOLD_DURATION_SEC, MIN_SLIDE_DURATION_SEC};

#[derive(Debug, Clone, Copy, Default)]
pub struct MapperOptions {
    /// Enriched candidates also run the supplementary onset pass.
    pub enrich: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Downbeat,
    Offbeat,
}

#[derive(Debug, Clone, Copy)]
struct GridPoint {
    time: f64,
    slot: Slot,
    beat_idx: usize,
}

/// Carried state of the grid walk.
struct MapperState {
    last_note_time: f64,
    last_lane: Option<Lane>,
    consecutive_same_lane: usize,
    lane_occupied_until: [f64; 2],
    recent_lanes: VecDeque<Lane>,
}

const RECENT_LANE_WINDOW: usize = 12;

impl MapperState {
    fn new() -> MapperState {
        MapperState {
            last_note_time: f64::NEG_INFINITY,
            last_lane: None,
            consecutive_same_lane: 0,
            lane_occupied_until: [f64::NEG_INFINITY; 2],
            recent_lanes: VecDeque::with_capacity(RECENT_LANE_WINDOW),
        }
    }

    fn record(&mut self, note: &Note) {
        if Some(note.lane) == self.last_lane {
            self.consecutive_same_lane += 1;
        } else {
            self.consecutive_same_lane = 1;
        }
        self.last_lane = Some(note.lane);
        self.last_note_time = note.time;
        self.lane_occupied_until[note.lane.index()] =
            note.time + note.duration.map_or(0.08, |d| d + 0.05);
        if self.recent_lanes.len() == RECENT_LANE_WINDOW {
            self.recent_lanes.pop_front();
        }
        self.recent_lanes.push_back(note.lane);
    }

    fn recent_ratio(&self, lane: Lane) -> f64 {
        if self.recent_lanes.is_empty() {
            return 0.0;
        }
        let n = self.recent_lanes.iter().filter(|&&l| l == lane).count();
        n as f64 / self.recent_lanes.len() as f64
    }
}

/// Compose a note list from the context's onset timeline.
pub fn compose(ctx: &Context, options: MapperOptions) -> Vec<Note> {
    let grid = build_grid(ctx);
    let mut state = MapperState::new();
    let mut notes: Vec<Note> = Vec::with_capacity(grid.len() / 2);

    for point in &grid {
        if let Some(note) = map_grid_point(ctx, &state, point) {
            state.record(&note);
            notes.push(note);
        }
    }
    debug!("grid walk emitted {} notes", notes.len());

    // Humanization, in order.
    chorus_impact(&mut notes, ctx);
    add_bar_anchors(&mut notes, ctx);
    cap_bar_density(&mut notes, ctx);
    break_lane_streaks(&mut notes, ctx);
    promote_phrase_edge_slides(&mut notes, ctx);
    inject_rests(&mut notes, ctx);

    if options.enrich {
        supplement_from_onsets(&mut notes, ctx);
    }

    sort_notes(&mut notes);
    notes
}

// ── Grid walk ─────────────────────────────────────────────────────────

fn build_grid(ctx: &Context) -> Vec<GridPoint> {
    let beats = &ctx.beats.beats;
    let melodic = ctx.features.melodic_focus >= 0.56 || ctx.features.sustained_focus >= 0.56;
    let mut grid = Vec::with_capacity(beats.len() * 3);
    for (i, w) in beats.windows(2).enumerate() {
        let (a, b) = (w[0], w[1]);
        let span = b - a;
        let kind = ctx.section_kind_at(a);
        grid.push(GridPoint { time: a, slot: Slot::Downbeat, beat_idx: i });
        grid.push(GridPoint {
            time: a + span * 0.5,
            slot: Slot::Offbeat,
            beat_idx: i,
        });
        if ctx.difficulty.uses_quarter_grid() && kind.is_highlight() {
            grid.push(GridPoint { time: a + span * 0.25, slot: Slot::Offbeat, beat_idx: i });
            grid.push(GridPoint { time: a + span * 0.75, slot: Slot::Offbeat, beat_idx: i });
        } else if melodic && kind == SectionKind::Bridge {
            grid.push(GridPoint { time: a + span / 3.0, slot: Slot::Offbeat, beat_idx: i });
            grid.push(GridPoint { time: a + span * 2.0 / 3.0, slot: Slot::Offbeat, beat_idx: i });
        }
    }
    if let Some((&last, rest)) = beats.split_last() {
        grid.push(GridPoint {
            time: last,
            slot: Slot::Downbeat,
            beat_idx: rest.len(),
        });
    }
    grid.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
    grid
}

fn offbeat_gate(difficulty: Difficulty, kind: SectionKind) -> f64 {
    let base = match difficulty {
        Difficulty::Easy => 0.85,
        Difficulty::Normal => 0.62,
        Difficulty::Hard => 0.45,
        Difficulty::Expert => 0.34,
    };
    if kind.is_highlight() { base * 0.82 } else { base }
}

fn map_grid_point(ctx: &Context, state: &MapperState, point: &GridPoint) -> Option<Note> {
    let interval = ctx.beat_interval();
    let half = interval * 0.5;
    let kind = ctx.section_kind_at(point.time);
    let density = kind.base_density();

    if density <= 0.0 {
        return None;
    }
    if point.slot == Slot::Offbeat && density < offbeat_gate(ctx.difficulty, kind) {
        return None;
    }

    // Minimum spacing since the last emitted note; drive tightens it.
    let min_gap = (interval * (0.20 - ctx.features.drive_score * 0.07)).max(0.06);
    if point.time - state.last_note_time < min_gap {
        return None;
    }

    let window = match point.slot {
        Slot::Downbeat => half * 0.64,
        Slot::Offbeat => half * 0.38,
    };
    let onset = best_onset_near(ctx, point, window);

    let (time, strength, band) = match onset {
        Some(o) => {
            let delta = o.time - point.time;
            let max_nudge = half * if point.slot == Slot::Downbeat { 0.36 } else { 0.52 };
            let time = if delta.abs() <= max_nudge {
                point.time + delta * (0.72 + 0.06 * o.strength)
            } else {
                point.time
            };
            (time, o.strength, o.band)
        }
        None => {
            // Fill notes only on the 1st/3rd beat of a bar in dense sections.
            let fill_floor = if kind.is_highlight() { 0.44 } else { 0.50 };
            let on_fill_beat =
                point.slot == Slot::Downbeat && matches!(point.beat_idx % 4, 0 | 2);
            if !(on_fill_beat && density >= fill_floor) {
                return None;
            }
            (point.time, 0.42, Band::Mixed)
        }
    };

    if ctx.features.intro_quietness > 0.7 && kind.is_quiet() && strength < 0.55 {
        return None;
    }

    let lane = decide_lane(ctx, state, band);
    let note = decide_kind(ctx, state, point, time, lane, strength, band);

    // Physical occupancy: try the preferred lane, then the other.
    let note = if time < state.lane_occupied_until[note.lane.index()] + 0.1 {
        let flipped = flip_note_lane(&note);
        if time < state.lane_occupied_until[flipped.lane.index()] + 0.1 {
            return None;
        }
        flipped
    } else {
        note
    };
    Some(note)
}

fn best_onset_near<'a>(ctx: &'a Context, point: &GridPoint, window: f64) -> Option<&'a TimedOnset> {
    let kind = ctx.section_kind_at(point.time);
    let weights = band_weights(kind);
    let melodic_song = ctx.features.melodic_focus >= 0.6;
    let mut best: Option<(&TimedOnset, f64, f64)> = None; // (onset, score, dist)
    for o in ctx.onsets_in(point.time - window, point.time + window) {
        let dist = (o.time - point.time).abs();
        let proximity = 1.0 - dist / window;
        let beat_bias = if point.slot == Slot::Downbeat { 0.05 } else { 0.0 };
        let melodic_bias = if melodic_song && o.band == Band::Mid { 0.04 } else { 0.0 };
        let score = 0.38 * proximity
            + 0.34 * weights.weight(o.band)
            + 0.22 * o.strength
            + beat_bias
            + melodic_bias;
        let better = match best {
            None => true,
            Some((_, bs, bd)) => score > bs || (score == bs && dist < bd),
        };
        if better {
            best = Some((o, score, dist));
        }
    }
    best.map(|(o, _, _)| o)
}

// ── Lane decision ─────────────────────────────────────────────────────

fn decide_lane(ctx: &Context, state: &MapperState, band: Band) -> Lane {
    let stats = &ctx.onset_stats;
    let (lane, anchored) = match band {
        Band::Low => (Lane::Bottom, true),
        Band::High => (Lane::Top, true),
        Band::Mid => {
            if stats.high_share - stats.low_share > 0.12 {
                (Lane::Top, false)
            } else if stats.low_share - stats.high_share > 0.12 {
                (Lane::Bottom, false)
            } else {
                (alternate(state), false)
            }
        }
        Band::Mixed => (alternate(state), false),
    };

    // Anti-monotony override, never applied to hard low/high anchors.
    if !anchored
        && (state.consecutive_same_lane >= 4 && state.last_lane == Some(lane)
            || state.recent_ratio(lane) >= 0.65)
    {
        return lane.opposite();
    }
    lane
}

fn alternate(state: &MapperState) -> Lane {
    match state.last_lane {
        Some(l) => l.opposite(),
        None => Lane::Bottom,
    }
}

fn flip_note_lane(note: &Note) -> Note {
    let mut flipped = note.clone();
    flipped.lane = note.lane.opposite();
    if let Some(target) = note.target_lane {
        // Preserve the straight/diagonal shape.
        flipped.target_lane = Some(if target == note.lane {
            flipped.lane
        } else {
            flipped.lane.opposite()
        });
    }
    flipped
}

// ── Type decision ─────────────────────────────────────────────────────

fn hold_min(interval: f64) -> f64 {
    MIN_HOLD_DURATION_SEC.max(0.62 * interval)
}

fn slide_min(interval: f64) -> f64 {
    MIN_SLIDE_DURATION_SEC.max(0.78 * interval)
}

fn decide_kind(
    ctx: &Context,
    state: &MapperState,
    point: &GridPoint,
    time: f64,
    lane: Lane,
    strength: f64,
    _band: Band,
) -> Note {
    let interval = ctx.beat_interval();
    let kind = ctx.section_kind_at(time);
    let profile = ctx.nearest_profile(time);
    let gap = ctx
        .next_onset_after(time)
        .map_or(ctx.duration - time, |o| o.time - time);

    // Long breath holds in bridges.
    if kind == SectionKind::Bridge && gap > 1.75 * interval && strength > 0.52 {
        let dur = (gap * 0.5).min(2.0 * interval).max(hold_min(interval));
        return Note::hold(time, lane, strength, dur);
    }

    // Sustained, tonal material becomes slides.
    let sustained_like = profile.is_some_and(|p| {
        p.tonal >= 0.62 && p.transient <= 0.38 && p.percussive <= 0.5
    }) && strength <= 0.66
        && ctx.features.sustained_focus >= 0.58;
    if sustained_like
        && !kind.is_quiet()
        && gap > 0.8 * interval
        && gap < 2.45 * interval
    {
        let dur = (gap * 0.85).clamp(0.9 * interval, 2.5 * interval).max(slide_min(interval));
        let cross = det_gate(time, lane.index(), point.beat_idx, 3)
            && time >= state.lane_occupied_until[lane.opposite().index()] + 0.1;
        let target = if cross { lane.opposite() } else { lane };
        return Note::slide(time, lane, strength, dur, target);
    }

    // Phrase-edge drop slides.
    if kind == SectionKind::Drop
        && should_insert_slide(ctx, point.beat_idx, time, lane)
        && gap > 0.8 * interval
    {
        let dur = (gap * 0.9).min(1.6 * interval).max(slide_min(interval));
        return Note::slide(time, lane, strength, dur, lane.opposite());
    }

    // Staccato character and everything else: a tap.
    Note::tap(time, lane, strength)
}

/// Drop-section slide gate: phrase-edge beats only, thinned by the
/// deterministic hash with the modulus keyed to slide affinity.
fn should_insert_slide(ctx: &Context, beat_idx: usize, time: f64, lane: Lane) -> bool {
    let phrase_edge = matches!(beat_idx % 16, 14 | 15) || matches!(beat_idx % 8, 3 | 7);
    if !phrase_edge {
        return false;
    }
    let affinity = ctx.features.slide_affinity;
    let modulo = if affinity >= 0.6 {
        2
    } else if affinity >= 0.35 {
        3
    } else {
        4
    };
    det_gate(time, lane.index(), beat_idx, modulo)
}

// ── Humanization ──────────────────────────────────────────────────────

/// Clear the approach to each chorus and make sure it opens on a strong tap.
fn chorus_impact(notes: &mut Vec<Note>, ctx: &Context) {
    let interval = ctx.beat_interval();
    for section in ctx.sections.iter().filter(|s| s.kind == SectionKind::Chorus) {
        let clear_lo = section.start - 2.0 * interval;
        let clear_hi = section.start - 0.25 * interval;
        notes.retain(|n| n.time < clear_lo || n.time > clear_hi);

        let has_opener = notes
            .iter()
            .any(|n| (n.time - section.start).abs() <= 0.1 * interval);
        if !has_opener {
            let time = ctx
                .beats
                .nearest_beat(section.start)
                .map_or(section.start, |(i, _)| ctx.beats.beats[i]);
            let lane = if ctx.features.percussive_focus >= 0.5 {
                Lane::Bottom
            } else {
                Lane::Top
            };
            notes.push(Note::tap(time, lane, 0.85));
            sort_notes(notes);
        }
    }
}

/// Bar-start anchors in highlight sections.
fn add_bar_anchors(notes: &mut Vec<Note>, ctx: &Context) {
    let interval = ctx.beat_interval();
    let mut added = false;
    for (i, &beat) in ctx.beats.beats.iter().enumerate() {
        if i % 4 != 0 || !ctx.section_kind_at(beat).is_highlight() {
            continue;
        }
        let near = notes
            .iter()
            .any(|n| n.time >= beat - 0.1 * interval && n.time <= beat + 0.25 * interval);
        if near {
            continue;
        }
        let lane = if det_gate(beat, 0, i, 2) { Lane::Bottom } else { Lane::Top };
        let clear = !notes.iter().any(|n| {
            (n.lane == lane && (n.time - beat).abs() < 0.3 * interval)
                || (n.is_long() && n.time <= beat && beat <= n.end_time())
        });
        if clear {
            notes.push(Note::tap(beat, lane, 0.6));
            added = true;
        }
    }
    if added {
        sort_notes(notes);
    }
}

/// Sliding 4-beat window hard cap of 11 notes; weakest taps go first.
fn cap_bar_density(notes: &mut Vec<Note>, ctx: &Context) {
    let window = 4.0 * ctx.beat_interval();
    loop {
        let mut dropped = false;
        'outer: for start_idx in 0..notes.len() {
            let w0 = notes[start_idx].time;
            let in_window: Vec<usize> = (start_idx..notes.len())
                .take_while(|&i| notes[i].time < w0 + window)
                .collect();
            if in_window.len() <= 11 {
                continue;
            }
            // Drop the weakest tap inside this window.
            let weakest = in_window
                .iter()
                .copied()
                .filter(|&i| notes[i].kind == NoteKind::Tap)
                .min_by(|&a, &b| {
                    notes[a]
                        .strength
                        .partial_cmp(&notes[b].strength)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            if let Some(i) = weakest {
                notes.remove(i);
                dropped = true;
                break 'outer;
            }
        }
        if !dropped {
            break;
        }
    }
}

/// Flip the latest tap of an overlong same-lane run.
fn break_lane_streaks(notes: &mut [Note], ctx: &Context) {
    let mut run_lane: Option<Lane> = None;
    let mut run_len = 0usize;
    for i in 0..notes.len() {
        let lane = notes[i].lane;
        if Some(lane) == run_lane {
            run_len += 1;
        } else {
            run_lane = Some(lane);
            run_len = 1;
        }
        let limit = if ctx.section_kind_at(notes[i].time).is_highlight() { 3 } else { 4 };
        if run_len >= limit && notes[i].kind == NoteKind::Tap {
            notes[i].lane = lane.opposite();
            run_lane = Some(notes[i].lane);
            run_len = 1;
        }
    }
}

/// Promote phrase-edge taps in highlight sections to short slides.
fn promote_phrase_edge_slides(notes: &mut [Note], ctx: &Context) {
    let interval = ctx.beat_interval();
    let times: Vec<f64> = notes.iter().map(|n| n.time).collect();
    for i in 0..notes.len() {
        let (time, lane, strength, kind) =
            (notes[i].time, notes[i].lane, notes[i].strength, notes[i].kind);
        if kind != NoteKind::Tap || !ctx.section_kind_at(time).is_highlight() {
            continue;
        }
        let beat_idx = ctx.beats.beat_index_at(time);
        if !matches!(beat_idx % 8, 3 | 7) {
            continue;
        }
        let gap = times.get(i + 1).map_or(f64::INFINITY, |next| next - time);
        if gap < 0.35 * interval || gap > 1.1 * interval {
            continue;
        }
        let dur = (gap * 0.8).min(gap - 0.06);
        if dur < slide_min(interval) {
            continue;
        }
        let target = if det_gate(time, lane.index(), beat_idx, 2) {
            lane.opposite()
        } else {
            lane
        };
        notes[i] = Note::slide(time, lane, strength, dur, target);
    }
}

/// Give players a breath: every sixth bar of a non-highlight section
/// loses its weakest tap.
fn inject_rests(notes: &mut Vec<Note>, ctx: &Context) {
    let beats = &ctx.beats.beats;
    if beats.len() < 8 {
        return;
    }
    let mut to_drop: Vec<usize> = Vec::new();
    let mut bar_idx = 0usize;
    let mut b = 0usize;
    while b + 4 <= beats.len() {
        let bar_start = beats[b];
        let bar_end = beats[(b + 4).min(beats.len() - 1)];
        let kind = ctx.section_kind_at(bar_start);
        if bar_idx % 6 == 5 && kind.is_playable() && !kind.is_highlight() {
            let weakest = notes
                .iter()
                .enumerate()
                .filter(|(_, n)| {
                    n.kind == NoteKind::Tap && n.time >= bar_start && n.time < bar_end
                })
                .min_by(|(_, a), (_, b)| {
                    a.strength
                        .partial_cmp(&b.strength)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            if let Some((i, _)) = weakest {
                to_drop.push(i);
            }
        }
        bar_idx += 1;
        b += 4;
    }
    for &i in to_drop.iter().rev() {
        notes.remove(i);
    }
}

// ── Supplementary onset pass ──────────────────────────────────────────

/// After the grid walk, anchor any remaining standout onsets that fell
/// between grid slots.
fn supplement_from_onsets(notes: &mut Vec<Note>, ctx: &Context) {
    let interval = ctx.beat_interval();
    let half = interval * 0.5;
    let threshold =
        ctx.onset_stats.p68 * (1.1 - 0.2 * ctx.features.drive_score).clamp(0.8, 1.1);
    let grid = ctx.beats.grid_points(true, false, false);
    let mut added = 0usize;

    for o in &ctx.onsets {
        if o.strength < threshold {
            continue;
        }
        let Some((gi, dist)) = crate::analysis::tempo::nearest_in_sorted(&grid, o.time) else {
            continue;
        };
        if dist > 0.82 * half {
            continue;
        }
        let time = grid[gi];
        if !ctx.section_kind_at(time).is_playable() {
            continue;
        }
        // Occupancy window: nothing already nearby on either lane.
        let blocked = notes.iter().any(|n| {
            (n.time - time).abs() < 0.6 * interval
                || (n.is_long() && n.time <= time && time <= n.end_time() + 0.1)
        });
        if blocked {
            continue;
        }
        let lane = match o.band {
            Band::Low => Lane::Bottom,
            Band::High => Lane::Top,
            _ => {
                if det_gate(time, 0, gi, 2) {
                    Lane::Bottom
                } else {
                    Lane::Top
                }
            }
        };
        let sustained_like = ctx
            .nearest_profile(time)
            .is_some_and(|p| p.tonal >= 0.62 && p.transient <= 0.38)
            && ctx.features.sustained_focus >= 0.58;
        let note = if sustained_like && det_gate(time, lane.index(), gi, 3) {
            let next = notes
                .iter()
                .map(|n| n.time)
                .find(|&t| t > time)
                .unwrap_or(ctx.duration);
            let dur = ((next - time) * 0.7).min(1.4 * interval);
            if dur >= slide_min(interval) {
                Note::slide(time, lane, o.strength, dur, lane)
            } else {
                Note::tap(time, lane, o.strength)
            }
        } else {
            Note::tap(time, lane, o.strength)
        };
        notes.push(note);
        added += 1;
        sort_notes(notes);
    }
    if added > 0 {
        debug!("supplement pass anchored {added} onsets");
    }
}
