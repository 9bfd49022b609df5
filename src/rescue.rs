//! Emergency rescue: when every upstream stage fails to produce enough
//! notes, build a minimal musically-anchored chart straight from the
//! strongest onsets — and if even that is empty, synthesize a short
//! alternating tap line on the beat grid.

use log::warn;

use crate::chart::{Lane, Note};
use crate::context::Context;

/// Minimal chart from strong onsets snapped to the beat grid,
/// alternating lanes with a percussive-bias bottom start.
pub fn emergency_chart(ctx: &Context) -> Vec<Note> {
    let interval = ctx.beat_interval();
    let median = ctx.onset_stats.median_strength;
    let min_gap = 0.45 * interval;
    let mut lane = start_lane(ctx);
    let mut last = f64::NEG_INFINITY;
    let mut out: Vec<Note> = Vec::new();

    for o in &ctx.onsets {
        if o.strength < median {
            continue;
        }
        let time = ctx
            .beats
            .nearest_beat(o.time)
            .map_or(o.time, |(i, _)| ctx.beats.beats[i]);
        if time - last < min_gap {
            continue;
        }
        out.push(Note::tap(time, lane, o.strength.max(0.5)));
        lane = lane.opposite();
        last = time;
    }

    if out.is_empty() {
        warn!("rescue found no usable onsets, synthesizing fallback taps");
        out = synthesized_taps(ctx);
    }
    out
}

/// Taps on every beat (every other on Easy), alternating lanes. Used
/// when the analyzer reports too few onsets to compose from.
pub fn beat_grid_chart(ctx: &Context) -> Vec<Note> {
    let step = if ctx.difficulty == crate::chart::Difficulty::Easy { 2 } else { 1 };
    let mut lane = start_lane(ctx);
    let mut out = Vec::with_capacity(ctx.beats.beats.len() / step);
    for &beat in ctx.beats.beats.iter().step_by(step) {
        out.push(Note::tap(beat, lane, 0.5));
        lane = lane.opposite();
    }
    out
}

/// Last resort: 8 alternating taps on consecutive beats, starting at
/// `max(0.35, min(duration·0.2, 1.2))`.
pub fn synthesized_taps(ctx: &Context) -> Vec<Note> {
    let start = 0.35f64.max((ctx.duration * 0.2).min(1.2));
    let interval = ctx.beat_interval();
    let mut lane = start_lane(ctx);
    let mut out = Vec::with_capacity(8);
    let first = ctx
        .beats
        .beats
        .iter()
        .copied()
        .find(|&b| b >= start)
        .unwrap_or(start);
    for k in 0..8 {
        let time = first + k as f64 * interval;
        if time >= ctx.duration && k > 0 {
            break;
        }
        out.push(Note::tap(time, lane, 0.5));
        lane = lane.opposite();
    }
    out
}

fn start_lane(ctx: &Context) -> Lane {
    if ctx.features.percussive_focus >= 0.5 {
        Lane::Bottom
    } else {
        Lane::Top
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::SongFeatures;
    use crate::analysis::onsets::{Band, TimedOnset};
    use crate::analysis::tempo::BeatGrid;
    use crate::chart::Difficulty;
    use crate::config::{GenOptions, RuntimePerf};
    use crate::context::OnsetStats;

    fn ctx_fixture(duration: f64, onsets: Vec<TimedOnset>, difficulty: Difficulty) -> Context {
        let stats = OnsetStats::from_timeline(&onsets);
        Context {
            duration,
            difficulty,
            sections: Vec::new(),
            beats: BeatGrid::fixed(120.0, 0.0, duration),
            onsets,
            onset_stats: stats,
            profiles: Vec::new(),
            features: SongFeatures::default(),
            perf: RuntimePerf { cores: 4, memory_gb: 8.0 },
            options: GenOptions::default(),
        }
    }

    #[test]
    fn test_emergency_chart_alternates_lanes() {
        let onsets: Vec<TimedOnset> = (0..20)
            .map(|i| TimedOnset {
                time: i as f64 * 0.5 + 0.03,
                strength: 0.7,
                band: Band::Low,
            })
            .collect();
        let ctx = ctx_fixture(20.0, onsets, Difficulty::Expert);
        let chart = emergency_chart(&ctx);
        assert!(chart.len() >= 10);
        for w in chart.windows(2) {
            assert_ne!(w[0].lane, w[1].lane);
            assert!(w[1].time - w[0].time >= 0.225);
            // Snapped onto the beat grid.
            assert!((w[0].time / 0.5 - (w[0].time / 0.5).round()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_empty_onsets_synthesize_eight_taps() {
        let ctx = ctx_fixture(20.0, vec![], Difficulty::Expert);
        let chart = emergency_chart(&ctx);
        assert_eq!(chart.len(), 8);
        // Start clamp: min(20·0.2, 1.2) = 1.2.
        assert!(chart[0].time >= 1.2 - 1e-9);
        for w in chart.windows(2) {
            assert_ne!(w[0].lane, w[1].lane);
            assert!((w[1].time - w[0].time - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn test_beat_grid_chart_density_by_difficulty() {
        let ctx_normal = ctx_fixture(30.0, vec![], Difficulty::Normal);
        let ctx_easy = ctx_fixture(30.0, vec![], Difficulty::Easy);
        let normal = beat_grid_chart(&ctx_normal);
        let easy = beat_grid_chart(&ctx_easy);
        assert_eq!(normal.len(), 60);
        assert_eq!(easy.len(), 30);
        for w in normal.windows(2) {
            assert_ne!(w[0].lane, w[1].lane);
        }
    }
}
