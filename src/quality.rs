//! Chart quality scoring: each component measures how far an observed
//! statistic sits from its expectation (`1 − min(1, |actual−expected|/tol)`),
//! and the blended total picks between candidate charts and triggers the
//! rescue path when unmet.

use crate::chart::{ChartStats, Difficulty, Note};
use crate::context::Context;

/// Per-component scores in [0, 1] plus the weighted total.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityBreakdown {
    pub align: f64,
    pub density: f64,
    pub long_ratio: f64,
    pub pattern: f64,
    pub section_contrast: f64,
    pub intro_restraint: f64,
    pub flow: f64,
    pub lane_balance: f64,
    pub total: f64,
}

fn component(actual: f64, expected: f64, tolerance: f64) -> f64 {
    1.0 - ((actual - expected).abs() / tolerance).min(1.0)
}

/// Score a finished note list against the song's analysis.
pub fn score_chart(notes: &[Note], ctx: &Context) -> QualityBreakdown {
    if notes.is_empty() {
        return QualityBreakdown::default();
    }
    let interval = ctx.beat_interval();
    let stats = ChartStats::from_notes(notes, ctx.duration);

    // Alignment: fraction of notes on music (an onset or a beat).
    let tol = (0.12 * interval).max(0.03);
    let aligned = notes
        .iter()
        .filter(|n| {
            ctx.nearest_onset_where(n.time, tol, |_| true).is_some()
                || ctx
                    .beats
                    .nearest_beat(n.time)
                    .is_some_and(|(_, d)| d <= tol)
        })
        .count() as f64
        / notes.len() as f64;
    let align = component(aligned, 1.0, 0.45);

    // Density against the difficulty band's center.
    let (lo, hi) = ctx.difficulty.nps_band();
    let density = component(stats.nps, (lo + hi) * 0.5, (hi - lo) * 0.8);

    // Long-note share.
    let expected_long = (0.08 + 0.20 * ctx.features.sustained_focus)
        .min(ctx.difficulty.long_ratio_cap());
    let long_ratio = component(stats.long_ratio, expected_long, 0.25);

    // Pattern repetition: the longest same-lane run, as a share of a
    // 12-note window.
    let mut longest_run = 0usize;
    let mut run = 0usize;
    let mut last_lane = None;
    for n in notes {
        if Some(n.lane) == last_lane {
            run += 1;
        } else {
            last_lane = Some(n.lane);
            run = 1;
        }
        longest_run = longest_run.max(run);
    }
    let run_share = longest_run as f64 / 12.0f64.min(notes.len() as f64);
    let pattern = component(run_share, 0.3, 0.6);

    // Section contrast: highlight NPS over overall NPS.
    let highlight: Vec<&crate::chart::Section> = ctx
        .sections
        .iter()
        .filter(|s| s.kind.is_highlight() && s.duration() > 0.0)
        .collect();
    let section_contrast = if highlight.is_empty() || stats.nps <= 0.0 {
        1.0
    } else {
        let h_dur: f64 = highlight.iter().map(|s| s.duration()).sum();
        let h_count = notes
            .iter()
            .filter(|n| highlight.iter().any(|s| s.contains(n.time)))
            .count() as f64;
        component(h_count / h_dur / stats.nps, 1.30, 0.9)
    };

    // Intro restraint: the opening should hold back.
    let intro_window = 12.0f64.min(0.16 * ctx.duration).max(1e-9);
    let intro_nps =
        notes.iter().filter(|n| n.time < intro_window).count() as f64 / intro_window;
    let intro_restraint = component(intro_nps.min(3.0), 0.5, 1.5);

    // Flow: coefficient of variation of inter-note gaps.
    let flow = if notes.len() < 3 {
        0.5
    } else {
        let gaps: Vec<f64> = notes.windows(2).map(|w| w[1].time - w[0].time).collect();
        let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
        if mean <= 1e-9 {
            0.0
        } else {
            let var =
                gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
            component(var.sqrt() / mean, 0.55, 0.9)
        }
    };

    let lane_balance = component(stats.top_lane_ratio, 0.5, 0.35);

    let total = (0.37 * align
        + 0.10 * density
        + 0.10 * long_ratio
        + 0.11 * pattern
        + 0.09 * section_contrast
        + 0.09 * intro_restraint
        + 0.09 * flow
        + 0.06 * lane_balance)
        .clamp(0.0, 1.0);

    QualityBreakdown {
        align,
        density,
        long_ratio,
        pattern,
        section_contrast,
        intro_restraint,
        flow,
        lane_balance,
        total,
    }
}

/// Minimum acceptable quality; unmet scores trigger rescue
/// re-finalization.
pub fn quality_floor(ctx: &Context) -> f64 {
    let diff_offset = match ctx.difficulty {
        Difficulty::Easy => -0.04,
        Difficulty::Normal => 0.0,
        Difficulty::Hard => 0.02,
        Difficulty::Expert => 0.03,
    };
    0.46 + 0.07 * ctx.perf.quality_bias() + diff_offset
}

/// Candidate selection: the enriched chart wins when its score is close
/// enough, or when an energetic track keeps most of the note count
/// without a large score loss.
pub fn prefer_enriched(
    conservative: (&[Note], f64),
    enriched: (&[Note], f64),
    ctx: &Context,
) -> bool {
    let (c_notes, c_score) = conservative;
    let (e_notes, e_score) = enriched;
    if e_score >= c_score - 0.045 {
        return true;
    }
    let energetic = ctx.features.drive_score >= 0.62;
    energetic
        && e_notes.len() as f64 >= 0.82 * c_notes.len() as f64
        && e_score >= c_score - 0.12
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::SongFeatures;
    use crate::analysis::onsets::{Band, TimedOnset};
    use crate::analysis::tempo::BeatGrid;
    use crate::chart::{Lane, Section, SectionKind};
    use crate::config::{GenOptions, RuntimePerf};
    use crate::context::OnsetStats;

    fn ctx_fixture(onsets: Vec<TimedOnset>) -> Context {
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
            features: SongFeatures::default(),
            perf: RuntimePerf { cores: 4, memory_gb: 8.0 },
            options: GenOptions::default(),
        }
    }

    fn alternating_taps(count: usize, step: f64, offset: f64) -> Vec<Note> {
        (0..count)
            .map(|i| {
                Note::tap(
                    offset + i as f64 * step,
                    if i % 2 == 0 { Lane::Bottom } else { Lane::Top },
                    0.6,
                )
            })
            .collect()
    }

    #[test]
    fn test_aligned_chart_beats_misaligned() {
        let ctx = ctx_fixture(vec![]);
        let on_grid = alternating_taps(80, 0.5, 0.0);
        let off_grid = alternating_taps(80, 0.5, 0.13);
        let a = score_chart(&on_grid, &ctx);
        let b = score_chart(&off_grid, &ctx);
        assert!(a.align > b.align);
        assert!(a.total > b.total);
    }

    #[test]
    fn test_balanced_lanes_beat_single_lane() {
        let ctx = ctx_fixture(vec![]);
        let balanced = alternating_taps(80, 0.5, 0.0);
        let lopsided: Vec<Note> =
            (0..80).map(|i| Note::tap(i as f64 * 0.5, Lane::Bottom, 0.6)).collect();
        let a = score_chart(&balanced, &ctx);
        let b = score_chart(&lopsided, &ctx);
        assert!(a.lane_balance > b.lane_balance);
        assert!(a.pattern > b.pattern);
    }

    #[test]
    fn test_empty_chart_scores_zero() {
        let ctx = ctx_fixture(vec![]);
        assert_eq!(score_chart(&[], &ctx).total, 0.0);
    }

    #[test]
    fn test_quality_floor_tracks_difficulty_and_hardware() {
        let mut ctx = ctx_fixture(vec![]);
        let normal_floor = quality_floor(&ctx);
        ctx.difficulty = Difficulty::Expert;
        assert!(quality_floor(&ctx) > normal_floor);
        ctx.perf = RuntimePerf { cores: 16, memory_gb: 32.0 };
        assert!(quality_floor(&ctx) > normal_floor + 0.03);
    }

    #[test]
    fn test_prefer_enriched_margin_rule() {
        let ctx = ctx_fixture(vec![]);
        let notes = alternating_taps(40, 0.5, 0.0);
        let more = alternating_taps(50, 0.4, 0.0);
        // Within the 0.045 margin: enriched wins.
        assert!(prefer_enriched((&notes, 0.70), (&more, 0.66), &ctx));
        // Far below, calm track: conservative wins.
        assert!(!prefer_enriched((&notes, 0.70), (&more, 0.60), &ctx));
        // Far below but energetic with comparable counts: enriched wins.
        let mut hot = ctx;
        hot.features.drive_score = 0.7;
        assert!(prefer_enriched((&notes, 0.70), (&more, 0.60), &hot));
    }

    #[test]
    fn test_onsets_improve_alignment() {
        // Notes sitting on onsets (but off the beat grid) still align.
        let onsets: Vec<TimedOnset> = (0..80)
            .map(|i| TimedOnset { time: 0.13 + i as f64 * 0.5, strength: 0.6, band: Band::Mixed })
            .collect();
        let ctx = ctx_fixture(onsets);
        let notes = alternating_taps(80, 0.5, 0.13);
        let q = score_chart(&notes, &ctx);
        assert!(q.align > 0.9, "align={}", q.align);
    }
}
