//! The `generate` entry point: a straight-line sequence of pure stages
//! from decoded audio to a finished chart. Analyzer failures are
//! recovered locally with conservative defaults; the only fatal error is
//! a malformed audio buffer.

use std::time::Instant;

use log::{debug, info, warn};
use thiserror::Error;

use crate::analysis::features::summarize;
use crate::analysis::onsets::{TimelineInputs, build_timeline};
use crate::analysis::tempo::{
    BeatGrid, build_adaptive_tempo_segments, generate_beat_positions, select_best_tempo_grid,
};
use crate::analysis::{
    FluxOptions, HostAnalyzer, OnsetResult, SpectralOptions, fallback_bpm, fallback_sections,
};
use crate::audio::{AudioBuffer, AudioError};
use crate::chart::{Chart, ChartStats, Difficulty, Note, NoteKind, sort_notes};
use crate::config::{GenOptions, RuntimePerf};
use crate::context::{Context, OnsetStats};
use crate::finalize::{finalize_chart, rebalance::holistic_rebalance};
use crate::mapper::{MapperOptions, compose};
use crate::quality::{prefer_enriched, quality_floor, score_chart};
use crate::rescue;
use crate::scale::scale_chart;
use crate::theme::{enforce_theme_consistency, select_theme};

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Progress callback: (stage name, fraction in [0, 1]).
pub type ProgressFn<'a> = &'a mut dyn FnMut(&str, f64);

/// Reborrow a `&mut Option<ProgressFn>` as a shorter-lived `Option<ProgressFn>`,
/// so it can be passed down a call without holding the original borrow open
/// for the rest of the caller's scope.
fn reborrow_progress<'a>(p: &'a mut Option<ProgressFn<'_>>) -> Option<ProgressFn<'a>> {
    match p {
        Some(cb) => Some(&mut **cb),
        None => None,
    }
}

/// Chart generator over a host analyzer. Generate calls share no state;
/// running several in parallel is safe.
pub struct Generator<'a> {
    analyzer: &'a dyn HostAnalyzer,
    perf: RuntimePerf,
}

impl<'a> Generator<'a> {
    pub fn new(analyzer: &'a dyn HostAnalyzer) -> Generator<'a> {
        Generator {
            analyzer,
            perf: RuntimePerf::detect(),
        }
    }

    pub fn with_perf(analyzer: &'a dyn HostAnalyzer, perf: RuntimePerf) -> Generator<'a> {
        Generator { analyzer, perf }
    }

    /// Run the analysis stages only and return the per-call context.
    /// `generate` builds on this; hosts can also use it to score an
    /// existing chart against fresh analysis.
    pub fn analyze(
        &self,
        audio: &AudioBuffer,
        difficulty: Difficulty,
        mut progress: Option<ProgressFn>,
    ) -> Result<Context, ComposeError> {
        audio.validate()?;
        let duration = audio.duration();
        let options = GenOptions::from_env(&self.perf);
        if options.request_native_analyzer {
            debug!(
                "native analyzer requested (cores={}, mem={}GB)",
                self.perf.cores, self.perf.memory_gb
            );
        }
        let mut report = |stage: &str, fraction: f64| {
            if let Some(cb) = progress.as_mut() {
                cb(stage, fraction);
            }
        };

        // Collaborator calls, each recovered on failure.
        report("analyze", 0.05);
        let bpm_seed = self.analyzer.detect_bpm(audio).unwrap_or_else(|e| {
            warn!("bpm detection failed ({e}), assuming 120");
            fallback_bpm()
        });
        let sections = match self.analyzer.detect_sections(audio) {
            Ok(mut secs) if !secs.is_empty() => {
                secs.sort_by(|a, b| {
                    a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal)
                });
                secs.retain(|s| s.duration() > 0.0);
                secs
            }
            Ok(_) => fallback_sections(duration),
            Err(e) => {
                warn!("section detection failed ({e}), using single verse");
                fallback_sections(duration)
            }
        };
        let onset_result = self.detect_onsets(audio, &options);

        report("spectral", 0.18);
        let sample_points =
            generate_beat_positions(bpm_seed.bpm, duration, bpm_seed.first_beat_offset, 2);
        let mut profiles = self
            .analyzer
            .analyze_spectral_profiles(audio, &sample_points, &SpectralOptions::default())
            .unwrap_or_else(|e| {
                warn!("spectral analysis failed ({e}), continuing without profiles");
                Vec::new()
            });
        profiles
            .sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));

        let insufficient = onset_result.is_sparse();
        if insufficient {
            info!(
                "only {} onsets detected, falling back to beat-grid synthesis",
                onset_result.combined_count()
            );
        }

        report("tempo", 0.30);
        let beats = if insufficient {
            BeatGrid::fixed(bpm_seed.bpm, bpm_seed.first_beat_offset, duration)
        } else {
            let (bpm, offset) = select_best_tempo_grid(
                bpm_seed.bpm,
                bpm_seed.first_beat_offset,
                &onset_result.onsets,
                &onset_result.strengths,
            );
            let segments = build_adaptive_tempo_segments(
                &onset_result.onsets,
                &onset_result.strengths,
                bpm,
                duration,
            );
            BeatGrid::from_segments(bpm, offset, duration, segments)
        };

        report("features", 0.38);
        let features = summarize(&onset_result, &profiles, &sections, beats.bpm, duration);
        debug!(
            "features: drive={:.2} calm={:.2} sustained={:.2} percussive={:.2}",
            features.drive_score,
            features.calm_confidence,
            features.sustained_focus,
            features.percussive_focus
        );

        report("onsets", 0.45);
        let timeline = if insufficient {
            Vec::new()
        } else {
            build_timeline(&TimelineInputs {
                onsets: &onset_result,
                sections: &sections,
                profiles: &profiles,
                grid: &beats,
                difficulty,
                features: &features,
            })
        };
        let onset_stats = OnsetStats::from_timeline(&timeline);
        Ok(Context {
            duration,
            difficulty,
            sections,
            beats,
            onsets: timeline,
            onset_stats,
            profiles,
            features,
            perf: self.perf,
            options,
        })
    }

    /// Compose a chart for the given audio and difficulty.
    pub fn generate(
        &self,
        audio: &AudioBuffer,
        difficulty: Difficulty,
        mut progress: Option<ProgressFn>,
    ) -> Result<Chart, ComposeError> {
        let started = Instant::now();
        let ctx = self.analyze(audio, difficulty, reborrow_progress(&mut progress))?;
        let mut report = |stage: &str, fraction: f64| {
            if let Some(cb) = progress.as_mut() {
                cb(stage, fraction);
            }
        };

        // An empty timeline means the analyzer gave us nothing worth
        // composing from: synthesize straight off the beat grid.
        let notes = if ctx.onsets.is_empty() {
            report("mapping", 0.55);
            let raw = rescue::beat_grid_chart(&ctx);
            report("finalize", 0.75);
            finalize_chart(scale_chart(&raw, difficulty), &ctx)
        } else {
            report("mapping", 0.55);
            let conservative = compose(&ctx, MapperOptions { enrich: false });
            let enriched = compose(&ctx, MapperOptions { enrich: true });

            report("scale", 0.62);
            let conservative = scale_chart(&conservative, difficulty);
            let enriched = scale_chart(&enriched, difficulty);

            report("finalize", 0.75);
            let conservative = holistic_rebalance(finalize_chart(conservative, &ctx), &ctx);
            let enriched = holistic_rebalance(finalize_chart(enriched, &ctx), &ctx);

            report("quality", 0.85);
            let c_score = score_chart(&conservative, &ctx).total;
            let e_score = score_chart(&enriched, &ctx).total;
            debug!("candidates: conservative={c_score:.3} enriched={e_score:.3}");
            let (mut best, best_score) =
                if prefer_enriched((&conservative, c_score), (&enriched, e_score), &ctx) {
                    (enriched, e_score)
                } else {
                    (conservative, c_score)
                };

            // Quality floor: rescue re-finalization when unmet.
            let floor = quality_floor(&ctx);
            if best_score < floor {
                warn!("quality {best_score:.3} below floor {floor:.3}, trying rescue chart");
                let rescued = finalize_chart(rescue::emergency_chart(&ctx), &ctx);
                let r_score = score_chart(&rescued, &ctx).total;
                if r_score > best_score {
                    best = rescued;
                }
            }
            best
        };

        // Enforcers: count floor, count ceiling, then the theme.
        let mut notes = notes;
        let floor = difficulty.emergency_floor(ctx.duration);
        if notes.len() < floor {
            warn!("{} notes under the {floor} floor, emergency rescue", notes.len());
            notes = rescue::emergency_chart(&ctx);
        }
        notes = clamp_note_count(notes, &ctx);
        sort_notes(&mut notes);

        report("theme", 0.95);
        let stats = ChartStats::from_notes(&notes, ctx.duration);
        let avg_energy = if ctx.sections.is_empty() {
            0.5
        } else {
            ctx.sections.iter().map(|s| s.avg_energy).sum::<f64>() / ctx.sections.len() as f64
        };
        let picked = select_theme(&ctx.features, &stats);
        let visual_theme = enforce_theme_consistency(picked, &ctx.features, &stats, avg_energy);

        if ctx.options.debug_timing {
            debug!(
                "generate({}) took {:?} for {} notes",
                difficulty.label(),
                started.elapsed(),
                notes.len()
            );
        }
        report("done", 1.0);

        let total_notes = notes.len();
        Ok(Chart {
            bpm: ctx.beats.bpm,
            duration: ctx.duration,
            difficulty,
            visual_theme,
            notes,
            sections: ctx.sections,
            beat_positions: ctx.beats.beats,
            total_notes,
        })
    }

    /// Onset detection with the configured sensitivity sweep; the result
    /// with the most onsets wins. All-failure collapses to an empty
    /// result, which downstream treats as insufficient.
    fn detect_onsets(&self, audio: &AudioBuffer, options: &GenOptions) -> OnsetResult {
        let flux = match self.analyzer.compute_onset_flux(audio, &FluxOptions::default()) {
            Ok(f) => f,
            Err(e) => {
                warn!("onset flux failed ({e})");
                return OnsetResult::default();
            }
        };
        let mut best: Option<OnsetResult> = None;
        for &sensitivity in options.sensitivity_sweep() {
            match self.analyzer.detect_onsets_from_flux(&flux, sensitivity) {
                Ok(r) => {
                    if best
                        .as_ref()
                        .is_none_or(|b| r.combined_count() > b.combined_count())
                    {
                        best = Some(r);
                    }
                }
                Err(e) => debug!("onset detection at sensitivity {sensitivity} failed ({e})"),
            }
        }
        best.unwrap_or_else(|| {
            warn!("onset detection produced nothing");
            OnsetResult::default()
        })
    }
}

/// Final per-difficulty note-count clamp: drop the weakest taps above
/// the ceiling, never dipping below the emergency floor.
fn clamp_note_count(mut notes: Vec<Note>, ctx: &Context) -> Vec<Note> {
    let max = ctx.difficulty.max_count(ctx.duration);
    let floor = ctx.difficulty.emergency_floor(ctx.duration);
    while notes.len() > max.max(floor) {
        let weakest = notes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == NoteKind::Tap)
            .min_by(|(_, a), (_, b)| {
                a.strength
                    .partial_cmp(&b.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i);
        match weakest {
            Some(i) => {
                notes.remove(i);
            }
            None => break,
        }
    }
    notes
}

/// Convenience wrapper matching the host-facing signature.
pub fn generate(
    audio: &AudioBuffer,
    difficulty: Difficulty,
    analyzer: &dyn HostAnalyzer,
    progress: Option<ProgressFn>,
) -> Result<Chart, ComposeError> {
    Generator::new(analyzer).generate(audio, difficulty, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{
        AnalysisBundle, AnalyzerError, BpmEstimate, BundleAnalyzer, SpectralProfile,
    };
    use crate::chart::{Lane, Section, SectionKind, VisualTheme};

    /// Analyzer that fails every call; drives the full fallback path.
    struct DeafAnalyzer;

    impl HostAnalyzer for DeafAnalyzer {
        fn detect_bpm(&self, _: &AudioBuffer) -> Result<BpmEstimate, AnalyzerError> {
            Err(AnalyzerError::NoData)
        }
        fn compute_onset_flux(
            &self,
            _: &AudioBuffer,
            _: &FluxOptions,
        ) -> Result<crate::analysis::OnsetFluxProfile, AnalyzerError> {
            Err(AnalyzerError::NoData)
        }
        fn detect_onsets_from_flux(
            &self,
            _: &crate::analysis::OnsetFluxProfile,
            _: f64,
        ) -> Result<OnsetResult, AnalyzerError> {
            Err(AnalyzerError::NoData)
        }
        fn analyze_spectral_profiles(
            &self,
            _: &AudioBuffer,
            _: &[f64],
            _: &SpectralOptions,
        ) -> Result<Vec<SpectralProfile>, AnalyzerError> {
            Err(AnalyzerError::NoData)
        }
        fn detect_sections(&self, _: &AudioBuffer) -> Result<Vec<Section>, AnalyzerError> {
            Err(AnalyzerError::NoData)
        }
    }

    fn perf() -> RuntimePerf {
        RuntimePerf { cores: 8, memory_gb: 16.0 }
    }

    fn kick_bundle(duration: f64, bpm: f64) -> AnalysisBundle {
        let interval = 60.0 / bpm;
        let count = (duration / interval) as usize;
        let times: Vec<f64> = (0..count).map(|i| i as f64 * interval).collect();
        AnalysisBundle {
            sample_rate: 44100,
            duration,
            num_channels: 2,
            bpm: Some(BpmEstimate { bpm, first_beat_offset: 0.0 }),
            onsets: Some(OnsetResult {
                onsets: times.clone(),
                strengths: vec![0.9; count],
                low_onsets: times.clone(),
                low_strengths: vec![0.9; count],
                ..OnsetResult::default()
            }),
            spectral_profiles: times
                .iter()
                .map(|&t| SpectralProfile {
                    time: t,
                    low: 0.8,
                    mid: 0.1,
                    high: 0.1,
                    energy: 0.7,
                    brightness: 0.3,
                    transient: 0.85,
                    tonal: 0.1,
                    percussive: 0.9,
                })
                .collect(),
            sections: vec![],
        }
    }

    // S1: empty audio fails fast.
    #[test]
    fn test_missing_audio_is_fatal() {
        let analyzer = DeafAnalyzer;
        let audio = AudioBuffer::new(44100, vec![]);
        let generator = Generator::with_perf(&analyzer, perf());
        let result = generator.generate(&audio, Difficulty::Normal, None);
        assert!(matches!(
            result,
            Err(ComposeError::Audio(AudioError::MissingAudio))
        ));
    }

    // S2: silence still yields a playable alternating tap chart.
    #[test]
    fn test_silence_produces_beat_grid_chart() {
        let analyzer = DeafAnalyzer;
        let audio = AudioBuffer::from_metadata(44100, 30.0, 2);
        let generator = Generator::with_perf(&analyzer, perf());
        let chart = generator.generate(&audio, Difficulty::Normal, None).unwrap();
        assert!((chart.bpm - 120.0).abs() < 1e-9);
        assert!(chart.total_notes >= 14, "total={}", chart.total_notes);
        assert!(chart.notes.iter().all(|n| n.kind == NoteKind::Tap));
        for w in chart.notes.windows(2) {
            assert_ne!(w[0].lane, w[1].lane, "lanes must alternate");
        }
        assert!(matches!(
            chart.visual_theme,
            VisualTheme::Meadow | VisualTheme::Sunset
        ));
        // Single fallback verse section.
        assert_eq!(chart.sections.len(), 1);
        assert_eq!(chart.sections[0].kind, SectionKind::Verse);
    }

    // S3: a kick on every beat maps to taps and reads as NightCity.
    #[test]
    fn test_kick_track_taps_and_night_city() {
        let bundle = kick_bundle(16.0, 120.0);
        let analyzer = BundleAnalyzer::new(bundle.clone());
        let audio = bundle.audio();
        let generator = Generator::with_perf(&analyzer, perf());
        let chart = generator.generate(&audio, Difficulty::Hard, None).unwrap();
        assert!(chart.total_notes >= 18);
        // Pure staccato kicks: no holds and no slides.
        assert!(chart.notes.iter().all(|n| n.kind == NoteKind::Tap));
        let bottom = chart.notes.iter().filter(|n| n.lane == Lane::Bottom).count();
        assert!(bottom * 2 > chart.total_notes, "bottom should dominate");
        assert!(chart.notes.iter().any(|n| n.lane == Lane::Top));
        assert_eq!(chart.visual_theme, VisualTheme::NightCity);
    }

    // S4: a sustained melodic pad becomes a slide-rich, calm chart.
    #[test]
    fn test_pad_track_slides_and_warm_theme() {
        let interval = 60.0 / 90.0;
        let count = (60.0 / interval) as usize;
        let times: Vec<f64> = (0..count).map(|i| i as f64 * interval).collect();
        let bundle = AnalysisBundle {
            sample_rate: 44100,
            duration: 60.0,
            num_channels: 2,
            bpm: Some(BpmEstimate { bpm: 90.0, first_beat_offset: 0.0 }),
            onsets: Some(OnsetResult {
                onsets: times.clone(),
                strengths: vec![0.5; count],
                mid_onsets: times.clone(),
                mid_strengths: vec![0.5; count],
                ..OnsetResult::default()
            }),
            spectral_profiles: times
                .iter()
                .map(|&t| SpectralProfile {
                    time: t,
                    low: 0.2,
                    mid: 0.6,
                    high: 0.2,
                    energy: 0.4,
                    brightness: 0.35,
                    transient: 0.1,
                    tonal: 0.9,
                    percussive: 0.1,
                })
                .collect(),
            sections: vec![],
        };
        let analyzer = BundleAnalyzer::new(bundle.clone());
        let audio = bundle.audio();
        let generator = Generator::with_perf(&analyzer, perf());
        let ctx = generator.analyze(&audio, Difficulty::Normal, None).unwrap();
        assert!(ctx.features.calm_confidence >= 0.6, "calm={}", ctx.features.calm_confidence);

        let chart = generator.generate(&audio, Difficulty::Normal, None).unwrap();
        let slides = chart
            .notes
            .iter()
            .filter(|n| n.kind == NoteKind::Slide)
            .count();
        assert!(slides >= 4, "slides={slides}");
        let longs = chart.notes.iter().filter(|n| n.is_long()).count();
        let long_ratio = longs as f64 / chart.total_notes as f64;
        assert!(
            (0.18..=0.28 + 1e-9).contains(&long_ratio),
            "long ratio {long_ratio}"
        );
        assert!(matches!(
            chart.visual_theme,
            VisualTheme::Meadow | VisualTheme::Sunset
        ));
    }

    // S5: sections shape density; the chorus opens on a strong tap.
    #[test]
    fn test_sections_shape_density_and_chorus_opener() {
        let mut bundle = kick_bundle(40.0, 120.0);
        // Strong kicks only inside the chorus.
        let keep = |t: &f64| (24.0..40.0).contains(t);
        let onsets = bundle.onsets.as_mut().unwrap();
        onsets.onsets.retain(keep);
        onsets.low_onsets.retain(keep);
        onsets.strengths = vec![0.9; onsets.onsets.len()];
        onsets.low_strengths = vec![0.9; onsets.low_onsets.len()];
        bundle.sections = vec![
            Section { start: 0.0, end: 8.0, kind: SectionKind::Intro, avg_energy: 0.1 },
            Section { start: 8.0, end: 24.0, kind: SectionKind::Verse, avg_energy: 0.3 },
            Section { start: 24.0, end: 40.0, kind: SectionKind::Chorus, avg_energy: 0.8 },
        ];
        let analyzer = BundleAnalyzer::new(bundle.clone());
        let audio = bundle.audio();
        let generator = Generator::with_perf(&analyzer, perf());
        let chart = generator.generate(&audio, Difficulty::Normal, None).unwrap();

        let intro_notes = chart.notes.iter().filter(|n| n.time < 8.0).count();
        assert!(intro_notes <= 1, "intro has {intro_notes} notes");

        let chorus_notes =
            chart.notes.iter().filter(|n| (24.0..40.0).contains(&n.time)).count();
        let chorus_nps = chorus_notes as f64 / 16.0;
        assert!(
            (3.2..=5.6).contains(&chorus_nps),
            "chorus nps {chorus_nps}"
        );

        let beat = 60.0 / chart.bpm;
        assert!(
            chart
                .notes
                .iter()
                .any(|n| (n.time - 24.0).abs() <= 0.1 * beat),
            "no chorus opener near t=24"
        );
    }

    // S6: empty onset stream on Expert rescues to a full tap line.
    #[test]
    fn test_rescue_meets_expert_floor() {
        let analyzer = DeafAnalyzer;
        let audio = AudioBuffer::from_metadata(44100, 20.0, 2);
        let generator = Generator::with_perf(&analyzer, perf());
        let chart = generator.generate(&audio, Difficulty::Expert, None).unwrap();
        assert!(chart.total_notes >= 22, "total={}", chart.total_notes);
        for w in chart.notes.windows(2) {
            assert_ne!(w[0].lane, w[1].lane);
            let gap = w[1].time - w[0].time;
            assert!(gap > 0.0 && gap <= 0.5 + 1e-9, "gap={gap}");
        }
    }

    // Invariant 7: determinism.
    #[test]
    fn test_generate_is_deterministic() {
        let bundle = kick_bundle(16.0, 120.0);
        let analyzer = BundleAnalyzer::new(bundle.clone());
        let audio = bundle.audio();
        let generator = Generator::with_perf(&analyzer, perf());
        let a = generator.generate(&audio, Difficulty::Expert, None).unwrap();
        let b = generator.generate(&audio, Difficulty::Expert, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_progress_reports_monotonic() {
        let bundle = kick_bundle(16.0, 120.0);
        let analyzer = BundleAnalyzer::new(bundle.clone());
        let audio = bundle.audio();
        let generator = Generator::with_perf(&analyzer, perf());
        let mut fractions: Vec<f64> = Vec::new();
        let mut cb = |_stage: &str, f: f64| fractions.push(f);
        generator.generate(&audio, Difficulty::Normal, Some(&mut cb)).unwrap();
        assert!(!fractions.is_empty());
        for w in fractions.windows(2) {
            assert!(w[1] >= w[0]);
        }
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[test]
    fn test_note_count_within_bands() {
        let bundle = kick_bundle(40.0, 120.0);
        let analyzer = BundleAnalyzer::new(bundle.clone());
        let audio = bundle.audio();
        let generator = Generator::with_perf(&analyzer, perf());
        for difficulty in Difficulty::ALL {
            let chart = generator.generate(&audio, difficulty, None).unwrap();
            let floor = difficulty.emergency_floor(40.0);
            let max = difficulty.max_count(40.0);
            assert!(
                (floor..=max).contains(&chart.total_notes),
                "{}: {} outside [{floor}, {max}]",
                difficulty.label(),
                chart.total_notes
            );
        }
    }

    #[test]
    fn test_invariant_ordering_and_lane_gap() {
        let bundle = kick_bundle(30.0, 128.0);
        let analyzer = BundleAnalyzer::new(bundle.clone());
        let audio = bundle.audio();
        let generator = Generator::with_perf(&analyzer, perf());
        let chart = generator.generate(&audio, Difficulty::Hard, None).unwrap();
        let gap = Difficulty::Hard.min_lane_gap();
        for w in chart.notes.windows(2) {
            assert!(w[1].time >= w[0].time, "times must ascend");
        }
        for (i, a) in chart.notes.iter().enumerate() {
            for b in &chart.notes[i + 1..] {
                if b.time - a.time >= gap {
                    break;
                }
                assert_ne!(a.lane, b.lane, "lane gap violated at {}", a.time);
            }
        }
    }

    #[test]
    fn test_analyze_exposes_context() {
        let bundle = kick_bundle(16.0, 120.0);
        let analyzer = BundleAnalyzer::new(bundle.clone());
        let audio = bundle.audio();
        let generator = Generator::with_perf(&analyzer, perf());
        let ctx = generator.analyze(&audio, Difficulty::Hard, None).unwrap();
        assert!(!ctx.onsets.is_empty());
        assert!((ctx.beats.bpm - 120.0).abs() < 2.0);
        assert!(ctx.features.percussive_focus > 0.4);
    }
}
