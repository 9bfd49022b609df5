//! Visual theme selection: song features plus final-chart statistics
//! pick one of the three themes, with hard overrides when the energy
//! picture is unambiguous, and a single consistency pass that may
//! override the initial pick on the finished chart.

use log::debug;

use crate::analysis::features::SongFeatures;
use crate::chart::{ChartStats, VisualTheme};

/// Intermediate weighted signals, kept visible for the CLI `score`
/// breakdown and the tests.
#[derive(Debug, Clone, Copy)]
pub struct ThemeSignals {
    pub intensity: f64,
    pub calmness: f64,
    pub warmth: f64,
    pub phonk_like: f64,
    pub city_bias: f64,
}

pub fn compute_signals(features: &SongFeatures, stats: &ChartStats) -> ThemeSignals {
    let nps_norm = (stats.nps / 8.0).clamp(0.0, 1.0);
    let intensity = (0.30 * features.drive_score
        + 0.25 * features.percussive_focus
        + 0.20 * nps_norm
        + 0.15 * stats.strong_ratio
        + 0.10 * features.sharpness_score)
        .clamp(0.0, 1.0);
    let calmness = (0.45 * features.calm_confidence
        + 0.25 * (1.0 - intensity)
        + 0.20 * features.sustained_focus
        + 0.10 * (1.0 - features.sharpness_score))
        .clamp(0.0, 1.0);
    let warmth = (0.35 * features.melodic_focus
        + 0.30 * (1.0 - features.sharpness_score)
        + 0.20 * features.sustained_focus
        + 0.15 * features.bass_weight)
        .clamp(0.0, 1.0);
    let phonk_like = (0.50 * features.bass_weight
        + 0.30 * features.percussive_focus
        + 0.20 * features.drive_score)
        .clamp(0.0, 1.0);
    let city_bias = (0.30 * features.drive_score
        + 0.25 * features.percussive_focus
        + 0.20 * features.bass_weight
        + 0.15 * features.sharpness_score
        + 0.10 * features.dynamic_range)
        .clamp(0.0, 1.0);
    ThemeSignals {
        intensity,
        calmness,
        warmth,
        phonk_like,
        city_bias,
    }
}

/// The canonical theme decision. Runs exactly once per generate call.
pub fn select_theme(features: &SongFeatures, stats: &ChartStats) -> VisualTheme {
    let s = compute_signals(features, stats);

    // Hard override 1: unmistakably urban material.
    let heavy_combo = features.bass_weight >= 0.62
        && features.percussive_focus >= 0.45
        && features.dynamic_range >= 0.5;
    if s.city_bias >= 0.58 || heavy_combo {
        return VisualTheme::NightCity;
    }

    // Hard override 2: unmistakably calm material.
    if s.calmness >= 0.68
        && features.percussive_focus < 0.4
        && features.sharpness_score < 0.45
    {
        return if s.warmth >= 0.5 {
            VisualTheme::Sunset
        } else {
            VisualTheme::Meadow
        };
    }

    // Soft scoring with thresholded tie-breaks.
    let city_score = s.city_bias + 0.25 * s.intensity + 0.1 * s.phonk_like;
    let meadow_score = 0.60 * s.calmness + 0.20 * (1.0 - s.warmth) + 0.20 * features.sustained_focus;
    let sunset_score = 0.55 * s.warmth + 0.30 * s.calmness + 0.15 * features.melodic_focus;
    let mut ranked = [
        (VisualTheme::NightCity, city_score),
        (VisualTheme::Meadow, meadow_score),
        (VisualTheme::Sunset, sunset_score),
    ];
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let lead = ranked[0].1 - ranked[1].1;
    debug!(
        "theme scores: city={city_score:.3} meadow={meadow_score:.3} sunset={sunset_score:.3}"
    );

    if lead >= 0.08 {
        return ranked[0].0;
    }
    if lead >= 0.02 {
        // Close call: a calm song never gets the city by a whisker.
        if ranked[0].0 == VisualTheme::NightCity && s.calmness >= 0.6 {
            return ranked[1].0;
        }
        return ranked[0].0;
    }
    // Statistical tie: decide by warmth.
    if s.warmth >= 0.5 {
        VisualTheme::Sunset
    } else {
        VisualTheme::Meadow
    }
}

/// One-shot consistency check over the final chart. Overrides the pick
/// only when the realized chart contradicts the theme's archetype.
pub fn enforce_theme_consistency(
    theme: VisualTheme,
    features: &SongFeatures,
    stats: &ChartStats,
    avg_section_energy: f64,
) -> VisualTheme {
    let s = compute_signals(features, stats);
    let adjusted = match theme {
        VisualTheme::NightCity => {
            // A city chart that plays like a lullaby is mislabeled.
            if stats.nps < 2.2
                && features.drive_score < 0.4
                && features.percussive_focus < 0.45
                && avg_section_energy < 0.5
            {
                if s.warmth >= 0.5 {
                    VisualTheme::Sunset
                } else {
                    VisualTheme::Meadow
                }
            } else {
                theme
            }
        }
        VisualTheme::Meadow | VisualTheme::Sunset => {
            // A pastoral chart running hot belongs downtown.
            if stats.nps >= 5.2
                && features.drive_score >= 0.6
                && stats.strong_ratio >= 0.3
            {
                VisualTheme::NightCity
            } else {
                theme
            }
        }
    };
    if adjusted != theme {
        debug!("theme consistency override: {} -> {}", theme.label(), adjusted.label());
    }
    adjusted
}
