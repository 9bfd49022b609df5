use serde::{Deserialize, Serialize};

/// Playfield row. The wire encoding is Top=0, Bottom=1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Top,
    Bottom,
}

impl Lane {
    pub fn opposite(self) -> Lane {
        match self {
            Lane::Top => Lane::Bottom,
            Lane::Bottom => Lane::Top,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Lane::Top => 0,
            Lane::Bottom => 1,
        }
    }

    pub fn from_index(i: usize) -> Lane {
        if i == 0 { Lane::Top } else { Lane::Bottom }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    Tap,
    Hold,
    Slide,
    Burst,
}

impl NoteKind {
    /// Long notes carry a duration and occupy their lane for its span.
    pub fn is_long(self) -> bool {
        matches!(self, NoteKind::Hold | NoteKind::Slide | NoteKind::Burst)
    }

    /// Conflict priority when two notes land too close: Burst > Slide > Hold > Tap.
    pub fn priority(self) -> u8 {
        match self {
            NoteKind::Burst => 3,
            NoteKind::Slide => 2,
            NoteKind::Hold => 1,
            NoteKind::Tap => 0,
        }
    }
}

/// A single playable note. `duration` is present iff the kind is long;
/// `target_lane` only for slides (same lane = straight slide); bursts
/// carry the required hit count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub time: f64,
    pub lane: Lane,
    pub kind: NoteKind,
    pub strength: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lane: Option<Lane>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_hits_required: Option<u32>,
}

impl Note {
    pub fn tap(time: f64, lane: Lane, strength: f64) -> Note {
        Note {
            time,
            lane,
            kind: NoteKind::Tap,
            strength,
            duration: None,
            target_lane: None,
            burst_hits_required: None,
        }
    }

    pub fn hold(time: f64, lane: Lane, strength: f64, duration: f64) -> Note {
        Note {
            time,
            lane,
            kind: NoteKind::Hold,
            strength,
            duration: Some(duration),
            target_lane: None,
            burst_hits_required: None,
        }
    }

    pub fn slide(time: f64, lane: Lane, strength: f64, duration: f64, target: Lane) -> Note {
        Note {
            time,
            lane,
            kind: NoteKind::Slide,
            strength,
            duration: Some(duration),
            target_lane: Some(target),
            burst_hits_required: None,
        }
    }

    pub fn burst(time: f64, lane: Lane, strength: f64, duration: f64, hits: u32) -> Note {
        Note {
            time,
            lane,
            kind: NoteKind::Burst,
            strength,
            duration: Some(duration),
            target_lane: None,
            burst_hits_required: Some(hits.max(1)),
        }
    }

    pub fn is_long(&self) -> bool {
        self.kind.is_long()
    }

    pub fn end_time(&self) -> f64 {
        self.time + self.duration.unwrap_or(0.0)
    }

    /// A slide whose target differs from its start lane.
    pub fn is_diagonal_slide(&self) -> bool {
        self.kind == NoteKind::Slide && self.target_lane.is_some_and(|t| t != self.lane)
    }

    /// Whether this note's body excludes taps on `lane`. Straight slides
    /// block both lanes; holds and bursts only their own; diagonal slides
    /// involve both lanes (the baton window is handled by the caller).
    pub fn body_blocks(&self, lane: Lane) -> bool {
        match self.kind {
            NoteKind::Hold | NoteKind::Burst => self.lane == lane,
            NoteKind::Slide => {
                if self.is_diagonal_slide() {
                    lane == self.lane || Some(lane) == self.target_lane
                } else {
                    true
                }
            }
            NoteKind::Tap => false,
        }
    }

    /// Mid-slide window of a diagonal slide during which a tap on the
    /// target lane is playable (the player's free hand takes the baton).
    pub fn baton_window(&self) -> Option<(f64, f64)> {
        if !self.is_diagonal_slide() {
            return None;
        }
        let dur = self.duration.unwrap_or(0.0);
        Some((self.time + 0.42 * dur, self.time + 0.62 * dur))
    }
}

/// Sort notes by ascending time, breaking ties by lane then kind priority
/// so identical inputs always produce identical orderings.
pub fn sort_notes(notes: &mut [Note]) {
    notes.sort_by(|a, b| {
        a.time
            .partial_cmp(&b.time)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.lane.index().cmp(&b.lane.index()))
            .then_with(|| b.kind.priority().cmp(&a.kind.priority()))
    });
}

// ── Difficulty ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
    Expert,
}

/// Per-difficulty culling thresholds applied by the scaler.
#[derive(Debug, Clone, Copy)]
pub struct ScaleProfile {
    pub min_lane_gap: f64,
    pub min_global_tap_gap: f64,
    pub min_strength: f64,
    pub lane_run_limit: usize,
    pub simplify_longs: bool,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Easy,
        Difficulty::Normal,
        Difficulty::Hard,
        Difficulty::Expert,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
        }
    }

    /// Baseline notes-per-second the onset timeline budgets around.
    pub fn base_nps(self) -> f64 {
        match self {
            Difficulty::Easy => 2.3,
            Difficulty::Normal => 4.4,
            Difficulty::Hard => 6.6,
            Difficulty::Expert => 8.8,
        }
    }

    /// Grid-snap window as a fraction of the beat interval.
    pub fn snap_beta(self) -> f64 {
        match self {
            Difficulty::Easy => 0.28,
            Difficulty::Normal => 0.24,
            Difficulty::Hard => 0.20,
            Difficulty::Expert => 0.18,
        }
    }

    pub fn uses_quarter_grid(self) -> bool {
        matches!(self, Difficulty::Hard | Difficulty::Expert)
    }

    pub fn scale_profile(self) -> ScaleProfile {
        match self {
            Difficulty::Easy => ScaleProfile {
                min_lane_gap: 0.20,
                min_global_tap_gap: 0.16,
                min_strength: 0.30,
                lane_run_limit: 2,
                simplify_longs: true,
            },
            Difficulty::Normal => ScaleProfile {
                min_lane_gap: 0.052,
                min_global_tap_gap: 0.036,
                min_strength: 0.06,
                lane_run_limit: 5,
                simplify_longs: false,
            },
            Difficulty::Hard => ScaleProfile {
                min_lane_gap: 0.03,
                min_global_tap_gap: 0.024,
                min_strength: 0.02,
                lane_run_limit: 7,
                simplify_longs: false,
            },
            Difficulty::Expert => ScaleProfile {
                min_lane_gap: 0.019,
                min_global_tap_gap: 0.015,
                min_strength: 0.008,
                lane_run_limit: 9,
                simplify_longs: false,
            },
        }
    }

    pub fn min_lane_gap(self) -> f64 {
        self.scale_profile().min_lane_gap
    }

    /// Acceptable overall NPS range used by the holistic rebalancer and
    /// the final count clamp.
    pub fn nps_band(self) -> (f64, f64) {
        match self {
            Difficulty::Easy => (1.7, 2.9),
            Difficulty::Normal => (3.2, 5.6),
            Difficulty::Hard => (4.8, 7.9),
            Difficulty::Expert => (6.6, 10.6),
        }
    }

    /// Maximum fraction of long notes the stabilizer allows.
    pub fn long_ratio_cap(self) -> f64 {
        match self {
            Difficulty::Easy => 0.22,
            Difficulty::Normal => 0.28,
            Difficulty::Hard => 0.34,
            Difficulty::Expert => 0.40,
        }
    }

    /// Minimum note count below which the emergency rescue path runs.
    pub fn emergency_floor(self, duration: f64) -> usize {
        let (abs_min, per_sec) = match self {
            Difficulty::Easy => (10, 0.09),
            Difficulty::Normal => (14, 0.125),
            Difficulty::Hard => (18, 0.16),
            Difficulty::Expert => (22, 0.20),
        };
        abs_min.max((duration * per_sec).floor() as usize)
    }

    /// Hard upper note-count clamp for a song of `duration` seconds.
    pub fn max_count(self, duration: f64) -> usize {
        (duration * self.nps_band().1).ceil().max(8.0) as usize
    }
}

// ── Sections ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Intro,
    Verse,
    Chorus,
    Bridge,
    Drop,
    Outro,
    Interlude,
}

impl SectionKind {
    /// Playable kinds are the complement of {Intro, Outro, Interlude}.
    pub fn is_playable(self) -> bool {
        !self.is_quiet()
    }

    pub fn is_quiet(self) -> bool {
        matches!(
            self,
            SectionKind::Intro | SectionKind::Outro | SectionKind::Interlude
        )
    }

    pub fn is_highlight(self) -> bool {
        matches!(self, SectionKind::Chorus | SectionKind::Drop)
    }

    /// Multiplier on the difficulty's base NPS when budgeting onsets.
    pub fn nps_factor(self) -> f64 {
        match self {
            SectionKind::Drop => 1.55,
            SectionKind::Chorus => 1.38,
            SectionKind::Bridge => 0.72,
            SectionKind::Verse => 0.88,
            SectionKind::Outro => 0.22,
            SectionKind::Intro => 0.20,
            SectionKind::Interlude => 0.16,
        }
    }

    /// Base composition density the beat mapper gates grid slots on.
    pub fn base_density(self) -> f64 {
        match self {
            SectionKind::Drop => 1.0,
            SectionKind::Chorus => 0.92,
            SectionKind::Verse => 0.60,
            SectionKind::Bridge => 0.42,
            SectionKind::Intro => 0.18,
            SectionKind::Outro => 0.22,
            SectionKind::Interlude => 0.0,
        }
    }

    /// Section multiplier on the difficulty NPS band used by the
    /// holistic rebalancer. Only meaningful for playable kinds.
    pub fn rebalance_factor(self) -> f64 {
        match self {
            SectionKind::Drop => 1.45,
            SectionKind::Chorus => 1.32,
            SectionKind::Bridge => 0.82,
            SectionKind::Verse => 0.94,
            SectionKind::Intro | SectionKind::Outro | SectionKind::Interlude => 0.0,
        }
    }
}

/// A coarse structural segment of the song. Non-overlapping, sorted by start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub start: f64,
    pub end: f64,
    pub kind: SectionKind,
    pub avg_energy: f64,
}

impl Section {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// A contiguous span of constant tempo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoSegment {
    pub start: f64,
    pub end: f64,
    pub bpm: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualTheme {
    Meadow,
    Sunset,
    NightCity,
}

impl VisualTheme {
    pub fn label(self) -> &'static str {
        match self {
            VisualTheme::Meadow => "meadow",
            VisualTheme::Sunset => "sunset",
            VisualTheme::NightCity => "night_city",
        }
    }
}

/// The finished product of one generate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub bpm: f64,
    pub duration: f64,
    pub difficulty: Difficulty,
    pub visual_theme: VisualTheme,
    pub notes: Vec<Note>,
    pub sections: Vec<Section>,
    pub beat_positions: Vec<f64>,
    pub total_notes: usize,
}

// ── Chart statistics ──────────────────────────────────────────────────

/// Notes with strength at or above this count as "strong" for the theme
/// and quality heuristics.
pub const STRONG_NOTE_STRENGTH: f64 = 0.62;

/// Aggregate statistics over a note list, shared by the theme selector,
/// the quality scorer, and the CLI `inspect` command.
#[derive(Debug, Clone, Default)]
pub struct ChartStats {
    pub total: usize,
    pub taps: usize,
    pub holds: usize,
    pub slides: usize,
    pub bursts: usize,
    pub nps: f64,
    pub long_ratio: f64,
    /// Fraction of notes on the top lane.
    pub top_lane_ratio: f64,
    pub strong_ratio: f64,
    pub avg_strength: f64,
}

impl ChartStats {
    pub fn from_notes(notes: &[Note], duration: f64) -> ChartStats {
        if notes.is_empty() {
            return ChartStats::default();
        }
        let total = notes.len();
        let mut stats = ChartStats {
            total,
            ..ChartStats::default()
        };
        let mut top = 0usize;
        let mut strong = 0usize;
        let mut strength_sum = 0.0;
        for n in notes {
            match n.kind {
                NoteKind::Tap => stats.taps += 1,
                NoteKind::Hold => stats.holds += 1,
                NoteKind::Slide => stats.slides += 1,
                NoteKind::Burst => stats.bursts += 1,
            }
            if n.lane == Lane::Top {
                top += 1;
            }
            if n.strength >= STRONG_NOTE_STRENGTH {
                strong += 1;
            }
            strength_sum += n.strength;
        }
        let total_f = total as f64;
        stats.nps = if duration > 0.0 { total_f / duration } else { 0.0 };
        stats.long_ratio = (stats.holds + stats.slides + stats.bursts) as f64 / total_f;
        stats.top_lane_ratio = top as f64 / total_f;
        stats.strong_ratio = strong as f64 / total_f;
        stats.avg_strength = strength_sum / total_f;
        stats
    }
}
