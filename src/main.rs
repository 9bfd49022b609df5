use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};

use chartsmith::Difficulty;
use chartsmith::analysis::{AnalysisBundle, BundleAnalyzer};
use chartsmith::chart::{Chart, ChartStats};
use chartsmith::pipeline::Generator;
use chartsmith::quality;

#[derive(Parser)]
#[command(name = "chartsmith", version, about = "Rhythm-game chart composer")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DifficultyArg {
    Easy,
    Normal,
    Hard,
    Expert,
}

impl DifficultyArg {
    fn difficulty(self) -> Difficulty {
        match self {
            Self::Easy => Difficulty::Easy,
            Self::Normal => Difficulty::Normal,
            Self::Hard => Difficulty::Hard,
            Self::Expert => Difficulty::Expert,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compose a chart from a pre-computed analysis bundle
    Compose {
        /// Analysis bundle JSON (collaborator outputs)
        bundle: PathBuf,

        /// Difficulty tier
        #[arg(short, long, value_enum, default_value = "normal")]
        difficulty: DifficultyArg,

        /// Output path (default: <bundle stem>.<difficulty>.chart.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Generate all four difficulties in parallel
        #[arg(long)]
        all: bool,
    },

    /// Print a chart's statistics
    Inspect {
        /// Chart JSON
        chart: PathBuf,
    },

    /// Recompute the quality breakdown of a chart against its bundle
    Score {
        /// Chart JSON
        chart: PathBuf,

        /// Analysis bundle JSON the chart was composed from
        bundle: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Compose { bundle, difficulty, output, all } => {
            let parsed = load_bundle(&bundle)?;
            if all {
                compose_all(&bundle, parsed)
            } else {
                compose_one(&bundle, parsed, difficulty.difficulty(), output)
            }
        }
        Commands::Inspect { chart } => {
            let parsed = load_chart(&chart)?;
            print_chart_stats(&parsed);
            Ok(())
        }
        Commands::Score { chart, bundle } => {
            let chart = load_chart(&chart)?;
            let bundle = load_bundle(&bundle)?;
            score_chart(&chart, bundle)
        }
    }
}

fn load_bundle(path: &Path) -> Result<AnalysisBundle> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read bundle {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse bundle {}", path.display()))
}

fn load_chart(path: &Path) -> Result<Chart> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read chart {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse chart {}", path.display()))
}

fn output_path(bundle: &Path, difficulty: Difficulty) -> PathBuf {
    let stem = bundle.file_stem().and_then(|s| s.to_str()).unwrap_or("chart");
    bundle.with_file_name(format!("{stem}.{}.chart.json", difficulty.label()))
}

fn compose_one(
    bundle_path: &Path,
    bundle: AnalysisBundle,
    difficulty: Difficulty,
    output: Option<PathBuf>,
) -> Result<()> {
    let audio = bundle.audio();
    let analyzer = BundleAnalyzer::new(bundle);
    let generator = Generator::new(&analyzer);

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    let mut on_progress = |stage: &str, fraction: f64| {
        pb.set_position((fraction * 100.0) as u64);
        pb.set_message(stage.to_string());
    };

    let chart = generator
        .generate(&audio, difficulty, Some(&mut on_progress))
        .context("Compose failed")?;
    pb.finish_with_message("done");

    let out = output.unwrap_or_else(|| output_path(bundle_path, difficulty));
    fs::write(&out, serde_json::to_string_pretty(&chart)?)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!(
        "Composed {} notes ({}, {}) -> {}",
        chart.total_notes,
        difficulty.label(),
        chart.visual_theme.label(),
        out.display()
    );
    Ok(())
}

/// One generate call per difficulty; calls share no state, so they run
/// on the rayon pool.
fn compose_all(bundle_path: &Path, bundle: AnalysisBundle) -> Result<()> {
    use rayon::prelude::*;

    let results: Vec<(Difficulty, Result<usize>)> = Difficulty::ALL
        .par_iter()
        .map(|&difficulty| {
            let audio = bundle.audio();
            let analyzer = BundleAnalyzer::new(bundle.clone());
            let generator = Generator::new(&analyzer);
            let result = generator
                .generate(&audio, difficulty, None)
                .context("Compose failed")
                .and_then(|chart| {
                    let out = output_path(bundle_path, difficulty);
                    fs::write(&out, serde_json::to_string_pretty(&chart)?)
                        .with_context(|| format!("Failed to write {}", out.display()))?;
                    Ok(chart.total_notes)
                });
            (difficulty, result)
        })
        .collect();

    let mut failed = 0usize;
    for (difficulty, result) in results {
        match result {
            Ok(count) => println!("{:<8} {count} notes", difficulty.label()),
            Err(e) => {
                failed += 1;
                eprintln!("{:<8} failed: {e:#}", difficulty.label());
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} difficulties failed");
    }
    Ok(())
}

fn print_chart_stats(chart: &Chart) {
    let stats = ChartStats::from_notes(&chart.notes, chart.duration);
    println!("Difficulty:   {}", chart.difficulty.label());
    println!("Theme:        {}", chart.visual_theme.label());
    println!("BPM:          {:.1}", chart.bpm);
    println!("Duration:     {:.1} s", chart.duration);
    println!("Notes:        {} ({:.2} NPS)", stats.total, stats.nps);
    println!(
        "  taps {}  holds {}  slides {}  bursts {}",
        stats.taps, stats.holds, stats.slides, stats.bursts
    );
    println!("Long ratio:   {:.2}", stats.long_ratio);
    println!("Lane balance: {:.2} top / {:.2} bottom", stats.top_lane_ratio, 1.0 - stats.top_lane_ratio);
    println!("Strong ratio: {:.2}", stats.strong_ratio);

    if !chart.sections.is_empty() {
        println!();
        println!("Sections:");
        for s in &chart.sections {
            println!(
                "  {:>7.1} - {:>7.1}  {:<10} energy {:.2}",
                s.start,
                s.end,
                format!("{:?}", s.kind).to_lowercase(),
                s.avg_energy
            );
        }
    }
}

fn score_chart(chart: &Chart, bundle: AnalysisBundle) -> Result<()> {
    let audio = bundle.audio();
    let analyzer = BundleAnalyzer::new(bundle);
    let generator = Generator::new(&analyzer);
    let ctx = generator
        .analyze(&audio, chart.difficulty, None)
        .context("Analysis failed")?;
    let q = quality::score_chart(&chart.notes, &ctx);

    println!("Quality breakdown ({} notes):", chart.total_notes);
    println!("  alignment         {:.3}", q.align);
    println!("  density           {:.3}", q.density);
    println!("  long ratio        {:.3}", q.long_ratio);
    println!("  pattern           {:.3}", q.pattern);
    println!("  section contrast  {:.3}", q.section_contrast);
    println!("  intro restraint   {:.3}", q.intro_restraint);
    println!("  flow              {:.3}", q.flow);
    println!("  lane balance      {:.3}", q.lane_balance);
    println!("  ----------------------");
    println!("  total             {:.3}", q.total);
    Ok(())
}
