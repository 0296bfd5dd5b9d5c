mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cli::{Cli, Mode};
use harmonia::config;
use harmonia::style::{load_labels, resolve_model_path};
use harmonia::{AnalysisError, Analyzer, CancellationToken, Labels, RhythmKeyReport, Runtime};

/// Everything reported for one input file.
#[derive(Debug, Serialize)]
struct FileReport {
    path: String,
    error_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rhythm: Option<RhythmKeyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<Vec<LabeledClass>>,
}

#[derive(Debug, Serialize)]
struct LabeledClass {
    index: usize,
    label: String,
    score: f32,
}

impl FileReport {
    fn new(path: &Path) -> Self {
        Self {
            path: path.display().to_string(),
            error_code: 0,
            error: None,
            rhythm: None,
            style: None,
        }
    }

    fn fail(&mut self, err: &AnalysisError) {
        self.error_code = err.code().as_i32();
        self.error = Some(err.to_string());
    }

    fn failed(&self) -> bool {
        self.error_code != 0
    }
}

struct Job<'a> {
    analyzer: &'a Analyzer,
    mode: Mode,
    model_path: Option<&'a Path>,
    labels: &'a Labels,
}

impl Job<'_> {
    /// Rhythm first, then style; the first failure ends the file.
    fn run(&self, path: &Path, token: &CancellationToken) -> FileReport {
        let mut report = FileReport::new(path);

        if self.mode.wants_rhythm() {
            match self.analyzer.analyze_rhythm_and_key(path, token) {
                Ok(r) => report.rhythm = Some(r),
                Err(e) => {
                    report.fail(&e);
                    return report;
                }
            }
        }

        if let (true, Some(model_path)) = (self.mode.wants_style(), self.model_path) {
            match self.analyzer.analyze_style(path, model_path, token) {
                Ok(s) => {
                    report.style = Some(
                        s.classes
                            .iter()
                            .map(|c| LabeledClass {
                                index: c.index,
                                label: self.labels.label_for(c.index),
                                score: c.score,
                            })
                            .collect(),
                    )
                }
                Err(e) => report.fail(&e),
            }
        }

        report
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Config: explicit --config path, or auto-detect harmonia.toml / global config
    let cfg = match config::discover_config_path(cli.config.clone()) {
        Some(path) => match config::load_config(&path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                if cli.config.is_some() {
                    anyhow::bail!("Failed to load config from {}", path.display());
                }
                log::warn!("Failed to load config from {}", path.display());
                config::Config::default()
            }
        },
        None => config::Config::default(),
    };

    // Merge: CLI flags win over config values
    let mut settings = cfg.settings();
    if let Some(top_k) = cli.top_k {
        settings.top_k = top_k;
    }
    if cli.model.is_none() {
        cli.model = cfg.style.model.clone();
    }
    if cli.labels.is_none() {
        cli.labels = cfg.style.labels.clone();
    }

    let model_path: Option<PathBuf> = if cli.mode.wants_style() {
        let name = cli
            .model
            .as_deref()
            .context("Style analysis requires --model (or [style] model in the config)")?;
        Some(resolve_model_path(name)?)
    } else {
        None
    };

    let labels = match cli.labels {
        Some(ref path) => load_labels(path)?,
        None => Labels::default(),
    };

    for input in &cli.inputs {
        if !input.exists() {
            log::warn!("Input file not found: {}", input.display());
        }
    }

    let runtime = Runtime::init(settings).context("Invalid analysis settings")?;
    let analyzer = runtime.analyzer();

    let tokens: Vec<CancellationToken> = cli.inputs.iter().map(|_| CancellationToken::new()).collect();
    if let Some(secs) = cli.timeout {
        anyhow::ensure!(secs.is_finite() && secs > 0.0, "--timeout must be a positive number of seconds");
        spawn_watchdog(Duration::from_secs_f64(secs), tokens.clone());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cli.jobs.unwrap_or(0))
        .build()
        .context("Failed to build worker pool")?;

    let pb = if cli.inputs.len() > 1 {
        let pb = ProgressBar::new(cli.inputs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} files ({eta} remaining)")?
                .progress_chars("=>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let job = Job {
        analyzer: &analyzer,
        mode: cli.mode,
        model_path: model_path.as_deref(),
        labels: &labels,
    };

    let reports: Vec<FileReport> = pool.install(|| {
        cli.inputs
            .par_iter()
            .zip(tokens.par_iter())
            .map(|(path, token)| {
                let report = job.run(path, token);
                pb.inc(1);
                report
            })
            .collect()
    });
    pb.finish_and_clear();

    for report in &reports {
        if cli.json {
            println!("{}", serde_json::to_string(report)?);
        } else {
            print_text(report);
        }
    }

    runtime.shutdown();

    let failures = reports.iter().filter(|r| r.failed()).count();
    if failures > 0 {
        log::error!("{} of {} file(s) failed", failures, reports.len());
        std::process::exit(1);
    }
    Ok(())
}

/// Signal every token once `after` has elapsed.
fn spawn_watchdog(after: Duration, tokens: Vec<CancellationToken>) {
    std::thread::spawn(move || {
        std::thread::sleep(after);
        let pending = tokens.iter().filter(|t| !t.is_cancelled()).count();
        log::warn!("Timeout after {:.1}s, cancelling {} analyses", after.as_secs_f64(), pending);
        for token in &tokens {
            token.cancel();
        }
    });
}

fn print_text(report: &FileReport) {
    println!("{}", report.path);
    if let Some(ref r) = report.rhythm {
        println!("  tempo: {:.1} BPM (confidence {:.2})", r.bpm, r.bpm_confidence);
        println!("  key:   {} (confidence {:.2})", r.key.name(), r.key_confidence);
    }
    if let Some(ref classes) = report.style {
        for (rank, c) in classes.iter().enumerate() {
            println!("  style: {}. {} ({:.3})", rank + 1, c.label, c.score);
        }
    }
    if let Some(ref err) = report.error {
        println!("  error {}: {}", report.error_code, err);
    }
}
