use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "harmonia", about = "Tempo, key and style analysis for audio files")]
pub struct Cli {
    /// Input audio files (WAV, MP3, FLAC, OGG, AAC/M4A)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// What to analyze
    #[arg(short, long, value_enum, default_value_t = Mode::Rhythm)]
    pub mode: Mode,

    /// Style model: file path or name of a model in the cache directory
    #[arg(long)]
    pub model: Option<String>,

    /// Class-label table for style output (JSON array or one label per line)
    #[arg(long)]
    pub labels: Option<PathBuf>,

    /// Number of style classes to report
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Print one JSON object per file instead of text
    #[arg(long)]
    pub json: bool,

    /// Cancel all outstanding analyses after this many seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Files analyzed concurrently (default: number of CPUs)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Config file (default: harmonia.toml, then ~/.config/harmonia/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Tempo and key
    Rhythm,
    /// Style classes
    Style,
    /// Both
    All,
}

impl Mode {
    pub fn wants_rhythm(self) -> bool {
        matches!(self, Mode::Rhythm | Mode::All)
    }

    pub fn wants_style(self) -> bool {
        matches!(self, Mode::Style | Mode::All)
    }
}
