use anyhow::{bail, Context, Result};
use bpm_analyzer::analysis::{export_filtered_audio, TapTempo};
use bpm_analyzer::config::{load_config, save_config};
use bpm_analyzer::model::{sort_by_bpm, Library, Song, SongBpm, SortOrder};
use bpm_analyzer::scheduler::{AnalysisEvent, ChannelListener, JobOutcome, Submission};
use bpm_analyzer::{AnalyzerConfig, BatchScheduler, OnsetTempoAnalyzer, SongAnalysisStore};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "bpm-analyzer")]
#[command(about = "Detect and manage the tempo of your music library", long_about = None)]
struct Args {
    /// Path to the analyzer configuration (YAML)
    #[arg(short = 'c', long, default_value = "~/.config/bpm-analyzer/config.yaml")]
    config: String,

    /// Path to the analysis database
    #[arg(
        short = 'd',
        long,
        default_value = "~/.local/share/bpm-analyzer/analysis.sqlite"
    )]
    database: String,

    /// Verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze individual songs (paths or file:// URIs)
    Analyze {
        #[arg(required = true)]
        songs: Vec<String>,

        /// Re-analyze songs that already have a stored BPM
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Analyze every audio file under a directory that has no stored BPM
    AnalyzeAll {
        dir: String,

        /// Number of songs analyzed concurrently
        #[arg(short = 'j', long)]
        jobs: Option<usize>,
    },

    /// Store a reference BPM for a song
    SetManual { song: String, bpm: f64 },

    /// Tap the tempo of a song with Enter, then `q` to store it
    Tap { song: String },

    /// List stored tempos
    List {
        /// Library directory; without it only database rows are listed
        dir: Option<String>,

        #[arg(short = 's', long, value_enum)]
        sort: Option<SortArg>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Delete the stored analysis of one song
    Delete { song: String },

    /// Delete every stored analysis
    DeleteAll,

    /// Write the low-passed signal the detectors see as a WAV file
    ExportFiltered { input: String, output: PathBuf },

    /// Write the current configuration to the config path
    InitConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SortArg {
    Asc,
    Desc,
}

impl From<SortArg> for SortOrder {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Asc => SortOrder::Ascending,
            SortArg::Desc => SortOrder::Descending,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    // Expand ~ in paths
    let config_path = expand(&args.config);
    let db_path = expand(&args.database);

    let config = load_config(&config_path);

    match args.command {
        Command::InitConfig => save_config(&config, &config_path),
        Command::ExportFiltered { input, output } => {
            let written = export_filtered_audio(&expand(&input), &output, &config)?;
            println!("Wrote {} samples to {}", written, output.display());
            Ok(())
        }
        command => {
            let store = Arc::new(
                SongAnalysisStore::open(&db_path)
                    .with_context(|| format!("Failed to open database: {:?}", db_path))?,
            );
            run(command, config, store)
        }
    }
}

fn run(command: Command, config: AnalyzerConfig, store: Arc<SongAnalysisStore>) -> Result<()> {
    match command {
        Command::Analyze { songs, force } => {
            let songs = songs.iter().map(|s| resolve_song(s)).collect::<Result<Vec<_>>>()?;
            analyze_songs(songs, force, config, store)
        }
        Command::AnalyzeAll { dir, jobs } => {
            let config = match jobs {
                Some(jobs) => config.with_max_concurrent(jobs),
                None => config,
            };
            analyze_library(&expand(&dir), config, store)
        }
        Command::SetManual { song, bpm } => {
            let song = resolve_song(&song)?;
            set_manual(&song, bpm, &store)
        }
        Command::Tap { song } => {
            let song = resolve_song(&song)?;
            tap(song, config, store)
        }
        Command::List { dir, sort, json } => {
            let order = sort.map(SortOrder::from).unwrap_or(SortOrder::Original);
            list(dir.as_deref().map(expand).as_deref(), order, json, &store)
        }
        Command::Delete { song } => {
            let song = resolve_song(&song)?;
            if store.delete(song.id)? {
                println!("Deleted analysis of {}", song.title);
            } else {
                println!("No analysis stored for {}", song.title);
            }
            Ok(())
        }
        Command::DeleteAll => {
            let deleted = store.delete_all()?;
            println!("Deleted {} analyses", deleted);
            Ok(())
        }
        Command::ExportFiltered { .. } | Command::InitConfig => Ok(()),
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

fn resolve_song(arg: &str) -> Result<Song> {
    let expanded = shellexpand::tilde(arg);
    Song::from_uri(expanded.as_ref()).with_context(|| format!("Unsupported song location: {}", arg))
}

fn scheduler_for(
    config: AnalyzerConfig,
    store: &Arc<SongAnalysisStore>,
) -> Result<(BatchScheduler, crossbeam::channel::Receiver<AnalysisEvent>)> {
    let jobs = config.max_concurrent;
    let analyzer = Arc::new(OnsetTempoAnalyzer::new(config));
    let (listener, events) = ChannelListener::new();
    let scheduler = BatchScheduler::new(analyzer, Arc::clone(store), Arc::new(listener), jobs)?;
    Ok((scheduler, events))
}

fn analyze_songs(
    songs: Vec<Song>,
    force: bool,
    config: AnalyzerConfig,
    store: Arc<SongAnalysisStore>,
) -> Result<()> {
    let (scheduler, _events) = scheduler_for(config, &store)?;

    let mut pending = Vec::new();
    for song in songs {
        match scheduler.analyze(song.clone(), force)? {
            Submission::Skipped => {
                println!(
                    "{}: {} (stored, use --force to re-analyze)",
                    song.title,
                    format_bpm(store.bpm(song.id)?)
                );
            }
            Submission::Scheduled(handle) | Submission::AlreadyRunning(handle) => {
                pending.push((song, handle));
            }
        }
    }

    let mut failed = 0;
    for (song, handle) in pending {
        let outcome = handle.wait();
        if matches!(outcome, JobOutcome::Failed(_)) {
            failed += 1;
        }
        println!("{}: {}", song.title, format_outcome(&outcome));
    }

    if failed > 0 {
        bail!("{} song(s) failed to analyze", failed);
    }
    Ok(())
}

fn analyze_library(
    dir: &Path,
    config: AnalyzerConfig,
    store: Arc<SongAnalysisStore>,
) -> Result<()> {
    log::info!("Scanning library: {:?}", dir);
    let library = Library::scan(dir)?;
    log::info!("Library loaded: {} songs", library.song_count());

    let (scheduler, events) = scheduler_for(config, &store)?;
    let report = scheduler.analyze_all(library.songs().cloned())?;
    println!(
        "Analyzing {} songs with {} workers ({} already analyzed)",
        report.scheduled,
        scheduler.max_concurrent(),
        report.skipped
    );

    let mut done = 0;
    let mut failed = 0;
    for event in events.iter() {
        match event {
            AnalysisEvent::Started(id) => {
                if let Some(song) = library.get_song(id) {
                    log::info!("Started: {}", song.title);
                }
            }
            AnalysisEvent::Finished(id, outcome) => {
                done += 1;
                if matches!(outcome, JobOutcome::Failed(_)) {
                    failed += 1;
                }
                let title = library.get_song(id).map(|s| s.title.as_str()).unwrap_or("?");
                println!("[{}/{}] {}: {}", done, report.scheduled, title, format_outcome(&outcome));
            }
            AnalysisEvent::AllFinished => break,
        }
    }

    println!("Done: {} analyzed, {} failed", done - failed, failed);
    Ok(())
}

fn set_manual(song: &Song, bpm: f64, store: &SongAnalysisStore) -> Result<()> {
    if !bpm.is_finite() || bpm <= 0.0 {
        bail!("BPM must be a positive number, got {}", bpm);
    }
    store.set_manual_bpm(song.id, Some(bpm))?;
    println!("{}: manual BPM set to {:.1}", song.title, bpm);
    Ok(())
}

fn tap(song: Song, config: AnalyzerConfig, store: Arc<SongAnalysisStore>) -> Result<()> {
    let mut tapper = TapTempo::new(config.tap_window);
    println!("Tap Enter on every beat of {}, then type q and Enter", song.title);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }
        if let Some(bpm) = tapper.tap() {
            println!("{:.1} BPM ({} taps)", bpm, tapper.len() + 1);
        }
    }

    let bpm = tapper.average().context("Need at least two taps to estimate a tempo")?;
    set_manual(&song, bpm, &store)?;

    // Re-run with the tapped tempo as reference
    analyze_songs(vec![song], true, config, store)
}

fn list(dir: Option<&Path>, order: SortOrder, json: bool, store: &SongAnalysisStore) -> Result<()> {
    let mut rows = match dir {
        Some(dir) => {
            let library = Library::scan(dir)?;
            library
                .songs()
                .map(|song| {
                    Ok(SongBpm {
                        song: song.clone(),
                        analysis: store.get(song.id)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        }
        None => store
            .all()?
            .into_iter()
            .map(|analysis| SongBpm {
                song: Song {
                    id: analysis.song_id,
                    title: analysis.song_id.to_string(),
                    path: PathBuf::new(),
                },
                analysis: Some(analysis),
            })
            .collect(),
    };

    sort_by_bpm(&mut rows, order);

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for row in &rows {
        let bpm = format_bpm(row.bpm());
        match row.analysis.as_ref().and_then(|a| a.manual_bpm) {
            Some(manual) => println!("{:>7}  (manual {:.1})  {}", bpm, manual, row.song.title),
            None => println!("{:>7}  {}", bpm, row.song.title),
        }
    }
    Ok(())
}

fn format_bpm(bpm: Option<f64>) -> String {
    match bpm {
        Some(bpm) => format!("{:.1}", bpm),
        None => "-".to_string(),
    }
}

fn format_outcome(outcome: &JobOutcome) -> String {
    match outcome {
        JobOutcome::Completed(Some(bpm)) => format!("{:.1} BPM", bpm),
        JobOutcome::Completed(None) => "no tempo detected".to_string(),
        JobOutcome::Cancelled => "cancelled".to_string(),
        JobOutcome::Failed(e) => format!("failed ({})", e),
    }
}
