use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dubsub::cache::TranslationCache;
use dubsub::config::{Config, TranscriptionProvider};
use dubsub::dub::{synthesizer_from_config, VoiceReference};
use dubsub::media::{BackgroundSeparator, Demucs, Ffmpeg};
use dubsub::pipeline::{print_summary, Capabilities, PipelineOrchestrator, RunOptions};
use dubsub::transcribe::transcriber_from_config;
use dubsub::translate::ChatTranslator;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "dubsub")]
#[command(version, about = "Translated subtitles and dubbing for video files")]
#[command(
    long_about = "Transcribe a video, translate its subtitles through a persistent cache, \
optionally dub them with a synthesized voice, and mux the result back into the video. \
Completed stages are reused when the command is run again."
)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Input video file
    input: Option<PathBuf>,

    /// Source language code, or "auto" to detect it
    #[arg(short, long, default_value = "auto")]
    source: String,

    /// Target language code (e.g., fr, es, ja)
    #[arg(short, long)]
    target: Option<String>,

    /// Transcribe with a local whisper model instead of the remote API
    #[arg(long)]
    local: bool,

    /// Replace the original audio with a synthesized dub
    #[arg(long)]
    dub: bool,

    /// Reference recording for voice cloning (requires --ref-text)
    #[arg(long, requires = "ref_text")]
    ref_audio: Option<PathBuf>,

    /// Transcript of the reference recording (requires --ref-audio)
    #[arg(long, requires = "ref_audio")]
    ref_text: Option<String>,

    /// Keep the original music and ambience under the dub (runs Demucs)
    #[arg(long, requires = "dub")]
    keep_background: bool,

    /// Write subtitles (and dub track) but do not mux a video
    #[arg(long)]
    subs_only: bool,

    /// Burn subtitles into the picture instead of adding a subtitle track
    #[arg(long, conflicts_with = "subs_only")]
    burn_subs: bool,

    /// Output video (defaults to <input>.<target>.mp4 next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for stage artifacts (defaults to <input>_dubsub next to the input)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Number of concurrent requests per stage
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Hide progress bars
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or clear the translation cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count and language pairs
    Stats,
    /// Remove every cached translation
    Clear,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn run_cache_command(config: &Config, action: CacheAction) -> Result<()> {
    let cache = TranslationCache::open(config.cache_file());
    match action {
        CacheAction::Stats => {
            let stats = cache.stats();
            println!("Cache file: {}", config.cache_file().display());
            println!("Entries:    {}", stats.entry_count);
            let pairs = cache.language_pairs();
            if !pairs.is_empty() {
                println!("Pairs:");
                for (source, target) in pairs {
                    println!("  {} -> {}", source, target);
                }
            }
        }
        CacheAction::Clear => {
            let removed = cache.clear().context("Failed to clear the translation cache")?;
            println!("Removed {} cached translation(s)", removed);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let mut config = Config::load().context("Failed to load configuration")?;

    if let Some(Command::Cache { action }) = cli.command {
        return run_cache_command(&config, action);
    }

    let input = cli
        .input
        .context("An input video is required (see --help)")?;
    let target = cli.target.context("--target is required")?;

    if cli.local {
        config.transcription_provider = TranscriptionProvider::Local;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Err(e) = config.validate(cli.dub) {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }

    let voice = match VoiceReference::from_parts(cli.ref_audio, cli.ref_text) {
        Ok(voice) => voice,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    let mut options = RunOptions::new(input, &cli.source, &target)
        .with_subs_only(cli.subs_only)
        .with_burn_subs(cli.burn_subs)
        .with_background(cli.keep_background)
        .with_progress(!cli.quiet);
    if cli.dub {
        options = options.with_dub(voice);
    } else if voice.is_some() {
        warn!("--ref-audio/--ref-text are ignored without --dub");
    }
    if let Some(dir) = cli.work_dir {
        options = options.with_work_dir(dir);
    }
    if let Some(output) = cli.output {
        options = options.with_output(output);
    }

    let ffmpeg = Ffmpeg::from_config(&config);
    ffmpeg.check().await.context("FFmpeg check failed")?;

    let capabilities = Capabilities {
        media: Arc::new(ffmpeg),
        transcriber: transcriber_from_config(&config),
        translator: Arc::new(ChatTranslator::from_config(&config)),
        synthesizer: cli.dub.then(|| synthesizer_from_config(&config)),
        separator: cli
            .keep_background
            .then(|| Arc::new(Demucs::from_config(&config)) as Arc<dyn BackgroundSeparator>),
    };
    let cache = Arc::new(TranslationCache::open(config.cache_file()));

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        ctrlc::set_handler(move || {
            if cancelled.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            eprintln!("\nCancelling after in-flight requests finish (press Ctrl+C again to abort)");
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    info!("Input:  {}", options.input.display());
    info!("Target: {}", target);
    if cli.dub {
        info!("Dub:    yes");
    }

    let orchestrator = PipelineOrchestrator::new(capabilities, cache, config);
    let report = orchestrator.run(&options, &cancelled).await;
    print_summary(&report);

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_dub_flags() {
        let cli = Cli::parse_from([
            "dubsub",
            "talk.mp4",
            "--target",
            "fr",
            "--dub",
            "--ref-audio",
            "me.wav",
            "--ref-text",
            "hello there",
        ]);
        assert_eq!(cli.input, Some(PathBuf::from("talk.mp4")));
        assert_eq!(cli.source, "auto");
        assert!(cli.dub);
        assert_eq!(cli.ref_text.as_deref(), Some("hello there"));
    }

    #[test]
    fn test_cli_ref_pair_is_enforced() {
        let result = Cli::try_parse_from(["dubsub", "talk.mp4", "-t", "fr", "--ref-audio", "me.wav"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_mux_flags() {
        let cli = Cli::parse_from([
            "dubsub",
            "talk.mp4",
            "-t",
            "fr",
            "--dub",
            "--keep-background",
            "--burn-subs",
        ]);
        assert!(cli.keep_background);
        assert!(cli.burn_subs);

        assert!(Cli::try_parse_from(["dubsub", "talk.mp4", "-t", "fr", "--keep-background"]).is_err());
        assert!(
            Cli::try_parse_from(["dubsub", "talk.mp4", "-t", "fr", "--subs-only", "--burn-subs"])
                .is_err()
        );
    }

    #[test]
    fn test_cli_cache_subcommand() {
        let cli = Cli::parse_from(["dubsub", "cache", "stats"]);
        assert!(matches!(
            cli.command,
            Some(Command::Cache {
                action: CacheAction::Stats
            })
        ));
    }
}
