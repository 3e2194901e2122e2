use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use harvester::config::Config;
use harvester::export::{self, ExportFormat};
use harvester::media::Ffmpeg;
use harvester::pipeline::{self, HarvestOutcome, PipelineContext};
use harvester::logging;
use harvester::services::{Services, VideoSource};

enum Command {
    Url(String),
    Source(VideoSource),
    Export {
        output: PathBuf,
        format: Option<ExportFormat>,
        include_words: bool,
    },
    Stats,
}

/// Command-line flags that override the config file.
#[derive(Default)]
struct Overrides {
    manual_transcripts_only: bool,
    min_views: Option<u64>,
    max_duration_mins: Option<u64>,
    keep_non_speakers: bool,
    jobs: Option<usize>,
}

struct Args {
    command: Command,
    config_path: Option<PathBuf>,
    overrides: Overrides,
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    print_help();
    std::process::exit(1);
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(v) => v,
        None => fail(&format!("{} requires an argument", flag)),
    }
}

fn number<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> T {
    value(args, i, flag)
        .parse()
        .unwrap_or_else(|_| fail(&format!("{} expects a number", flag)))
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut overrides = Overrides::default();
    let mut positional: Vec<String> = Vec::new();
    let mut format = None;
    let mut include_words = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("harvester {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(value(&args, i, "--config")));
                i += 1;
            }
            "--manual-transcripts-only" => overrides.manual_transcripts_only = true,
            "--keep-non-speakers" => overrides.keep_non_speakers = true,
            "--min-views" => {
                overrides.min_views = Some(number(&args, i, "--min-views"));
                i += 1;
            }
            "--max-duration" => {
                overrides.max_duration_mins = Some(number(&args, i, "--max-duration"));
                i += 1;
            }
            "--jobs" | "-j" => {
                let jobs: usize = number(&args, i, "--jobs");
                if jobs == 0 {
                    fail("--jobs must be at least 1");
                }
                overrides.jobs = Some(jobs);
                i += 1;
            }
            "--format" | "-f" => {
                let name = value(&args, i, "--format");
                format = Some(
                    ExportFormat::parse(name)
                        .unwrap_or_else(|| fail(&format!("unknown export format: {}", name))),
                );
                i += 1;
            }
            "--words" => include_words = true,
            arg if arg.starts_with('-') => fail(&format!("unknown argument: {}", arg)),
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let command = match positional.as_slice() {
        [cmd, url] if cmd == "url" => Command::Url(url.clone()),
        [cmd, id] if cmd == "channel" => Command::Source(VideoSource::Channel(id.clone())),
        [cmd, id] if cmd == "user" => Command::Source(VideoSource::User(id.clone())),
        [cmd, id] if cmd == "playlist" => Command::Source(VideoSource::Playlist(id.clone())),
        [cmd, output] if cmd == "export" => Command::Export {
            output: PathBuf::from(output),
            format,
            include_words,
        },
        [cmd] if cmd == "stats" => Command::Stats,
        [] => fail("no command given"),
        _ => fail(&format!("unrecognised command: {}", positional.join(" "))),
    };

    Args {
        command,
        config_path,
        overrides,
    }
}

fn print_help() {
    println!(
        r#"harvester - curate speaking-face video segments into a dataset

USAGE:
    harvester [OPTIONS] <COMMAND>

COMMANDS:
    url <URL>               Harvest a single video
    channel <ID>            Harvest every video of a channel
    user <ID>               Harvest every video of a user
    playlist <ID>           Harvest every video of a playlist
    export <PATH>           Write finalised segments to PATH
    stats                   Show dataset and rejection counts

OPTIONS:
    --config, -c PATH           Path to config file
    --manual-transcripts-only   Reject videos with auto-generated captions
    --min-views N               Reject videos with fewer views
    --max-duration MINUTES      Reject longer videos
    --keep-non-speakers         Keep crops of tracked faces that are not speaking
    --jobs, -j N                Videos harvested in parallel
    --format, -f csv|json       Export format (default: from PATH extension)
    --words                     Include word-level rows in the export
    --version, -V               Show version
    --help, -h                  Show this help message

ENVIRONMENT:
    HARVESTER_CONFIG    Path to config file (overrides default location)
    HARVESTER_LOG       Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/harvester/config.toml"#
    );
}

fn apply_overrides(config: &mut Config, overrides: &Overrides) {
    let harvest = &mut config.harvest;
    harvest.manual_transcripts_only |= overrides.manual_transcripts_only;
    harvest.keep_non_speakers |= overrides.keep_non_speakers;
    if overrides.min_views.is_some() {
        harvest.min_views = overrides.min_views;
    }
    if overrides.max_duration_mins.is_some() {
        harvest.max_duration_mins = overrides.max_duration_mins;
    }
    if let Some(jobs) = overrides.jobs {
        harvest.jobs = jobs;
    }
}

fn main() -> Result<()> {
    let args = parse_args();

    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    apply_overrides(&mut config, &args.overrides);

    match args.command {
        Command::Url(url) => {
            let ctx = context(config);
            let db = ctx.open_database()?;
            match pipeline::harvest_url(&ctx, &db, &url)? {
                HarvestOutcome::Skipped => println!("{} was already harvested", url),
                HarvestOutcome::Rejected(reason) => println!("{} rejected: {}", url, reason),
                HarvestOutcome::Completed {
                    segments,
                    num_people,
                } => println!(
                    "{} completed: {} segments, {} people",
                    url, segments, num_people
                ),
            }
        }
        Command::Source(source) => {
            let ctx = context(config);
            let summary = pipeline::harvest_source(&ctx, &source)?;
            println!(
                "{} {}: {} videos, {} completed, {} rejected, {} skipped, {} failed, {} segments",
                source.kind(),
                source.id(),
                summary.urls,
                summary.completed,
                summary.rejected,
                summary.skipped,
                summary.failed,
                summary.segments
            );
        }
        Command::Export {
            output,
            format,
            include_words,
        } => {
            let format = match format {
                Some(f) => f,
                None => output
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(ExportFormat::parse)
                    .context("cannot infer export format; pass --format")?,
            };
            let ctx = context(config);
            let db = ctx.open_database()?;
            let count = export::export_dataset(
                &db,
                &ctx.config.storage.data_dir,
                &output,
                format,
                include_words,
            )?;
            info!(count, path = %output.display(), "Export written");
            println!("Exported {} segments to {}", count, output.display());
        }
        Command::Stats => {
            let ctx = context(config);
            let db = ctx.open_database()?;
            print_stats(&db)?;
        }
    }

    Ok(())
}

fn context(config: Config) -> PipelineContext {
    let services = Services::from_config(&config.services);
    let media = Arc::new(Ffmpeg::new(&config.media));
    PipelineContext::new(config, services, media)
}

fn print_stats(db: &harvester::db::Database) -> Result<()> {
    let stats = db.stats()?;
    println!("Videos:     {} ({} completed, {} rejected)", stats.videos_total, stats.videos_completed, stats.videos_rejected);
    println!("Segments:   {} ({:.1} hours)", stats.segments, stats.segment_seconds / 3600.0);
    println!("Words:      {}", stats.words);
    println!("Identities: {}", stats.identities);

    let rejections = db.rejection_counts()?;
    if rejections.is_empty() {
        return Ok(());
    }
    println!();
    println!("Rejections by stage:");
    for (stage, count) in rejections {
        println!("    {:<20} {}", stage, count);
    }
    Ok(())
}

