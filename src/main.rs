mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};

use tl_av::{FfmpegTranscoder, SegmentTranscoder, ToolRegistry};
use tl_core::config::Config;
use tl_core::SessionId;
use tl_db::models::JobStatus;
use tl_stream::purge::JobPurgeService;
use tl_stream::StreamService;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "tapeline=debug,tl_stream=debug,tl_av=debug,tl_db=debug,tl_media=debug,tl_core=debug"
                .to_string()
        } else {
            "tapeline=info,tl_stream=info,tl_av=info,tl_db=info,tl_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run => {
            let config = Config::load_or_default(config_path);
            let transcoder = required_transcoder(&config)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(tl_stream::start(config, transcoder))?;
            Ok(())
        }
        Commands::Ingest {
            session,
            index,
            file,
            queue,
        } => {
            let config = Config::load_or_default(config_path);
            let transcoder = if queue {
                lenient_transcoder(&config)
            } else {
                required_transcoder(&config)?
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(ingest(config, transcoder, &session, index, &file, queue))
        }
        Commands::Finalize { session } => {
            let service = open(config_path)?;
            let session = parse_session(&session)?;
            let rt = tokio::runtime::Runtime::new()?;
            let path = rt.block_on(service.finalize_playlist(&session))?;
            println!("Finalized {}", path.display());
            Ok(())
        }
        Commands::Cleanup { session } => {
            let service = open(config_path)?;
            let session = parse_session(&session)?;
            let rt = tokio::runtime::Runtime::new()?;
            let report = rt.block_on(service.cleanup(&session));
            println!(
                "Removed {} files ({} failed), {} queued jobs cancelled",
                report.removed_files, report.failed_files, report.cancelled_jobs
            );
            Ok(())
        }
        Commands::Status { session } => {
            let service = open(config_path)?;
            let session = parse_session(&session)?;
            show_status(&service, &session)
        }
        Commands::Jobs {
            status,
            session,
            limit,
        } => {
            let service = open(config_path)?;
            list_jobs(&service, status.as_deref(), session.as_deref(), limit)
        }
        Commands::Purge => {
            let service = open(config_path)?;
            let ctx = service.context();
            let purge = JobPurgeService::new(
                ctx.db.clone(),
                ctx.config.queue.clone(),
                std::time::Duration::from_secs(ctx.config.workers.purge_interval_secs),
            );
            let counts = purge.run_purge()?;
            println!(
                "Purged {} completed and {} failed jobs",
                counts.completed, counts.failed
            );
            Ok(())
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(&config))
        }
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("tapeline {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// ffmpeg as discovered on this machine; fails if it is missing.
fn required_transcoder(config: &Config) -> Result<Arc<dyn SegmentTranscoder>> {
    let tools = ToolRegistry::discover(&config.tools);
    let transcoder = FfmpegTranscoder::new(&tools, config.transcode.timeout())?;
    Ok(Arc::new(transcoder))
}

/// For commands that never transcode in this process.
fn lenient_transcoder(config: &Config) -> Arc<dyn SegmentTranscoder> {
    let path = config
        .tools
        .ffmpeg_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("ffmpeg"));
    Arc::new(FfmpegTranscoder::with_path(path, config.transcode.timeout()))
}

fn open(config_path: Option<&Path>) -> Result<StreamService> {
    let config = Config::load_or_default(config_path);
    let transcoder = lenient_transcoder(&config);
    Ok(tl_stream::open_service(config, transcoder)?)
}

fn parse_session(session: &str) -> Result<SessionId> {
    SessionId::new(session).with_context(|| format!("invalid session id {session:?}"))
}

async fn ingest(
    config: Config,
    transcoder: Arc<dyn SegmentTranscoder>,
    session: &str,
    index: u64,
    file: &Path,
    queue: bool,
) -> Result<()> {
    let session = parse_session(session)?;
    let payload = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read chunk file {}", file.display()))?;
    let service = tl_stream::open_service(config, transcoder)?;

    if queue {
        let job_id = service.submit_chunk(&session, index, &payload).await?;
        println!("Queued job {job_id}");
    } else {
        let output = service.process_chunk(&session, index, &payload).await?;
        println!("Segment:  {}", output.segment_path.display());
        println!("Playlist: {}", output.playlist_path.display());
    }
    Ok(())
}

fn show_status(service: &StreamService, session: &SessionId) -> Result<()> {
    let state = service
        .session_state(session)?
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());
    println!("Session:  {session}");
    println!("State:    {state}");
    println!("Playlist: {}", service.get_playlist_path(session).display());

    let segments = service.segments(session)?;
    println!("\nSegments: {}", segments.len());
    for seg in &segments {
        print!("  [{}] {}", seg.chunk_index, seg.status);
        if let Some(ref error) = seg.error {
            print!(" - {error}");
        }
        println!();
    }
    Ok(())
}

fn list_jobs(
    service: &StreamService,
    status: Option<&str>,
    session: Option<&str>,
    limit: i64,
) -> Result<()> {
    let conn = tl_db::pool::get_conn(&service.context().db)?;

    let jobs = match session {
        Some(s) => {
            let session = parse_session(s)?;
            tl_db::queries::jobs::list_session_jobs(&conn, &session)?
        }
        None => {
            let status = status
                .map(|s| s.parse::<JobStatus>())
                .transpose()?;
            tl_db::queries::jobs::list_jobs(&conn, status, 0, limit)?
        }
    };

    for job in &jobs {
        print!(
            "{} {}#{} {} ({}/{})",
            job.id, job.session_id, job.chunk_index, job.status, job.attempts, job.max_attempts
        );
        if let Some(ref error) = job.error {
            print!(" - {error}");
        }
        println!();
    }

    let stats = tl_db::queries::jobs::job_stats(&conn)?;
    println!(
        "\n{} jobs: {} queued, {} active, {} retrying, {} completed, {} failed",
        stats.total(),
        stats.queued,
        stats.active,
        stats.retrying,
        stats.completed,
        stats.failed
    );
    Ok(())
}

async fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools).check_all().await;
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("ffmpeg is missing; chunks cannot be transcoded.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        for warning in &warnings {
            println!("! {warning}");
        }
    }
    println!("  Storage: {}", config.storage.base_dir.display());
    println!("  Database: {}", config.storage.database_path.display());
    println!("  Workers: {}", config.workers.count);
    println!(
        "  Queue: {} attempts, {} ms initial backoff",
        config.queue.max_attempts, config.queue.backoff_delay_ms
    );
    Ok(())
}
