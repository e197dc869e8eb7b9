use std::path::PathBuf;

use bestdori_mirror::error::{AppError, Result};
use bestdori_mirror::{App, Config};

const USAGE: &str = "usage: bestdori-mirror [--config PATH] [--init] [--once] [--sync-song ID] [--sync-post ID]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    init: bool,
    once: bool,
    sync_song: Option<u32>,
    sync_post: Option<u32>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => parsed.config = Some(PathBuf::from(value(&mut iter, arg)?)),
            "--init" => parsed.init = true,
            "--once" => parsed.once = true,
            "--sync-song" => parsed.sync_song = Some(id(&mut iter, arg)?),
            "--sync-post" => parsed.sync_post = Some(id(&mut iter, arg)?),
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => {
                return Err(AppError::Config(format!("unknown argument {:?}\n{}", other, USAGE)));
            }
        }
    }
    Ok(parsed)
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a String> {
    iter.next()
        .ok_or_else(|| AppError::Config(format!("{} needs a value", flag)))
}

fn id<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<u32> {
    let raw = value(iter, flag)?;
    raw.parse()
        .map_err(|_| AppError::Config(format!("{} expects a numeric id, got {:?}", flag, raw)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let args = parse_args(&args)?;

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // RUST_LOG wins over the configured level
    let default_level = config
        .log
        .level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let app = App::new(&config).await?;

    if let Some(id) = args.sync_song {
        let found = app.sync_song_by_id(id).await?;
        println!("song {}: {}", id, if found { "synced" } else { "not found" });
        return Ok(());
    }

    if let Some(id) = args.sync_post {
        let found = app.sync_post_by_id(id).await?;
        println!("post {}: {}", id, if found { "synced" } else { "not found" });
        return Ok(());
    }

    if args.init {
        let report = app.initialize().await?;
        println!(
            "Initialized {} songs, {} charts and {} posts",
            report.songs, report.charts, report.posts
        );
        if !args.once {
            return Ok(());
        }
    }

    if args.once {
        app.run_once().await?;
        return Ok(());
    }

    app.run();
    tracing::info!("mirror running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    app.shutdown().await;

    Ok(())
}
