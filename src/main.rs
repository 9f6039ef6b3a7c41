use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use uk_transcriber::cli::{Cli, Commands, OutputFormat};
use uk_transcriber::config::{credentials, Config, Overrides};
use uk_transcriber::extractors::FfmpegExtractor;
use uk_transcriber::storage::{s3, S3ObjectStore};
use uk_transcriber::transcribe::{TranscribeRecognizer, TranscriptionPipeline};
use uk_transcriber::utils::{format_duration, InputValidator};
use uk_transcriber::{output, ObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = Config::load().await?;
    config.apply_overrides(Overrides {
        bucket: cli.bucket.clone(),
        model: cli.model.clone(),
        verbose: cli.verbose,
        quiet: cli.quiet,
    });

    match cli.command {
        Commands::Transcribe { input, output, format } => {
            transcribe(&config, &input, output.as_deref(), &format).await?;
        }
        Commands::Setup => setup(&config).await?,
        Commands::Auth { status } => {
            if status {
                auth_status(&config).await;
            } else {
                println!("{}", credentials::remediation());
            }
        }
        // `config` alone behaves like `config --show`
        Commands::Config { init, .. } => {
            if init {
                let path = Config::default().save().await?;
                println!("Configuration written to: {}", path.display());
            } else {
                config.display();
            }
        }
        Commands::Version => print_version(),
    }

    Ok(())
}

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "uk_transcriber=debug"
    } else if cli.quiet {
        "uk_transcriber=warn"
    } else {
        "uk_transcriber=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn transcribe(
    config: &Config,
    input: &str,
    output_path: Option<&std::path::Path>,
    format: &OutputFormat,
) -> Result<()> {
    // Local checks first: nothing touches the network until these pass
    InputValidator::new(config.limits.max_file_size_bytes).validate(input)?;
    let extractor = FfmpegExtractor::locate(config)?;

    let resolved =
        credentials::resolve(&config.aws_region(), &credentials::default_sources()).await?;
    let bucket = s3::resolve_bucket(config, &resolved.sdk_config).await?;
    tracing::info!("Using bucket {}", bucket);

    let store = S3ObjectStore::new(&resolved.sdk_config, bucket, config);
    let recognizer = TranscribeRecognizer::new(&resolved.sdk_config, config);
    let pipeline = TranscriptionPipeline::new(
        config,
        Box::new(extractor),
        Box::new(store),
        Box::new(recognizer),
    );

    pipeline.prepare().await?;

    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        tracing::warn!("Interrupted, cleaning up");
    };
    let result = pipeline.run_until(input, cancel).await;

    for warning in &result.warnings {
        eprintln!("{} {}", style("Warning:").yellow().bold(), warning);
    }

    if !result.success {
        let stage = result
            .failed_stage
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown stage".to_string());
        anyhow::bail!(
            "Transcription failed while {}: {}",
            stage,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    let path = output::resolve_output_path(input, output_path, format);
    output::save_to_file(&result, &path, format)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if !config.app.quiet {
        println!("{}", style("Transcription complete").green().bold());
        println!("  Words:      {}", result.word_count);
        println!("  Characters: {}", result.char_count);
        println!("  Time:       {}", format_duration(result.processing_time.as_secs_f64()));
        if result.text.is_empty() {
            println!("  {}", style("No speech detected").yellow());
        }
    }
    println!("Transcription saved to: {}", path.display());

    Ok(())
}

async fn setup(config: &Config) -> Result<()> {
    let extractor = FfmpegExtractor::locate(config)?;
    println!("{} ffmpeg: {}", style("✓").green(), extractor.ffmpeg_path().display());

    let resolved =
        credentials::resolve(&config.aws_region(), &credentials::default_sources()).await?;
    println!("{} credentials: {}", style("✓").green(), resolved.source);

    let bucket = s3::resolve_bucket(config, &resolved.sdk_config).await?;
    let store = S3ObjectStore::new(&resolved.sdk_config, bucket, config);
    store.ensure_bucket().await?;
    println!("{} bucket: {}", style("✓").green(), store.bucket());

    println!("{}", style("Ready to transcribe").green().bold());
    Ok(())
}

async fn auth_status(config: &Config) {
    let report = credentials::status(&config.aws_region(), &credentials::default_sources()).await;

    let mut any_ok = false;
    for (source, outcome) in report {
        match outcome {
            Ok(()) => {
                any_ok = true;
                println!("{} {}", style("✓").green(), source);
            }
            Err(reason) => println!("{} {}: {}", style("✗").red(), source, reason),
        }
    }

    if !any_ok {
        println!();
        println!("{}", credentials::remediation());
    }
}

fn print_version() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("  commit:  {}", option_env!("GIT_COMMIT").unwrap_or("unknown"));
    println!(
        "  profile: {}",
        if cfg!(debug_assertions) { "debug" } else { "release" }
    );
}
