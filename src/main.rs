use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use rustyidu::config::{self, OcrEngineKind};
use rustyidu::index::open_configured_index;
use rustyidu::ingest;
use rustyidu::logging::{self, LoggingOptions};
use rustyidu::ocr::{ImageInput, ImageSource, create_ocr_engine};
use rustyidu::pipeline::{BatchCoordinator, DEFAULT_BATCH_SIZE, Pipeline};

#[derive(Parser)]
#[command(
    name = "rustyidu",
    version,
    about = "Classify document images and extract their fields"
)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set.
    #[arg(long, global = true)]
    verbose: bool,
    /// Append logs to this file instead of IDU_LOG_FILE or logs/rustyidu.log.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract structured fields from one document image and print them as JSON.
    Extract {
        /// Image file (PNG, JPEG, TIFF).
        file: Option<PathBuf>,
        /// Base64-encoded image (a `data:` URL is accepted) instead of a file.
        #[arg(long, conflicts_with = "file")]
        base64: Option<String>,
    },
    /// OCR a labelled dataset and add the texts to the similarity index.
    Populate {
        /// Directory with one subdirectory of images per document type.
        #[arg(long)]
        dataset_path: PathBuf,
        /// Images processed concurrently.
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// OCR engine; defaults to OCR_ENGINE.
        #[arg(long, value_parser = ["tesseract", "olmo_ocr"])]
        ocr_engine: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    // IDU_LOG_FILE may come from .env, so load it before the file layer is configured.
    dotenvy::dotenv().ok();
    logging::init_tracing(&LoggingOptions {
        log_file: cli.log_file.clone(),
        verbose: cli.verbose,
        disable_file: false,
    });

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "Command failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let config = config::init_config().context("Failed to load configuration")?;

    match command {
        Command::Extract { file, base64 } => {
            let input = image_input(file, base64)?;
            let description = input.describe();
            let bytes = tokio::task::spawn_blocking(move || input.load_bytes())
                .await?
                .with_context(|| format!("Failed to read {description}"))?;
            let pipeline = Pipeline::from_config(config).await?;
            let result = pipeline.run(bytes).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Populate {
            dataset_path,
            batch_size,
            ocr_engine,
        } => {
            let kind = match ocr_engine {
                Some(name) => name
                    .parse::<OcrEngineKind>()
                    .map_err(|()| anyhow!("Unknown OCR engine: {name}"))?,
                None => config.ocr_engine,
            };
            let engine = create_ocr_engine(kind, config)?;
            let coordinator =
                BatchCoordinator::new(engine, batch_size)?.with_anchor(config.ocr_anchor);
            let index = open_configured_index(config).await?;
            let report = ingest::populate(index.as_ref(), &coordinator, &dataset_path).await?;
            println!(
                "Indexed {} of {} images into '{}'",
                report.indexed, report.discovered, config.collection_name
            );
            for path in &report.failed {
                println!("Failed: {}", path.display());
            }
        }
    }
    Ok(())
}

fn image_input(file: Option<PathBuf>, base64: Option<String>) -> Result<ImageInput> {
    let source = ImageSource {
        path: file,
        bytes: None,
        base64,
    };
    Ok(source.resolve()?)
}
