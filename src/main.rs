use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use media_resolver_lib::resolver::parser::FormatSelector;
use media_resolver_lib::{init_tracing, MediaResolver, Platform, ResolverConfig, Tier};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a post link (or text containing one) and print the result as JSON
    Resolve {
        text: String,

        /// Include the dispatch attempt log
        #[arg(long)]
        verbose: bool,
    },

    /// Resolve a post link and download one of its formats
    Download {
        text: String,

        /// Quality label ("1080p", "720p", ...), "best" or "audio"
        #[arg(short, long, default_value = "best")]
        quality: String,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,

        /// Send a pooled session with the media request
        #[arg(long)]
        with_credential: bool,
    },

    /// Add a session cookie string to the credential store
    AddCredential {
        platform: Platform,
        tier: Tier,
        value: String,
    },

    /// Print credential pool health
    Pools,
}

fn load_config(path: Option<&PathBuf>) -> Result<ResolverConfig, String> {
    match path {
        Some(path) => ResolverConfig::load(path).map_err(|e| e.to_string()),
        None => Ok(ResolverConfig::default().with_env_overrides()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

async fn run(cli: Cli) -> Result<bool, String> {
    let config = load_config(cli.config.as_ref())?;
    let resolver = MediaResolver::builder(config).build().await.map_err(|e| e.to_string())?;

    let ok = match cli.command {
        Commands::Resolve { text, verbose } => {
            let resolution = resolver.resolve(&text, "cli").await;
            if verbose {
                print_json(&resolution)?;
            } else {
                print_json(&resolution.result)?;
            }
            resolution.result.is_success()
        }
        Commands::Download {
            text,
            quality,
            output,
            with_credential,
        } => {
            let resolution = resolver.resolve(&text, "cli").await;
            let (Some(media), Some(request)) = (resolution.result.media(), resolution.request.as_ref()) else {
                print_json(&resolution.result)?;
                return Ok(false);
            };
            let format = FormatSelector::pick(&media.formats, &quality)
                .ok_or_else(|| format!("no '{}' format; available: {}", quality, labels(&media.formats)))?;

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let fetched = resolver
                .download(format, request.platform, with_credential, &cancel)
                .await
                .map_err(|e| e.to_string())?;
            let bytes = fetched.bytes;
            let saved = fetched.persist(&output).map_err(|e| e.to_string())?;
            eprintln!("Saved {} ({} bytes) to {}", format.quality_label, bytes, saved.display());
            true
        }
        Commands::AddCredential { platform, tier, value } => {
            let id = resolver.pool().add(platform, tier, &value).await;
            println!("{}", id);
            true
        }
        Commands::Pools => {
            print_json(&resolver.pool().stats())?;
            true
        }
    };

    resolver.shutdown().await;
    Ok(ok)
}

fn labels(formats: &media_resolver_lib::FormatSet) -> String {
    formats
        .iter()
        .map(|f| f.quality_label.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("media_resolver_lib=info,media_resolver=info");
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
