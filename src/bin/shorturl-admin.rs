use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shorturl::config::Config;
use shorturl::storage;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shorturl-admin")]
#[command(about = "Short URL pool and binding management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add codes to the pool as available
    Seed {
        /// Codes to add
        codes: Vec<String>,
        /// Read codes from a file, one per line (blank lines and # comments skipped)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show pool totals
    Stats,
    /// Disable every binding of a code
    Disable {
        code: String,
    },
    /// Re-enable every binding of a code
    Enable {
        code: String,
    },
}

/// One code per line; blank lines and `#` comments are skipped
fn parse_code_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let storage = storage::connect(&config.database).await?;

    match cli.command {
        Commands::Seed { mut codes, file } => {
            if let Some(path) = file {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                codes.extend(parse_code_list(&contents));
            }
            if codes.is_empty() {
                bail!("no codes given; pass codes as arguments or use --file");
            }

            let inserted = storage.seed_codes(&codes).await?;
            println!(
                "✓ Added {} new codes ({} skipped as duplicates)",
                inserted,
                codes.len() as u64 - inserted.min(codes.len() as u64)
            );
        }
        Commands::Stats => {
            let stats = storage.pool_stats().await?;
            println!("{:<12} {}", "Total", stats.total);
            println!("{:<12} {}", "Available", stats.available);
            println!("{:<12} {}", "Taken", stats.taken);
        }
        Commands::Disable { code } => {
            let touched = storage.set_binding_disabled(&code, true).await?;
            if touched > 0 {
                println!("✓ Disabled {} binding(s) for '{}'", touched, code);
            } else {
                println!("⚠ No bindings found for '{}'", code);
            }
        }
        Commands::Enable { code } => {
            let touched = storage.set_binding_disabled(&code, false).await?;
            if touched > 0 {
                println!("✓ Enabled {} binding(s) for '{}'", touched, code);
            } else {
                println!("⚠ No bindings found for '{}'", code);
            }
        }
    }

    storage.close().await;
    Ok(())
}
