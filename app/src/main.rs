// ==============================================================================
// main.rs - Submission Processor CLI
// ==============================================================================
// Description: Runs a single file transformation locally, for debugging and
//              for reproducing a failed job by hand
// Author: Matt Barham
// Created: 2026-10-05
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use submission_processor::{alignment, variant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trim, compress and index a VCF as the worker would
    TrimVcf {
        /// Source VCF (plain or gzip)
        #[arg(short, long)]
        input: PathBuf,

        /// De-identified sample label
        #[arg(short, long)]
        sample_id: String,

        /// Upload name, e.g. {fileservice_uuid}.vcf
        #[arg(short, long)]
        name: String,

        /// Directory receiving {name}.gz and {name}.gz.tbi
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Rewrite a BAM header, check integrity and print the MD5
    ReheaderBam {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        sample_id: String,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Structural integrity check of a BAM file
    Quickcheck {
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "submission_processor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match args.command {
        Command::TrimVcf {
            input,
            sample_id,
            name,
            output_dir,
        } => {
            std::fs::create_dir_all(&output_dir)
                .with_context(|| format!("Failed to create {:?}", output_dir))?;
            let working = output_dir.join(&name);
            std::fs::copy(&input, &working)
                .with_context(|| format!("Failed to copy {:?} to {:?}", input, working))?;

            let output = variant::normalize_variant(&working, &sample_id)
                .context("Variant normalization failed")?;
            info!("Wrote {:?} and {:?}", output.compressed.path, output.index);
            println!("{}", output.compressed.path.display());
            println!("{}", output.index.display());
        }
        Command::ReheaderBam {
            input,
            sample_id,
            output,
        } => {
            let normalized = alignment::normalize_alignment(&input, &output, &sample_id)
                .context("Alignment normalization failed")?;
            println!(
                "{}  {}",
                normalized.md5.unwrap_or_default(),
                normalized.path.display()
            );
        }
        Command::Quickcheck { path } => {
            alignment::quickcheck(&path)?;
            info!("{:?} passed quickcheck", path);
        }
    }

    Ok(())
}
