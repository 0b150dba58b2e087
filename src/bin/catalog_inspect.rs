use anyhow::{Context, Result};
use clap::Parser;
use interleave_doc::catalog;
use interleave_doc::config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Language whose resource types to list
    #[arg(long)]
    lang: String,

    /// Second language; prints book codes and resource types both share
    #[arg(long)]
    other: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let source = catalog::from_config(&cfg)?;
    let snapshot = source.snapshot().await?;

    println!("Catalog version: {}", snapshot.version);
    println!("Resource types for {}:", args.lang);
    for rt in snapshot.resource_types(&args.lang) {
        let mark = if rt.available { "" } else { " (no books)" };
        println!("  {} -> {}{}", rt.resource_type, rt.title, mark);
    }

    if let Some(other) = &args.other {
        let books = snapshot.shared_book_codes(&args.lang, other);
        println!("Books shared by {} and {}: {}", args.lang, other, books.join(", "));
        let types = snapshot.shared_resource_types(&args.lang, other);
        println!(
            "Resource types shared by {} and {}: {}",
            args.lang,
            other,
            types.join(", ")
        );
    }

    println!("Languages:");
    for (code, class) in snapshot.classification() {
        println!("  {} -> {:?}", code, class);
    }
    Ok(())
}
