use anyhow::{bail, Context, Result};
use clap::Parser;
use interleave_doc::config;
use interleave_doc::model::DocumentRequest;
use interleave_doc::JobController;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to a JSON document request
    #[arg(long)]
    request: Option<PathBuf>,

    /// Print an example configuration and exit
    #[arg(long)]
    print_example_config: bool,

    /// Poll interval while the job runs, in milliseconds
    #[arg(long, default_value_t = 250)]
    poll_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.print_example_config {
        print!("{}", config::example());
        return Ok(());
    }
    let Some(request_path) = args.request else {
        bail!("--request is required");
    };

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let raw = std::fs::read_to_string(&request_path)
        .with_context(|| format!("failed to read {}", request_path.display()))?;
    let request: DocumentRequest =
        serde_json::from_str(&raw).context("document request is not valid JSON")?;

    let controller = JobController::from_config(cfg)?;
    let id = controller.submit(request)?;
    info!(job_id = %id, "submitted");

    let mut last_state = None;
    let status = loop {
        let Some(status) = controller.poll(id) else {
            bail!("job {} disappeared", id);
        };
        if last_state != Some(status.state) {
            info!(job_id = %id, state = ?status.state, "progress");
            last_state = Some(status.state);
        }
        if status.state.is_terminal() {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(args.poll_ms)).await;
    };

    println!("{}", serde_json::to_string_pretty(&status)?);
    for (format, path) in controller.retrieve(id).await.unwrap_or_default() {
        info!(%format, path = %path.display(), "output available");
    }
    Ok(())
}
