use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{Config, ConverterCommand};
use crate::error::ConversionError;
use crate::model::{FormatOutcome, OutputFormat};
use crate::render::staging_path;

const MAX_DIAGNOSTICS: usize = 2000;

/// Turns the rendered HTML into another format.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(
        &self,
        format: OutputFormat,
        input: &Path,
        output: &Path,
    ) -> Result<(), ConversionError>;
}

/// Runs one configured external program per format.
#[derive(Debug, Clone)]
pub struct ProcessConverter {
    commands: HashMap<OutputFormat, ConverterCommand>,
    timeout: Duration,
}

impl ProcessConverter {
    pub fn from_config(cfg: &Config) -> Self {
        let commands = HashMap::from([
            (OutputFormat::Pdf, cfg.converters.pdf.clone()),
            (OutputFormat::Epub, cfg.converters.epub.clone()),
            (OutputFormat::Docx, cfg.converters.docx.clone()),
        ]);
        Self {
            commands,
            timeout: cfg.convert_timeout(),
        }
    }
}

fn expand_args(args: &[String], input: &Path, output: &Path) -> Vec<String> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    args.iter()
        .map(|a| a.replace("{input}", &input).replace("{output}", &output))
        .collect()
}

fn diagnostics(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stderr).trim().to_string();
    let out = String::from_utf8_lossy(stdout);
    if !out.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(out.trim());
    }
    if text.len() > MAX_DIAGNOSTICS {
        let mut cut = MAX_DIAGNOSTICS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str(" …");
    }
    text
}

#[async_trait]
impl DocumentConverter for ProcessConverter {
    async fn convert(
        &self,
        format: OutputFormat,
        input: &Path,
        output: &Path,
    ) -> Result<(), ConversionError> {
        let command = self
            .commands
            .get(&format)
            .ok_or_else(|| ConversionError::Spawn {
                format,
                program: String::new(),
                message: "no converter configured".to_string(),
            })?;

        let child = Command::new(&command.program)
            .args(expand_args(&command.args, input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConversionError::Spawn {
                format,
                program: command.program.clone(),
                message: e.to_string(),
            })?;

        // Dropping the future on timeout kills the child.
        let out = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(ConversionError::Failed {
                    format,
                    status: "unknown".to_string(),
                    diagnostics: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ConversionError::Timeout {
                    format,
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        if !out.status.success() {
            return Err(ConversionError::Failed {
                format,
                status: out.status.to_string(),
                diagnostics: diagnostics(&out.stdout, &out.stderr),
            });
        }
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ConversionError::MissingOutput {
                format,
                path: output.display().to_string(),
            });
        }
        Ok(())
    }
}

/// Convert `input` into every format concurrently; each format is retried
/// on its own. A converter that cannot be started is not retried.
///
/// Converters write to a private staging file that is moved over the
/// final path only on success, so a failed attempt never removes or
/// truncates output another job already published.
pub async fn convert_all(
    converter: &dyn DocumentConverter,
    formats: &[OutputFormat],
    input: &Path,
    output_for: impl Fn(OutputFormat) -> PathBuf,
    max_attempts: u32,
) -> Vec<FormatOutcome> {
    let tasks = formats.iter().map(|&format| {
        let output = output_for(format);
        async move {
            let mut attempt = 0;
            loop {
                attempt += 1;
                let staging = staging_path(&output);
                let result = match converter.convert(format, input, &staging).await {
                    Ok(()) => tokio::fs::rename(&staging, &output).await.map_err(|err| {
                        ConversionError::MissingOutput {
                            format,
                            path: format!("{} ({})", staging.display(), err),
                        }
                    }),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => {
                        info!(%format, attempt, path = %output.display(), "conversion finished");
                        return FormatOutcome {
                            format,
                            succeeded: true,
                            error: None,
                        };
                    }
                    Err(e) => {
                        let _ = tokio::fs::remove_file(&staging).await;
                        let retry =
                            attempt < max_attempts && !matches!(e, ConversionError::Spawn { .. });
                        warn!(%format, attempt, error = %e, retry, "conversion failed");
                        if !retry {
                            return FormatOutcome {
                                format,
                                succeeded: false,
                                error: Some(e.to_string()),
                            };
                        }
                    }
                }
            }
        }
    });
    join_all(tasks).await
}
