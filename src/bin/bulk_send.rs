// src/bin/bulk_send.rs
//
// Standalone bulk sender: reads a CSV of recipients, renders or
// LLM-personalizes an email template per row, and sends via SMTP.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use courier::ai::{DynLlmClient, LlmClient, OllamaClient};
use courier::config;
use courier::mailer::{DryRunMailer, DynMailer, Mailer, SmtpMailer};
use courier::template;

#[derive(Parser)]
#[command(
    name = "courier-send",
    about = "Send batch emails with LLM-generated content"
)]
struct Cli {
    /// Path to CSV file containing email addresses
    #[arg(short = 'c', long)]
    csv: PathBuf,

    /// Path to email template file
    #[arg(short = 't', long)]
    template: PathBuf,

    /// Email subject line
    #[arg(short = 's', long)]
    subject: Option<String>,

    /// Path to .env file for configuration
    #[arg(short = 'e', long)]
    env_file: Option<String>,

    /// Ollama model to use (default: llama2)
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Ollama API host URL
    #[arg(long)]
    ollama_host: Option<String>,

    /// Temperature for LLM generation (0.0-1.0, default: 0.7)
    #[arg(long)]
    temperature: Option<f32>,

    /// Dry run mode - don't actually send emails
    #[arg(short = 'd', long)]
    dry_run: bool,

    /// Skip LLM generation, use template with simple variable substitution only
    #[arg(long)]
    no_llm: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Limit the number of emails to send (useful for testing)
    #[arg(short = 'l', long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(args).await {
        Ok(failed) if failed > 0 => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Fatal error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Returns the number of failed sends.
async fn run(args: Cli) -> Result<usize> {
    if !args.csv.exists() {
        bail!("CSV file not found: {}", args.csv.display());
    }
    if !args.template.exists() {
        bail!("Template file not found: {}", args.template.display());
    }

    let mut cfg = match &args.env_file {
        Some(path) => config::load_from(path),
        None => config::load(),
    }
    .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;

    // Command-line arguments override the environment.
    if let Some(model) = args.model {
        cfg.ollama.model = model;
    }
    if let Some(host) = args.ollama_host {
        cfg.ollama.host = Some(host);
    }
    if let Some(temperature) = args.temperature {
        cfg.ollama.temperature = temperature;
    }

    let dry_run = args.dry_run
        || std::env::var("DRY_RUN")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

    let subject = args
        .subject
        .or_else(|| std::env::var("EMAIL_SUBJECT").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "Email from Courier".to_string());

    info!("Initializing modules...");

    let template_content = std::fs::read_to_string(&args.template)
        .with_context(|| format!("failed to read template {}", args.template.display()))?;

    let mailer: DynMailer = if dry_run {
        info!("Running in DRY RUN mode - emails will not be sent");
        std::sync::Arc::new(DryRunMailer::new())
    } else {
        if cfg.smtp.username.is_empty() || cfg.smtp.password.is_empty() {
            bail!(
                "SMTP credentials not configured. Set SMTP_USERNAME and SMTP_PASSWORD \
                 environment variables or use --dry-run for testing."
            );
        }

        let smtp = SmtpMailer::from_config(&cfg.smtp)?;

        // Fail fast on bad credentials rather than after 200 sends.
        info!("Testing SMTP connection...");
        if !smtp.check().await {
            bail!("SMTP connection test failed. Please check your configuration.");
        }

        std::sync::Arc::new(smtp)
    };

    let llm: Option<DynLlmClient> = if args.no_llm {
        info!("LLM generation disabled - using simple template substitution");
        None
    } else {
        info!("Initializing Ollama with model: {}", cfg.ollama.model);
        let client = OllamaClient::from_config(&cfg.ollama);

        info!("Testing Ollama connection...");
        if !client.test_connection().await {
            bail!(
                "Failed to connect to Ollama. Make sure Ollama is running. \
                 Use --no-llm to skip LLM generation."
            );
        }

        if !client.check_model_available().await {
            warn!(
                "Model '{}' may not be available. Email generation might fail.",
                cfg.ollama.model
            );
        }

        Some(std::sync::Arc::new(client))
    };

    let mut recipients = read_recipients(&args.csv)?;
    let total = recipients.len();
    info!("Found {} email(s) in CSV file", total);

    if let Some(limit) = args.limit {
        if limit < total {
            recipients.truncate(limit);
            info!("Limiting to {} emails out of {} total", limit, total);
        }
    }

    let (successful, failed) = send_all(
        &recipients,
        &template_content,
        &subject,
        &mailer,
        llm.as_ref(),
    )
    .await;

    info!("{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    info!("Total emails processed: {}", successful + failed);
    info!("Successful: {}", successful);
    info!("Failed: {}", failed);
    info!("{}", "=".repeat(60));

    Ok(failed)
}

/// Sequential per-row send loop. A failure on one row never aborts the rest.
async fn send_all(
    recipients: &[HashMap<String, String>],
    template_content: &str,
    subject: &str,
    mailer: &DynMailer,
    llm: Option<&DynLlmClient>,
) -> (usize, usize) {
    info!("Sending emails to {} recipient(s)", recipients.len());

    let mut successful = 0;
    let mut failed = 0;

    for (i, row) in recipients.iter().enumerate() {
        let email = row.get("email").map(String::as_str).unwrap_or_default();
        info!("[{}/{}] Processing: {}", i + 1, recipients.len(), email);

        let body = match llm {
            Some(llm) => match llm.generate_email(template_content, row).await {
                Ok(body) => body,
                Err(err) => {
                    error!("Error processing {}: {}", email, err);
                    failed += 1;
                    continue;
                }
            },
            None => template::render(template_content, row),
        };

        let outcome = mailer.send(email, subject, &body).await;
        if outcome.success {
            successful += 1;
        } else {
            failed += 1;
        }
    }

    (successful, failed)
}

/// Read recipient rows from a CSV file. The header must contain an `email`
/// column; rows with an empty email are skipped. Every column becomes a
/// template variable.
fn read_recipients(path: &Path) -> Result<Vec<HashMap<String, String>>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open CSV {}", path.display()))?;

    let headers = reader.headers()?.clone();
    if !headers.iter().any(|h| h == "email") {
        bail!("CSV file must contain an 'email' column");
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: HashMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if row.get("email").map(|e| !e.is_empty()).unwrap_or(false) {
            rows.push(row);
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn reads_rows_and_skips_empty_emails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "email,name,company").unwrap();
        writeln!(file, "ana@example.com,Ana,Acme").unwrap();
        writeln!(file, ",Ghost,Nowhere").unwrap();
        writeln!(file, "bo@example.com,Bo,Initech").unwrap();

        let rows = read_recipients(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["email"], "ana@example.com");
        assert_eq!(rows[0]["company"], "Acme");
        assert_eq!(rows[1]["name"], "Bo");
    }

    #[test]
    fn rejects_csv_without_email_column() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,company").unwrap();
        writeln!(file, "Ana,Acme").unwrap();

        let err = read_recipients(file.path()).unwrap_err();
        assert!(err.to_string().contains("email"));
    }
}
