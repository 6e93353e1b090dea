//! `devflow-ask`: draft an answer through the completion endpoint and print
//! the error-log summary afterwards.
//!
//! Usage:
//!
//! ```text
//! devflow-ask <question> [--base-url <url>] [--config <file>] [--timeout-ms <n>]
//! ```
//!
//! Configuration is read from `--config` (JSON) when given, then
//! `DEVFLOW_API_BASE_URL` / `DEVFLOW_API_TIMEOUT_MS`, then the flags.
//! Set `RUST_LOG=devflow_resilience=debug` to see retries as they happen.

use devflow_resilience::api::ClientConfig;
use devflow_resilience::api_client::COMPLETION_BREAKER_KEY;
use devflow_resilience::runtime::Resilience;
use std::process;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("Usage: devflow-ask <question> [OPTIONS]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <question>          Question to draft an answer for (1-2000 characters)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --base-url <url>    Completion service base URL");
    eprintln!("                      (also settable via DEVFLOW_API_BASE_URL env var)");
    eprintln!("  --config <file>     JSON client configuration file");
    eprintln!("  --timeout-ms <n>    Per-request timeout in milliseconds");
    eprintln!("  --help              Show this message");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let mut question: Option<String> = None;
    let mut base_url: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut timeout_ms: Option<u64> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--base-url" => {
                base_url = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--base-url requires a URL argument"))?,
                );
            }
            "--config" => {
                config_path = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--config requires a path argument"))?,
                );
            }
            "--timeout-ms" => {
                let raw = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--timeout-ms requires a number"))?;
                timeout_ms = Some(
                    raw.parse()
                        .map_err(|_| anyhow::anyhow!("--timeout-ms must be an integer, got '{raw}'"))?,
                );
            }
            _ if arg.starts_with('-') => {
                anyhow::bail!("Unknown option: {arg}");
            }
            _ => {
                if question.is_some() {
                    anyhow::bail!("Unexpected argument: {arg} (quote the question)");
                }
                question = Some(arg);
            }
        }
    }

    let question = question.ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("Missing required argument: <question>")
    })?;

    let mut config = match &config_path {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    }
    .with_env_overrides()?;
    if let Some(url) = base_url {
        config.base_url = url;
    }
    if let Some(ms) = timeout_ms {
        config.default_timeout_ms = ms;
    }

    let resilience = Resilience::builder().config(config).build()?;
    println!("endpoint   : {}", resilience.config().base_url);

    let reply = resilience.client().generate_answer(&question).await?;
    if reply.success {
        println!("\n{}\n", reply.reply.unwrap_or_default());
    } else {
        println!(
            "\nfailed     : {} ({})\n",
            reply.error.unwrap_or_default(),
            reply.code.unwrap_or_default()
        );
    }

    let status = resilience.retry_status(COMPLETION_BREAKER_KEY);
    if let Some(stats) = status.stats() {
        println!(
            "breaker    : {} (failures: {})",
            stats.state.as_str(),
            stats.failure_count
        );
    }

    let stats = resilience.error_log().stats();
    let logged: usize = stats.values().sum();
    println!("error log  : {logged} record(s)");
    for (kind, count) in stats.into_iter().filter(|(_, n)| *n > 0) {
        println!("  {kind:<22} {count}");
    }
    for record in resilience.error_log().recent(5) {
        println!("  - [{}] {}", record.kind, record.message);
    }

    if !reply.success {
        anyhow::bail!("No answer drafted");
    }
    Ok(())
}
