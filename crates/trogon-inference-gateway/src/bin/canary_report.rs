//! Operator CLI for canary comparisons.
//!
//! Sends a batch of instances to the gateway's `/canary` route and prints the
//! predictions of both versions plus how many of them agree. It only reports;
//! promoting or rolling back a version is left to the operator.
//!
//! ```text
//! canary-report --version-a 1 --version-b 2 --instances batch.json
//! ```
//!
//! `batch.json` holds the request body, e.g. `{"instances": [[0.1, 0.2], ...]}`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use trogon_inference_gateway::ModelVersion;
use trogon_inference_gateway::auth::API_KEY_HEADER;
use trogon_inference_gateway::report::CanaryReply;

#[derive(Parser, Debug)]
#[command(name = "canary-report")]
#[command(about = "Compare predictions of two model versions through the gateway", long_about = None)]
struct Args {
    /// Currently deployed model version.
    #[arg(long)]
    version_a: ModelVersion,

    /// Candidate model version.
    #[arg(long)]
    version_b: ModelVersion,

    /// JSON file with the `{"instances": [...]}` request body.
    #[arg(long)]
    instances: PathBuf,

    #[arg(long, default_value = "http://localhost:8000")]
    gateway_url: String,

    #[arg(long, env = "GATEWAY_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let body = std::fs::read(&args.instances)
        .with_context(|| format!("failed to read {}", args.instances.display()))?;
    serde_json::from_slice::<serde_json::Value>(&body)
        .with_context(|| format!("{} is not valid JSON", args.instances.display()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build()?;

    let url = format!("{}/canary", args.gateway_url.trim_end_matches('/'));
    let response = client
        .post(&url)
        .query(&[
            ("version_a", args.version_a.get()),
            ("version_b", args.version_b.get()),
        ])
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(API_KEY_HEADER, &args.api_key)
        .body(body)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = response.status();
    let text = response.text().await.context("failed to read gateway response")?;
    if !status.is_success() {
        bail!("gateway answered {status}: {text}");
    }

    let reply: CanaryReply = serde_json::from_str(&text)
        .with_context(|| format!("unexpected canary response: {text}"))?;

    println!(
        "Predictions from version {}: {}",
        args.version_a,
        serde_json::to_string(&reply.version_a)?
    );
    println!(
        "Predictions from version {}: {}",
        args.version_b,
        serde_json::to_string(&reply.version_b)?
    );
    println!("{}", reply.agreement());

    Ok(())
}
