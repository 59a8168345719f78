//! Storybench CLI - Command-line interface for the Storybench daemon

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9630";

#[derive(Parser)]
#[command(name = "storybench")]
#[command(about = "Storybench benchmark job CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "STORYBENCH_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a benchmark job
    Create {
        /// Model id from the models table
        #[arg(short, long)]
        model: i64,

        /// Story ids, comma-separated (e.g. 1,2,3)
        #[arg(short, long)]
        stories: String,

        /// Question id
        #[arg(short, long)]
        question: i64,

        /// Sampling parameters as a JSON object (e.g. '{"temperature": 0.2}')
        #[arg(long)]
        params: Option<String>,

        /// Free-form description
        #[arg(short, long)]
        description: Option<String>,

        /// Run id recorded on stored responses
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Register a rerun job that replays stored prompts
    Rerun {
        /// JSON array of {prompt_id, model_id, story_id, question_id, params?}
        #[arg(long)]
        prompts: String,

        /// Free-form description
        #[arg(short, long)]
        description: Option<String>,

        /// Run id recorded on stored responses
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Start a registered job
    Start {
        /// Job ID
        job_id: String,
    },

    /// Show a job snapshot
    Status {
        /// Job ID
        job_id: String,
    },

    /// Poll a job until it reaches a terminal state
    Watch {
        /// Job ID
        job_id: String,

        /// Poll interval in seconds
        #[arg(short, long, default_value = "2")]
        interval: u64,
    },

    /// Cancel a job
    Cancel {
        /// Job ID
        job_id: String,
    },

    /// Show daemon-wide job counts
    Stats,

    /// Create, start and watch a job in one go
    Run {
        /// Model id from the models table
        #[arg(short, long)]
        model: i64,

        /// Story ids, comma-separated (e.g. 1,2,3)
        #[arg(short, long)]
        stories: String,

        /// Question id
        #[arg(short, long)]
        question: i64,

        /// Sampling parameters as a JSON object
        #[arg(long)]
        params: Option<String>,

        /// Free-form description
        #[arg(short, long)]
        description: Option<String>,

        /// Run id recorded on stored responses
        #[arg(long)]
        run_id: Option<String>,

        /// Seconds to wait for a free slot and for completion
        #[arg(long, default_value = "600")]
        timeout: u64,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
struct CreateResult {
    job_id: String,
    status: String,
}

#[derive(Deserialize)]
struct StartResult {
    job_id: String,
    outcome: String,
}

#[derive(Deserialize)]
struct CancelResult {
    job_id: String,
    status: String,
}

#[derive(Deserialize)]
struct StatusResult {
    job_id: String,
    status: String,
    progress: u8,
    total: u32,
    completed: u32,
    #[serde(default)]
    results: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    response_ids: Option<Vec<i64>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    run_id: Option<String>,
}

#[derive(Tabled)]
struct ResultRow {
    story: String,
    outcome: String,
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn parse_story_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<i64>()
                .with_context(|| format!("Invalid story id '{}'", part.trim()))
        })
        .collect()
}

fn parse_params(raw: Option<&str>) -> Result<serde_json::Value> {
    match raw {
        Some(s) => {
            let value: serde_json::Value =
                serde_json::from_str(s).context("Invalid JSON in --params")?;
            if !value.is_object() {
                anyhow::bail!("--params must be a JSON object");
            }
            Ok(value)
        }
        None => Ok(json!({})),
    }
}

#[allow(clippy::too_many_arguments)]
async fn create_job(
    rpc_url: &str,
    model: i64,
    stories: &str,
    question: i64,
    params: Option<&str>,
    description: Option<&str>,
    run_id: Option<&str>,
) -> Result<CreateResult> {
    let story_ids = parse_story_ids(stories)?;
    let params_json = parse_params(params)?;

    let mut request = json!({
        "model_id": model,
        "story_ids": story_ids,
        "question_id": question,
        "params": params_json,
    });
    if let Some(description) = description {
        request["description"] = json!(description);
    }
    if let Some(run_id) = run_id {
        request["run_id"] = json!(run_id);
    }

    let result = call_rpc(rpc_url, "jobs.create.v1", request).await?;
    Ok(serde_json::from_value(result)?)
}

fn color_status(status: &str) -> ColoredString {
    match status {
        "completed" => status.green(),
        "error" => status.red(),
        "cancelled" | "queued" => status.yellow(),
        "running" => status.cyan(),
        _ => status.normal(),
    }
}

fn is_terminal(status: &str) -> bool {
    matches!(status, "completed" | "error" | "cancelled")
}

fn describe_outcome(outcome: &serde_json::Value) -> String {
    if let Some(response_id) = outcome.get("response_id").and_then(|v| v.as_i64()) {
        format!("response {}", response_id)
    } else if let Some(error) = outcome.get("error").and_then(|v| v.as_str()) {
        format!("failed: {}", error)
    } else {
        outcome.to_string()
    }
}

fn print_status(status: &StatusResult) {
    println!("  {} {}", "Job:".bold(), status.job_id);
    println!("  {} {}", "Status:".bold(), color_status(&status.status));
    println!(
        "  {} {}% ({}/{})",
        "Progress:".bold(),
        status.progress,
        status.completed,
        status.total
    );
    if let Some(description) = &status.description {
        println!("  {} {}", "Description:".bold(), description);
    }
    if let Some(run_id) = &status.run_id {
        println!("  {} {}", "Run:".bold(), run_id);
    }
    if let Some(error) = &status.error {
        println!("  {} {}", "Error:".bold(), error.red());
    }

    if !status.results.is_empty() {
        let mut rows: Vec<ResultRow> = status
            .results
            .iter()
            .map(|(story, outcome)| ResultRow {
                story: story.clone(),
                outcome: describe_outcome(outcome),
            })
            .collect();
        rows.sort_by_key(|row| row.story.parse::<i64>().unwrap_or(i64::MAX));

        println!();
        println!("{}", Table::new(rows));
    }
    if let Some(response_ids) = &status.response_ids {
        println!();
        println!("  {} {:?}", "Responses:".bold(), response_ids);
    }
}

async fn fetch_status(rpc_url: &str, job_id: &str) -> Result<StatusResult> {
    let result = call_rpc(rpc_url, "jobs.status.v1", json!({ "job_id": job_id })).await?;
    Ok(serde_json::from_value(result)?)
}

/// Polls the job, printing a line on every status/progress change, until it
/// reaches a terminal state or the deadline passes.
async fn watch_until_terminal(
    rpc_url: &str,
    job_id: &str,
    interval: u64,
    deadline: Option<Instant>,
) -> Result<StatusResult> {
    let mut last: Option<(String, u8)> = None;

    loop {
        let status = fetch_status(rpc_url, job_id).await?;

        let key = (status.status.clone(), status.progress);
        if last.as_ref() != Some(&key) {
            println!(
                "  {} {}% ({}/{})",
                color_status(&status.status),
                status.progress,
                status.completed,
                status.total
            );
            last = Some(key);
        }

        if is_terminal(&status.status) {
            return Ok(status);
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                anyhow::bail!("Timed out waiting for job {} to finish", job_id);
            }
        }

        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Create {
            model,
            stories,
            question,
            params,
            description,
            run_id,
        } => {
            let created = create_job(
                &cli.rpc_url,
                model,
                &stories,
                question,
                params.as_deref(),
                description.as_deref(),
                run_id.as_deref(),
            )
            .await?;

            println!("{}", "✓ Job registered".green().bold());
            println!();

            let table = Table::new(vec![created]).to_string();
            println!("{}", table);
        }

        Commands::Rerun {
            prompts,
            description,
            run_id,
        } => {
            let prompts_json: serde_json::Value =
                serde_json::from_str(&prompts).context("Invalid JSON in --prompts")?;
            if !prompts_json.is_array() {
                anyhow::bail!("--prompts must be a JSON array");
            }

            let mut request = json!({ "prompts": prompts_json });
            if let Some(description) = description {
                request["description"] = json!(description);
            }
            if let Some(run_id) = run_id {
                request["run_id"] = json!(run_id);
            }

            let result = call_rpc(&cli.rpc_url, "jobs.create_rerun.v1", request).await?;
            let created: CreateResult = serde_json::from_value(result)?;

            println!("{}", "✓ Rerun job registered".green().bold());
            println!();

            let table = Table::new(vec![created]).to_string();
            println!("{}", table);
        }

        Commands::Start { job_id } => {
            let result = call_rpc(&cli.rpc_url, "jobs.start.v1", json!({ "job_id": job_id })).await?;
            let start: StartResult = serde_json::from_value(result)?;

            if start.outcome == "queued" {
                println!(
                    "{}",
                    format!(
                        "⧗ Job {} queued (all slots busy). Re-run start to retry.",
                        start.job_id
                    )
                    .yellow()
                );
            } else {
                println!("{}", format!("✓ Job {} started", start.job_id).green().bold());
            }
        }

        Commands::Status { job_id } => {
            println!("{}", "Job Status".cyan().bold());
            println!();

            let status = fetch_status(&cli.rpc_url, &job_id).await?;
            print_status(&status);
        }

        Commands::Watch { job_id, interval } => {
            println!("{}", format!("Watching job {}...", job_id).cyan().bold());
            println!();

            let status =
                watch_until_terminal(&cli.rpc_url, &job_id, interval.max(1), None).await?;

            println!();
            print_status(&status);
        }

        Commands::Cancel { job_id } => {
            let result = call_rpc(&cli.rpc_url, "jobs.cancel.v1", json!({ "job_id": job_id })).await?;
            let cancel: CancelResult = serde_json::from_value(result)?;

            if cancel.status == "cancelled" {
                println!("{}", format!("✓ Job {} cancelled", cancel.job_id).green().bold());
            } else {
                println!(
                    "{}",
                    format!("⚠ Job {} already {}", cancel.job_id, cancel.status).yellow()
                );
            }
        }

        Commands::Stats => {
            println!("{}", "Daemon Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!();
                    println!("  {} {}", "Total Jobs:".bold(), stats["total_jobs"]);
                    println!("  {} {}", "Initializing:".bold(), stats["initializing_jobs"]);
                    println!("  {} {}", "Queued:".bold(), stats["queued_jobs"]);
                    println!("  {} {}", "Running:".bold(), stats["running_jobs"]);
                    println!("  {} {}", "Completed:".bold(), stats["completed_jobs"]);
                    println!("  {} {}", "Error:".bold(), stats["error_jobs"]);
                    println!("  {} {}", "Cancelled:".bold(), stats["cancelled_jobs"]);
                    println!();
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptime_seconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Run {
            model,
            stories,
            question,
            params,
            description,
            run_id,
            timeout,
        } => {
            let deadline = Instant::now() + Duration::from_secs(timeout);

            let created = create_job(
                &cli.rpc_url,
                model,
                &stories,
                question,
                params.as_deref(),
                description.as_deref(),
                run_id.as_deref(),
            )
            .await?;

            println!("{}", "✓ Job registered".green().bold());
            println!("  {} {}", "Job:".bold(), created.job_id);
            println!();

            // The daemon never re-dequeues on its own; a queued start is
            // retried from here.
            loop {
                let result = call_rpc(
                    &cli.rpc_url,
                    "jobs.start.v1",
                    json!({ "job_id": created.job_id }),
                )
                .await?;
                let start: StartResult = serde_json::from_value(result)?;

                if start.outcome != "queued" {
                    println!("{}", "✓ Job started".green().bold());
                    break;
                }
                if Instant::now() >= deadline {
                    anyhow::bail!("Timed out waiting for a free slot");
                }
                println!("  {} all slots busy, retrying in 2s...", "⧗".yellow());
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            println!();

            let final_status =
                watch_until_terminal(&cli.rpc_url, &created.job_id, 2, Some(deadline)).await?;

            println!();
            print_status(&final_status);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_ids_parse_with_whitespace() {
        assert_eq!(parse_story_ids("1, 2,3").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn bad_story_ids_are_rejected() {
        assert!(parse_story_ids("1,two,3").is_err());
    }

    #[test]
    fn params_must_be_an_object() {
        assert!(parse_params(Some("[1,2]")).is_err());
        assert!(parse_params(Some(r#"{"temperature": 0.2}"#)).is_ok());
        assert_eq!(parse_params(None).unwrap(), json!({}));
    }
}
