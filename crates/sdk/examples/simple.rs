//! Simple SDK Example
//!
//! Demonstrates basic usage of the Storybench SDK.
//!
//! # Usage
//!
//! 1. Start the daemon:
//!    ```bash
//!    cargo run --package storybench-daemon
//!    ```
//!
//! 2. Run this example:
//!    ```bash
//!    cargo run --example simple
//!    ```

use storybench_sdk::{CreateJobRequest, StorybenchClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Storybench SDK - Simple Example");
    println!("================================\n");

    // 1. Connect to daemon
    println!("1. Connecting to daemon...");
    let client = StorybenchClient::connect("http://127.0.0.1:9630").await?;
    println!("   ✓ Connected\n");

    // 2. Register a job
    println!("2. Registering a job...");
    let create_response = client
        .create_job(
            CreateJobRequest::new(1, vec![1, 2], 1).with_description("sdk example"),
        )
        .await?;

    println!("   ✓ Job registered:");
    println!("     - ID: {}", create_response.job_id);
    println!("     - Status: {}\n", create_response.status);

    // 3. Start it
    println!("3. Starting the job...");
    let start_response = client.start(&create_response.job_id).await?;
    if start_response.is_queued() {
        println!("   ⚠ Concurrency ceiling reached, job is queued\n");
    } else {
        println!("   ✓ Job started\n");
    }

    // 4. Watch progress until the job finishes
    println!("4. Watching progress...");
    let mut watch = client.watch(&create_response.job_id).await?;
    while let Some(event) = watch.next().await {
        let event = event?;
        match event.event.as_str() {
            "keepalive" => println!("   . still working"),
            "timeout" => {
                println!("   ⚠ Watch window expired");
                break;
            }
            _ => {
                if let Some(job) = &event.job {
                    println!(
                        "   - {}: {}% ({}/{})",
                        job.status, job.progress, job.completed, job.total
                    );
                    if job.is_terminal() {
                        break;
                    }
                }
            }
        }
    }
    println!();

    // 5. Final snapshot
    println!("5. Fetching final status...");
    let status = client.status(&create_response.job_id).await?;
    println!("   ✓ Status: {}", status.status);
    if let Some(response_ids) = &status.response_ids {
        println!("     - Stored responses: {:?}", response_ids);
    }
    if let Some(error) = &status.error {
        println!("     - Error: {}", error);
    }

    println!("\n✓ Example completed successfully!");

    Ok(())
}
