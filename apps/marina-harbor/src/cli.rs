use anyhow::Context;
use clap::{Parser, Subcommand};
use marina_core::Identity;

#[derive(Parser)]
#[command(name = "marina-harbor", about = "Account hosting coordinator service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe a running server's health endpoint.
    Check {
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },
    /// Trigger a revalidation sweep for one requester against a running
    /// server and print the removal report.
    Revalidate {
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
        #[arg(long)]
        requester: Identity,
    },
}

/// Small debug client for poking a live server without the command layer.
pub async fn run_client_command(command: Commands) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    match command {
        Commands::Check { url } => {
            let response = client
                .get(format!("{}/health", url.trim_end_matches('/')))
                .send()
                .await
                .context("health request failed")?;
            println!("{}", response.status());
            let body: serde_json::Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Revalidate { url, requester } => {
            let response = client
                .post(format!("{}/hosted/revalidate", url.trim_end_matches('/')))
                .json(&serde_json::json!({ "requester": requester }))
                .send()
                .await
                .context("revalidate request failed")?;
            let status = response.status();
            let body: serde_json::Value = response.json().await?;
            println!("{}", status);
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }
    Ok(())
}
