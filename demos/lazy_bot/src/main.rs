//! Lazy Bot Example
//!
//! A slash-command bot that acknowledges inside the platform's three-second
//! window and does the slow part afterwards.
//!
//! # Listeners
//!
//! - `/deploy <env>`: acks "Deploying..." right away, then runs the deploy lazily
//! - `app_mention`: acks empty, then builds a reply lazily
//! - messages starting with "hello": acks with a JSON greeting, nothing lazy
//!
//! # Usage
//!
//! ```bash
//! cargo run --package lazy-bot -- --config demos/lazy_bot/conduit.toml
//! curl -d 'command=%2Fdeploy&text=staging' localhost:3000/slack/events
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use conduit::prelude::*;
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Conduit lazy listener demo")]
struct Args {
    /// Configuration file to load.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. "development".
    #[arg(short, long)]
    profile: Option<String>,

    /// Run lazy functions on dedicated threads instead of tasks.
    #[arg(long)]
    threads: bool,
}

// ============================================================================
// Listeners
// ============================================================================

fn deploy_listener() -> Listener {
    Listener::new("deploy", Matcher::command("/deploy"))
        .handler(|args| {
            Box::pin(async move {
                let target = args
                    .request
                    .body()
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or("production")
                    .to_owned();
                args.ack.ack_text(format!("Deploying to {target}..."));
                Ok(())
            })
        })
        .lazy("run_deploy", |req| async move {
            let env = req
                .body()
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("production");
            info!(env, "Deploy started");
            tokio::time::sleep(Duration::from_secs(5)).await;
            match req.context().response_url() {
                Some(url) => info!(env, response_url = url, "Deploy finished"),
                None => info!(env, "Deploy finished"),
            }
            Ok(())
        })
}

fn mention_listener() -> Listener {
    Listener::new("mention", Matcher::event_type("app_mention"))
        .lazy("reply_to_mention", |req| async move {
            let Some(client) = req.context().client() else {
                warn!("No client configured, cannot reply to mention");
                return Ok(());
            };
            let channel = req.context().channel_id().unwrap_or_default().to_owned();
            client
                .call_api(
                    "chat.postMessage",
                    json!({ "channel": channel, "text": "You rang?" }),
                )
                .await?;
            Ok(())
        })
}

fn hello_listener() -> Result<Listener> {
    Ok(
        Listener::new("hello", Matcher::regex_text("^hello")?).handler(|args| {
            Box::pin(async move {
                let user = args.context().user_id().unwrap_or("there").to_owned();
                args.ack.ack_json(&json!({ "text": format!("Hello, {user}!") }))?;
                Ok(())
            })
        }),
    )
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = ConduitRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile.clone());
    }

    let mut runtime = builder
        .build()?
        .middleware(named_middleware_fn("audit", |req, resp, next| {
            Box::pin(async move {
                info!(
                    payload_type = req.payload_type().unwrap_or("unknown"),
                    "Incoming request"
                );
                next.run(req, resp).await
            })
        }))
        .listener(deploy_listener())
        .listener(mention_listener())
        .listener(hello_listener()?);

    if args.threads {
        runtime = runtime.lazy_runner(ThreadLazyRunner::new());
    }

    runtime.run().await?;
    Ok(())
}
