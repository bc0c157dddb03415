mod cli;
mod ui;

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use carscan::api::{CookieJar, LookupApiClient, LookupRequest, PollReply, TaskId};
use carscan::config::CarscanConfig;
use carscan::state_machine::{JobReport, JobState};
use carscan::TaskPollingClient;
use cli::{Cli, Command};
use ui::LookupProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = CarscanConfig::load()?;
    if let Some(base) = cli.api_base {
        config.api_base = base;
    }
    if let Some(ms) = cli.interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(max) = cli.max_polls {
        config.max_polls = max;
    }
    let credentials = Arc::new(CookieJar::parse(&config.cookies));

    match cli.command {
        Command::Lookup {
            identifier,
            region,
            fields,
        } => {
            let mut request = LookupRequest::new(identifier.clone());
            if let Some(region) = region {
                request = request.with_region(region);
            }
            for (key, value) in fields {
                request = request.with_field(key, value)?;
            }

            let client =
                TaskPollingClient::http(config.api_base.clone(), credentials, config.poll_config())?;
            let progress = LookupProgress::start(&identifier);
            let handle = client.submit(request).await;

            let mut rx = handle.subscribe();
            loop {
                let job = rx.borrow_and_update().clone();
                progress.update(&job);
                if job.is_settled() {
                    break;
                }
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        client.cancel(&handle);
                    }
                }
            }

            let job = handle.snapshot();
            progress.complete(&job);
            progress.print_report(&JobReport::from_job(&job));

            if job.state == JobState::Failed {
                bail!("lookup for {identifier} failed");
            }
        }
        Command::Status { task_id } => {
            let api = LookupApiClient::with_base_url(config.api_base.clone(), credentials)?;
            match api.fetch(&TaskId::from(task_id.as_str())).await? {
                PollReply::Pending(message) => println!("{task_id}: still running ({message})"),
                PollReply::Finished(result) => println!("{task_id}: {result}"),
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "carscan=debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
