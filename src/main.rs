use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

use gostint_client::{
    cli::Cli,
    config::ClientConfig,
    dispatch::{DispatchOutcome, Dispatcher},
    services::{jobs::JobServiceClient, vault::VaultClient},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} Invalid environment: {}", style("✗").red().bold(), err);
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.debug, config.json_logs());

    let role = cli.gostint_role.clone();
    let (request, endpoints) = match cli.into_request(&config) {
        Ok(parts) => parts,
        Err(err) => {
            eprintln!("{} {}", style("✗").red().bold(), err);
            return ExitCode::FAILURE;
        }
    };

    let vault = match VaultClient::new(
        &endpoints.vault_url,
        endpoints.vault_skip_verify,
        endpoints.timeout,
    ) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{} {}", style("✗").red().bold(), err);
            return ExitCode::FAILURE;
        }
    };
    let jobs = match JobServiceClient::new(
        &endpoints.url,
        endpoints.insecure_skip_verify,
        endpoints.timeout,
    ) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{} {}", style("✗").red().bold(), err);
            return ExitCode::FAILURE;
        }
    };

    let dispatcher = Dispatcher::new(Arc::new(vault), Arc::new(jobs), role);

    match dispatcher.dispatch(&request).await {
        Ok(outcome) => {
            report(&outcome);
            exit_code(outcome.process_exit_code())
        }
        Err(err) => {
            eprintln!(
                "{} {} {}",
                style("✗").red().bold(),
                style(format!("[{}]", err.stage())).dim(),
                err
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries only the job's output.
fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn report(outcome: &DispatchOutcome) {
    let job = &outcome.job;
    eprintln!(
        "  {}",
        style(format!(
            "job {} {} after {:.1}s",
            job.id,
            job.status,
            outcome.elapsed.as_secs_f64()
        ))
        .dim()
    );
    if outcome.succeeded() {
        print!("{}", job.output);
    } else if !job.status.is_terminal() {
        println!("{}", job);
    } else {
        eprintln!(
            "{} {}",
            style(format!("[{}]", job.status)).red().bold(),
            style(&job.output).red()
        );
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE)
}
