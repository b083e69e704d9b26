use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use tracing::error;
use vigil_core::{InvocationRequest, ReconcilerConfig};
use vigil_runner::{telemetry, Fixtures, Session};

fn cli() -> Command {
    Command::new("vigil-runner")
        .version(vigil_core::VERSION)
        .about("Run Vigil reconciliation passes against a JSON fixture file")
        .subcommand_required(true)
        .arg(
            Arg::new("fixtures")
                .long("fixtures")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Fixture file with persons, targets, pages and facts"),
        )
        .arg(
            Arg::new("save")
                .long("save")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Write updated tables back to the fixture file"),
        )
        .arg(
            Arg::new("topic")
                .long("topic")
                .global(true)
                .help("Notification topic; overrides NOTIFICATION_TOPIC"),
        )
        .arg(
            Arg::new("page-size")
                .long("page-size")
                .global(true)
                .value_parser(value_parser!(usize))
                .help("Records per scan page for this run"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("invoke")
                .about("Run a single invocation")
                .arg(
                    Arg::new("token")
                        .long("token")
                        .help("Pagination token from an earlier invocation"),
                ),
        )
        .subcommand(
            Command::new("drain")
                .about("Follow chained invocations until the pass completes")
                .arg(
                    Arg::new("token")
                        .long("token")
                        .help("Resume a pass from this token"),
                )
                .arg(
                    Arg::new("max-invocations")
                        .long("max-invocations")
                        .default_value("50")
                        .value_parser(value_parser!(usize))
                        .help("Stop after this many invocations"),
                )
                .arg(
                    Arg::new("delay-ms")
                        .long("delay-ms")
                        .default_value("0")
                        .value_parser(value_parser!(u64))
                        .help("Pause between chained invocations"),
                ),
        )
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    if let Err(err) = telemetry::init(matches.get_flag("json-logs")) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }
    match run(&matches).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = format!("{err:#}"), "runner failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(matches: &ArgMatches) -> Result<ExitCode> {
    let path = matches
        .get_one::<PathBuf>("fixtures")
        .context("--fixtures is required")?;
    let fixtures = Fixtures::load(path)?;

    let mut config = ReconcilerConfig::from_env()?;
    if let Some(topic) = matches.get_one::<String>("topic") {
        config = config.with_topic(topic.clone());
    }
    let page_size = matches.get_one::<usize>("page-size").copied();
    let mut session = Session::open(fixtures, config)?;

    let code = match matches.subcommand() {
        Some(("invoke", args)) => {
            let token = args.get_one::<String>("token").cloned();
            match session.invoke(token, page_size).await {
                Ok(report) => {
                    print_json(&report)?;
                    ExitCode::SUCCESS
                }
                Err(aborted) => {
                    error!(error = %aborted.error, "invocation aborted");
                    print_json(&aborted.report)?;
                    ExitCode::FAILURE
                }
            }
        }
        Some(("drain", args)) => {
            let request = InvocationRequest {
                pagination_token: args.get_one::<String>("token").cloned(),
                page_size,
            };
            let max = args.get_one::<usize>("max-invocations").copied().unwrap_or(50);
            let delay = Duration::from_millis(args.get_one::<u64>("delay-ms").copied().unwrap_or(0));
            match session.drain(request, max, delay).await {
                Ok(outcome) => {
                    print_json(&outcome.reports)?;
                    if let Some(token) = outcome.resume_token {
                        eprintln!("pass incomplete; resume with --token {token}");
                    }
                    ExitCode::SUCCESS
                }
                Err(aborted) => {
                    error!(error = %aborted.error, "pass aborted");
                    print_json(&aborted.report)?;
                    ExitCode::FAILURE
                }
            }
        }
        _ => ExitCode::FAILURE,
    };

    for message in session.sent() {
        eprintln!("sms to {}: {}", message.phone_number.masked(), message.body);
    }
    if matches.get_flag("save") {
        session.snapshot().save(path)?;
    }
    Ok(code)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
