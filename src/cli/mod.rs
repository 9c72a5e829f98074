mod run;
mod serve;
mod token;

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use console::style;

use crate::core::config::Settings;
use crate::core::terminal::{self, GuideSection};

fn print_help() {
    GuideSection::new("Server")
        .command("serve", "Start the MCP server (stdio by default)")
        .command("serve --mode http", "Start the HTTP API instead")
        .print();

    GuideSection::new("Jobs")
        .command("run --code-file <F>", "Submit a script and register its task")
        .command("status <dag_id>", "Reconcile the state of a job graph")
        .print();

    GuideSection::new("Token")
        .command("token refresh", "Fetch a fresh backend token")
        .command("token status", "Inspect the stored token")
        .print();

    GuideSection::new("Global options")
        .text("--config <path>          Settings file (default: $OGE_MCP_CONFIG or the user config dir)")
        .text("--env <name>             Apply an [environments.<name>] override")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("oge-mcp").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub env: Option<String>,
    /// Remaining arguments with the global options removed; `rest[0]` is the command.
    pub rest: Vec<String>,
}

pub(crate) fn split_global_args(args: &[String]) -> GlobalArgs {
    let mut parsed = GlobalArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--env" => {
                if i + 1 < args.len() {
                    parsed.env = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            other => {
                parsed.rest.push(other.to_string());
                i += 1;
            }
        }
    }
    parsed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServeMode {
    Stdio,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServeArgs {
    pub mode: ServeMode,
    pub host: Option<String>,
    pub port: Option<u16>,
}

pub(crate) fn parse_serve_args(args: &[String], start: usize) -> Result<ServeArgs> {
    let mut parsed = ServeArgs {
        mode: ServeMode::Stdio,
        host: None,
        port: None,
    };
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--mode" => {
                let value = args.get(i + 1).map(String::as_str).unwrap_or_default();
                parsed.mode = match value {
                    "stdio" => ServeMode::Stdio,
                    "http" => ServeMode::Http,
                    other => return Err(anyhow!("unknown mode '{}', expected stdio or http", other)),
                };
                i += 2;
            }
            "--host" => {
                if i + 1 < args.len() {
                    parsed.host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--port" => {
                if i + 1 < args.len() {
                    let port = args[i + 1]
                        .parse()
                        .with_context(|| format!("invalid port '{}'", args[i + 1]))?;
                    parsed.port = Some(port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunCommandArgs {
    pub code_file: Option<PathBuf>,
    pub wait: bool,
    pub auto_submit: bool,
    pub interval: Option<u64>,
    pub max_wait: Option<u64>,
    pub task_name: Option<String>,
    pub filename: Option<String>,
    pub format: Option<String>,
    pub sample_name: Option<String>,
}

pub(crate) fn parse_run_command_args(args: &[String], start: usize) -> Result<RunCommandArgs> {
    let mut parsed = RunCommandArgs {
        code_file: None,
        wait: false,
        auto_submit: true,
        interval: None,
        max_wait: None,
        task_name: None,
        filename: None,
        format: None,
        sample_name: None,
    };
    let mut i = start;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match args[i].as_str() {
            "--wait" | "-w" => {
                parsed.wait = true;
                i += 1;
                continue;
            }
            "--no-submit" => {
                parsed.auto_submit = false;
                i += 1;
                continue;
            }
            "--code-file" | "-f" => parsed.code_file = value.map(PathBuf::from),
            "--interval" => {
                parsed.interval = value
                    .map(|v| v.parse().with_context(|| format!("invalid --interval '{}'", v)))
                    .transpose()?
            }
            "--max-wait" => {
                parsed.max_wait = value
                    .map(|v| v.parse().with_context(|| format!("invalid --max-wait '{}'", v)))
                    .transpose()?
            }
            "--task-name" => parsed.task_name = value,
            "--filename" => parsed.filename = value,
            "--format" => parsed.format = value,
            "--sample-name" => parsed.sample_name = value,
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    Ok(parsed)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let global = split_global_args(&args);
    let cmd = global.rest.first().map(String::as_str).unwrap_or("help");

    if matches!(cmd, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    let settings = Settings::load(global.config.as_deref(), global.env.as_deref())
        .context("failed to load settings")?;
    crate::logging::init(&settings.logging.level, settings.logging.file.as_deref())?;

    match cmd {
        "serve" => {
            let serve_args = parse_serve_args(&global.rest, 1)?;
            serve::run(settings, serve_args).await
        }
        "token" => {
            let sub_cmd = global.rest.get(1).map(String::as_str).unwrap_or_default();
            token::run(&settings, sub_cmd).await
        }
        "status" => {
            let Some(dag_id) = global.rest.get(1) else {
                terminal::print_error("Error: status requires a dag id.");
                print_help();
                return Ok(());
            };
            run::status(&settings, dag_id).await
        }
        "run" => {
            let parsed = parse_run_command_args(&global.rest, 1)?;
            if parsed.code_file.is_none() {
                terminal::print_error("Error: --code-file is required for run.");
                print_help();
                return Ok(());
            }
            run::workflow(&settings, parsed).await
        }
        other => {
            terminal::print_error(&format!("Unknown command '{}'", other));
            print_help();
            Ok(())
        }
    }
}
