//! Launcher for the wright engine.
//!
//! Thin surface only: argument parsing, wiring the engine, and printing
//! outcomes. All orchestration lives in the library; the interactive
//! REPL is a separate front end and not part of this binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use wright::agentic;
use wright::chat;
use wright::core::router::RouteError;
use wright::core::types::TaskStatus;
use wright::events::EventCode;
use wright::exit_codes;
use wright::io::client::OllamaClient;
use wright::io::session;
use wright::logging;
use wright::orchestrator::Engine;

#[derive(Parser)]
#[command(
    name = "wright",
    version,
    about = "Autonomous code-generation orchestrator for local models"
)]
struct Cli {
    /// Workspace directory (defaults to the current directory).
    #[arg(short, long)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan and build a project from a request.
    Build { prompt: Vec<String> },
    /// Single-shot autonomous modification of the workspace.
    Agent { prompt: Vec<String> },
    /// Read-only discussion about the workspace.
    Chat { message: Vec<String> },
    /// Detect and run the project, auto-fixing failures.
    Run,
    /// Resume the workspace session.
    Resume,
    /// List installed models and how roles route to them.
    Models,
    /// Download a model from the server, streaming progress.
    Pull { model: String },
    /// Show the session's task status.
    Status,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<RouteError>().is_some() {
        exit_codes::MODEL_UNAVAILABLE
    } else {
        exit_codes::ENGINE_ERROR
    }
}

fn run(cli: Cli) -> Result<i32> {
    let root = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolve working directory")?,
    };
    let client = Arc::new(OllamaClient::new().map_err(anyhow::Error::from)?);
    if !client.preflight() {
        eprintln!("warning: model server not reachable on 127.0.0.1:11434");
    }
    let engine = Engine::new(&root, client)?;

    match cli.command {
        Command::Build { prompt } => {
            let request = prompt.join(" ");
            let report = engine.build(&request)?;
            print_events(&engine);
            println!(
                "verified {}/{} tasks ({} failed, {} skipped)",
                report.stats.verified,
                report.stats.total,
                report.stats.failed,
                report.stats.skipped
            );
            Ok(finish_code(&engine, report.completed))
        }
        Command::Agent { prompt } => {
            let request = prompt.join(" ");
            let outcome = agentic::run_agentic(&engine, &request)?;
            print_events(&engine);
            if !outcome.display_text.is_empty() {
                println!("{}", outcome.display_text);
            }
            println!(
                "{} file(s) written, {} command(s) run",
                outcome.files_written, outcome.commands_run
            );
            Ok(finish_code(&engine, outcome.commands_ok))
        }
        Command::Chat { message } => {
            let reply = chat::run_chat(&engine, &message.join(" "))?;
            println!("{reply}");
            Ok(exit_codes::OK)
        }
        Command::Run => match agentic::run_project(&engine, "run the project")? {
            Some(report) => {
                println!("$ {}", report.command);
                if !report.output.is_empty() {
                    println!("{}", report.output);
                }
                Ok(if report.exit_code == 0 {
                    exit_codes::OK
                } else {
                    exit_codes::ENGINE_ERROR
                })
            }
            None => {
                println!("no run command detected");
                Ok(exit_codes::OK)
            }
        },
        Command::Resume => match engine.resume()? {
            Some(report) => {
                print_events(&engine);
                println!(
                    "verified {}/{} tasks ({} failed, {} skipped)",
                    report.stats.verified,
                    report.stats.total,
                    report.stats.failed,
                    report.stats.skipped
                );
                Ok(finish_code(&engine, report.completed))
            }
            None => {
                println!("no session in this workspace");
                Ok(exit_codes::OK)
            }
        },
        Command::Models => {
            let installed = engine.installed_models();
            if installed.is_empty() {
                println!("no models installed (is the server running?)");
            }
            for spec in engine.router.registry() {
                let mark = if installed.iter().any(|m| *m == spec.name) {
                    "installed"
                } else {
                    "missing"
                };
                println!(
                    "{:<22} {:?}/{:?}  {}",
                    spec.name, spec.category, spec.tier, mark
                );
            }
            Ok(exit_codes::OK)
        }
        Command::Pull { model } => {
            let mut last_status = String::new();
            engine
                .client
                .pull(&model, &mut |progress| {
                    if progress.status != last_status {
                        last_status = progress.status.clone();
                        eprintln!("  {last_status}");
                    }
                    if progress.total > 0 {
                        eprint!("\r  {} / {} bytes", progress.completed, progress.total);
                    }
                })
                .map_err(anyhow::Error::from)?;
            eprintln!();
            engine.events.record(EventCode::ModelPulled, model.clone());
            engine.refresh_models()?;
            println!("pulled {model}");
            Ok(exit_codes::OK)
        }
        Command::Status => {
            match session::load_session(&root)? {
                Some(loaded) => {
                    println!(
                        "session '{}' ({} tasks)",
                        loaded.state.name,
                        loaded.state.plan.tasks.len()
                    );
                    for task in &loaded.state.plan.tasks {
                        let mark = match task.status {
                            TaskStatus::Verified => "x",
                            TaskStatus::Failed => "-",
                            TaskStatus::Skipped => ">",
                            _ => " ",
                        };
                        println!("  [{mark}] {:>3}  {}", task.id, task.file);
                    }
                }
                None => println!("no session in this workspace"),
            }
            Ok(exit_codes::OK)
        }
    }
}

fn finish_code(engine: &Engine, completed: bool) -> i32 {
    if engine.events.count(EventCode::Cancelled) > 0 {
        exit_codes::USER_ABORT
    } else if completed {
        exit_codes::OK
    } else {
        exit_codes::ENGINE_ERROR
    }
}

fn print_events(engine: &Engine) {
    for event in engine.events.snapshot() {
        eprintln!("  {event}");
    }
}
