//! Turn a natural-language request into a reviewed, step-by-step plan and run it.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use stepwise::error::PlanError;
use stepwise::executor::{Executor, ProgressSink, Severity};
use stepwise::exit_codes;
use stepwise::io::config::{StepwiseConfig, default_config_path, load_config, write_config};
use stepwise::io::context::ProjectContext;
use stepwise::io::generator::CommandGenerator;
use stepwise::io::shell::ShellRunner;
use stepwise::io::workspace::Workspace;
use stepwise::logging;
use stepwise::planner::{PlannedTask, Planner};

#[derive(Parser)]
#[command(
    name = "stepwise",
    version,
    about = "Plan a request as atomic file and command steps, then execute them"
)]
struct Cli {
    /// Workspace root; step paths are relative to it.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (default: `<root>/.stepwise/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level tracing on stderr (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Generate a plan, print it, and discard it.
    Plan(RequestArgs),
    /// Generate a plan, confirm it, and execute it.
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// Execute without asking for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Args)]
struct RequestArgs {
    /// What to do, in plain words.
    #[arg(required = true, num_args = 1..)]
    request: Vec<String>,

    /// Use this file as project context instead of scanning the root.
    #[arg(long)]
    context_file: Option<PathBuf>,

    /// Print the plan or result as JSON on stdout.
    #[arg(long)]
    json: bool,
}

impl RequestArgs {
    fn request(&self) -> String {
        self.request.join(" ")
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = fs::canonicalize(&cli.root)
        .with_context(|| format!("resolve workspace root {}", cli.root.display()))?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&root));

    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Plan(args) => {
            let cfg = load_config(&config_path)?;
            cmd_plan(&root, &cfg, &args)
        }
        Command::Run { request, yes } => {
            let cfg = load_config(&config_path)?;
            cmd_run(&root, &cfg, &request, yes)
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &StepwiseConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_plan(root: &Path, cfg: &StepwiseConfig, args: &RequestArgs) -> Result<i32> {
    let planned = match generate(root, cfg, args)? {
        Ok(planned) => planned,
        Err(code) => return Ok(code),
    };
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&planned.plan).context("serialize plan")?
        );
    } else {
        println!("{}", planned.summary);
    }
    planned.reject();
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, cfg: &StepwiseConfig, args: &RequestArgs, yes: bool) -> Result<i32> {
    let planned = match generate(root, cfg, args)? {
        Ok(planned) => planned,
        Err(code) => return Ok(code),
    };
    if args.json {
        eprintln!("{}", planned.summary);
    } else {
        println!("{}", planned.summary);
    }

    if !yes && !confirm("Execute this plan? [y/N] ")? {
        planned.reject();
        eprintln!("plan rejected");
        return Ok(exit_codes::REJECTED);
    }

    let PlannedTask { mut plan, .. } = planned;
    let executor = Executor::new(
        CommandGenerator::from_config(&cfg.generator, root),
        ShellRunner::from_config(&cfg.executor),
        Workspace::new(root),
        cfg,
    );
    let result = executor.execute_plan(&mut plan, &mut ConsoleSink);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("serialize result")?
        );
    } else {
        println!(
            "{} of {} steps completed in {} ms",
            result.completed_steps,
            plan.steps.len(),
            result.total_duration_ms
        );
    }
    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::EXECUTION_FAILED
    })
}

/// Plan the request. Planning failures are reported here and mapped to an
/// exit code; `Err` is reserved for setup problems.
fn generate(
    root: &Path,
    cfg: &StepwiseConfig,
    args: &RequestArgs,
) -> Result<std::result::Result<PlannedTask, i32>> {
    let context = project_context(root, args.context_file.as_deref())?;
    let planner = Planner::new(
        CommandGenerator::from_config(&cfg.generator, root),
        Workspace::new(root),
        cfg,
    );
    match planner.generate_plan(&args.request(), context.as_deref()) {
        Ok(planned) => Ok(Ok(planned)),
        Err(err) => {
            eprintln!("planning failed: {err}");
            if let PlanError::Parse { raw, .. } = &err {
                eprintln!("--- generator response ---\n{raw}\n---");
            }
            Ok(Err(exit_codes::INVALID))
        }
    }
}

fn project_context(root: &Path, context_file: Option<&Path>) -> Result<Option<String>> {
    if let Some(path) = context_file {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        return Ok(Some(text).filter(|t| !t.trim().is_empty()));
    }
    let context = ProjectContext::scan(root)?;
    debug!(manifests = context.manifests.len(), "project context scanned");
    Ok((!context.is_empty()).then(|| context.render()))
}

fn confirm(question: &str) -> Result<bool> {
    eprint!("{question}");
    io::stderr().flush().context("flush stderr")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("read confirmation")?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Progress and messages on stderr, so stdout stays machine-readable.
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn on_progress(&mut self, index: usize, total: usize, description: &str) {
        eprintln!("[{index}/{total}] done: {description}");
    }

    fn on_message(&mut self, text: &str, severity: Severity) {
        let label = match severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Success => "ok",
        };
        eprintln!("{label}: {text}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["stepwise", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["stepwise", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_plan_joins_request_words() {
        let cli = Cli::parse_from([
            "stepwise",
            "--root",
            "/tmp/project",
            "plan",
            "add",
            "a",
            "readme",
            "--json",
        ]);
        let Command::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(args.request(), "add a readme");
        assert!(args.json);
        assert_eq!(cli.root, PathBuf::from("/tmp/project"));
    }

    #[test]
    fn parse_run_with_flags() {
        let cli = Cli::parse_from([
            "stepwise",
            "run",
            "-y",
            "--context-file",
            "ctx.txt",
            "fix the build",
            "-v",
        ]);
        assert!(cli.verbose);
        let Command::Run { request, yes } = cli.command else {
            panic!("expected run");
        };
        assert!(yes);
        assert_eq!(request.request(), "fix the build");
        assert_eq!(request.context_file, Some(PathBuf::from("ctx.txt")));
    }

    #[test]
    fn plan_requires_a_request() {
        assert!(Cli::try_parse_from(["stepwise", "plan"]).is_err());
    }

    #[test]
    fn confirmation_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }
}
