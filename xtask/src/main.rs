use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

mod jobs;

use jobs::{JobsFile, DEFAULT_JOBS_FILE};

fn usage() {
    eprintln!(
        "xtask commands:\n  \
  ci [--job NAME] [--file PATH] [--dry-run]   Run CI jobs from {DEFAULT_JOBS_FILE}\n  \
  fmt [--check]                              Format the workspace\n  \
  clippy                                     Lint the workspace with warnings as errors"
    );
}

/// Run a command and fail if it does not exit successfully. The tool's own output and
/// exit status are the result; nothing is interpreted.
fn execute_command(cmd: &str, args: &[String], dry_run: bool) -> Result<()> {
    println!("$ {} {}", cmd, args.join(" "));
    if dry_run {
        return Ok(());
    }
    let start = Instant::now();
    let status = Command::new(cmd).args(args).status()?;
    if status.success() {
        println!("ok in {:.2}s", start.elapsed().as_secs_f64());
        Ok(())
    } else {
        bail!("`{cmd}` failed with {status}")
    }
}

struct CiArgs {
    job: Option<String>,
    file: PathBuf,
    dry_run: bool,
}

fn parse_ci_args(args: &[String]) -> Result<CiArgs> {
    let mut parsed = CiArgs { job: None, file: PathBuf::from(DEFAULT_JOBS_FILE), dry_run: false };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--job" => {
                parsed.job = Some(iter.next().ok_or_else(|| anyhow!("--job needs a name"))?.clone())
            }
            "--file" => {
                parsed.file =
                    PathBuf::from(iter.next().ok_or_else(|| anyhow!("--file needs a path"))?)
            }
            "--dry-run" => parsed.dry_run = true,
            other => bail!("unexpected argument {other:?}"),
        }
    }
    Ok(parsed)
}

fn cmd_ci(args: &[String]) -> Result<()> {
    let args = parse_ci_args(args)?;
    let file = JobsFile::load(&args.file)?;
    let selected = file.select(args.job.as_deref())?;

    let mut failed = Vec::new();
    for job in selected {
        println!("== job {} ==", job.name);
        for invocation in job.invocations() {
            if let Err(err) = execute_command("cargo", &invocation, args.dry_run) {
                eprintln!("{err}");
                failed.push(job.name.clone());
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        bail!("failed jobs: {}", failed.join(", "))
    }
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        usage();
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    match cmd.as_str() {
        "ci" => cmd_ci(&args),
        "fmt" => {
            let mut fmt = vec!["fmt".to_string(), "--all".to_string()];
            if args.iter().any(|a| a == "--check") {
                fmt.extend(["--".to_string(), "--check".to_string()]);
            }
            execute_command("cargo", &fmt, false)
        }
        "clippy" => {
            let clippy = ["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"];
            execute_command("cargo", &clippy.map(String::from), false)
        }
        _ => {
            usage();
            std::process::exit(1);
        }
    }
}
