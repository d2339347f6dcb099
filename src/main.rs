use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use jinjaform::{aws, common, config, git, log, rc, render, store, terraform, workspace};

//
// ──────────────────────────────────────────────────────────────────────────────
//  CLI ARGUMENTS
// ──────────────────────────────────────────────────────────────────────────────
//
// jinjaform is a thin dispatcher: the subcommand and everything after it
// are forwarded to the configured Terraform binary once the workspace
// has been assembled. Only a handful of subcommands are special-cased.
//

#[derive(Parser, Debug)]
#[command(author, version, about, trailing_var_arg = true)]
struct Cli {
    /// Terraform subcommand (plan, apply, ...) or one of jinjaform's
    /// own bypassed commands (fmt, help, version)
    subcommand: String,

    /// Arguments forwarded verbatim to the Terraform binary
    args: Vec<String>,
}

const BYPASSED: &[&str] = &["fmt", "help", "-help", "--help", "-h", "version", "-version", "--version", "-v"];
const FORBIDDEN: &[&str] = &["push"];

fn main() -> ExitCode {
    common::init();
    let cli = Cli::parse();

    if FORBIDDEN.contains(&cli.subcommand.as_str()) {
        log::bad(format!("\"{}\" is not a supported jinjaform command", cli.subcommand));
        return ExitCode::FAILURE;
    }

    if BYPASSED.contains(&cli.subcommand.as_str()) {
        return run_bypassed(&cli);
    }

    match run(&cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            log::bad(format!("{err:?}"));
            ExitCode::FAILURE
        }
    }
}

fn run_bypassed(cli: &Cli) -> ExitCode {
    let paths = match config::Paths::discover() {
        Ok(paths) => paths,
        Err(err) => {
            log::bad(err.to_string());
            return ExitCode::FAILURE;
        }
    };
    let env = paths.child_env(&Default::default());
    let argv = std::iter::once(cli.subcommand.clone()).chain(cli.args.clone());
    match terraform::run(&paths.terraform_bin, argv, &env) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            log::bad(err.to_string());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let paths = config::Paths::discover().context("resolving project root")?;
    let commands = rc::load(&paths.rc_path()).context("loading .jinjaformrc")?;

    let requires_apply_checks = cli.subcommand == "apply";
    let store = Arc::new(store::VariableStore::new());
    let mut env_overrides: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut exit_code = 0;

    for command in &commands {
        match command {
            rc::Command::GitCheckClean if requires_apply_checks => {
                git::check_clean().context("git clean-tree check")?;
            }
            rc::Command::GitCheckBranch(name) if requires_apply_checks => {
                git::check_branch(name).context("git branch check")?;
            }
            rc::Command::GitCheckRemote if requires_apply_checks => {
                git::check_remote().context("git remote check")?;
            }
            rc::Command::GitCheckClean | rc::Command::GitCheckBranch(_) | rc::Command::GitCheckRemote => {}
            rc::Command::WorkspaceCreate => {
                workspace::clean(&paths).context("cleaning workspace directory")?;
                let extensions = Arc::new(
                    render::Extensions::load(&paths.jinja_extensions_dir())
                        .context("loading jinja extensions")?,
                );
                let built = workspace::create(&paths, Arc::clone(&store), extensions)
                    .context("assembling workspace")?;
                env_overrides.extend(built.env);
                let provider = built.metadata.aws_provider();
                env_overrides.extend(aws::credentials_setup(&provider));
                let backend = built.metadata.s3_backend();
                aws::backend_setup(&backend);
            }
            rc::Command::TerraformRun => {
                let env = paths.child_env(&env_overrides);
                let argv = std::iter::once(cli.subcommand.clone()).chain(cli.args.clone());
                exit_code = terraform::run(&paths.terraform_bin, argv, &env).context("running terraform")?;
            }
            rc::Command::Run(shell_command) => {
                let status = std::process::Command::new("sh")
                    .arg("-c")
                    .arg(shell_command)
                    .status()
                    .with_context(|| format!("running {shell_command}"))?;
                if !status.success() {
                    anyhow::bail!("command failed: {shell_command}");
                }
            }
        }
    }

    Ok(exit_code)
}
