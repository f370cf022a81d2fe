// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use ai_rules::{
    agent::{self, AgentDefinition},
    config::UserConfig,
    keypath::KeyPath,
    link::LinkAction,
    overrides::{self, OverrideEntry},
    path::{builtin_profiles_dir, discover_repo_root, Layout},
    profile::{resolve, ProfileDirs, ProfileOrigin},
    settings::cache::CacheState,
    state::SessionContext,
    workspace::{AgentOutcome, Workspace},
};

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use std::{env::current_dir, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "ai-rules [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Repository holding agent files.
    #[arg(short, long, global = true, value_name = "path")]
    pub repo: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let repo = match self.repo {
            Some(repo) => repo,
            None => discover_repo_root(current_dir()?),
        };
        let layout = Layout::discover()?;

        match self.command {
            Command::Install(opts) => run_install(repo, layout, opts),
            Command::Uninstall(opts) => run_uninstall(repo, layout, opts),
            Command::Status(opts) => run_status(repo, layout, opts),
            Command::Diff(opts) => run_diff(repo, layout, opts),
            Command::Show(opts) => run_show(repo, layout, opts),
            Command::RebuildCache(opts) => run_rebuild_cache(repo, layout, opts),
            Command::Config(opts) => run_config(repo, layout, opts),
            Command::Profile(opts) => run_profile(repo, layout, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Merge settings and link agent files into home directory.
    #[command(override_usage = "ai-rules install [options]")]
    Install(InstallOptions),

    /// Remove links made by install.
    #[command(override_usage = "ai-rules uninstall [options]")]
    Uninstall(UninstallOptions),

    /// Show link and settings cache status of agents.
    #[command(override_usage = "ai-rules status [options]")]
    Status(AgentOptions),

    /// Show what install would change.
    #[command(override_usage = "ai-rules diff [options]")]
    Diff(AgentOptions),

    /// Show files of one agent.
    #[command(override_usage = "ai-rules show [options] <agent>")]
    Show(ShowOptions),

    /// Rebuild merged settings without touching links.
    #[command(override_usage = "ai-rules rebuild-cache [options]")]
    RebuildCache(AgentOptions),

    /// Manage user settings overrides.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Manage settings profiles.
    #[command(subcommand)]
    Profile(ProfileCommand),
}

#[derive(Parser, Clone, Debug)]
struct AgentOptions {
    /// Agents to operate on, all agents if none are given.
    #[arg(short, long = "agent", value_name = "agent")]
    pub agents: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InstallOptions {
    #[command(flatten)]
    pub select: AgentOptions,

    /// Apply and activate profile.
    #[arg(short, long, value_name = "name")]
    pub profile: Option<String>,

    /// Show plan without changing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UninstallOptions {
    #[command(flatten)]
    pub select: AgentOptions,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ShowOptions {
    /// Agent to show.
    #[arg(required = true, value_name = "agent")]
    pub agent: String,

    /// Print merged settings instead of links.
    #[arg(short, long)]
    pub merged: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print user override at key, or every override without key.
    #[command(override_usage = "ai-rules config get [<agent>.<key>]")]
    Get {
        #[arg(value_name = "key")]
        key: Option<String>,
    },

    /// Set user override at key.
    #[command(override_usage = "ai-rules config set <agent>.<key> <value>")]
    Set {
        #[arg(required = true, value_name = "key")]
        key: String,

        #[arg(required = true, value_name = "value")]
        value: String,
    },

    /// Remove user override at key.
    #[command(override_usage = "ai-rules config unset <agent>.<key>")]
    Unset {
        #[arg(required = true, value_name = "key")]
        key: String,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum ProfileCommand {
    /// List available profiles.
    List,

    /// Show resolved profile.
    Show {
        #[arg(required = true, value_name = "name")]
        name: String,
    },

    /// Make profile active.
    Switch {
        #[arg(required = true, value_name = "name")]
        name: String,
    },

    /// Print active profile.
    Current,

    /// Deactivate profile.
    Clear,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_install(repo: PathBuf, layout: Layout, opts: InstallOptions) -> Result<()> {
    let agents = agent::select(&opts.select.agents)?;
    let workspace = Workspace::open(repo, layout, opts.profile.as_deref())?;
    let pending = print_plan(&workspace, &agents)?;

    if opts.dry_run {
        return Ok(());
    }

    if !opts.yes && !Confirm::new("Proceed with install?").with_default(true).prompt()? {
        info!("install cancelled");
        return Ok(());
    }

    let bar = ProgressBar::new(pending as u64);
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    let outcomes = workspace.install(&agents, &bar);
    bar.finish_and_clear();

    let installed = outcomes.iter().any(|outcome| outcome.result.is_ok());
    if installed {
        let mut session = workspace.session().clone().with_install_time(Utc::now());
        if let Some(profile) = workspace.profile() {
            session = session.with_active_profile(Some(profile.name.clone()));
        }
        session.save(&workspace.layout().state)?;
    }

    report(outcomes, |agent, report| {
        println!("{agent}: {} linked, {} backed up", report.linked, report.backups.len());
        for backup in &report.backups {
            println!("  backup {}", backup.display());
        }
    })
}

fn run_uninstall(repo: PathBuf, layout: Layout, opts: UninstallOptions) -> Result<()> {
    let agents = agent::select(&opts.select.agents)?;
    let workspace = Workspace::open(repo, layout, None)?;

    if !opts.yes && !Confirm::new("Remove links?").with_default(false).prompt()? {
        info!("uninstall cancelled");
        return Ok(());
    }

    report(workspace.uninstall(&agents), |agent, removed| {
        println!("{agent}: {removed} links removed");
    })
}

fn run_status(repo: PathBuf, layout: Layout, opts: AgentOptions) -> Result<()> {
    let agents = agent::select(&opts.agents)?;
    let workspace = Workspace::open(repo, layout, None)?;
    for warning in workspace.warnings() {
        warn!("{warning}");
    }

    println!("repository: {}", workspace.repo_root().display());
    match workspace.profile() {
        Some(profile) => println!("profile: {}", profile.chain.join(" -> ")),
        None => println!("profile: none"),
    }
    if let Some(time) = workspace.session().last_install_time {
        println!("last install: {time}");
    }

    let outcomes = agents
        .iter()
        .map(|&agent| AgentOutcome {
            agent: agent.id,
            result: workspace.status(agent),
        })
        .collect();

    report(outcomes, |agent, status| {
        let settings = match status.cache {
            Some(CacheState::Fresh) => "fresh",
            Some(CacheState::Stale) => "stale",
            Some(CacheState::Uninitialized) => "not built",
            None => "none",
        };
        let links = status.plan.links();
        let linked = links.iter().filter(|link| link.action == LinkAction::Unchanged).count();
        let excluded = links.iter().filter(|link| link.action == LinkAction::Skip).count();
        println!(
            "{agent}: settings {settings}, {linked} linked, {} pending, {excluded} excluded",
            status.plan.pending().count(),
        );
        for link in status.plan.pending() {
            println!("  {link}");
        }
    })
}

fn run_diff(repo: PathBuf, layout: Layout, opts: AgentOptions) -> Result<()> {
    let agents = agent::select(&opts.agents)?;
    let workspace = Workspace::open(repo, layout, None)?;
    print_plan(&workspace, &agents)?;

    Ok(())
}

fn run_show(repo: PathBuf, layout: Layout, opts: ShowOptions) -> Result<()> {
    let agent = find_agent(&opts.agent)?;
    let workspace = Workspace::open(repo, layout, None)?;

    if opts.merged {
        let merged = workspace.merged(agent)?;
        let format = agent
            .settings()
            .map(|(_, format)| format)
            .ok_or_else(|| anyhow!("{} keeps no settings", agent.id))?;
        print!("{}", format.render(&merged)?);
        return Ok(());
    }

    println!("{} ({})", agent.name, agent.id);
    for link in workspace.plan(agent)?.links() {
        println!("  {link}");
    }
    if !agent.managed_fields.is_empty() {
        println!("managed fields: {}", agent.managed_fields.join(", "));
    }

    Ok(())
}

fn run_rebuild_cache(repo: PathBuf, layout: Layout, opts: AgentOptions) -> Result<()> {
    let agents = agent::select(&opts.agents)?;
    let workspace = Workspace::open(repo, layout, None)?;

    report(workspace.rebuild(&agents), |agent, artifact| match artifact {
        Some(path) => println!("{agent}: rebuilt {}", path.display()),
        None => println!("{agent}: no settings"),
    })
}

fn run_config(repo: PathBuf, layout: Layout, command: ConfigCommand) -> Result<()> {
    let mut config = UserConfig::load(&layout.user_config)?;

    match command {
        ConfigCommand::Get { key: None } => print!("{config}"),
        ConfigCommand::Get { key: Some(key) } => {
            let (agent, path) = key.parse::<KeyPath>()?.split_agent()?;
            let overlay = config
                .overrides_for(&agent)
                .ok_or_else(|| anyhow!("no overrides for {agent}"))?;
            let value = overrides::get(overlay, &path)?;
            println!("{}", serde_yaml::to_string(value)?.trim_end());
        }
        ConfigCommand::Set { key, value } => {
            let entry = format!("{key}={value}").parse::<OverrideEntry>()?;
            let (agent, path) = entry.path.split_agent()?;
            let workspace = Workspace::open(repo, layout.clone(), None)?;
            let reference = workspace.reference(find_agent(&agent)?)?;
            config.set_override(&agent, &path, entry.value, &reference)?;
            config.save(&layout.user_config)?;
            info!("set {key}, run install to apply");
        }
        ConfigCommand::Unset { key } => {
            let (agent, path) = key.parse::<KeyPath>()?.split_agent()?;
            config.unset_override(&agent, &path)?;
            config.save(&layout.user_config)?;
            info!("unset {key}, run install to apply");
        }
    }

    Ok(())
}

fn run_profile(repo: PathBuf, layout: Layout, command: ProfileCommand) -> Result<()> {
    let dirs = ProfileDirs::new(&layout.user_profiles, builtin_profiles_dir(&repo));
    let session = SessionContext::load(&layout.state);

    match command {
        ProfileCommand::List => {
            for summary in dirs.list()? {
                let active = session.active_profile.as_deref() == Some(summary.name.as_str());
                let origin = match (summary.origin, summary.shadows_builtin) {
                    (ProfileOrigin::Builtin, _) => "built-in",
                    (ProfileOrigin::User, false) => "user",
                    (ProfileOrigin::User, true) => "user, shadows built-in",
                };
                println!(
                    "{} {} ({origin}) {}",
                    if active { "*" } else { " " },
                    summary.name,
                    summary.description
                );
            }
        }
        ProfileCommand::Show { name } => {
            let profile = resolve(&name, &dirs)?;
            println!("{}: {}", profile.name, profile.chain.join(" -> "));
            print!("{}", serde_yaml::to_string(&profile.overrides)?);
        }
        ProfileCommand::Switch { name } => {
            let profile = resolve(&name, &dirs)?;
            session
                .with_active_profile(Some(profile.name.clone()))
                .save(&layout.state)?;
            info!("switched to profile {}, run install to apply", profile.name);
        }
        ProfileCommand::Current => match session.active_profile {
            Some(name) => println!("{name}"),
            None => println!("none"),
        },
        ProfileCommand::Clear => {
            session.with_active_profile(None).save(&layout.state)?;
            info!("cleared active profile, run install to apply");
        }
    }

    Ok(())
}

fn find_agent(id: &str) -> Result<&'static AgentDefinition> {
    let mut selected = agent::select(&[id.to_string()])?;
    selected.pop().ok_or_else(|| anyhow!("unknown agent {id:?}"))
}

/// Print pending links and settings changes, returning number of pending links.
fn print_plan(workspace: &Workspace, agents: &[&'static AgentDefinition]) -> Result<usize> {
    let mut pending = 0;
    let mut failed = 0;

    for &agent in agents {
        let plan = match workspace.plan(agent) {
            Ok(plan) => plan,
            Err(error) => {
                error!("{}: {error}", agent.id);
                failed += 1;
                continue;
            }
        };

        println!("{}:", plan.agent());
        for link in plan.pending() {
            println!("  {link}");
            pending += 1;
        }

        match workspace.diff(agent) {
            Ok(changes) => {
                for change in changes {
                    println!("  {change}");
                }
            }
            Err(error) => {
                error!("{}: {error}", agent.id);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        warn!("{failed} agents cannot be planned");
    }

    Ok(pending)
}

fn report<T>(outcomes: Vec<AgentOutcome<T>>, mut show: impl FnMut(&str, &T)) -> Result<()> {
    let mut failed = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(value) => show(outcome.agent, &value),
            Err(error) => {
                error!("{}: {:?}", outcome.agent, anyhow::Error::from(error));
                failed.push(outcome.agent);
            }
        }
    }

    if !failed.is_empty() {
        bail!("failed agents: {}", failed.join(", "));
    }

    Ok(())
}
