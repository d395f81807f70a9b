mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::process;
use std::thread;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, FetchArgs, UpdateArgs, UserAction};
use dotenv::dotenv;
use gallery_sync_core::config::load_configuration;
use gallery_sync_core::repair;
use gallery_sync_core::storage::keys;
use gallery_sync_core::storage::models::canonical_handle;
use gallery_sync_core::{
    AppConfig, CancelGuard, Error, FetchOptions, HttpSite, MigrationContext, MigrationPipeline,
    RemoteSite, Section, Store, SyncEngine, UpdateOptions,
};
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let cancel = CancelGuard::new();
    listen_for_interrupt(cancel.clone());

    let result = match args.command {
        Some(Commands::Update(update)) => run_update(&config, &cancel, update),
        Some(Commands::Fetch(fetch)) => run_fetch(&config, &cancel, fetch),
        Some(Commands::Upgrade { offline, yes }) => run_upgrade(&config, &cancel, offline, yes),
        Some(Commands::Check { fix }) => run_check(&config, &cancel, fix),
        Some(Commands::UsersSync) => run_users_sync(&config, &cancel),
        Some(Commands::User { action }) => run_user(&config, &cancel, action),
        Some(Commands::Info) => run_info(&config, &cancel),
        Some(Commands::Compact) => run_compact(&config, &cancel),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        if matches!(err.downcast_ref::<Error>(), Some(Error::Cancelled)) {
            warn!("Cancelled");
            process::exit(130);
        }
        error!("Error: {:#}", err);
        process::exit(1);
    }

    Ok(())
}

/// Route Ctrl-C into the guard. Outside a guarded section the process exits at once.
fn listen_for_interrupt(cancel: CancelGuard) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Interrupt handling unavailable: {}", e);
                return;
            }
        };
        loop {
            if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
                warn!("Interrupt handling unavailable: {}", e);
                return;
            }
            if !cancel.signal() {
                eprintln!();
                process::exit(130);
            }
            warn!("Interrupt received, stopping at the next safe point");
        }
    });
}

/// Open the store, offering to upgrade it first when it is behind.
fn open_store(config: &AppConfig, cancel: &CancelGuard) -> anyhow::Result<Store> {
    let pipeline = MigrationPipeline::new();
    if let Some(version) = pipeline.pending_version(&config.database_path)? {
        let prompt = format!(
            "Store {} is at version {} and must be upgraded first. Upgrade now?",
            config.database_path.display(),
            version
        );
        if !confirm(cancel, &prompt, Some(true))? {
            bail!("store must be upgraded before it can be used");
        }
        upgrade(config, cancel, &pipeline, false)?;
    }
    let store = Store::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    Ok(store)
}

fn upgrade(
    config: &AppConfig,
    cancel: &CancelGuard,
    pipeline: &MigrationPipeline,
    offline: bool,
) -> anyhow::Result<()> {
    let site = if offline { None } else { Some(HttpSite::new(config)?) };
    let reporter = CliReporter::new();
    let ctx = MigrationContext {
        site: site.as_ref().map(|site| site as &dyn RemoteSite),
        cancel,
        reporter: &reporter,
    };
    let report = pipeline.run(&config.database_path, &ctx);
    reporter.clear();
    let report = report?;
    for backup in &report.backups {
        info!("Backup kept at {}", backup.display());
    }
    Ok(())
}

fn run_upgrade(config: &AppConfig, cancel: &CancelGuard, offline: bool, yes: bool) -> anyhow::Result<()> {
    let pipeline = MigrationPipeline::new();
    let Some(version) = pipeline.pending_version(&config.database_path)? else {
        println!("Store is up to date");
        return Ok(());
    };
    if !yes && !confirm(cancel, &format!("Upgrade store from version {}?", version), Some(true))? {
        return Ok(());
    }
    upgrade(config, cancel, &pipeline, offline)?;
    println!("{}", "Store upgraded".green());
    Ok(())
}

fn run_update(config: &AppConfig, cancel: &CancelGuard, args: UpdateArgs) -> anyhow::Result<()> {
    let store = open_store(config, cancel)?;
    let site = HttpSite::new(config)?;

    let users: Vec<String> = if args.users.is_empty() {
        store.user_list()?.into_iter().map(|user| user.handle).collect()
    } else {
        args.users
    };
    if users.is_empty() {
        println!("No users to update; add one with `gallery-sync user add`");
        return Ok(());
    }
    let sections = if args.sections.is_empty() {
        Section::ALL.to_vec()
    } else {
        args.sections
    };
    let options = UpdateOptions {
        speed: args.speed.unwrap_or(config.speed),
        force: args.force,
        dry_run: args.dry_run,
        stop_after: args.stop_after,
        page_size: config.page_size,
    };

    let engine = SyncEngine::from_config(&store, &site, config, cancel);
    let reporter = CliReporter::new();
    let summary = engine.run_update(&users, &sections, &options, &reporter);
    reporter.clear();
    let summary = summary?;

    if args.json {
        println!("{}", summary.to_json()?);
    } else {
        progress::print_summary(&summary);
    }
    Ok(())
}

fn run_fetch(config: &AppConfig, cancel: &CancelGuard, args: FetchArgs) -> anyhow::Result<()> {
    let store = open_store(config, cancel)?;
    let site = HttpSite::new(config)?;
    site.check_session()?;

    let options = FetchOptions {
        quiet: args.quiet,
        check_dedup: !args.no_dedup,
        speed: args.speed.unwrap_or(config.speed),
        overwrite: args.overwrite,
    };
    let engine = SyncEngine::from_config(&store, &site, config, cancel);
    let reporter = CliReporter::new();
    for id in args.ids {
        match engine.fetch_item(id, &options, &reporter) {
            Ok(outcome) if args.quiet => println!("{} {:?}", id, outcome),
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                reporter.clear();
                warn!("Submission {} failed: {}", id, e);
            }
            Err(e) => {
                reporter.clear();
                return Err(e.into());
            }
        }
    }
    reporter.clear();
    Ok(())
}

fn run_check(config: &AppConfig, cancel: &CancelGuard, fix: bool) -> anyhow::Result<()> {
    let store = open_store(config, cancel)?;
    let report = repair::check(&store, &config.files_root)?;

    for bad in &report.bad_locations {
        println!("{} {}: location {} should be {}", "location".yellow(), bad.id, bad.stored, bad.expected);
    }
    for id in &report.missing_files {
        println!("{} {}: payload missing on disk", "file".yellow(), id);
    }
    for dir in &report.orphan_dirs {
        println!("{} {}", "orphan".red(), dir.display());
    }
    for handle in &report.empty_users {
        println!("{} {} has no sections and no items", "user".yellow(), handle);
    }
    for missing in &report.missing_sections {
        println!("{} {} lists {} items but the section is not enabled", "user".yellow(), missing.handle, missing.section);
    }

    if report.is_clean() {
        println!("{}", "Store and files are consistent".green());
        return Ok(());
    }
    if fix {
        let fixed = repair::repair(&store, &report)?;
        println!("Fixed {} of {} problems", fixed.to_string().green(), report.fixable());
    } else if report.fixable() > 0 {
        println!("Run with --fix to repair {} problem(s)", report.fixable());
    }
    Ok(())
}

fn run_users_sync(config: &AppConfig, cancel: &CancelGuard) -> anyhow::Result<()> {
    let store = open_store(config, cancel)?;
    let site = HttpSite::new(config)?;
    site.check_session()?;

    let report = repair::probe_users(&store, &site, cancel)?;
    for handle in &report.not_found {
        println!("{} {}", "not found".red(), handle);
    }
    for handle in &report.disabled {
        println!("{} {}", "disabled".yellow(), handle);
    }
    for handle in &report.failed {
        println!("{} {}", "failed".red(), handle);
    }
    println!("Checked {} user(s)", report.checked);
    if report.interrupted {
        return Err(Error::Cancelled.into());
    }
    Ok(())
}

fn run_user(config: &AppConfig, cancel: &CancelGuard, action: UserAction) -> anyhow::Result<()> {
    let store = open_store(config, cancel)?;
    match action {
        UserAction::List => {
            for user in store.user_list()? {
                let sections: Vec<String> = user
                    .folder_flags()
                    .iter()
                    .map(|flag| {
                        if flag.disabled {
                            format!("{}!", flag.section).yellow().to_string()
                        } else {
                            flag.section.to_string()
                        }
                    })
                    .collect();
                println!("{:<24} {:<24} {}", user.handle, user.display_name, sections.join(","));
            }
        }
        UserAction::Add { handle, name, sections } => {
            let handle = canonical_handle(&handle);
            if handle.is_empty() {
                bail!("invalid user name");
            }
            let display_name = name.unwrap_or_else(|| handle.clone());
            if !store.user_insert(&handle, &display_name)? {
                println!("{} already exists", handle);
            }
            store.user_enable_sections(&handle, &sections)?;
            store.refresh_counts()?;
        }
        UserAction::Enable { handle, sections } => {
            if !store.user_enable_sections(&canonical_handle(&handle), &sections)? {
                bail!("unknown user {}", handle);
            }
        }
        UserAction::Disable { handle, sections } => {
            if !store.user_disable_sections(&canonical_handle(&handle), &sections)? {
                bail!("unknown user {}", handle);
            }
        }
        UserAction::Remove { handle, yes } => {
            let handle = canonical_handle(&handle);
            let prompt = format!("Remove {}? Archived submissions are kept.", handle);
            if !yes && !confirm(cancel, &prompt, Some(false))? {
                return Ok(());
            }
            if !store.user_delete(&handle)? {
                bail!("unknown user {}", handle);
            }
            store.refresh_counts()?;
        }
    }
    Ok(())
}

fn run_info(config: &AppConfig, cancel: &CancelGuard) -> anyhow::Result<()> {
    let store = open_store(config, cancel)?;
    for key in [
        keys::DBNAME,
        keys::VERSION,
        keys::USN,
        keys::SUN,
        keys::LASTUP,
        keys::LASTUPT,
        keys::LASTDL,
        keys::LASTDLT,
        keys::INDEX,
    ] {
        let value = store.metadata_get(key)?.unwrap_or_default();
        println!("{:<8} {}", key, value);
    }
    Ok(())
}

fn run_compact(config: &AppConfig, cancel: &CancelGuard) -> anyhow::Result<()> {
    let store = open_store(config, cancel)?;
    store.rebuild_indices()?;
    store.compact()?;
    println!("{}", "Store compacted".green());
    Ok(())
}

/// Ask a yes/no question. Ctrl-C exits immediately while waiting for input.
fn confirm(cancel: &CancelGuard, prompt: &str, default: Option<bool>) -> io::Result<bool> {
    cancel.unblock();
    let answer = prompt_confirm(prompt, default);
    cancel.reset();
    answer
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
