mod app;
mod assets;
mod cli;
mod config;
mod db;
mod listing;
mod logging;
mod notify;
mod share;
mod store;
mod sync;
mod ui;

use std::io::Write;
use std::path::{Path, PathBuf};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), app::AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run() -> Result<(), app::AppError> {
    use clap::Parser;
    use cli::Commands;

    let cli = cli::Cli::parse();
    logging::init(cli.verbose);
    let config = config::Config::load(&cli.config)?;
    let base_dir = config_base_dir(&cli.config);

    match cli.command {
        Commands::Assets(args) => run_assets_command(&args.command, &cli.db, &config, &base_dir),
        Commands::Fetch(args) => run_fetch(&args, &cli.db, &config, &base_dir),
        command => run_list_command(command, &cli.db, config),
    }
}

fn run_list_command(
    command: cli::Commands,
    db: &str,
    config: config::Config,
) -> Result<(), app::AppError> {
    use cli::{Commands, SyncSubcommands};

    let mut app = app::App::open(db, config)?;

    match command {
        Commands::Add(args) => {
            let records = app.add(&args.name, args.category.as_deref())?;
            if args.json {
                print_json(&records)?;
            } else if let Some(added) = records.iter().max_by_key(|record| record.id) {
                let palette = ui::Palette::auto();
                println!(
                    "added {} {} ({})",
                    palette.id(&format!("#{}", added.id)),
                    added.name,
                    added.category
                );
            }
        }
        Commands::Ls(args) => {
            let filter = listing::ListFilter {
                category: args.category,
                pending_only: args.pending,
            };
            let groups = listing::group_by_category(app.list(&filter)?);
            if args.json {
                print_json(&groups)?;
            } else {
                ui::print_grouped_list(&groups, &filter);
            }
        }
        Commands::Done(args) => {
            let done = !args.undo;
            app.set_done(args.id, done)?;
            match app.get(args.id)? {
                Some(record) => println!(
                    "{} #{} {}",
                    if done { "checked" } else { "unchecked" },
                    record.id,
                    record.name
                ),
                None => println!("no item #{}; nothing changed", args.id),
            }
        }
        Commands::Rm(args) => {
            let existing = app.get(args.id)?;
            app.remove(args.id)?;
            match existing {
                Some(record) => println!("removed #{} {}", record.id, record.name),
                None => println!("no item #{}; nothing changed", args.id),
            }
        }
        Commands::Share(args) => {
            println!("{}", app.share_link(args.base_url.as_deref())?);
        }
        Commands::Import(args) => {
            let summary = app.import(&args.input)?;
            if args.json {
                print_json(&summary)?;
            } else {
                println!(
                    "imported {} item(s){}",
                    summary.imported,
                    if summary.skipped > 0 {
                        format!(", skipped {}", summary.skipped)
                    } else {
                        String::new()
                    }
                );
            }
        }
        Commands::Sync(args) => match args.command {
            SyncSubcommands::Status(out) => {
                let report = app.sync_status()?;
                if out.json {
                    print_json(&report)?;
                } else {
                    ui::print_sync_report(&report);
                }
            }
            SyncSubcommands::Run(out) => {
                let outcome = app.run_sync(&notify::TerminalNotifier)?;
                if out.json {
                    print_json(&outcome)?;
                } else {
                    ui::print_run_outcome(&outcome);
                }
            }
        },
        Commands::Assets(_) | Commands::Fetch(_) => {
            unreachable!("asset commands are dispatched before the store opens")
        }
    }
    Ok(())
}

fn run_assets_command(
    command: &cli::AssetsSubcommands,
    db: &str,
    config: &config::Config,
    base_dir: &Path,
) -> Result<(), app::AppError> {
    use cli::AssetsSubcommands;

    let mut worker = app::open_asset_worker(db, config)?;
    match command {
        AssetsSubcommands::Install(out) => {
            let network = app::network_fetcher(config, base_dir, false);
            let report = worker.install(network.as_ref())?;
            if out.json {
                print_json(&report)?;
            } else {
                println!(
                    "installed {}: {} resource(s), {} byte(s)",
                    report.generation, report.resources, report.bytes
                );
            }
        }
        AssetsSubcommands::Activate(out) => {
            let report = worker.activate()?;
            if out.json {
                print_json(&report)?;
            } else {
                print_activation(&report);
            }
        }
        AssetsSubcommands::Deploy(out) => {
            let network = app::network_fetcher(config, base_dir, false);
            let (installed, activated) = worker.deploy(network.as_ref())?;
            if out.json {
                print_json(&serde_json::json!({
                    "install": installed,
                    "activate": activated,
                }))?;
            } else {
                println!(
                    "installed {}: {} resource(s), {} byte(s)",
                    installed.generation, installed.resources, installed.bytes
                );
                print_activation(&activated);
            }
        }
        AssetsSubcommands::Status(out) => {
            let status = worker.status()?;
            if out.json {
                print_json(&status)?;
            } else {
                ui::print_asset_status(&status);
            }
        }
        AssetsSubcommands::Verify(out) => {
            let report = worker.verify()?;
            if out.json {
                print_json(&report)?;
            } else {
                ui::print_verify_report(&report);
            }
            if !report.ok() {
                if let Some(generation) = report.generation {
                    return Err(app::AppError::VerifyFailed {
                        generation,
                        issues: report.issues.len(),
                    });
                }
            }
        }
    }
    tracing::debug!(state = %worker.state().label(), "asset worker state");
    Ok(())
}

fn print_activation(report: &assets::ActivateReport) {
    if report.deleted.is_empty() {
        println!("activated {}", report.generation);
    } else {
        println!(
            "activated {} (deleted {})",
            report.generation,
            report.deleted.join(", ")
        );
    }
}

fn run_fetch(
    args: &cli::FetchArgs,
    db: &str,
    config: &config::Config,
    base_dir: &Path,
) -> Result<(), app::AppError> {
    let worker = app::open_asset_worker(db, config)?;
    let network = app::network_fetcher(config, base_dir, args.offline);
    let response = worker.handle(&args.path, network.as_ref())?;
    tracing::info!(
        key = %response.key,
        source = ?response.source,
        generation = response.generation.as_deref().unwrap_or("-"),
        content_type = response.content_type.as_deref().unwrap_or("-"),
        bytes = response.body.len(),
        "request resolved"
    );
    match args.out.as_ref() {
        Some(path) => std::fs::write(path, &response.body)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&response.body)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Directory origins in the config resolve relative to the config file.
fn config_base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod main_tests;
