use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{ArgAction, Args, Parser, Subcommand};

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

#[derive(Debug, Parser)]
#[command(name = "shoplist")]
#[command(bin_name = "shoplist")]
#[command(version)]
#[command(about = "An offline-first shopping checklist with deferred sync")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'd',
        long,
        global = true,
        env = "SHOPLIST_DB_PATH",
        default_value = ".shoplist/state.sqlite",
        help = "Path to the local SQLite database."
    )]
    pub db: String,

    #[arg(
        long,
        global = true,
        env = "SHOPLIST_CONFIG",
        default_value = ".shoplist/config.toml",
        help = "Config file layered over the built-in defaults."
    )]
    pub config: PathBuf,

    #[arg(
        short = 'v',
        long,
        global = true,
        action = ArgAction::Count,
        help = "Raise log verbosity (-v info, -vv debug). SHOPLIST_LOG overrides."
    )]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Add an item to the list.")]
    Add(AddArgs),
    #[command(about = "List items grouped by category.")]
    Ls(ListArgs),
    #[command(about = "Check an item off (or back on with --undo).")]
    Done(DoneArgs),
    #[command(about = "Remove an item.")]
    Rm(RemoveArgs),
    #[command(about = "Print a share link for the current list.")]
    Share(ShareArgs),
    #[command(about = "Import items from a share link or payload.")]
    Import(ImportArgs),
    #[command(about = "Manage the offline asset cache.")]
    Assets(AssetsArgs),
    #[command(about = "Resolve one request through the asset worker.")]
    Fetch(FetchArgs),
    #[command(about = "Inspect or run the deferred list flush.")]
    Sync(SyncArgs),
}

#[derive(Debug, Clone, Args)]
pub struct AddArgs {
    #[arg(help = "Item name.")]
    pub name: String,

    #[arg(short = 'c', long, help = "Category (defaults to Other).")]
    pub category: Option<String>,

    #[arg(long, help = "Print the re-read list as JSON.")]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ListArgs {
    #[arg(long, help = "Print JSON output.")]
    pub json: bool,

    #[arg(short = 'c', long, help = "Only show one category.")]
    pub category: Option<String>,

    #[arg(short = 'p', long, help = "Hide checked items.")]
    pub pending: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DoneArgs {
    #[arg(help = "Item id.")]
    pub id: i64,

    #[arg(short = 'u', long, help = "Mark the item as not done.")]
    pub undo: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RemoveArgs {
    #[arg(help = "Item id.")]
    pub id: i64,
}

#[derive(Debug, Clone, Args)]
pub struct ShareArgs {
    #[arg(long = "base-url", help = "Override the configured share base URL.")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    #[arg(help = "Share link or bare base64 payload.")]
    pub input: String,

    #[arg(long, help = "Print JSON output.")]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct AssetsArgs {
    #[command(subcommand)]
    pub command: AssetsSubcommands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum AssetsSubcommands {
    #[command(about = "Precache every manifest resource into this build's generation.")]
    Install(AssetsOutputArgs),
    #[command(about = "Activate this build's generation and delete all others.")]
    Activate(AssetsOutputArgs),
    #[command(about = "Install then activate.")]
    Deploy(AssetsOutputArgs),
    #[command(about = "Show cache generations and worker state.")]
    Status(AssetsOutputArgs),
    #[command(about = "Check the active generation against stored digests.")]
    Verify(AssetsOutputArgs),
}

#[derive(Debug, Clone, Args)]
pub struct AssetsOutputArgs {
    #[arg(long, help = "Print JSON output.")]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    #[arg(help = "Request path, e.g. / or ./style.css.")]
    pub path: String,

    #[arg(long, help = "Simulate no connectivity.")]
    pub offline: bool,

    #[arg(short = 'o', long, help = "Write the body to a file instead of stdout.")]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub command: SyncSubcommands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum SyncSubcommands {
    #[command(about = "Show the flush task and undelivered changes.")]
    Status(SyncOutputArgs),
    #[command(about = "Run the registered flush now.")]
    Run(SyncOutputArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SyncOutputArgs {
    #[arg(long, help = "Print JSON output.")]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::{AssetsSubcommands, Cli, Commands, SyncSubcommands};
    use clap::Parser;

    #[test]
    fn parses_list_mutations() {
        let cli = Cli::parse_from(["shoplist", "add", "Milk", "-c", "Dairy"]);
        match cli.command {
            Commands::Add(args) => {
                assert_eq!(args.name, "Milk");
                assert_eq!(args.category.as_deref(), Some("Dairy"));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::parse_from(["shoplist", "done", "3", "--undo"]);
        assert!(matches!(cli.command, Commands::Done(args) if args.id == 3 && args.undo));

        let cli = Cli::parse_from(["shoplist", "-vv", "rm", "4"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Rm(args) if args.id == 4));
    }

    #[test]
    fn parses_nested_subcommands_and_global_flags() {
        let cli = Cli::parse_from([
            "shoplist",
            "assets",
            "status",
            "--json",
            "--db",
            "/tmp/x.sqlite",
        ]);
        assert_eq!(cli.db, "/tmp/x.sqlite");
        assert!(matches!(
            cli.command,
            Commands::Assets(args) if matches!(args.command, AssetsSubcommands::Status(ref out) if out.json)
        ));

        let cli = Cli::parse_from(["shoplist", "sync", "run"]);
        assert!(matches!(
            cli.command,
            Commands::Sync(args) if matches!(args.command, SyncSubcommands::Run(_))
        ));

        let cli = Cli::parse_from(["shoplist", "fetch", "./", "--offline"]);
        assert!(matches!(cli.command, Commands::Fetch(args) if args.offline && args.path == "./"));
    }
}
