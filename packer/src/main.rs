use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use packer::config::Config;
use packer::core::{CategoryGroup, Item, ItemId, PackingStats};
use packer::share::{Clipboard, CommandClipboard, Location};
use packer::storage::FileStore;
use packer::suggest::{category_query, category_suggestions, filter_suggestions};
use packer::timer::SystemClock;
use packer::{Hydration, PackingSession, SessionSettings};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "packer",
    about = "Packing checklist with #category entry and shareable links",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Config file to use instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the stored lists.
    #[arg(long, global = true, env = "PACKER_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Current location; a `#p=...` fragment is imported on startup.
    #[arg(long, global = true)]
    url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Add items, e.g. `packer add "Socks, Shirt #Clothing"`. Each argument is a line.
    Add(AddArgs),

    /// Show items grouped by category.
    List(OutputArgs),

    /// Check or uncheck an item.
    Toggle(IdArgs),

    /// Remove an item.
    Delete(IdArgs),

    /// Remove a category and every item in it.
    DeleteCategory(DeleteCategoryArgs),

    /// Move an item to another category.
    Move(MoveArgs),

    /// Clear the item list, or restore the starter list with --defaults.
    Reset(ResetArgs),

    /// Print a link that reproduces the current list.
    Share,

    /// Replace the item list with the one carried by a share link.
    Import(ImportArgs),

    /// Complete a `#category` being typed.
    Suggest(SuggestArgs),

    /// Print packing progress.
    Stats(OutputArgs),
}

#[derive(Debug, Args)]
struct AddArgs {
    /// Entry text; one argument per line.
    #[arg(required = true)]
    text: Vec<String>,
}

#[derive(Debug, Args)]
struct OutputArgs {
    /// Emit JSON instead of a human-readable listing.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct IdArgs {
    /// Item id or any unique prefix of one.
    id: String,
}

#[derive(Debug, Args)]
struct DeleteCategoryArgs {
    name: String,
}

#[derive(Debug, Args)]
struct MoveArgs {
    /// Item id or any unique prefix of one.
    id: String,
    /// Target category; blank or "general" means Uncategorized.
    category: String,
}

#[derive(Debug, Args)]
struct ResetArgs {
    /// Restore the starter items and categories instead of emptying the list.
    #[arg(long)]
    defaults: bool,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// Share link containing a `#p=` fragment.
    url: String,
}

#[derive(Debug, Args)]
struct SuggestArgs {
    /// Entry text being typed.
    draft: String,
    /// Caret position in characters. Defaults to the end of the draft.
    #[arg(long)]
    caret: Option<usize>,
}

type Session = PackingSession<FileStore>;

struct AppContext {
    config: Config,
    data_dir: PathBuf,
    url: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("loading config")?;
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.resolve_data_dir());
    let url = cli
        .url
        .clone()
        .unwrap_or_else(|| config.share_base_url.clone());
    tracing::debug!(?data_dir, %url, "starting session");
    let ctx = AppContext {
        config,
        data_dir,
        url,
    };

    match cli.command {
        Commands::Add(args) => handle_add(&ctx, args),
        Commands::List(args) => handle_list(&ctx, args),
        Commands::Toggle(args) => handle_toggle(&ctx, args),
        Commands::Delete(args) => handle_delete(&ctx, args),
        Commands::DeleteCategory(args) => handle_delete_category(&ctx, args),
        Commands::Move(args) => handle_move(&ctx, args),
        Commands::Reset(args) => handle_reset(&ctx, args),
        Commands::Share => handle_share(&ctx),
        Commands::Import(args) => handle_import(&ctx, args),
        Commands::Suggest(args) => handle_suggest(&ctx, args),
        Commands::Stats(args) => handle_stats(&ctx, args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("packer=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("packer=warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_session(ctx: &AppContext, url: &str) -> (Session, Hydration) {
    let store = FileStore::new(ctx.data_dir.clone());
    let mut session = PackingSession::with_clock(
        store,
        Location::parse(url),
        SystemClock,
        SessionSettings::from(&ctx.config),
    );
    if let Some(argv) = &ctx.config.clipboard_command {
        let clipboard: Box<dyn Clipboard> = Box::new(CommandClipboard::new(argv.clone()));
        session = session.with_clipboard(clipboard);
    }
    let hydration = session.hydrate();
    match hydration {
        Hydration::Imported { items } => tracing::debug!(items, "imported shared list"),
        Hydration::Restored { items } => tracing::debug!(items, "restored stored list"),
        Hydration::Skipped => {}
    }
    (session, hydration)
}

fn open(ctx: &AppContext) -> Session {
    open_session(ctx, &ctx.url).0
}

fn handle_add(ctx: &AppContext, args: AddArgs) -> Result<()> {
    let mut session = open(ctx);
    let added = session.add_items(&args.text.join("\n"));
    if added == 0 {
        println!("Nothing to add.");
    } else {
        println!("Added {added} item{}.", plural(added));
    }
    session.teardown();
    Ok(())
}

fn handle_list(ctx: &AppContext, args: OutputArgs) -> Result<()> {
    let session = open(ctx);
    let groups = session.categories();
    let stats = session.stats();

    if args.json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            categories: &'a [CategoryGroup],
            stats: PackingStats,
        }

        let payload = JsonOutput {
            categories: &groups,
            stats,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print!("{}", render_groups(&groups));
        println!("{}", render_stats(&stats));
    }
    Ok(())
}

fn handle_toggle(ctx: &AppContext, args: IdArgs) -> Result<()> {
    let mut session = open(ctx);
    let id = resolve_id(session.items(), &args.id)?;
    session.toggle_item(&id);
    if let Some(item) = session.items().iter().find(|item| item.id == id) {
        println!("{} {}", mark(item), item.name);
    }
    // The deferred resort happens on the next startup.
    session.teardown();
    Ok(())
}

fn handle_delete(ctx: &AppContext, args: IdArgs) -> Result<()> {
    let mut session = open(ctx);
    let id = resolve_id(session.items(), &args.id)?;
    session.delete_item(&id);
    println!("Deleted {}.", short_id(&id));
    Ok(())
}

fn handle_delete_category(ctx: &AppContext, args: DeleteCategoryArgs) -> Result<()> {
    let mut session = open(ctx);
    let removed = session.delete_category(&args.name);
    println!(
        "Deleted category {:?} and {removed} item{}.",
        packer::category::normalize_category_name(&args.name),
        plural(removed)
    );
    Ok(())
}

fn handle_move(ctx: &AppContext, args: MoveArgs) -> Result<()> {
    let mut session = open(ctx);
    let id = resolve_id(session.items(), &args.id)?;
    if session.move_item_to_category(&id, &args.category) {
        if let Some(item) = session.items().iter().find(|item| item.id == id) {
            println!("Moved {} to {}.", item.name, item.category);
        }
    } else {
        println!("Already there.");
    }
    Ok(())
}

fn handle_reset(ctx: &AppContext, args: ResetArgs) -> Result<()> {
    let mut session = open(ctx);
    if args.defaults {
        session.reset_to_default();
        println!("Restored the starter list.");
    } else {
        session.reset_items();
        println!("Cleared all items.");
    }
    Ok(())
}

fn handle_share(ctx: &AppContext) -> Result<()> {
    let mut session = open(ctx);
    let result = session.share();
    println!("{}", result.url);
    if let Some(note) = session.share_note() {
        eprintln!("{note}");
    }
    session.teardown();
    Ok(())
}

fn handle_import(ctx: &AppContext, args: ImportArgs) -> Result<()> {
    let (_session, hydration) = open_session(ctx, &args.url);
    match hydration {
        Hydration::Imported { items } => {
            println!("Imported {items} item{}.", plural(items));
            Ok(())
        }
        _ => anyhow::bail!("{:?} carries no usable share payload", args.url),
    }
}

fn handle_suggest(ctx: &AppContext, args: SuggestArgs) -> Result<()> {
    let session = open(ctx);
    let caret = args.caret.unwrap_or_else(|| args.draft.chars().count());
    let Some(query) = category_query(&args.draft, caret) else {
        return Ok(());
    };
    let suggestions = category_suggestions(session.category_list());
    for category in filter_suggestions(&suggestions, &query.query) {
        println!("{category}");
    }
    Ok(())
}

fn handle_stats(ctx: &AppContext, args: OutputArgs) -> Result<()> {
    let session = open(ctx);
    let stats = session.stats();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", render_stats(&stats));
    }
    Ok(())
}

/* ------------------------------ Helpers ------------------------------ */

/// Find the single item whose id equals `prefix` or starts with it.
fn resolve_id(items: &[Item], prefix: &str) -> Result<ItemId> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        anyhow::bail!("item id must not be empty");
    }
    if let Some(item) = items.iter().find(|item| item.id.as_str() == prefix) {
        return Ok(item.id.clone());
    }
    let matches: Vec<&Item> = items
        .iter()
        .filter(|item| item.id.as_str().starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [item] => Ok(item.id.clone()),
        [] => anyhow::bail!("no item with id {prefix:?}"),
        _ => anyhow::bail!(
            "id prefix {prefix:?} matches {} items; use more characters",
            matches.len()
        ),
    }
}

fn short_id(id: &ItemId) -> &str {
    let end = id
        .as_str()
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(id.as_str().len());
    &id.as_str()[..end]
}

fn mark(item: &Item) -> &'static str {
    if item.checked { "[x]" } else { "[ ]" }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn render_groups(groups: &[CategoryGroup]) -> String {
    let mut out = String::new();
    for group in groups {
        out.push_str(&format!("== {} ==\n", group.category));
        for item in &group.items {
            out.push_str(&format!(
                "  {} {}  ({})\n",
                mark(item),
                item.name,
                short_id(&item.id)
            ));
        }
    }
    out
}

fn render_stats(stats: &PackingStats) -> String {
    format!("{}/{} packed ({}%)", stats.checked, stats.total, stats.progress)
}
