// Ledgerbook CLI - seed, import, inspect, tag and link ledger records

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ledgerbook::import::{plan_file, seed_accounts, seed_assets};
use ledgerbook::{
    load_config, Account, AliasResolver, Asset, Entity, EntityKind, Handle, Linkable, Report,
    Session, Statement, Tag, Taggable, Transaction, Verification,
};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ledgerbook")]
#[command(version = ledgerbook::VERSION)]
#[command(about = "Personal ledger records with provenance, dedup, tags and links")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./ledgerbook.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed assets and accounts from CSV files, skipping names already stored
    Init {
        /// CSV with name,category,description
        #[arg(long)]
        assets: Option<PathBuf>,

        /// CSV with name,category,owner,description
        #[arg(long)]
        accounts: Option<PathBuf>,
    },

    /// Import transactions from a CSV export
    Import {
        path: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Print stored records of one type as JSON
    List {
        /// Entity type (report, asset, account, tag, statement, transaction, verification)
        kind: String,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Tag a stored record
    Tag {
        /// Entity type (account, statement, transaction)
        kind: String,
        id: i64,
        /// Tag names
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Link a stored record to others of the same type
    Link {
        /// Entity type (statement, transaction)
        kind: String,
        id: i64,
        #[arg(required = true)]
        others: Vec<i64>,

        #[arg(long)]
        category: Option<String>,
    },

    /// Print every record connected to one through links
    Cluster {
        kind: String,
        id: i64,

        #[arg(long)]
        category: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let database = cli.database.clone().unwrap_or_else(|| config.database_path());
    let mut session = Session::open(&database)
        .with_context(|| format!("opening {}", database.display()))?
        .with_dedup(config.dedup_policy()?)?;
    tracing::debug!("opened {}", database.display());

    match cli.command {
        Commands::Init { assets, accounts } => {
            if let Some(path) = assets {
                let summary = seed_assets(&mut session, File::open(&path)?)?;
                println!("✓ Assets: {} added, {} already stored", summary.added, summary.existing);
            }
            if let Some(path) = accounts {
                let summary = seed_accounts(&mut session, File::open(&path)?)?;
                println!("✓ Accounts: {} added, {} already stored", summary.added, summary.existing);
            }
        }

        Commands::Import { path, yes } => {
            let mut aliases = AliasResolver::from_session(&mut session)?;
            aliases.load_config(&config.alias_config()?);

            println!("📂 Reading {}...", path.display());
            let plan = plan_file(&mut session, &aliases, &path)?;
            for failure in &plan.failures {
                eprintln!("  ✗ line {}: {}", failure.line, failure.error);
            }

            let preview = plan.preview(&mut session)?;
            println!(
                "✓ {} rows: {} new, {} already stored, {} errors",
                plan.rows(),
                preview.new,
                preview.skipped,
                preview.errors
            );
            if preview.new == 0 {
                println!("Nothing to import");
                return Ok(());
            }
            if !yes && !confirm("Import these rows?")? {
                println!("Aborted");
                return Ok(());
            }

            let summary = session.commit(plan.into_batch()?)?;
            println!(
                "✅ Report #{}: {} inserted, {} skipped as duplicates",
                summary.report.key(),
                summary.inserted,
                summary.deduplicated
            );
        }

        Commands::List { kind, limit } => match parse_kind(&kind)? {
            EntityKind::Report => list::<Report>(&mut session, limit)?,
            EntityKind::Asset => list::<Asset>(&mut session, limit)?,
            EntityKind::Account => list::<Account>(&mut session, limit)?,
            EntityKind::Tag => list::<Tag>(&mut session, limit)?,
            EntityKind::Statement => list::<Statement>(&mut session, limit)?,
            EntityKind::Transaction => list::<Transaction>(&mut session, limit)?,
            EntityKind::Verification => list::<Verification>(&mut session, limit)?,
        },

        Commands::Tag { kind, id, tags } => match parse_kind(&kind)? {
            EntityKind::Account => tag::<Account>(&mut session, id, &tags)?,
            EntityKind::Statement => tag::<Statement>(&mut session, id, &tags)?,
            EntityKind::Transaction => tag::<Transaction>(&mut session, id, &tags)?,
            other => bail!("{} records cannot be tagged", other),
        },

        Commands::Link {
            kind,
            id,
            others,
            category,
        } => match parse_kind(&kind)? {
            EntityKind::Statement => {
                link::<Statement>(&mut session, id, &others, category.as_deref())?
            }
            EntityKind::Transaction => {
                link::<Transaction>(&mut session, id, &others, category.as_deref())?
            }
            other => bail!("{} records cannot be linked", other),
        },

        Commands::Cluster { kind, id, category } => match parse_kind(&kind)? {
            EntityKind::Statement => cluster::<Statement>(&mut session, id, category.as_deref())?,
            EntityKind::Transaction => {
                cluster::<Transaction>(&mut session, id, category.as_deref())?
            }
            other => bail!("{} records have no links", other),
        },
    }

    Ok(())
}

fn parse_kind(name: &str) -> Result<EntityKind> {
    EntityKind::from_name(name).with_context(|| format!("unknown record type {:?}", name))
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn list<T: Entity>(session: &mut Session, limit: usize) -> Result<()> {
    let handles = session.find_all::<T>(&[])?;
    for handle in handles.iter().take(limit) {
        println!("{}", session.describe(*handle)?);
    }
    if handles.len() > limit {
        println!("... {} more", handles.len() - limit);
    }
    Ok(())
}

fn tag<T: Taggable>(session: &mut Session, id: i64, names: &[String]) -> Result<()> {
    let handle = session.load::<T>(id)?;
    let tags = names
        .iter()
        .map(|name| session.find_by_name::<Tag>(name))
        .collect::<ledgerbook::Result<Vec<Handle<Tag>>>>()?;

    let (_, added) = session.tag_in_report(Report::new("tag"), handle, &tags)?;
    println!("✓ {} #{}: {} tags added", T::KIND, id, added.len());
    Ok(())
}

fn link<T: Linkable>(
    session: &mut Session,
    id: i64,
    others: &[i64],
    category: Option<&str>,
) -> Result<()> {
    let handle = session.load::<T>(id)?;
    let others = others
        .iter()
        .map(|key| session.load::<T>(*key))
        .collect::<ledgerbook::Result<Vec<Handle<T>>>>()?;

    let (_, added) = session.link_in_report(Report::new("link"), handle, &others, category)?;
    println!("✓ {} #{}: {} links added", T::KIND, id, added.len());
    Ok(())
}

fn cluster<T: Linkable>(session: &mut Session, id: i64, category: Option<&str>) -> Result<()> {
    let handle = session.load::<T>(id)?;
    for member in session.cluster(handle, category)? {
        println!("{}", session.describe(member)?);
    }
    Ok(())
}
