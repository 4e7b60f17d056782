//! gitwiki - a version-controlled page store
//!
//! Command-line front end over [`gitwiki::wiki::Wiki`].

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use gitwiki::storage::{BlobId, ObjectKind};
use gitwiki::transaction::EditOutcome;
use gitwiki::wiki::{Wiki, WikiConfig};

#[derive(Parser)]
#[command(name = "gitwiki")]
#[command(version, about = "A version-controlled page store")]
struct Cli {
    /// Path to the page store
    #[arg(short, long, env = "GITWIKI_REPO")]
    repo: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "GITWIKI_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the page store if it does not exist
    Init,
    /// Print a page, or a past revision of it
    Cat {
        path: String,
        /// Blob id of a revision to print instead of the current page
        #[arg(long)]
        rev: Option<String>,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Write a page from stdin
    Edit {
        path: String,
        /// Blob id the edit was made from; defaults to the current page
        #[arg(long)]
        base: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(short, long, default_value = "")]
        message: String,
    },
    /// Show commits, or the revisions of one page
    Log {
        path: Option<String>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Line diff between two revisions
    Diff { old: String, new: String },
    /// Pages containing a keyword
    Search {
        keyword: String,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Locate a page by name
    Find { name: String },
    /// Show store statistics
    Stats,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let wiki = match open(&cli) {
        Ok(wiki) => wiki,
        Err(e) => {
            eprintln!("Error opening wiki: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&wiki, cli.command, cli.json) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open(cli: &Cli) -> Result<Wiki, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => WikiConfig::load(path)?,
        None => WikiConfig::default(),
    };
    if let Some(repo) = &cli.repo {
        config.path = repo.clone();
    }
    Ok(Wiki::open_with_config(config)?)
}

fn run(wiki: &Wiki, command: Command, json: bool) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Command::Init => {
            println!("Initialized page store in {}", wiki.path().display());
        }
        Command::Cat { path, rev } => {
            let bytes = match rev {
                Some(rev) => wiki.read_revision(BlobId::from_hex(&rev)?)?,
                None => wiki.read(&wiki.parse_path(&path)?)?,
            };
            std::io::Write::write_all(&mut std::io::stdout(), &bytes)?;
        }
        Command::Ls { path } => {
            let entries = wiki.list(&wiki.parse_path(&path)?)?;
            if json {
                print_json(&entries)?;
            } else {
                for entry in entries {
                    let suffix = if entry.kind() == ObjectKind::Tree { "/" } else { "" };
                    println!("{}  {}{}", entry.object, entry.name, suffix);
                }
            }
        }
        Command::Edit {
            path,
            base,
            author,
            message,
        } => {
            let path = wiki.parse_path(&path)?;
            let base = match base {
                Some(hex) => Some(BlobId::from_hex(&hex)?),
                None => wiki.blob_id(&path)?,
            };
            let mut content = Vec::new();
            std::io::stdin().read_to_end(&mut content)?;

            let outcome = wiki.edit(&path, base, &content, author.as_deref(), &message)?;
            if json {
                print_json(&outcome)?;
            }
            match outcome {
                EditOutcome::Committed { commit } if !json => println!("committed {}", commit),
                EditOutcome::Merged { commit } if !json => {
                    println!("merged with a concurrent edit, committed {}", commit)
                }
                EditOutcome::Conflict {
                    text,
                    current,
                    conflicts,
                } => {
                    if !json {
                        eprintln!(
                            "{} conflicting region(s); resolve and resubmit with --base {}",
                            conflicts,
                            current.map_or_else(|| "(new page)".to_string(), |c| c.to_string())
                        );
                        print!("{}", text);
                    }
                    return Ok(ExitCode::from(2));
                }
                _ => {}
            }
        }
        Command::Log { path, limit } => match path {
            Some(path) => {
                let revisions = wiki.history(&wiki.parse_path(&path)?, limit)?;
                if json {
                    print_json(&revisions)?;
                } else {
                    for rev in revisions {
                        let blob = rev
                            .object
                            .map_or_else(|| "(deleted)".to_string(), |o| o.to_string());
                        println!(
                            "{} {} {} <{}> {}",
                            rev.commit.short(),
                            rev.timestamp.format("%Y-%m-%d %H:%M"),
                            rev.author_name,
                            rev.author_email,
                            rev.message.lines().next().unwrap_or_default()
                        );
                        println!("    {}", blob);
                    }
                }
            }
            None => {
                let commits = wiki.log(limit)?;
                if json {
                    print_json(&commits)?;
                } else {
                    for commit in commits {
                        println!(
                            "{} {} {} {}",
                            commit.id.short(),
                            commit.timestamp.format("%Y-%m-%d %H:%M"),
                            commit.author_name,
                            commit.summary()
                        );
                    }
                }
            }
        },
        Command::Diff { old, new } => {
            let diff = wiki.diff(BlobId::from_hex(&old)?, BlobId::from_hex(&new)?)?;
            match diff {
                Some(diff) if json => print_json(&diff)?,
                Some(diff) => print!("{}", diff.to_unified()),
                None => {
                    eprintln!("no such revision");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Search { keyword, limit } => {
            let pages = wiki.search(&keyword, limit)?;
            if json {
                print_json(&pages)?;
            } else {
                for page in pages {
                    println!("{}", page);
                }
            }
        }
        Command::Find { name } => match wiki.find_page(&name)? {
            Some(page) => println!("{}", page),
            None => return Ok(ExitCode::FAILURE),
        },
        Command::Stats => {
            let stats = wiki.stats()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("{}", stats);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
