mod output;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use comment_chain::ChainQueries;
use critic_core::models::ChangesetType;
use critic_core::{
    Changeset, CommitId, CommitSet, Database, LocalMaterializer, Materializer, MergeChangeset,
    Repository, ReviewId,
};
use log::LevelFilter;
use serde::Serialize;

use output::{ChainView, ChangesetView, CommitSetView};

#[derive(Parser)]
#[command(name = "critic", about = "Changesets and comment chains for code review")]
struct Cli {
    /// Path to the git repository
    #[arg(short, long, env = "CRITIC_REPO", default_value = ".")]
    repo: PathBuf,

    /// Database file [default: <git dir>/info/critic/critic.sqlite]
    #[arg(long, env = "CRITIC_DB")]
    db: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute and store the changeset between two commits
    Materialize { parent: String, child: String },
    /// Print the changeset between two commits, materializing it if needed
    Diff {
        parent: String,
        child: String,
        /// Include unchanged lines between chunks
        #[arg(long)]
        context: bool,
    },
    /// Print one changeset per parent of a merge commit
    Merge { commit: String },
    /// Heads, tails and upstreams of `base..head`
    CommitSet { base: String, head: String },
    /// Comment chains anchored to a file at a commit
    Chains {
        commit: String,
        path: String,
        #[arg(long)]
        review: Option<i64>,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

struct Session {
    db: Database,
    repo: Repository,
}

fn open(cli: &Cli) -> anyhow::Result<Session> {
    let git = critic_core::services::git::open_repository(&cli.repo)
        .with_context(|| format!("opening repository at {}", cli.repo.display()))?;
    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => git.path().join("info/critic/critic.sqlite"),
    };
    let db = Database::open(&db_path)
        .with_context(|| format!("opening database at {}", db_path.display()))?;

    let root = git.workdir().unwrap_or_else(|| git.path());
    let name = repository_name(root);
    let id = db.register_repository(&name, root)?;
    log::info!("repository {name} ({id}) at {}", root.display());

    Ok(Session {
        db,
        repo: Repository::new(id, git),
    })
}

fn repository_name(root: &Path) -> String {
    root.canonicalize()
        .unwrap_or_else(|_| root.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn print(value: &impl Serialize) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Direct when `parent` is the only parent of `child`.
fn direct_or_custom(
    repo: &Repository,
    parent: CommitId,
    child: CommitId,
) -> anyhow::Result<ChangesetType> {
    Ok(if repo.commit(child)?.parents == [parent] {
        ChangesetType::Direct
    } else {
        ChangesetType::Custom
    })
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = open(&cli)?;
    let (db, repo) = (&ctx.db, &ctx.repo);
    let materializer = LocalMaterializer::default();

    match cli.command {
        Command::Materialize { parent, child } => {
            let parent = repo.resolve(&parent)?.id;
            let child = repo.resolve(&child)?.id;
            let kind = direct_or_custom(repo, parent, child)?;
            let id = materializer.materialize(db, repo, kind, Some(parent), child)?;
            print(&serde_json::json!({ "changeset": id, "type": kind }))
        }
        Command::Diff {
            parent,
            child,
            context,
        } => {
            let parent = repo.resolve(&parent)?.id;
            let child = repo.resolve(&child)?.id;
            let kind = direct_or_custom(repo, parent, child)?;
            let changeset = Changeset::ensure(db, repo, &materializer, Some(parent), child, kind)?;
            print(&ChangesetView::build(db, repo, &changeset, Some(context))?)
        }
        Command::Merge { commit } => {
            let merge = repo.resolve(&commit)?.id;
            let merge = MergeChangeset::ensure(db, repo, &materializer, merge)?;
            let views = merge
                .changesets()
                .iter()
                .map(|changeset| ChangesetView::build(db, repo, changeset, None))
                .collect::<critic_core::Result<Vec<_>>>()?;
            print(&views)
        }
        Command::CommitSet { base, head } => {
            let base = repo.resolve(&base)?.id;
            let head = repo.resolve(&head)?.id;
            let set = CommitSet::from_range(repo, Some(base), head)?;
            print(&CommitSetView {
                commits: set.commits().iter().map(|c| c.id).collect(),
                heads: set.heads().to_vec(),
                tails: set.tails().to_vec(),
                upstreams: set.upstreams(repo)?.to_vec(),
            })
        }
        Command::Chains {
            commit,
            path,
            review,
        } => {
            let commit = repo.resolve(&commit)?.id;
            let chains =
                comment_chain::find_by_file(db, repo, commit, &path, review.map(ReviewId))?;
            let queries = ChainQueries::new(db.conn());
            let views = chains
                .into_iter()
                .map(|anchored| {
                    Ok(ChainView {
                        context: anchored.minimized_context(db)?,
                        comments: queries.comments(anchored.chain.id)?,
                        anchored,
                    })
                })
                .collect::<comment_chain::Result<Vec<_>>>()?;
            print(&views)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli)
}
