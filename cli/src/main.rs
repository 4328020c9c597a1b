//! Command-line front end for the `wit` version control engine: a thin
//! `clap` surface over [`wit::repo::Repo`] (spec §6.3).

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

#[derive(Parser)]
#[command(name = "wit", version, about = "A content-addressed version control engine")]
struct Cli {
    /// Repository root; defaults to discovering `.wit` by walking upward
    /// from the current directory.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum HashAlgorithmArg {
    Sha1,
    Sha256,
}

#[derive(Clone, Copy, ValueEnum)]
enum ResetModeArg {
    Soft,
    Mixed,
    Hard,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new repository.
    Init {
        /// Directory to initialize; defaults to the current directory.
        path: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "sha256")]
        hash: HashAlgorithmArg,
    },

    /// Stage paths for the next commit.
    Add {
        /// Paths to stage; pass `.` to stage everything.
        paths: Vec<String>,
    },

    /// Record a new commit from the staged index.
    Commit {
        #[arg(short = 'm', long)]
        message: String,
        /// Stage tracked modifications before committing.
        #[arg(short = 'a', long)]
        all: bool,
    },

    /// Show staged, unstaged, untracked, and conflicted paths.
    Status,

    /// Walk commit history.
    Log {
        /// Revision to start from; defaults to `HEAD`.
        rev: Option<String>,
        #[arg(short = 'n', long = "limit")]
        limit: Option<usize>,
        #[arg(long)]
        oneline: bool,
    },

    /// Show a diff of the working tree or the index.
    Diff {
        /// Diff the index against `HEAD` instead of the working tree
        /// against the index.
        #[arg(long)]
        staged: bool,
    },

    /// List, create, or delete branches.
    Branch {
        /// Name of a branch to create.
        name: Option<String>,
        #[arg(short = 'd', long)]
        delete: bool,
        #[arg(long)]
        force: bool,
    },

    /// Move `HEAD` to a commit, tag, or raw object id (detached).
    Checkout {
        rev: String,
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Move `HEAD` to a branch, optionally creating it.
    Switch {
        branch: String,
        #[arg(short = 'c', long)]
        create: bool,
    },

    /// Merge another revision into the current branch.
    Merge {
        rev: Option<String>,
        #[arg(long)]
        r#abort: bool,
        #[arg(long)]
        r#continue: bool,
    },

    /// Move `HEAD`, and optionally the index and working tree.
    Reset {
        target: String,
        #[arg(long, value_enum, default_value = "mixed")]
        mode: ResetModeArg,
    },

    /// Pop the last `k` journal entries, restoring the repository state.
    Undo {
        #[arg(short = 'n', long = "count", default_value_t = 1)]
        count: usize,
        #[arg(long)]
        force: bool,
    },

    /// Print an object's kind or pretty-printed contents.
    CatFile {
        id: String,
        #[arg(short = 't')]
        show_type: bool,
        #[arg(short = 'p')]
        pretty_print: bool,
    },

    /// Hash a file's contents, optionally writing it to the object store.
    HashObject {
        file: PathBuf,
        #[arg(short = 'w', long)]
        write: bool,
    },

    /// List a tree's entries.
    LsTree {
        tree: String,
        #[arg(short = 'r', long)]
        recursive: bool,
    },

    /// List paths currently in the index.
    LsFiles,

    /// Resolve a revision expression to an object id.
    RevParse { rev: String },
}

fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let cli = Cli::parse();
    match commands::dispatch(cli.repo, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<wit::Error>()
                .map_or(1, wit::Error::exit_code);
            ExitCode::from(code.clamp(0, 255) as u8)
        }
    }
}
