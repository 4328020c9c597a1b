//! Verb implementations: each function loads (or creates) a [`wit::Repo`]
//! and prints output in a git-familiar shape.

use std::path::PathBuf;

use anyhow::Context as _;
use anyhow::Result;
use anyhow::bail;
use bstr::ByteSlice as _;

use wit::AddTarget;
use wit::HashAlgorithm;
use wit::MergeOutcome;
use wit::Object;
use wit::ObjectId;
use wit::Repo;
use wit::ResetMode;
use wit::RepoPathBuf;
use wit::diff::DiffResult;
use wit::diff::LineTag;
use wit::object::Mode;
use wit::repo::ChangeKind;

use crate::Command;
use crate::HashAlgorithmArg;
use crate::ResetModeArg;

pub fn dispatch(repo_path: Option<PathBuf>, command: Command) -> Result<()> {
    if let Command::Init { path, hash } = command {
        let target = path.unwrap_or_else(|| PathBuf::from("."));
        let algorithm = match hash {
            HashAlgorithmArg::Sha1 => HashAlgorithm::Sha1,
            HashAlgorithmArg::Sha256 => HashAlgorithm::Sha256,
        };
        Repo::init(&target, algorithm)?;
        println!("Initialized empty wit repository in {}", target.join(".wit").display());
        return Ok(());
    }

    let cwd = std::env::current_dir().context("reading current directory")?;
    let start = repo_path.unwrap_or(cwd);
    let repo = Repo::discover(&start)?;

    match command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Add { paths } => add(&repo, paths),
        Command::Commit { message, all } => commit(&repo, &message, all),
        Command::Status => status(&repo),
        Command::Log { rev, limit, oneline } => log(&repo, rev.as_deref(), limit, oneline),
        Command::Diff { staged } => diff(&repo, staged),
        Command::Branch { name, delete, force } => branch(&repo, name, delete, force),
        Command::Checkout { rev, force } => checkout(&repo, &rev, force),
        Command::Switch { branch, create } => switch(&repo, &branch, create),
        Command::Merge { rev, r#abort, r#continue } => merge(&repo, rev.as_deref(), r#abort, r#continue),
        Command::Reset { target, mode } => reset(&repo, &target, mode),
        Command::Undo { count, force } => undo(&repo, count, force),
        Command::CatFile { id, show_type, pretty_print } => cat_file(&repo, &id, show_type, pretty_print),
        Command::HashObject { file, write } => hash_object(&repo, &file, write),
        Command::LsTree { tree, recursive } => ls_tree(&repo, &tree, recursive),
        Command::LsFiles => ls_files(&repo),
        Command::RevParse { rev } => rev_parse(&repo, &rev),
    }
}

fn add(repo: &Repo, paths: Vec<String>) -> Result<()> {
    let target = if paths.is_empty() || paths.iter().any(|p| p == ".") {
        AddTarget::All
    } else {
        AddTarget::Paths(paths.iter().map(|p| RepoPathBuf::from(p.as_str())).collect())
    };
    pollster::block_on(repo.add(target))?;
    Ok(())
}

fn commit(repo: &Repo, message: &str, all: bool) -> Result<()> {
    let sig = author_from_env();
    let id = pollster::block_on(repo.commit(message, all, sig.clone(), sig))?;
    println!("[{}] {message}", &id.to_hex()[..12.min(id.to_hex().len())]);
    Ok(())
}

fn status(repo: &Repo) -> Result<()> {
    let report = pollster::block_on(repo.status())?;
    match repo.current_branch()? {
        Some(branch) => println!("On branch {branch}"),
        None => println!("HEAD detached"),
    }
    print_status_group("Changes to be committed", &report.staged);
    print_status_group("Changes not staged for commit", &report.unstaged);
    if !report.conflicted.is_empty() {
        println!("Unmerged paths:");
        for path in &report.conflicted {
            println!("\tboth modified: {path}");
        }
    }
    if !report.untracked.is_empty() {
        println!("Untracked files:");
        for path in &report.untracked {
            println!("\t{path}");
        }
    }
    if report.staged.is_empty() && report.unstaged.is_empty() && report.untracked.is_empty() && report.conflicted.is_empty() {
        println!("nothing to commit, working tree clean");
    }
    Ok(())
}

fn print_status_group(label: &str, entries: &[wit::repo::StatusEntry]) {
    if entries.is_empty() {
        return;
    }
    println!("{label}:");
    for entry in entries {
        let verb = match entry.change {
            ChangeKind::Added => "new file",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        };
        println!("\t{verb}: {}", entry.path);
    }
}

fn log(repo: &Repo, rev: Option<&str>, limit: Option<usize>, oneline: bool) -> Result<()> {
    let entries = pollster::block_on(repo.log(rev, limit))?;
    for entry in entries {
        let hex = entry.id.to_hex();
        if oneline {
            let first_line = entry.commit.message.lines().next().unwrap_or_default();
            println!("{} {first_line}", &hex[..12.min(hex.len())]);
        } else {
            println!("commit {hex}");
            println!("Author: {} <{}>", entry.commit.author.name, entry.commit.author.email);
            println!("Date:   {}", entry.commit.author.format_timestamp());
            println!();
            for line in entry.commit.message.lines() {
                println!("    {line}");
            }
            println!();
        }
    }
    Ok(())
}

fn diff(repo: &Repo, staged: bool) -> Result<()> {
    let diffs = pollster::block_on(repo.diff(staged))?;
    for (path, result) in diffs {
        match result {
            DiffResult::Binary => println!("Binary files differ: {path}"),
            DiffResult::Text(hunks) => {
                println!("--- {path}");
                println!("+++ {path}");
                for hunk in hunks {
                    println!(
                        "@@ -{},{} +{},{} @@",
                        hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
                    );
                    for line in hunk.lines {
                        let marker = match line.tag {
                            LineTag::Context => ' ',
                            LineTag::Add => '+',
                            LineTag::Remove => '-',
                        };
                        println!("{marker}{}", line.content.to_str_lossy());
                        if line.no_newline_at_eof {
                            println!("\\ No newline at end of file");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn branch(repo: &Repo, name: Option<String>, delete: bool, force: bool) -> Result<()> {
    match (name, delete) {
        (Some(name), true) => repo.branch_delete(&name, force)?,
        (Some(name), false) => repo.branch_create(&name)?,
        (None, _) => {
            let current = repo.current_branch()?;
            for branch in repo.branch_list()? {
                let marker = if Some(&branch) == current.as_ref() { "*" } else { " " };
                println!("{marker} {branch}");
            }
        }
    }
    Ok(())
}

fn checkout(repo: &Repo, rev: &str, force: bool) -> Result<()> {
    pollster::block_on(repo.checkout_detached(rev, force))?;
    Ok(())
}

fn switch(repo: &Repo, branch: &str, create: bool) -> Result<()> {
    pollster::block_on(repo.switch(branch, create))?;
    Ok(())
}

fn merge(repo: &Repo, rev: Option<&str>, abort: bool, r#continue: bool) -> Result<()> {
    if abort {
        pollster::block_on(repo.merge_abort())?;
        return Ok(());
    }
    if r#continue {
        let sig = author_from_env();
        let id = pollster::block_on(repo.merge_continue(sig.clone(), sig))?;
        println!("[{}] merge", &id.to_hex()[..12.min(id.to_hex().len())]);
        return Ok(());
    }
    let Some(rev) = rev else {
        bail!("merge requires a revision, or --abort/--continue");
    };
    match pollster::block_on(repo.merge(rev))? {
        MergeOutcome::AlreadyUpToDate => println!("Already up to date."),
        MergeOutcome::FastForwarded(id) => println!("Fast-forward to {}", id.to_hex()),
        MergeOutcome::Merged(id) => println!("Merge made at {}", id.to_hex()),
        MergeOutcome::Conflicts(paths) => {
            println!("Automatic merge failed; fix conflicts and then commit the result.");
            for path in paths {
                println!("\t{path}");
            }
            std::process::exit(3);
        }
    }
    Ok(())
}

fn reset(repo: &Repo, target: &str, mode: ResetModeArg) -> Result<()> {
    let mode = match mode {
        ResetModeArg::Soft => ResetMode::Soft,
        ResetModeArg::Mixed => ResetMode::Mixed,
        ResetModeArg::Hard => ResetMode::Hard,
    };
    pollster::block_on(repo.reset(target, mode))?;
    Ok(())
}

fn undo(repo: &Repo, count: usize, force: bool) -> Result<()> {
    repo.undo(count, force)?;
    Ok(())
}

fn cat_file(repo: &Repo, id: &str, show_type: bool, pretty_print: bool) -> Result<()> {
    let id = ObjectId::from_hex(id).context("not a valid object id")?;
    let object = pollster::block_on(repo.cat_file(&id))?;
    if show_type {
        println!("{}", object.kind().as_str());
        return Ok(());
    }
    if pretty_print {
        match object {
            Object::Blob(bytes) => print!("{}", bytes.to_str_lossy()),
            Object::Tree(tree) => {
                for entry in tree.entries() {
                    println!("{} {} {}", entry.mode.as_ascii(), entry.id, entry.name);
                }
            }
            Object::Commit(commit) => {
                println!("tree {}", commit.tree);
                for parent in &commit.parents {
                    println!("parent {parent}");
                }
                println!(
                    "author {} <{}> {} ({})",
                    commit.author.name, commit.author.email, commit.author.unix_timestamp, commit.author.format_timestamp()
                );
                println!(
                    "committer {} <{}> {} ({})",
                    commit.committer.name, commit.committer.email, commit.committer.unix_timestamp, commit.committer.format_timestamp()
                );
                println!();
                println!("{}", commit.message);
            }
            Object::Tag(tag) => {
                println!("object {}", tag.target);
                println!("type {}", tag.target_kind.as_str());
                println!("tag {}", tag.name);
                println!();
                println!("{}", tag.message);
            }
        }
    }
    Ok(())
}

fn hash_object(repo: &Repo, file: &std::path::Path, write: bool) -> Result<()> {
    let content = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let id = pollster::block_on(repo.hash_object(&content, write))?;
    println!("{id}");
    Ok(())
}

fn ls_tree(repo: &Repo, tree: &str, recursive: bool) -> Result<()> {
    let id = pollster::block_on(repo.rev_parse(tree))?;
    for (path, mode, id) in pollster::block_on(repo.ls_tree(&id, recursive))? {
        println!("{} {} {}\t{path}", mode.as_ascii(), object_kind_for_mode(mode), id);
    }
    Ok(())
}

fn object_kind_for_mode(mode: Mode) -> &'static str {
    if mode.is_dir() { "tree" } else { "blob" }
}

fn ls_files(repo: &Repo) -> Result<()> {
    for path in repo.ls_files()? {
        println!("{path}");
    }
    Ok(())
}

fn rev_parse(repo: &Repo, rev: &str) -> Result<()> {
    println!("{}", pollster::block_on(repo.rev_parse(rev))?);
    Ok(())
}

fn author_from_env() -> wit::Signature {
    let name = std::env::var("WIT_AUTHOR_NAME").unwrap_or_else(|_| "unknown".to_owned());
    let email = std::env::var("WIT_AUTHOR_EMAIL").unwrap_or_else(|_| "unknown@localhost".to_owned());
    wit::Signature {
        name,
        email,
        unix_timestamp: wit::repo::now_unix(),
        tz_offset_minutes: 0,
    }
}
