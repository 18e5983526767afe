use std::path::{Path, PathBuf};

use git2::{BranchType, DiffOptions, ErrorCode, IndexAddOption, Repository, Signature};

use crate::{clog_debug, Error, Result};

/// Git adapter isolating each task's edits into commits on the working branch.
pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn new(repo_path: &Path) -> Result<Self> {
        clog_debug!("GitOps::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Full sha of the current HEAD commit.
    pub fn head_commit(&self) -> Result<String> {
        let repo = self.repo()?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Stage everything and commit. Returns the new sha, or `None` when the
    /// tree is unchanged (nothing to commit).
    pub fn commit_all(&self, message: &str) -> Result<Option<String>> {
        clog_debug!("GitOps::commit_all message={}", message);
        let repo = self.repo()?;
        let mut index = repo.index()?;
        index.add_all(["."].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Conductor", "conductor@localhost"))?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };

        // Unchanged tree means the worker made no edits.
        if let Some(ref parent) = parent {
            if parent.tree_id() == tree_id {
                clog_debug!("commit_all: tree unchanged, skipping commit");
                return Ok(None);
            }
        }

        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let commit_id = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        clog_debug!("Commit created: {}", commit_id);
        Ok(Some(commit_id.to_string()))
    }

    /// Unified diff text between a base commit and the current HEAD tree.
    pub fn diff_since(&self, base_sha: &str) -> Result<String> {
        let repo = self.repo()?;
        let base = repo
            .find_commit(git2::Oid::from_str(base_sha)?)
            .map_err(|e| Error::GitOperation(format!("base commit {}: {}", base_sha, e)))?;
        let base_tree = base.tree()?;
        let head_tree = repo.head()?.peel_to_commit()?.tree()?;

        let mut opts = DiffOptions::new();
        let diff = repo.diff_tree_to_tree(Some(&base_tree), Some(&head_tree), Some(&mut opts))?;

        let mut text = String::new();
        diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
            match line.origin() {
                '+' | '-' | ' ' => text.push(line.origin()),
                _ => {}
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        Ok(text)
    }

    /// Check out the named branch, creating it from HEAD when missing.
    pub fn checkout_or_create_branch(&self, name: &str) -> Result<()> {
        clog_debug!("GitOps::checkout_or_create_branch name={}", name);
        let repo = self.repo()?;
        match repo.find_branch(name, BranchType::Local) {
            Ok(_) => {}
            Err(e) if e.code() == ErrorCode::NotFound => {
                let head = repo.head()?.peel_to_commit()?;
                repo.branch(name, &head, false)?;
                clog_debug!("Created branch {} from {}", name, head.id());
            }
            Err(e) => return Err(e.into()),
        }
        let refname = format!("refs/heads/{}", name);
        let obj = repo.revparse_single(&refname)?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head(&refname)?;
        Ok(())
    }

    /// True when the working tree has no staged or unstaged changes.
    pub fn is_clean(&self) -> Result<bool> {
        let repo = self.repo()?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses.is_empty())
    }
}
