//! Local-filesystem hosting adapter backed by git2.
//!
//! Repositories live as working directories under a common root; the `repo`
//! identifier is the directory name. This is the adapter the integration
//! tests drive — merges are real merge-commit attempts, so index conflicts
//! surface exactly as the hosting contract requires.

use crate::errors::HostingError;
use crate::hosting::{archive_ref, GitHostingPort, MergeOutcome};
use async_trait::async_trait;
use git2::{BranchType, Repository, Signature};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct LocalGitHosting {
    root: PathBuf,
}

impl LocalGitHosting {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn open(&self, repo: &str) -> Result<Repository, HostingError> {
        Ok(Repository::open(self.root.join(repo))?)
    }

    fn signature() -> Result<Signature<'static>, HostingError> {
        Ok(Signature::now("slipway", "slipway@localhost")?)
    }

    fn branch_commit<'r>(
        repo: &'r Repository,
        repo_name: &str,
        branch: &str,
    ) -> Result<git2::Commit<'r>, HostingError> {
        let found = repo
            .find_branch(branch, BranchType::Local)
            .map_err(|_| HostingError::RefNotFound {
                repo: repo_name.to_string(),
                reference: branch.to_string(),
            })?;
        Ok(found.get().peel_to_commit()?)
    }
}

#[async_trait]
impl GitHostingPort for LocalGitHosting {
    async fn branch_exists(&self, repo: &str, branch: &str) -> Result<bool, HostingError> {
        let git = self.open(repo)?;
        let exists = git.find_branch(branch, BranchType::Local).is_ok();
        Ok(exists)
    }

    async fn create_branch(
        &self,
        repo: &str,
        name: &str,
        source: &str,
    ) -> Result<bool, HostingError> {
        let git = self.open(repo)?;
        if git.find_branch(name, BranchType::Local).is_ok() {
            return Ok(false);
        }
        let commit = Self::branch_commit(&git, repo, source)?;
        git.branch(name, &commit, false)?;
        debug!(repo, branch = name, source, "created branch");
        Ok(true)
    }

    async fn merge_branch(
        &self,
        repo: &str,
        source: &str,
        target: &str,
        message: &str,
    ) -> Result<MergeOutcome, HostingError> {
        let git = self.open(repo)?;
        let source_commit = Self::branch_commit(&git, repo, source)?;
        let target_commit = Self::branch_commit(&git, repo, target)?;

        let base = git.merge_base(target_commit.id(), source_commit.id())?;
        if base == source_commit.id() {
            // Source is already reachable from target
            return Ok(MergeOutcome::Success);
        }

        let mut index = git.merge_commits(&target_commit, &source_commit, None)?;
        if index.has_conflicts() {
            let mut paths: Vec<String> = index
                .conflicts()?
                .filter_map(|c| c.ok())
                .filter_map(|c| c.our.or(c.their))
                .map(|entry| String::from_utf8_lossy(&entry.path).to_string())
                .collect();
            paths.sort();
            paths.dedup();
            return Ok(MergeOutcome::Conflict {
                info: paths.join(", "),
            });
        }

        let tree_id = index.write_tree_to(&git)?;
        let tree = git.find_tree(tree_id)?;
        let sig = Self::signature()?;
        git.commit(
            Some(&format!("refs/heads/{}", target)),
            &sig,
            &sig,
            message,
            &tree,
            &[&target_commit, &source_commit],
        )?;
        debug!(repo, source, target, "merged branch");
        Ok(MergeOutcome::Success)
    }

    async fn archive_branch(
        &self,
        repo: &str,
        name: &str,
        reason: &str,
    ) -> Result<bool, HostingError> {
        let git = self.open(repo)?;
        let Ok(mut branch) = git.find_branch(name, BranchType::Local) else {
            return Ok(false);
        };
        branch.rename(&archive_ref(reason, name), false)?;
        debug!(repo, branch = name, reason, "archived branch");
        Ok(true)
    }

    async fn create_tag(
        &self,
        repo: &str,
        tag: &str,
        reference: &str,
        message: &str,
    ) -> Result<bool, HostingError> {
        let git = self.open(repo)?;
        if git.find_reference(&format!("refs/tags/{}", tag)).is_ok() {
            return Ok(false);
        }
        let commit = Self::branch_commit(&git, repo, reference)?;
        let sig = Self::signature()?;
        git.tag(tag, commit.as_object(), &sig, message, false)?;
        debug!(repo, tag, reference, "created tag");
        Ok(true)
    }

    async fn read_file(
        &self,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, HostingError> {
        let git = self.open(repo)?;
        let commit = Self::branch_commit(&git, repo, reference)?;
        let tree = commit.tree()?;
        let Ok(entry) = tree.get_path(Path::new(path)) else {
            return Ok(None);
        };
        let object = entry.to_object(&git)?;
        match object.as_blob() {
            Some(blob) => Ok(Some(String::from_utf8_lossy(blob.content()).to_string())),
            None => Ok(None),
        }
    }

    async fn file_exists(
        &self,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<bool, HostingError> {
        Ok(self.read_file(repo, path, reference).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn init_repo(root: &Path, name: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        let repo = Repository::init(&dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
    }

    fn commit_file(root: &Path, name: &str, file: &str, content: &str, msg: &str) {
        let dir = root.join(name);
        let repo = Repository::open(&dir).unwrap();
        fs::write(dir.join(file), content).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        let head_result = repo.head();
        if let Ok(head) = head_result {
            let parent = head.peel_to_commit().unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
                .unwrap();
        } else {
            repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
                .unwrap();
        }
    }

    fn checkout(root: &Path, name: &str, branch: &str) {
        let repo = Repository::open(root.join(name)).unwrap();
        let (object, reference) = repo.revparse_ext(branch).unwrap();
        repo.checkout_tree(&object, None).unwrap();
        repo.set_head(reference.unwrap().name().unwrap()).unwrap();
    }

    fn branch_from_head(root: &Path, name: &str, branch: &str) {
        let repo = Repository::open(root.join(name)).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch(branch, &head, false).unwrap();
    }

    #[tokio::test]
    async fn test_branch_lifecycle() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), "app");
        commit_file(dir.path(), "app", "a.txt", "one", "init");

        let hosting = LocalGitHosting::new(dir.path());
        let default = Repository::open(dir.path().join("app"))
            .unwrap()
            .head()
            .unwrap()
            .shorthand()
            .unwrap()
            .to_string();

        assert!(hosting.branch_exists("app", &default).await.unwrap());
        assert!(!hosting.branch_exists("app", "release/1.0.0").await.unwrap());

        assert!(hosting
            .create_branch("app", "release/1.0.0", &default)
            .await
            .unwrap());
        assert!(hosting.branch_exists("app", "release/1.0.0").await.unwrap());
        // Second create is a no-op, not an error
        assert!(!hosting
            .create_branch("app", "release/1.0.0", &default)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_merge_without_conflict_commits_to_target() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), "app");
        commit_file(dir.path(), "app", "base.txt", "base\n", "init");
        branch_from_head(dir.path(), "app", "release/1.0.0");
        branch_from_head(dir.path(), "app", "feature/ITER-1");
        checkout(dir.path(), "app", "feature/ITER-1");
        commit_file(dir.path(), "app", "feature.txt", "new\n", "feature work");

        let hosting = LocalGitHosting::new(dir.path());
        let outcome = hosting
            .merge_branch("app", "feature/ITER-1", "release/1.0.0", "merge ITER-1")
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Success);

        // The merged file is readable from the target branch
        let content = hosting
            .read_file("app", "feature.txt", "release/1.0.0")
            .await
            .unwrap();
        assert_eq!(content.as_deref(), Some("new\n"));
    }

    #[tokio::test]
    async fn test_merge_conflict_is_typed_outcome() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), "app");
        commit_file(dir.path(), "app", "shared.txt", "base\n", "init");
        branch_from_head(dir.path(), "app", "release/1.0.0");
        branch_from_head(dir.path(), "app", "feature/ITER-1");

        checkout(dir.path(), "app", "release/1.0.0");
        commit_file(dir.path(), "app", "shared.txt", "release side\n", "release edit");
        checkout(dir.path(), "app", "feature/ITER-1");
        commit_file(dir.path(), "app", "shared.txt", "feature side\n", "feature edit");

        let hosting = LocalGitHosting::new(dir.path());
        let outcome = hosting
            .merge_branch("app", "feature/ITER-1", "release/1.0.0", "merge ITER-1")
            .await
            .unwrap();
        match outcome {
            MergeOutcome::Conflict { info } => assert!(info.contains("shared.txt")),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_merge_already_merged_source_is_success() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), "app");
        commit_file(dir.path(), "app", "a.txt", "one", "init");
        branch_from_head(dir.path(), "app", "release/1.0.0");
        branch_from_head(dir.path(), "app", "feature/ITER-1");
        checkout(dir.path(), "app", "release/1.0.0");
        commit_file(dir.path(), "app", "b.txt", "two", "ahead");

        let hosting = LocalGitHosting::new(dir.path());
        let outcome = hosting
            .merge_branch("app", "feature/ITER-1", "release/1.0.0", "no-op")
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Success);
    }

    #[tokio::test]
    async fn test_archive_branch_idempotent_when_absent() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), "app");
        commit_file(dir.path(), "app", "a.txt", "one", "init");
        branch_from_head(dir.path(), "app", "feature/ITER-1");

        let hosting = LocalGitHosting::new(dir.path());
        assert!(hosting
            .archive_branch("app", "feature/ITER-1", "2025-08-rc")
            .await
            .unwrap());
        assert!(hosting
            .branch_exists("app", "archive/2025-08-rc/feature/ITER-1")
            .await
            .unwrap());
        assert!(!hosting.branch_exists("app", "feature/ITER-1").await.unwrap());

        // Archiving again finds nothing and reports false, not an error
        assert!(!hosting
            .archive_branch("app", "feature/ITER-1", "2025-08-rc")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_create_tag_and_duplicate() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), "app");
        commit_file(dir.path(), "app", "a.txt", "one", "init");
        branch_from_head(dir.path(), "app", "release/1.0.0");

        let hosting = LocalGitHosting::new(dir.path());
        assert!(hosting
            .create_tag("app", "v1.0.0", "release/1.0.0", "release 1.0.0")
            .await
            .unwrap());
        assert!(!hosting
            .create_tag("app", "v1.0.0", "release/1.0.0", "again")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_read_file_missing_is_none() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), "app");
        commit_file(dir.path(), "app", "version.txt", "1.2.3\n", "init");
        branch_from_head(dir.path(), "app", "release/1.0.0");

        let hosting = LocalGitHosting::new(dir.path());
        assert!(hosting
            .file_exists("app", "version.txt", "release/1.0.0")
            .await
            .unwrap());
        assert_eq!(
            hosting
                .read_file("app", "absent.txt", "release/1.0.0")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_missing_branch_is_ref_not_found() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), "app");
        commit_file(dir.path(), "app", "a.txt", "one", "init");

        let hosting = LocalGitHosting::new(dir.path());
        let err = hosting
            .merge_branch("app", "feature/missing", "also/missing", "m")
            .await
            .unwrap_err();
        assert!(matches!(err, HostingError::RefNotFound { .. }));
    }
}
