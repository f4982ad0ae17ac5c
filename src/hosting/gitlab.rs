//! GitLab REST v4 hosting adapter.
//!
//! `repo` is the full project path (`group/project`), URL-encoded into the
//! `/projects/:id/...` routes. Merging is modelled the way GitLab exposes
//! it: create a merge request, then accept it; HTTP 406 on accept means the
//! merge cannot proceed because of conflicts and surfaces as
//! [`MergeOutcome::Conflict`].

use crate::errors::HostingError;
use crate::hosting::{archive_ref, GitHostingPort, MergeOutcome};
use crate::settings::HostingSettings;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub struct GitLabHosting {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct MergeRequestCreated {
    iid: u64,
}

impl GitLabHosting {
    pub fn new(settings: &HostingSettings) -> Result<Self, HostingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.call_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.expose().to_string(),
        })
    }

    fn project_url(&self, repo: &str, tail: &str) -> String {
        format!("{}/projects/{}/{}", self.base_url, encode(repo), tail)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("PRIVATE-TOKEN", &self.token)
    }

    async fn api_error(resp: reqwest::Response) -> HostingError {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        HostingError::Api { status, message }
    }
}

/// Percent-encode a path segment the way GitLab project ids require
/// (`group/project` → `group%2Fproject`).
fn encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[async_trait]
impl GitHostingPort for GitLabHosting {
    async fn branch_exists(&self, repo: &str, branch: &str) -> Result<bool, HostingError> {
        let url = self.project_url(repo, &format!("repository/branches/{}", encode(branch)));
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::api_error(resp).await),
        }
    }

    async fn create_branch(
        &self,
        repo: &str,
        name: &str,
        source: &str,
    ) -> Result<bool, HostingError> {
        let url = self.project_url(repo, "repository/branches");
        let resp = self
            .request(reqwest::Method::POST, url)
            .query(&[("branch", name), ("ref", source)])
            .send()
            .await?;
        match resp.status() {
            StatusCode::CREATED => {
                debug!(repo, branch = name, source, "created branch");
                Ok(true)
            }
            // GitLab answers 400 when the branch already exists
            StatusCode::BAD_REQUEST => Ok(false),
            _ => Err(Self::api_error(resp).await),
        }
    }

    async fn merge_branch(
        &self,
        repo: &str,
        source: &str,
        target: &str,
        message: &str,
    ) -> Result<MergeOutcome, HostingError> {
        let create_url = self.project_url(repo, "merge_requests");
        let resp = self
            .request(reqwest::Method::POST, create_url)
            .query(&[
                ("source_branch", source),
                ("target_branch", target),
                ("title", message),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        let created: MergeRequestCreated = resp.json().await?;

        let accept_url =
            self.project_url(repo, &format!("merge_requests/{}/merge", created.iid));
        let resp = self
            .request(reqwest::Method::PUT, accept_url)
            .query(&[("merge_commit_message", message)])
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => {
                debug!(repo, source, target, "merged branch");
                Ok(MergeOutcome::Success)
            }
            StatusCode::NOT_ACCEPTABLE => Ok(MergeOutcome::Conflict {
                info: format!("merge request !{} has conflicts", created.iid),
            }),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::CONFLICT => Ok(MergeOutcome::Failed {
                error: format!("merge request !{} not mergeable", created.iid),
            }),
            _ => Err(Self::api_error(resp).await),
        }
    }

    async fn archive_branch(
        &self,
        repo: &str,
        name: &str,
        reason: &str,
    ) -> Result<bool, HostingError> {
        if !self.branch_exists(repo, name).await? {
            return Ok(false);
        }
        // GitLab has no branch rename: copy then delete
        self.create_branch(repo, &archive_ref(reason, name), name)
            .await?;
        let url = self.project_url(repo, &format!("repository/branches/{}", encode(name)));
        let resp = self.request(reqwest::Method::DELETE, url).send().await?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            debug!(repo, branch = name, reason, "archived branch");
            Ok(true)
        } else {
            Err(Self::api_error(resp).await)
        }
    }

    async fn create_tag(
        &self,
        repo: &str,
        tag: &str,
        reference: &str,
        message: &str,
    ) -> Result<bool, HostingError> {
        let url = self.project_url(repo, "repository/tags");
        let resp = self
            .request(reqwest::Method::POST, url)
            .query(&[("tag_name", tag), ("ref", reference), ("message", message)])
            .send()
            .await?;
        match resp.status() {
            StatusCode::CREATED => Ok(true),
            StatusCode::BAD_REQUEST => Ok(false),
            _ => Err(Self::api_error(resp).await),
        }
    }

    async fn read_file(
        &self,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, HostingError> {
        let url = self.project_url(repo, &format!("repository/files/{}/raw", encode(path)));
        let resp = self
            .request(reqwest::Method::GET, url)
            .query(&[("ref", reference)])
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => Ok(Some(resp.text().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::api_error(resp).await),
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
    use crate::settings::SecretToken;

    #[test]
    fn test_encode_project_path() {
        assert_eq!(encode("group/project"), "group%2Fproject");
        assert_eq!(encode("plain-name_1.0"), "plain-name_1.0");
        assert_eq!(encode("a b"), "a%20b");
    }

    #[test]
    fn test_project_url_layout() {
        let settings = HostingSettings {
            base_url: "https://gitlab.example.com/api/v4/".to_string(),
            token: SecretToken::new("glpat-x"),
            call_timeout_secs: 5,
        };
        let hosting = GitLabHosting::new(&settings).unwrap();
        assert_eq!(
            hosting.project_url("group/app", "repository/branches"),
            "https://gitlab.example.com/api/v4/projects/group%2Fapp/repository/branches"
        );
    }
}
