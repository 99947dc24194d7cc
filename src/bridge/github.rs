//! GitHub VCS adapter
//!
//! Talks to the GitHub REST API (or a compatible server at `api_url`):
//! - `GET /repos/{repo}/contents/{path}?ref=` for CI files
//! - `GET /repos/{repo}/branches` for branch listings
//! - `POST /repos/{repo}/statuses/{sha}` for commit statuses

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{BridgeError, CommitStatus, VcsAdapter};
use crate::ci::VcsConfig;

const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct Branch {
    name: String,
}

#[derive(Debug, Clone)]
pub struct GitHubAdapter {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubAdapter {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("zeroci/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            token,
        })
    }

    pub fn from_config(config: &VcsConfig) -> Result<Self, BridgeError> {
        Self::new(config.api_url.clone(), config.token.clone())
    }

    fn build_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, self.build_url(path))
            .header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, BridgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(BridgeError::HttpError {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl VcsAdapter for GitHubAdapter {
    async fn fetch_file(
        &self,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<Option<String>, BridgeError> {
        let response = self
            .request(Method::GET, &format!("repos/{}/contents/{}", repo, path))
            .header("Accept", "application/vnd.github.raw+json")
            .query(&[("ref", git_ref)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(repo, git_ref, path, "File not found");
            return Ok(None);
        }

        let response = ensure_success(response).await?;
        Ok(Some(response.text().await?))
    }

    async fn list_branches(&self, repo: &str) -> Result<Vec<String>, BridgeError> {
        let mut names = Vec::new();
        let mut page = 1usize;

        loop {
            let response = self
                .request(Method::GET, &format!("repos/{}/branches", repo))
                .query(&[("per_page", PAGE_SIZE), ("page", page)])
                .send()
                .await?;
            let branches: Vec<Branch> = ensure_success(response).await?.json().await?;
            let last_page = branches.len() < PAGE_SIZE;
            names.extend(branches.into_iter().map(|b| b.name));
            if last_page {
                break;
            }
            page += 1;
        }

        Ok(names)
    }

    async fn post_status(
        &self,
        repo: &str,
        commit: &str,
        status: &CommitStatus,
    ) -> Result<(), BridgeError> {
        let body = json!({
            "state": status.state.as_str(),
            "target_url": status.link,
            "description": format!("{} {}", status.context, status.state),
            "context": status.context,
        });

        let response = self
            .request(Method::POST, &format!("repos/{}/statuses/{}", repo, commit))
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;

        info!(repo, commit, state = %status.state, context = %status.context, "Posted commit status");
        Ok(())
    }
}
