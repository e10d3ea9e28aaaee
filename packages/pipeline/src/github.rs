// ABOUTME: GitHub REST client that opens a pull request carrying a patch file
// ABOUTME: Branch creation and PR creation both tolerate already-exists answers

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "pentra-pipeline";

#[derive(Error, Debug)]
pub enum GithubError {
    #[error("GitHub token is missing or a placeholder")]
    NoToken,

    #[error("Failed to build GitHub HTTP client: {0}")]
    Client(String),

    #[error("GitHub request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, GithubError>;

#[derive(Debug, Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct CreatePullRequest<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

/// A patch to publish: one file replaced on a dedicated branch.
#[derive(Debug, Clone)]
pub struct PatchSubmission {
    pub branch: String,
    pub file_path: String,
    pub content: String,
    pub title: String,
    pub body: String,
}

/// Minimal GitHub REST client for the patching phase. Creates a branch off
/// the default branch, upserts the patched file, and opens a pull request.
pub struct PullRequestClient {
    client: reqwest::Client,
    token: String,
    api_url: String,
    owner: String,
    repo: String,
}

impl PullRequestClient {
    pub fn new(token: String, owner: String, repo: String, api_url: Option<String>) -> Result<Self> {
        if pentra_sandbox::config::is_placeholder(&token) {
            return Err(GithubError::NoToken);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GithubError::Client(e.to_string()))?;

        Ok(Self {
            client,
            token,
            api_url: api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            owner,
            repo,
        })
    }

    /// Publish a patch as a pull request, returning its URL. Idempotent for
    /// re-runs: an existing branch is reused and an existing open PR for the
    /// same head is returned instead of failing.
    pub async fn open_patch_pr(&self, submission: &PatchSubmission) -> Result<String> {
        let base = self.default_branch().await?;
        let base_sha = self.head_sha(&base).await?;
        self.ensure_branch(&submission.branch, &base_sha).await?;
        self.upsert_file(submission).await?;
        self.create_pull(submission, &base).await
    }

    async fn default_branch(&self) -> Result<String> {
        let url = format!("{}/repos/{}/{}", self.api_url, self.owner, self.repo);
        let response = self.get(&url).await?;
        let repo: RepoResponse = self.parse_success(response).await?;
        Ok(repo.default_branch)
    }

    async fn head_sha(&self, branch: &str) -> Result<String> {
        let url = format!(
            "{}/repos/{}/{}/git/ref/heads/{}",
            self.api_url, self.owner, self.repo, branch
        );
        let response = self.get(&url).await?;
        let reference: RefResponse = self.parse_success(response).await?;
        Ok(reference.object.sha)
    }

    /// Create the patch branch; a 422 means it already exists, which is fine
    /// for re-runs against the same target.
    async fn ensure_branch(&self, branch: &str, base_sha: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/git/refs",
            self.api_url, self.owner, self.repo
        );
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({
                "ref": format!("refs/heads/{}", branch),
                "sha": base_sha,
            }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            warn!(branch, "Branch already exists, reusing it");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        info!(branch, "Created patch branch");
        Ok(())
    }

    async fn upsert_file(&self, submission: &PatchSubmission) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url, self.owner, self.repo, submission.file_path
        );

        // The contents API requires the current blob sha when replacing an
        // existing file.
        let existing_sha = self.existing_file_sha(&url, &submission.branch).await?;

        let mut body = json!({
            "message": submission.title,
            "content": BASE64.encode(&submission.content),
            "branch": submission.branch,
        });
        if let Some(sha) = existing_sha {
            body["sha"] = json!(sha);
        }

        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        info!(path = %submission.file_path, branch = %submission.branch, "Patched file committed");
        Ok(())
    }

    async fn existing_file_sha(&self, contents_url: &str, branch: &str) -> Result<Option<String>> {
        let response = self
            .request(reqwest::Method::GET, contents_url)
            .query(&[("ref", branch)])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let contents: ContentsResponse = response.json().await?;
        Ok(Some(contents.sha))
    }

    async fn create_pull(&self, submission: &PatchSubmission, base: &str) -> Result<String> {
        let url = format!("{}/repos/{}/{}/pulls", self.api_url, self.owner, self.repo);
        let request = CreatePullRequest {
            title: &submission.title,
            head: &submission.branch,
            base,
            body: &submission.body,
        };

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&request)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            // Usually "a pull request already exists for this head".
            warn!(branch = %submission.branch, "PR already exists, looking it up");
            return self.existing_pull(&submission.branch).await;
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let pull: PullResponse = response.json().await?;
        info!(url = %pull.html_url, "Pull request opened");
        Ok(pull.html_url)
    }

    async fn existing_pull(&self, branch: &str) -> Result<String> {
        let url = format!("{}/repos/{}/{}/pulls", self.api_url, self.owner, self.repo);
        let response = self
            .request(reqwest::Method::GET, &url)
            .query(&[
                ("head", format!("{}:{}", self.owner, branch)),
                ("state", "open".to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let pulls: Vec<PullResponse> = response.json().await?;
        pulls
            .into_iter()
            .next()
            .map(|p| p.html_url)
            .ok_or(GithubError::Api {
                status: 422,
                message: format!("PR creation rejected and no open PR found for {}", branch),
            })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        Ok(self.request(reqwest::Method::GET, url).send().await?)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github.v3+json")
    }

    async fn parse_success<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(response.json().await?)
    }

    async fn api_error(response: reqwest::Response) -> GithubError {
        let status = response.status().as_u16();
        let message = match response.json::<ApiErrorResponse>().await {
            Ok(body) if !body.message.is_empty() => body.message,
            _ => "unknown error".to_string(),
        };
        GithubError::Api { status, message }
    }
}
