//! GitHub records via the `gh` CLI.
//!
//! Every invocation is bounded by a timeout and killed if it overruns. Output
//! parsing is kept in pure functions so it can be tested without `gh`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::cache::ci_status::{CiFetchError, CiFetcher};
use crate::domain::model::{
    BranchRecord, CIStatus, CommitSummary, ForestInput, PrKey, RepoRecords, DEFAULT_BRANCH,
};
use crate::source::{RecordSource, SourceError, SourceResult};

const REPO_FIELDS_JQ: &str =
    ".[] | {name, full_name, default_branch, html_url, pushed_at, updated_at, description, archived}";
const PR_FIELDS: &str = "number,title,headRefName,baseRefName,author,updatedAt,url,labels,isDraft";
const COMPARE_JQ: &str = ".commits[:10] | .[] | {sha: .sha, message: .commit.message, \
author: .commit.author.name, date: .commit.author.date, html_url: .html_url, \
author_login: .author.login, author_avatar_url: .author.avatar_url}";

/// Commits kept per branch.
pub const MAX_COMMITS_PER_BRANCH: usize = 5;
const COMMIT_MESSAGE_CHARS: usize = 80;

/// Raw result of one `gh` invocation.
#[derive(Debug, Clone)]
pub struct GhOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `gh` subcommands with a bounded timeout.
#[derive(Debug, Clone)]
pub struct GhRunner {
    program: String,
    timeout: Duration,
}

impl Default for GhRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl GhRunner {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        Self {
            program: "gh".to_string(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Use a different executable (a wrapper script, a test double).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut parts = vec![self.program.as_str()];
        parts.extend(args.iter().take(3));
        parts.join(" ")
    }

    /// Run and capture output regardless of exit status.
    pub async fn exec(&self, args: &[&str]) -> SourceResult<GhOutput> {
        let command = self.describe(args);
        debug!(command = %command, "running gh");
        let child = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => {
                return Err(SourceError::Timeout {
                    command,
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                return Err(SourceError::Command {
                    command,
                    message: e.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };
        Ok(GhOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run and return stdout, failing on a non-zero exit.
    pub async fn run(&self, args: &[&str]) -> SourceResult<String> {
        let output = self.exec(args).await?;
        if output.success {
            return Ok(output.stdout);
        }
        if is_rate_limited(&output.stderr) {
            return Err(SourceError::RateLimited(output.stderr));
        }
        Err(SourceError::Command {
            command: self.describe(args),
            message: output.stderr,
        })
    }

    /// Commits on `head` that are not on `base`, as newline-delimited JSON.
    pub async fn compare(&self, repo: &str, base: &str, head: &str) -> SourceResult<String> {
        let path = format!("repos/{repo}/compare/{base}...{head}");
        self.run(&["api", &path, "--jq", COMPARE_JQ]).await
    }
}

fn is_rate_limited(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("secondary rate") || lower.contains("http 429")
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// One repository from `gh api orgs/{org}/repos`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepoSummary {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived: bool,
}

/// Parse newline-delimited repository objects. Unparseable lines are skipped.
pub fn parse_repo_lines(output: &str) -> Vec<RepoSummary> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(repo) => Some(repo),
            Err(e) => {
                debug!(error = %e, "skipping unparseable repo line");
                None
            }
        })
        .collect()
}

/// Which repositories of an organization are worth tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFilter {
    pub exclude: Vec<String>,
    pub include_archived: bool,
    pub min_pushed_days_ago: i64,
    pub max_repos: usize,
}

impl Default for RepoFilter {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            include_archived: false,
            min_pushed_days_ago: 365,
            max_repos: 50,
        }
    }
}

impl RepoFilter {
    /// Drop excluded, archived and inactive repositories, most recently
    /// pushed first, capped at `max_repos`. Repos with no push time are kept
    /// and sort last.
    pub fn apply(&self, repos: Vec<RepoSummary>, now: DateTime<Utc>) -> Vec<RepoSummary> {
        let cutoff = now - chrono::Duration::days(self.min_pushed_days_ago);
        let mut kept: Vec<RepoSummary> = repos
            .into_iter()
            .filter(|r| !self.exclude.iter().any(|x| x == &r.name))
            .filter(|r| self.include_archived || !r.archived)
            .filter(|r| r.pushed_at.map_or(true, |at| at >= cutoff))
            .collect();
        kept.sort_by(|a, b| b.pushed_at.cmp(&a.pushed_at));
        if kept.len() > self.max_repos {
            info!(
                limit = self.max_repos,
                total = kept.len(),
                "limiting to most recently active repos"
            );
            kept.truncate(self.max_repos);
        }
        kept
    }
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GhAuthor {
    #[serde(default)]
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPullRequest {
    number: u64,
    #[serde(default)]
    title: String,
    head_ref_name: String,
    base_ref_name: String,
    #[serde(default)]
    author: Option<GhAuthor>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    is_draft: bool,
}

impl From<GhPullRequest> for BranchRecord {
    fn from(pr: GhPullRequest) -> Self {
        let author = pr
            .author
            .map(|a| a.login)
            .filter(|login| !login.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            branch: pr.head_ref_name,
            parent_branch: Some(pr.base_ref_name),
            pr_number: Some(pr.number),
            title: Some(pr.title),
            author: Some(author),
            url: pr.url,
            is_draft: pr.is_draft,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            updated_at: pr.updated_at,
            ..Self::default()
        }
    }
}

/// Parse `gh pr list --json ...` output into branch records.
pub fn parse_pull_requests(output: &str) -> SourceResult<Vec<BranchRecord>> {
    let prs: Vec<GhPullRequest> = serde_json::from_str(output)?;
    Ok(prs.into_iter().map(BranchRecord::from).collect())
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GhCommitLine {
    #[serde(default)]
    sha: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    author_login: Option<String>,
    #[serde(default)]
    author_avatar_url: Option<String>,
}

impl From<GhCommitLine> for CommitSummary {
    fn from(line: GhCommitLine) -> Self {
        let message = line.message.unwrap_or_default();
        let subject = message.lines().next().unwrap_or_default();
        Self {
            short_sha: line.sha.chars().take(7).collect(),
            sha: line.sha,
            message: subject.chars().take(COMMIT_MESSAGE_CHARS).collect(),
            author: line.author.unwrap_or_default(),
            author_login: line.author_login.unwrap_or_default(),
            author_avatar_url: line.author_avatar_url.unwrap_or_default(),
            date: line.date.unwrap_or_default().chars().take(10).collect(),
            html_url: line.html_url.unwrap_or_default(),
        }
    }
}

/// Parse the newline-delimited output of [`GhRunner::compare`], keeping at
/// most `max` commits. Lines that do not parse are skipped.
pub fn parse_compare_lines(output: &str, max: usize) -> Vec<CommitSummary> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<GhCommitLine>(line).ok())
        .filter(|line| !line.sha.is_empty())
        .map(CommitSummary::from)
        .take(max)
        .collect()
}

/// Parse `gh pr checks --json bucket` output and aggregate.
///
/// `None` when the output is not a check list.
pub fn parse_check_buckets(output: &str) -> Option<CIStatus> {
    #[derive(Deserialize)]
    struct Check {
        #[serde(default)]
        bucket: String,
    }
    let checks: Vec<Check> = serde_json::from_str(output.trim()).ok()?;
    Some(CIStatus::from_check_buckets(
        checks.iter().map(|c| c.bucket.as_str()),
    ))
}

/// Open PRs of an organization, one repository entry per repo that has any.
#[derive(Debug)]
pub struct GhRecordSource {
    organization: String,
    filter: RepoFilter,
    default_branch: String,
    fetch_commits: bool,
    runner: GhRunner,
}

impl GhRecordSource {
    pub fn new(organization: impl Into<String>, filter: RepoFilter) -> Self {
        Self {
            organization: organization.into(),
            filter,
            default_branch: DEFAULT_BRANCH.to_string(),
            fetch_commits: true,
            runner: GhRunner::new(),
        }
    }

    /// Branch assumed for repositories that report no default branch.
    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    /// Whether to list each branch's commits over its parent.
    pub fn with_commits(mut self, enabled: bool) -> Self {
        self.fetch_commits = enabled;
        self
    }

    pub fn with_runner(mut self, runner: GhRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    async fn list_repos(&self) -> SourceResult<Vec<RepoSummary>> {
        let path = format!("orgs/{}/repos", self.organization);
        let output = self
            .runner
            .run(&["api", &path, "--paginate", "--jq", REPO_FIELDS_JQ])
            .await?;
        Ok(self.filter.apply(parse_repo_lines(&output), Utc::now()))
    }

    async fn list_prs(&self, full_name: &str) -> SourceResult<Vec<BranchRecord>> {
        let output = self
            .runner
            .run(&[
                "pr", "list", "--repo", full_name, "--state", "open", "--json", PR_FIELDS,
            ])
            .await?;
        parse_pull_requests(&output)
    }

    /// Fill `commits_from_parent` on every record. Returns `false` once
    /// rate limited; the remaining records are left without commits.
    async fn attach_commits(
        &self,
        full_name: &str,
        default_branch: &str,
        records: &mut [BranchRecord],
    ) -> bool {
        for record in records.iter_mut() {
            let base = record.parent().unwrap_or(default_branch).to_string();
            match self.runner.compare(full_name, &base, &record.branch).await {
                Ok(output) => {
                    record.commits_from_parent =
                        parse_compare_lines(&output, MAX_COMMITS_PER_BRANCH);
                }
                Err(e @ SourceError::RateLimited(_)) => {
                    warn!(repo = %full_name, error = %e, "rate limited, skipping commit lists");
                    return false;
                }
                Err(e) => {
                    debug!(
                        repo = %full_name,
                        branch = %record.branch,
                        error = %e,
                        "no commit list"
                    );
                }
            }
        }
        true
    }
}

/// Records from one organization pass plus how many repos were considered.
#[derive(Debug, Clone, Default)]
pub struct OrgFetch {
    pub input: ForestInput,
    /// Repositories that passed the filter, with or without open PRs.
    pub repos_considered: usize,
}

impl GhRecordSource {
    /// List repositories, then open PRs per repository, then (if enabled) the
    /// commits each PR branch adds over its base. Repos without open PRs are
    /// left out of `input`. A rate limit while listing aborts the pass; other
    /// per-repo failures skip that repo. Commit lists are best effort.
    #[instrument(skip(self), fields(org = %self.organization))]
    pub async fn fetch(&self) -> SourceResult<OrgFetch> {
        let repos = self.list_repos().await?;
        info!(repos = repos.len(), "fetched repositories");

        let mut input = ForestInput::new();
        let mut fetch_commits = self.fetch_commits;
        for (i, repo) in repos.iter().enumerate() {
            debug!(n = i + 1, of = repos.len(), repo = %repo.full_name, "listing PRs");
            let mut records = match self.list_prs(&repo.full_name).await {
                Ok(records) => records,
                Err(e @ SourceError::RateLimited(_)) => return Err(e),
                Err(e) => {
                    warn!(repo = %repo.full_name, error = %e, "skipping repo");
                    continue;
                }
            };
            if records.is_empty() {
                continue;
            }
            let default_branch = repo
                .default_branch
                .clone()
                .unwrap_or_else(|| self.default_branch.clone());
            if fetch_commits {
                fetch_commits = self
                    .attach_commits(&repo.full_name, &default_branch, &mut records)
                    .await;
            }
            input.insert(
                repo.full_name.clone(),
                RepoRecords::new(default_branch, records),
            );
        }
        Ok(OrgFetch {
            input,
            repos_considered: repos.len(),
        })
    }
}

#[async_trait]
impl RecordSource for GhRecordSource {
    async fn load(&self) -> SourceResult<ForestInput> {
        Ok(self.fetch().await?.input)
    }
}

/// [`CiFetcher`] backed by `gh pr checks`.
#[derive(Debug, Clone, Default)]
pub struct GhCiFetcher {
    runner: GhRunner,
}

impl GhCiFetcher {
    pub fn new(runner: GhRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl CiFetcher for GhCiFetcher {
    async fn fetch_ci(&self, pr: &PrKey) -> Result<CIStatus, CiFetchError> {
        let number = pr.number.to_string();
        let output = self
            .runner
            .exec(&["pr", "checks", &number, "--repo", &pr.repo, "--json", "bucket"])
            .await
            .map_err(|e| match e {
                SourceError::Timeout { .. } => CiFetchError::Timeout {
                    pr: pr.to_string(),
                    timeout_ms: self.runner.timeout().as_millis() as u64,
                },
                other => CiFetchError::Failed(other.to_string()),
            })?;

        // `gh pr checks` exits non-zero while checks fail or run, but still
        // prints the list.
        if let Some(status) = parse_check_buckets(&output.stdout) {
            return Ok(status);
        }
        if is_rate_limited(&output.stderr) {
            return Err(CiFetchError::RateLimited(output.stderr));
        }
        if output.stderr.contains("no checks reported") {
            return Ok(CIStatus::Unknown);
        }
        Err(CiFetchError::Failed(if output.stderr.is_empty() {
            "unparseable checks output".to_string()
        } else {
            output.stderr
        }))
    }
}
