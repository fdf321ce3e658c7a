//! GitHub facade.
//!
//! Batched reads go through GraphQL, writes through REST, and everything
//! carries `Authorization: token <T>`. The token comes from `GITHUB_TOKEN`
//! or `gh auth token`; owner/repo come from the repo's `origin` remote.
//! Both are resolved once per cwd and cached for the life of the process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{Value, json};

use crate::error::{Error, ErrorKind, Result};
use crate::exec::{Cmd, Exec};

pub mod graphql;

/// Head names that must never be merged from or deleted.
pub const PROTECTED_HEADS: &[&str] = &["trunk", "main", "master", "develop"];

/// HTML marker embedded in stack comments for idempotent upsert.
pub const STACK_COMMENT_MARKER: &str = "<!-- braid-stack -->";

/// Default mergeability poll: every 2 s, up to 60 s.
pub const MERGE_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MERGE_POLL_TIMEOUT: Duration = Duration::from_secs(60);
/// Long-wait variant for slow CI.
pub const MERGE_POLL_TIMEOUT_LONG: Duration = Duration::from_secs(300);

pub fn is_protected(head: &str) -> bool {
    PROTECTED_HEADS.contains(&head)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    ReviewRequired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Squash,
    Merge,
    Rebase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrInfo {
    pub number: u64,
    pub title: String,
    pub state: PrState,
    pub base_ref: String,
    pub head_ref: String,
    pub url: String,
    pub review_decision: Option<ReviewDecision>,
    /// 1 + count of head force-pushes; bumps whenever the head is rewritten.
    pub version: u64,
}

/// `owner/repo` parsed from the origin remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub owner: String,
    pub repo: String,
}

impl RepoInfo {
    /// Accepts the usual GitHub remote shapes:
    /// `https://github.com/o/r(.git)`, `git@github.com:o/r(.git)`,
    /// `ssh://git@github.com/o/r(.git)`.
    pub fn parse_remote_url(url: &str) -> Result<Self> {
        let url = url.trim();
        let rest = url
            .strip_prefix("https://github.com/")
            .or_else(|| url.strip_prefix("http://github.com/"))
            .or_else(|| url.strip_prefix("git@github.com:"))
            .or_else(|| url.strip_prefix("ssh://git@github.com/"))
            .ok_or_else(|| {
                Error::command_failed(format!("unrecognized remote URL: {url:?}"))
            })?;
        let rest = rest.strip_suffix(".git").unwrap_or(rest);
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let (owner, repo) = rest
            .split_once('/')
            .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
            .ok_or_else(|| {
                Error::command_failed(format!("remote URL has no owner/repo: {url:?}"))
            })?;
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

/// Outcome of a single mergeability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReadiness {
    Ready,
    Conflicted,
    Pending,
}

/// GitHub reports mergeability lazily; `mergeable` stays null while the
/// background merge commit is computed.
pub fn classify_mergeability(mergeable: Option<bool>, state: &str) -> MergeReadiness {
    match (mergeable, state) {
        (Some(true), "clean" | "unstable") => MergeReadiness::Ready,
        (_, "dirty") => MergeReadiness::Conflicted,
        _ => MergeReadiness::Pending,
    }
}

/// The host operations the stack orchestrator consumes. [`HostClient`] is
/// the real implementation; tests substitute a canned one, the same way the
/// executor seam works.
pub trait Host {
    fn batch_prs_by_branch(
        &self,
        cwd: &Path,
        heads: &[String],
    ) -> Result<std::collections::HashMap<String, PrInfo>>;

    fn batch_prs_by_number(
        &self,
        cwd: &Path,
        numbers: &[u64],
    ) -> Result<std::collections::HashMap<u64, PrInfo>>;

    fn create_pr(
        &self,
        cwd: &Path,
        head: &str,
        base: &str,
        title: &str,
        body: Option<&str>,
        draft: bool,
    ) -> Result<PrInfo>;

    fn update_pr_base(&self, cwd: &Path, number: u64, base: &str) -> Result<()>;

    fn close_pr(&self, cwd: &Path, number: u64) -> Result<()>;

    fn merge_pr(
        &self,
        cwd: &Path,
        number: u64,
        method: MergeMethod,
        delete_head: bool,
        head_ref: &str,
    ) -> Result<()>;

    fn update_pr_branch(&self, cwd: &Path, number: u64) -> Result<()>;

    fn wait_for_mergeable(
        &self,
        cwd: &Path,
        number: u64,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()>;

    fn upsert_stack_comment(&self, cwd: &Path, number: u64, body: &str) -> Result<()>;
}

struct CwdContext {
    token: String,
    info: RepoInfo,
}

pub struct HostClient {
    exec: Arc<dyn Exec>,
    http: reqwest::blocking::Client,
    api_base: String,
    graphql_url: String,
    contexts: DashMap<PathBuf, Arc<CwdContext>>,
}

impl HostClient {
    pub fn new(exec: Arc<dyn Exec>) -> Result<Self> {
        Self::with_endpoints(
            exec,
            "https://api.github.com".to_string(),
            "https://api.github.com/graphql".to_string(),
        )
    }

    /// Endpoint override, for GitHub Enterprise and for tests.
    pub fn with_endpoints(
        exec: Arc<dyn Exec>,
        api_base: String,
        graphql_url: String,
    ) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("braid/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::command_failed(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            exec,
            http,
            api_base,
            graphql_url,
            contexts: DashMap::new(),
        })
    }

    /// The owner/repo this cwd talks to.
    pub fn repo_info(&self, cwd: &Path) -> Result<RepoInfo> {
        Ok(self.context(cwd)?.info.clone())
    }

    fn context(&self, cwd: &Path) -> Result<Arc<CwdContext>> {
        if let Some(ctx) = self.contexts.get(cwd) {
            return Ok(ctx.clone());
        }
        let token = self.lookup_token(cwd)?;
        let info = self.lookup_repo_info(cwd)?;
        let ctx = Arc::new(CwdContext { token, info });
        self.contexts.insert(cwd.to_path_buf(), ctx.clone());
        Ok(ctx)
    }

    fn lookup_token(&self, cwd: &Path) -> Result<String> {
        if let Ok(token) = std::env::var("GITHUB_TOKEN")
            && !token.trim().is_empty()
        {
            return Ok(token.trim().to_string());
        }
        let cmd = Cmd::new("gh").args(["auth", "token"]).current_dir(cwd);
        let output = self.exec.run(&cmd)?;
        if !output.success() {
            return Err(Error::new(
                ErrorKind::DependencyMissing,
                "no GitHub token: set GITHUB_TOKEN or run `gh auth login`",
            )
            .with_command(cmd.display(), output.stderr));
        }
        let token = output.stdout.trim().to_string();
        if token.is_empty() {
            return Err(Error::new(
                ErrorKind::DependencyMissing,
                "gh auth token returned nothing",
            ));
        }
        Ok(token)
    }

    fn lookup_repo_info(&self, cwd: &Path) -> Result<RepoInfo> {
        let cmd = Cmd::new("git")
            .args(["remote", "get-url", "origin"])
            .current_dir(cwd);
        let output = self.exec.run(&cmd)?;
        if !output.success() {
            return Err(
                Error::command_failed("no origin remote configured")
                    .with_command(cmd.display(), output.stderr),
            );
        }
        RepoInfo::parse_remote_url(&output.stdout)
    }

    // ========================================================================
    // HTTP plumbing
    // ========================================================================

    fn graphql(&self, cwd: &Path, query: &str) -> Result<Value> {
        let ctx = self.context(cwd)?;
        let response = self
            .http
            .post(&self.graphql_url)
            .header("Authorization", format!("token {}", ctx.token))
            .json(&json!({"query": query}))
            .send()
            .map_err(|e| Error::command_failed(format!("GraphQL request failed: {e}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .map_err(|e| Error::parse(format!("GraphQL response is not JSON: {e}")))?;
        if !status.is_success() {
            return Err(Error::command_failed(format!(
                "GraphQL request returned {status}: {}",
                excerpt(&body)
            )));
        }
        Ok(body)
    }

    fn rest(
        &self,
        cwd: &Path,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let ctx = self.context(cwd)?;
        let url = format!("{}{path}", self.api_base);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("Authorization", format!("token {}", ctx.token))
            .header("Accept", "application/vnd.github+json");
        if let Some(body) = &body {
            request = request.json(body);
        }
        let response = request
            .send()
            .map_err(|e| Error::command_failed(format!("{method} {path} failed: {e}")))?;
        let status = response.status();
        let body: Value = if status == reqwest::StatusCode::NO_CONTENT {
            Value::Null
        } else {
            response.json().unwrap_or(Value::Null)
        };
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::not_found(format!("{method} {path} returned 404")));
        }
        if !status.is_success() {
            return Err(Error::command_failed(format!(
                "{method} {path} returned {status}: {}",
                excerpt(&body)
            )));
        }
        Ok(body)
    }

    // ========================================================================
    // Batched reads
    // ========================================================================

    /// PRs for each head name, one GraphQL round trip. Heads with no PR are
    /// absent from the result.
    pub fn batch_prs_by_branch(
        &self,
        cwd: &Path,
        heads: &[String],
    ) -> Result<std::collections::HashMap<String, PrInfo>> {
        if heads.is_empty() {
            return Ok(Default::default());
        }
        let info = self.repo_info(cwd)?;
        let query = graphql::query_by_branch(&info.owner, &info.repo, heads);
        let body = self.graphql(cwd, &query)?;
        let results = graphql::extract_by_branch(&body, heads)?;
        Ok(heads
            .iter()
            .zip(results)
            .filter_map(|(head, pr)| pr.map(|pr| (head.clone(), pr)))
            .collect())
    }

    /// PRs by number, one GraphQL round trip.
    pub fn batch_prs_by_number(
        &self,
        cwd: &Path,
        numbers: &[u64],
    ) -> Result<std::collections::HashMap<u64, PrInfo>> {
        if numbers.is_empty() {
            return Ok(Default::default());
        }
        let info = self.repo_info(cwd)?;
        let query = graphql::query_by_number(&info.owner, &info.repo, numbers);
        let body = self.graphql(cwd, &query)?;
        let results = graphql::extract_by_number(&body, numbers)?;
        Ok(numbers
            .iter()
            .zip(results)
            .filter_map(|(number, pr)| pr.map(|pr| (*number, pr)))
            .collect())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn create_pr(
        &self,
        cwd: &Path,
        head: &str,
        base: &str,
        title: &str,
        body: Option<&str>,
        draft: bool,
    ) -> Result<PrInfo> {
        let info = self.repo_info(cwd)?;
        let response = self.rest(
            cwd,
            reqwest::Method::POST,
            &format!("/repos/{}/{}/pulls", info.owner, info.repo),
            Some(json!({
                "title": title,
                "head": head,
                "base": base,
                "body": body.unwrap_or(""),
                "draft": draft,
            })),
        )?;
        parse_rest_pr(&response)
    }

    /// Retarget an open PR's base.
    pub fn update_pr_base(&self, cwd: &Path, number: u64, base: &str) -> Result<()> {
        let info = self.repo_info(cwd)?;
        self.rest(
            cwd,
            reqwest::Method::PATCH,
            &format!("/repos/{}/{}/pulls/{number}", info.owner, info.repo),
            Some(json!({"base": base})),
        )?;
        Ok(())
    }

    pub fn close_pr(&self, cwd: &Path, number: u64) -> Result<()> {
        let info = self.repo_info(cwd)?;
        self.rest(
            cwd,
            reqwest::Method::PATCH,
            &format!("/repos/{}/{}/pulls/{number}", info.owner, info.repo),
            Some(json!({"state": "closed"})),
        )?;
        Ok(())
    }

    /// Merge a PR. Optionally deletes the head branch afterwards — but never
    /// a protected name, no matter what the caller asked for.
    pub fn merge_pr(
        &self,
        cwd: &Path,
        number: u64,
        method: MergeMethod,
        delete_head: bool,
        head_ref: &str,
    ) -> Result<()> {
        if is_protected(head_ref) && delete_head {
            return Err(Error::invalid_input(format!(
                "refusing to delete protected branch {head_ref:?}"
            )));
        }
        let info = self.repo_info(cwd)?;
        self.rest(
            cwd,
            reqwest::Method::PUT,
            &format!("/repos/{}/{}/pulls/{number}/merge", info.owner, info.repo),
            Some(json!({"merge_method": method.to_string()})),
        )?;
        if delete_head {
            // Best-effort: GitHub may have auto-deleted the branch already.
            let _ = self.rest(
                cwd,
                reqwest::Method::DELETE,
                &format!(
                    "/repos/{}/{}/git/refs/heads/{head_ref}",
                    info.owner, info.repo
                ),
                None,
            );
        }
        Ok(())
    }

    /// Host-side rebase of the PR branch onto its base.
    pub fn update_pr_branch(&self, cwd: &Path, number: u64) -> Result<()> {
        let info = self.repo_info(cwd)?;
        self.rest(
            cwd,
            reqwest::Method::PUT,
            &format!(
                "/repos/{}/{}/pulls/{number}/update-branch",
                info.owner, info.repo
            ),
            Some(json!({})),
        )?;
        Ok(())
    }

    /// One mergeability probe: `(mergeable, mergeable_state)`.
    pub fn mergeability(&self, cwd: &Path, number: u64) -> Result<(Option<bool>, String)> {
        let info = self.repo_info(cwd)?;
        let response = self.rest(
            cwd,
            reqwest::Method::GET,
            &format!("/repos/{}/{}/pulls/{number}", info.owner, info.repo),
            None,
        )?;
        let mergeable = response.get("mergeable").and_then(Value::as_bool);
        let state = response
            .get("mergeable_state")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok((mergeable, state))
    }

    /// Poll until the PR is mergeable. Accepts `mergeable == true` with
    /// state `clean`/`unstable`; `dirty` rejects immediately; running out
    /// the clock fails `merge-blocked`.
    pub fn wait_for_mergeable(
        &self,
        cwd: &Path,
        number: u64,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            let (mergeable, state) = self.mergeability(cwd, number)?;
            match classify_mergeability(mergeable, &state) {
                MergeReadiness::Ready => return Ok(()),
                MergeReadiness::Conflicted => {
                    return Err(Error::conflict(format!(
                        "PR #{number} has merge conflicts (mergeable_state = dirty)"
                    )));
                }
                MergeReadiness::Pending => {}
            }
            if started.elapsed() >= timeout {
                return Err(Error::merge_blocked(format!(
                    "PR #{number} not mergeable after {}s (state: {state})",
                    timeout.as_secs()
                )));
            }
            std::thread::sleep(interval);
        }
    }

    // ========================================================================
    // Stack comments
    // ========================================================================

    /// Write or refresh the stack comment on a PR. The marker makes the
    /// operation idempotent: find-by-marker, update if found, else create.
    pub fn upsert_stack_comment(&self, cwd: &Path, number: u64, body: &str) -> Result<()> {
        let info = self.repo_info(cwd)?;
        let marked = format!("{STACK_COMMENT_MARKER}\n{body}");
        let comments = self.rest(
            cwd,
            reqwest::Method::GET,
            &format!(
                "/repos/{}/{}/issues/{number}/comments",
                info.owner, info.repo
            ),
            None,
        )?;
        let existing = comments.as_array().and_then(|comments| {
            comments.iter().find_map(|comment| {
                let has_marker = comment
                    .get("body")
                    .and_then(Value::as_str)
                    .is_some_and(|b| b.contains(STACK_COMMENT_MARKER));
                if has_marker {
                    comment.get("id").and_then(Value::as_u64)
                } else {
                    None
                }
            })
        });
        match existing {
            Some(comment_id) => {
                self.rest(
                    cwd,
                    reqwest::Method::PATCH,
                    &format!(
                        "/repos/{}/{}/issues/comments/{comment_id}",
                        info.owner, info.repo
                    ),
                    Some(json!({"body": marked})),
                )?;
            }
            None => {
                self.rest(
                    cwd,
                    reqwest::Method::POST,
                    &format!(
                        "/repos/{}/{}/issues/{number}/comments",
                        info.owner, info.repo
                    ),
                    Some(json!({"body": marked})),
                )?;
            }
        }
        Ok(())
    }
}

impl Host for HostClient {
    fn batch_prs_by_branch(
        &self,
        cwd: &Path,
        heads: &[String],
    ) -> Result<std::collections::HashMap<String, PrInfo>> {
        HostClient::batch_prs_by_branch(self, cwd, heads)
    }

    fn batch_prs_by_number(
        &self,
        cwd: &Path,
        numbers: &[u64],
    ) -> Result<std::collections::HashMap<u64, PrInfo>> {
        HostClient::batch_prs_by_number(self, cwd, numbers)
    }

    fn create_pr(
        &self,
        cwd: &Path,
        head: &str,
        base: &str,
        title: &str,
        body: Option<&str>,
        draft: bool,
    ) -> Result<PrInfo> {
        HostClient::create_pr(self, cwd, head, base, title, body, draft)
    }

    fn update_pr_base(&self, cwd: &Path, number: u64, base: &str) -> Result<()> {
        HostClient::update_pr_base(self, cwd, number, base)
    }

    fn close_pr(&self, cwd: &Path, number: u64) -> Result<()> {
        HostClient::close_pr(self, cwd, number)
    }

    fn merge_pr(
        &self,
        cwd: &Path,
        number: u64,
        method: MergeMethod,
        delete_head: bool,
        head_ref: &str,
    ) -> Result<()> {
        HostClient::merge_pr(self, cwd, number, method, delete_head, head_ref)
    }

    fn update_pr_branch(&self, cwd: &Path, number: u64) -> Result<()> {
        HostClient::update_pr_branch(self, cwd, number)
    }

    fn wait_for_mergeable(
        &self,
        cwd: &Path,
        number: u64,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        HostClient::wait_for_mergeable(self, cwd, number, timeout, interval)
    }

    fn upsert_stack_comment(&self, cwd: &Path, number: u64, body: &str) -> Result<()> {
        HostClient::upsert_stack_comment(self, cwd, number, body)
    }
}

/// Deterministic host for tests: an in-memory PR table plus a call log.
///
/// Mutations update the table the way GitHub would (create opens, close
/// closes, merge merges), so orchestration tests can assert on end state.
/// `fail_on` makes the first call whose rendered form contains the given
/// substring fail, for rollback testing.
#[derive(Default)]
pub struct FakeHost {
    prs: std::sync::Mutex<Vec<PrInfo>>,
    calls: std::sync::Mutex<Vec<String>>,
    fail_on: std::sync::Mutex<Option<String>>,
    next_number: std::sync::atomic::AtomicU64,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            next_number: std::sync::atomic::AtomicU64::new(100),
            ..Self::default()
        }
    }

    pub fn seed_pr(&self, pr: PrInfo) {
        self.prs.lock().unwrap().push(pr);
    }

    pub fn fail_on(&self, call_substring: impl Into<String>) {
        *self.fail_on.lock().unwrap() = Some(call_substring.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn prs(&self) -> Vec<PrInfo> {
        self.prs.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call.clone());
        let mut fail_on = self.fail_on.lock().unwrap();
        if let Some(marker) = fail_on.as_ref()
            && call.contains(marker.as_str())
        {
            *fail_on = None;
            return Err(Error::command_failed(format!("injected failure at {call}")));
        }
        Ok(())
    }
}

impl Host for FakeHost {
    fn batch_prs_by_branch(
        &self,
        _cwd: &Path,
        heads: &[String],
    ) -> Result<std::collections::HashMap<String, PrInfo>> {
        self.record(format!("batch_prs_by_branch:{}", heads.join(",")))?;
        let prs = self.prs.lock().unwrap();
        let mut map = std::collections::HashMap::new();
        for head in heads {
            let mut matches: Vec<PrInfo> = prs
                .iter()
                .filter(|pr| &pr.head_ref == head)
                .cloned()
                .collect();
            if let Some(open_at) = matches.iter().position(|pr| pr.state == PrState::Open) {
                map.insert(head.clone(), matches.swap_remove(open_at));
            } else if let Some(pr) = matches.into_iter().max_by_key(|pr| pr.number) {
                map.insert(head.clone(), pr);
            }
        }
        Ok(map)
    }

    fn batch_prs_by_number(
        &self,
        _cwd: &Path,
        numbers: &[u64],
    ) -> Result<std::collections::HashMap<u64, PrInfo>> {
        self.record(format!(
            "batch_prs_by_number:{}",
            numbers
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",")
        ))?;
        let prs = self.prs.lock().unwrap();
        Ok(numbers
            .iter()
            .filter_map(|n| prs.iter().find(|pr| pr.number == *n).map(|pr| (*n, pr.clone())))
            .collect())
    }

    fn create_pr(
        &self,
        _cwd: &Path,
        head: &str,
        base: &str,
        title: &str,
        _body: Option<&str>,
        _draft: bool,
    ) -> Result<PrInfo> {
        self.record(format!("create_pr:{head}->{base}"))?;
        let number = self
            .next_number
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let pr = PrInfo {
            number,
            title: title.to_string(),
            state: PrState::Open,
            base_ref: base.to_string(),
            head_ref: head.to_string(),
            url: format!("https://github.com/acme/widgets/pull/{number}"),
            review_decision: None,
            version: 1,
        };
        self.prs.lock().unwrap().push(pr.clone());
        Ok(pr)
    }

    fn update_pr_base(&self, _cwd: &Path, number: u64, base: &str) -> Result<()> {
        self.record(format!("update_pr_base:{number}->{base}"))?;
        let mut prs = self.prs.lock().unwrap();
        if let Some(pr) = prs.iter_mut().find(|pr| pr.number == number) {
            pr.base_ref = base.to_string();
        }
        Ok(())
    }

    fn close_pr(&self, _cwd: &Path, number: u64) -> Result<()> {
        self.record(format!("close_pr:{number}"))?;
        let mut prs = self.prs.lock().unwrap();
        if let Some(pr) = prs.iter_mut().find(|pr| pr.number == number) {
            pr.state = PrState::Closed;
        }
        Ok(())
    }

    fn merge_pr(
        &self,
        _cwd: &Path,
        number: u64,
        method: MergeMethod,
        delete_head: bool,
        head_ref: &str,
    ) -> Result<()> {
        if is_protected(head_ref) && delete_head {
            return Err(Error::invalid_input(format!(
                "refusing to delete protected branch {head_ref:?}"
            )));
        }
        self.record(format!("merge_pr:{number}:{method}"))?;
        let mut prs = self.prs.lock().unwrap();
        if let Some(pr) = prs.iter_mut().find(|pr| pr.number == number) {
            pr.state = PrState::Merged;
        }
        Ok(())
    }

    fn update_pr_branch(&self, _cwd: &Path, number: u64) -> Result<()> {
        self.record(format!("update_pr_branch:{number}"))
    }

    fn wait_for_mergeable(
        &self,
        _cwd: &Path,
        number: u64,
        _timeout: Duration,
        _interval: Duration,
    ) -> Result<()> {
        self.record(format!("wait_for_mergeable:{number}"))
    }

    fn upsert_stack_comment(&self, _cwd: &Path, number: u64, body: &str) -> Result<()> {
        self.record(format!("upsert_stack_comment:{number}:{}", body.len()))
    }
}

/// REST PR responses use lowercase state plus a `merged` flag.
fn parse_rest_pr(value: &Value) -> Result<PrInfo> {
    let number = value
        .get("number")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::parse("PR response missing number"))?;
    let state = match (
        value.get("state").and_then(Value::as_str),
        value.get("merged").and_then(Value::as_bool),
    ) {
        (_, Some(true)) => PrState::Merged,
        (Some("open"), _) => PrState::Open,
        (Some("closed"), _) => PrState::Closed,
        (other, _) => {
            return Err(Error::parse(format!("unknown REST PR state {other:?}")));
        }
    };
    let str_at = |keys: &[&str]| -> String {
        let mut cursor = value;
        for key in keys {
            match cursor.get(key) {
                Some(next) => cursor = next,
                None => return String::new(),
            }
        }
        cursor.as_str().unwrap_or("").to_string()
    };
    Ok(PrInfo {
        number,
        title: str_at(&["title"]),
        state,
        base_ref: str_at(&["base", "ref"]),
        head_ref: str_at(&["head", "ref"]),
        url: str_at(&["html_url"]),
        review_decision: None,
        version: 1,
    })
}

fn excerpt(body: &Value) -> String {
    let text = body.to_string();
    if text.len() > 200 {
        format!("{}…", &text[..200])
    } else {
        text
    }
}
