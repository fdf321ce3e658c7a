//! GraphQL query construction and response extraction for batched PR reads.
//!
//! Pure functions: build a query string, pick values out of a
//! `serde_json::Value`. The HTTP round trip lives in the client.

use serde_json::Value;

use crate::error::{Error, Result};

use super::{PrInfo, PrState, ReviewDecision};

const PR_FIELDS: &str = "number title state baseRefName headRefName url reviewDecision \
     timelineItems(itemTypes: [HEAD_REF_FORCE_PUSHED_EVENT], first: 0) { totalCount }";

/// One aliased sub-query per head name, fetching the newest PRs for that
/// branch in a single round trip.
pub fn query_by_branch(owner: &str, repo: &str, heads: &[String]) -> String {
    let mut query = format!("query {{ repository(owner: \"{owner}\", name: \"{repo}\") {{ ");
    for (i, head) in heads.iter().enumerate() {
        query.push_str(&format!(
            "pr{i}: pullRequests(headRefName: \"{}\", states: [OPEN, CLOSED, MERGED], first: 10, \
             orderBy: {{field: CREATED_AT, direction: DESC}}) {{ nodes {{ {PR_FIELDS} }} }} ",
            escape(head)
        ));
    }
    query.push_str("} }");
    query
}

/// One aliased sub-query per PR number.
pub fn query_by_number(owner: &str, repo: &str, numbers: &[u64]) -> String {
    let mut query = format!("query {{ repository(owner: \"{owner}\", name: \"{repo}\") {{ ");
    for (i, number) in numbers.iter().enumerate() {
        query.push_str(&format!(
            "pr{i}: pullRequest(number: {number}) {{ {PR_FIELDS} }} "
        ));
    }
    query.push_str("} }");
    query
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Extract the aliased results of [`query_by_branch`]: one optional PrInfo
/// per requested head, in request order.
pub fn extract_by_branch(body: &Value, heads: &[String]) -> Result<Vec<Option<PrInfo>>> {
    let repository = repository(body)?;
    let mut results = Vec::with_capacity(heads.len());
    for i in 0..heads.len() {
        let nodes = repository
            .get(format!("pr{i}"))
            .and_then(|v| v.get("nodes"))
            .and_then(Value::as_array)
            .ok_or_else(|| Error::parse(format!("missing pr{i} alias in GraphQL response")))?;
        let infos: Vec<PrInfo> = nodes
            .iter()
            .map(parse_pr_node)
            .collect::<Result<Vec<_>>>()?;
        results.push(pick_pr(infos));
    }
    Ok(results)
}

/// Extract the aliased results of [`query_by_number`].
pub fn extract_by_number(body: &Value, numbers: &[u64]) -> Result<Vec<Option<PrInfo>>> {
    let repository = repository(body)?;
    let mut results = Vec::with_capacity(numbers.len());
    for i in 0..numbers.len() {
        let node = repository
            .get(format!("pr{i}"))
            .ok_or_else(|| Error::parse(format!("missing pr{i} alias in GraphQL response")))?;
        if node.is_null() {
            results.push(None);
        } else {
            results.push(Some(parse_pr_node(node)?));
        }
    }
    Ok(results)
}

fn repository(body: &Value) -> Result<&Value> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array)
        && !errors.is_empty()
    {
        let message = errors[0]
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown GraphQL error");
        return Err(Error::command_failed(format!("GraphQL error: {message}")));
    }
    body.get("data")
        .and_then(|d| d.get("repository"))
        .filter(|r| !r.is_null())
        .ok_or_else(|| Error::parse("GraphQL response has no repository data"))
}

fn parse_pr_node(node: &Value) -> Result<PrInfo> {
    let str_field = |key: &str| -> Result<String> {
        node.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::parse(format!("PR node missing {key}")))
    };
    let number = node
        .get("number")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::parse("PR node missing number"))?;
    let state = match str_field("state")?.as_str() {
        "OPEN" => PrState::Open,
        "CLOSED" => PrState::Closed,
        "MERGED" => PrState::Merged,
        other => return Err(Error::parse(format!("unknown PR state {other:?}"))),
    };
    let review_decision = node
        .get("reviewDecision")
        .and_then(Value::as_str)
        .and_then(|d| match d {
            "APPROVED" => Some(ReviewDecision::Approved),
            "CHANGES_REQUESTED" => Some(ReviewDecision::ChangesRequested),
            "REVIEW_REQUIRED" => Some(ReviewDecision::ReviewRequired),
            _ => None,
        });
    let force_pushes = node
        .get("timelineItems")
        .and_then(|t| t.get("totalCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Ok(PrInfo {
        number,
        title: str_field("title")?,
        state,
        base_ref: str_field("baseRefName")?,
        head_ref: str_field("headRefName")?,
        url: str_field("url")?,
        review_decision,
        version: 1 + force_pushes,
    })
}

/// Multiple PRs on one head: prefer the open one, else the most recent
/// (highest number).
fn pick_pr(mut infos: Vec<PrInfo>) -> Option<PrInfo> {
    if let Some(open_at) = infos.iter().position(|pr| pr.state == PrState::Open) {
        return Some(infos.swap_remove(open_at));
    }
    infos.into_iter().max_by_key(|pr| pr.number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(number: u64, state: &str, head: &str) -> Value {
        json!({
            "number": number,
            "title": format!("PR {number}"),
            "state": state,
            "baseRefName": "main",
            "headRefName": head,
            "url": format!("https://github.com/acme/widgets/pull/{number}"),
            "reviewDecision": "APPROVED",
            "timelineItems": {"totalCount": 2}
        })
    }

    #[test]
    fn query_by_branch_aliases_each_head() {
        let query = query_by_branch(
            "acme",
            "widgets",
            &["feat-a".to_string(), "feat-b".to_string()],
        );
        assert!(query.contains("pr0: pullRequests(headRefName: \"feat-a\""));
        assert!(query.contains("pr1: pullRequests(headRefName: \"feat-b\""));
        assert!(query.contains("repository(owner: \"acme\", name: \"widgets\")"));
    }

    #[test]
    fn query_escapes_quotes() {
        let query = query_by_branch("acme", "widgets", &["we\"ird".to_string()]);
        assert!(query.contains(r#"headRefName: "we\"ird""#));
    }

    #[test]
    fn extract_by_branch_parses_fields() {
        let body = json!({
            "data": {"repository": {"pr0": {"nodes": [node(7, "OPEN", "feat-a")]}}}
        });
        let results = extract_by_branch(&body, &["feat-a".to_string()]).unwrap();
        let pr = results[0].as_ref().unwrap();
        assert_eq!(pr.number, 7);
        assert_eq!(pr.state, PrState::Open);
        assert_eq!(pr.head_ref, "feat-a");
        assert_eq!(pr.review_decision, Some(ReviewDecision::Approved));
        assert_eq!(pr.version, 3); // 1 + 2 force pushes
    }

    #[test]
    fn extract_prefers_open_over_recent() {
        let body = json!({
            "data": {"repository": {"pr0": {"nodes": [
                node(9, "CLOSED", "feat-a"),
                node(4, "OPEN", "feat-a"),
            ]}}}
        });
        let results = extract_by_branch(&body, &["feat-a".to_string()]).unwrap();
        assert_eq!(results[0].as_ref().unwrap().number, 4);
    }

    #[test]
    fn extract_falls_back_to_most_recent() {
        let body = json!({
            "data": {"repository": {"pr0": {"nodes": [
                node(4, "MERGED", "feat-a"),
                node(9, "CLOSED", "feat-a"),
            ]}}}
        });
        let results = extract_by_branch(&body, &["feat-a".to_string()]).unwrap();
        assert_eq!(results[0].as_ref().unwrap().number, 9);
    }

    #[test]
    fn extract_empty_nodes_is_none() {
        let body = json!({"data": {"repository": {"pr0": {"nodes": []}}}});
        let results = extract_by_branch(&body, &["feat-a".to_string()]).unwrap();
        assert!(results[0].is_none());
    }

    #[test]
    fn extract_by_number_handles_null() {
        let body = json!({
            "data": {"repository": {"pr0": null, "pr1": node(5, "MERGED", "feat-b")}}
        });
        let results = extract_by_number(&body, &[404, 5]).unwrap();
        assert!(results[0].is_none());
        assert_eq!(results[1].as_ref().unwrap().state, PrState::Merged);
    }

    #[test]
    fn graphql_errors_surface() {
        let body = json!({"errors": [{"message": "rate limited"}]});
        let err = extract_by_branch(&body, &["x".to_string()]).unwrap_err();
        assert!(err.message.contains("rate limited"));
    }

    #[test]
    fn unknown_state_is_parse_error() {
        let body = json!({
            "data": {"repository": {"pr0": {"nodes": [node(1, "DANGLING", "x")]}}}
        });
        assert!(extract_by_branch(&body, &["x".to_string()]).is_err());
    }
}
