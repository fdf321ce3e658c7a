//! Shared fixtures for integration tests: canned jj invocations against the
//! fake executor.

#![allow(dead_code)]

use std::sync::Arc;

use braid::exec::{Exec, FakeExec};
use braid::vcs::{CHANGESET_TEMPLATE, TRUNK_BOOKMARKS_TEMPLATE, Vcs};

/// Full argv for a jj invocation, including the standard prefix.
pub fn jj_args(args: &[&str]) -> Vec<String> {
    let mut argv = vec![
        "jj".to_string(),
        "--no-pager".to_string(),
        "--color".to_string(),
        "never".to_string(),
    ];
    argv.extend(args.iter().map(|s| s.to_string()));
    argv
}

/// Canned `jj log` of a revset returning the given template rows.
pub fn expect_log(fake: &FakeExec, revset: &str, rows: &str) {
    fake.expect_ok(
        jj_args(&[
            "log",
            "-r",
            revset,
            "--reversed",
            "--no-graph",
            "-T",
            CHANGESET_TEMPLATE,
        ]),
        rows,
    );
}

/// Canned trunk resolution (`main`).
pub fn expect_trunk(fake: &FakeExec) {
    fake.expect_ok(
        jj_args(&[
            "log",
            "-r",
            "trunk()",
            "--no-graph",
            "-T",
            TRUNK_BOOKMARKS_TEMPLATE,
        ]),
        "main\n",
    );
}

/// One changeset-template row.
pub struct RowSpec<'a> {
    pub change_id: &'a str,
    pub description: &'a str,
    pub parents: &'a [&'a str],
    pub is_working_copy: bool,
    pub is_empty: bool,
    pub has_conflicts: bool,
}

impl RowSpec<'_> {
    pub fn render(&self) -> String {
        let parents = self
            .parents
            .iter()
            .map(|p| format!("\"{p}\""))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            concat!(
                r#"{{"changeId":"{id}","commitId":"c{id}","changeIdShort":"{short}","#,
                r#""commitIdShort":"c{short}","description":"{description}","#,
                r#""authorName":"Agent","authorEmail":"agent@example.com","timestamp":1722470400,"#,
                r#""parents":[{parents}],"isWorkingCopy":{wc},"isImmutable":false,"#,
                r#""isEmpty":{empty},"hasConflicts":{conflicts}}}"#
            ),
            id = self.change_id,
            short = &self.change_id[..self.change_id.len().min(8)],
            description = self.description,
            parents = parents,
            wc = self.is_working_copy,
            empty = self.is_empty,
            conflicts = self.has_conflicts,
        )
    }
}

pub fn row(change_id: &str, description: &str, parents: &[&str]) -> String {
    RowSpec {
        change_id,
        description,
        parents,
        is_working_copy: false,
        is_empty: false,
        has_conflicts: false,
    }
    .render()
}

pub fn fake_vcs() -> (Arc<FakeExec>, Vcs) {
    let fake = Arc::new(FakeExec::new());
    let vcs = Vcs::new(fake.clone() as Arc<dyn Exec>);
    (fake, vcs)
}
