//! Workspace add/remove/submit-prep against the fake executor.

mod common;

use std::fs;

use braid::error::ErrorKind;
use braid::state::StateDir;
use braid::vcs::BOOKMARK_TEMPLATE;
use braid::workspace::WorkspaceManager;
use rstest::rstest;
use tempfile::TempDir;

use common::{RowSpec, expect_log, expect_trunk, fake_vcs, jj_args};

fn tip_row(change_id: &str, description: &str) -> String {
    RowSpec {
        change_id,
        description,
        parents: &[],
        is_working_copy: false,
        is_empty: false,
        has_conflicts: false,
    }
    .render()
}

fn manager(tmp: &TempDir) -> (std::sync::Arc<braid::exec::FakeExec>, WorkspaceManager, StateDir) {
    let state = StateDir::new(tmp.path().join("state"));
    let (fake, vcs) = fake_vcs();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    let manager = WorkspaceManager::new(vcs, state.clone(), &repo);
    (fake, manager, state)
}

#[test]
fn add_refuses_existing_directory_without_touching_jj() {
    let tmp = TempDir::new().unwrap();
    let (fake, manager, _state) = manager(&tmp);
    fs::create_dir_all(manager.dir_of("agent-1")).unwrap();

    let err = manager.add("agent-1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::WorkspaceExists);
    assert!(fake.calls().is_empty());
}

#[test]
fn add_creates_workspace_describes_wip_and_bookmarks() {
    let tmp = TempDir::new().unwrap();
    let (fake, manager, _state) = manager(&tmp);
    expect_trunk(&fake);
    expect_log(&fake, "agent-1@", &format!("{}\n", tip_row("wsaa1111", "wip: agent-1")));

    let info = manager.add("agent-1").unwrap();
    assert_eq!(info.name, "agent-1");
    assert_eq!(info.tip, "wsaa1111");

    assert!(fake.called_with_prefix(&[
        "jj", "--no-pager", "--color", "never", "workspace", "add", "--name", "agent-1",
        "--revision", "main"
    ]));
    assert!(fake.called_with_prefix(&[
        "jj", "--no-pager", "--color", "never", "describe", "-r", "agent-1@", "-m",
        "wip: agent-1"
    ]));
    assert!(fake.called_with_prefix(&[
        "jj", "--no-pager", "--color", "never", "bookmark", "create", "agent-1", "-r",
        "agent-1@"
    ]));
}

#[rstest]
#[case::reserved("unassigned")]
#[case::empty("")]
#[case::whitespace("has space")]
#[case::dotted("dot.dot")]
#[case::traversal("../escape")]
fn reserved_and_malformed_names_are_rejected(#[case] name: &str) {
    let tmp = TempDir::new().unwrap();
    let (_fake, manager, _state) = manager(&tmp);
    let err = manager.add(name).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

fn expect_bookmark_rows(fake: &braid::exec::FakeExec, times: usize) {
    for _ in 0..times {
        fake.expect_ok(
            jj_args(&["bookmark", "list", "--all-remotes", "-T", BOOKMARK_TEMPLATE]),
            "agent-1\t\twsaa1111\t\t\nagent-1\torigin\twsaa1111\t1\t0\n",
        );
    }
}

#[test]
fn remove_runs_teardown_in_mandatory_order() {
    let tmp = TempDir::new().unwrap();
    let (fake, manager, state) = manager(&tmp);
    let dir = manager.dir_of("agent-1");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("leftover.rs"), b"x").unwrap();
    let _ = state;

    expect_log(&fake, "agent-1@", &format!("{}\n", tip_row("wsaa1111", "wip: agent-1")));
    expect_bookmark_rows(&fake, 2);

    manager.remove("agent-1").unwrap();
    assert!(!dir.exists());

    let position = |prefix: &[&str]| {
        fake.calls()
            .iter()
            .position(|call| call.len() >= prefix.len() + 4 && call[4..4 + prefix.len()]
                .iter()
                .zip(prefix)
                .all(|(a, b)| a == b))
            .unwrap_or_else(|| panic!("missing call {prefix:?}"))
    };
    let untrack = position(&["bookmark", "untrack", "agent-1@origin"]);
    let delete = position(&["bookmark", "delete", "agent-1"]);
    let forget = position(&["workspace", "forget", "agent-1"]);
    let abandon = position(&["abandon", "-r", "wsaa1111"]);
    assert!(untrack < delete, "untrack remote before deleting local");
    assert!(delete < forget, "bookmarks off before forgetting the workspace");
    assert!(forget < abandon, "forget before abandoning the tip");
}

#[test]
fn remove_keeps_going_after_a_failing_step() {
    let tmp = TempDir::new().unwrap();
    let (fake, manager, _state) = manager(&tmp);
    let dir = manager.dir_of("agent-1");
    fs::create_dir_all(&dir).unwrap();

    expect_log(&fake, "agent-1@", &format!("{}\n", tip_row("wsaa1111", "wip: agent-1")));
    expect_bookmark_rows(&fake, 2);
    // The untrack step fails; teardown must still run to the end.
    fake.expect_fail(
        jj_args(&["bookmark", "untrack", "agent-1@origin"]),
        1,
        "Error: remote is gone",
    );

    let err = manager.remove("agent-1").unwrap_err();
    assert!(err.message.contains("removing workspace"));

    assert!(fake.called_with_prefix(&[
        "jj", "--no-pager", "--color", "never", "workspace", "forget", "agent-1"
    ]));
    assert!(fake.called_with_prefix(&[
        "jj", "--no-pager", "--color", "never", "abandon", "-r", "wsaa1111"
    ]));
    assert!(!dir.exists(), "directory removal still ran");
}

#[test]
fn strip_wip_prefix_rewrites_description() {
    let tmp = TempDir::new().unwrap();
    let (fake, manager, _state) = manager(&tmp);
    expect_log(
        &fake,
        "agent-1@",
        &format!("{}\n", tip_row("wsaa1111", "wip: Implement parser")),
    );

    let description = manager.strip_wip_prefix("agent-1").unwrap();
    assert_eq!(description, "Implement parser");
    assert!(fake.called_with_prefix(&[
        "jj", "--no-pager", "--color", "never", "describe", "-r", "agent-1@", "-m",
        "Implement parser"
    ]));
}

#[test]
fn strip_wip_prefix_with_no_real_message_fails() {
    let tmp = TempDir::new().unwrap();
    let (fake, manager, _state) = manager(&tmp);
    expect_log(&fake, "agent-1@", &format!("{}\n", tip_row("wsaa1111", "wip: ")));

    let err = manager.strip_wip_prefix("agent-1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingMessage);
}

#[test]
fn strip_wip_prefix_leaves_clean_descriptions_alone() {
    let tmp = TempDir::new().unwrap();
    let (fake, manager, _state) = manager(&tmp);
    expect_log(
        &fake,
        "agent-1@",
        &format!("{}\n", tip_row("wsaa1111", "Already submitted once")),
    );

    let description = manager.strip_wip_prefix("agent-1").unwrap();
    assert_eq!(description, "Already submitted once");
    // No describe call for an already-clean description.
    assert!(!fake.called_with_prefix(&["jj", "--no-pager", "--color", "never", "describe"]));
}
