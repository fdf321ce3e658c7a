//! Sync-engine properties over real temp trees (with jj faked).

mod common;

use std::fs;

use braid::state::{DaemonLog, FocusState, StateDir};
use braid::sync::{route_preview_edits, sync_agents_to_preview};
use tempfile::TempDir;

use common::{fake_vcs, jj_args};

struct Fixture {
    _tmp: TempDir,
    state: StateDir,
    repo: std::path::PathBuf,
    fake: std::sync::Arc<braid::exec::FakeExec>,
    vcs: braid::vcs::Vcs,
}

fn fixture(focused: &[&str]) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let state = StateDir::new(tmp.path().join("state"));
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    FocusState {
        workspaces: focused.iter().map(|s| s.to_string()).collect(),
    }
    .store(&state, &repo)
    .unwrap();
    for name in focused {
        fs::create_dir_all(state.workspace_dir(&repo, name)).unwrap();
    }
    let (fake, vcs) = fake_vcs();
    Fixture {
        _tmp: tmp,
        state,
        repo,
        fake,
        vcs,
    }
}

#[test]
fn disjoint_edits_land_in_exactly_one_workspace() {
    let fx = fixture(&["alpha", "beta"]);
    fs::write(fx.repo.join("alpha-file.rs"), b"alpha edit").unwrap();
    fs::write(fx.repo.join("beta-file.rs"), b"beta edit").unwrap();

    fx.fake.expect_ok(
        jj_args(&["diff", "--summary"]),
        "M alpha-file.rs\nM beta-file.rs\n",
    );
    fx.fake.expect_ok(
        jj_args(&["diff", "-r", "alpha@", "--summary"]),
        "M alpha-file.rs\n",
    );
    fx.fake.expect_ok(
        jj_args(&["diff", "-r", "beta@", "--summary"]),
        "M beta-file.rs\n",
    );

    let log = DaemonLog::new(&fx.state);
    let stats = route_preview_edits(&fx.vcs, &fx.state, &fx.repo, &log).unwrap();
    assert_eq!(stats.copied, 2);
    assert_eq!(stats.warnings, 0);

    let alpha = fx.state.workspace_dir(&fx.repo, "alpha");
    let beta = fx.state.workspace_dir(&fx.repo, "beta");
    // Each change lands in its owner and only its owner.
    assert!(alpha.join("alpha-file.rs").exists());
    assert!(!alpha.join("beta-file.rs").exists());
    assert!(beta.join("beta-file.rs").exists());
    assert!(!beta.join("alpha-file.rs").exists());
}

#[test]
fn second_pass_in_either_direction_writes_nothing() {
    let fx = fixture(&["alpha"]);
    let ws = fx.state.workspace_dir(&fx.repo, "alpha");
    fs::write(fx.repo.join("shared.rs"), b"one source of truth").unwrap();

    // Route twice, then sync twice; every pass sees the same diff.
    for _ in 0..2 {
        fx.fake
            .expect_ok(jj_args(&["diff", "--summary"]), "M shared.rs\n");
    }
    for _ in 0..2 {
        fx.fake.expect_ok(
            jj_args(&["diff", "-r", "alpha@", "--summary"]),
            "M shared.rs\n",
        );
    }

    let log = DaemonLog::new(&fx.state);
    let first_route = route_preview_edits(&fx.vcs, &fx.state, &fx.repo, &log).unwrap();
    assert_eq!(first_route.copied, 1);
    let second_route = route_preview_edits(&fx.vcs, &fx.state, &fx.repo, &log).unwrap();
    assert!(second_route.is_noop());

    let first_sync = sync_agents_to_preview(&fx.vcs, &fx.state, &fx.repo, &log).unwrap();
    assert!(first_sync.is_noop(), "bytes already equal after routing");
    let second_sync = sync_agents_to_preview(&fx.vcs, &fx.state, &fx.repo, &log).unwrap();
    assert!(second_sync.is_noop());

    assert_eq!(fs::read(ws.join("shared.rs")).unwrap(), b"one source of truth");
}

#[test]
fn agent_edit_round_trip_does_not_ping_pong() {
    let fx = fixture(&["alpha"]);
    let ws = fx.state.workspace_dir(&fx.repo, "alpha");
    fs::write(ws.join("agent.rs"), b"agent wrote this").unwrap();

    fx.fake.expect_ok(
        jj_args(&["diff", "-r", "alpha@", "--summary"]),
        "A agent.rs\n",
    );
    // The preview edit the sync just made fires the preview watcher; the
    // resulting route pass must find equal bytes.
    fx.fake
        .expect_ok(jj_args(&["diff", "--summary"]), "A agent.rs\n");

    let log = DaemonLog::new(&fx.state);
    let synced = sync_agents_to_preview(&fx.vcs, &fx.state, &fx.repo, &log).unwrap();
    assert_eq!(synced.copied, 1);
    assert_eq!(fs::read(fx.repo.join("agent.rs")).unwrap(), b"agent wrote this");

    let echoed = route_preview_edits(&fx.vcs, &fx.state, &fx.repo, &log).unwrap();
    assert!(echoed.is_noop(), "feedback loop must die at the content gate");
}

#[test]
fn per_file_failures_do_not_halt_the_pass() {
    let fx = fixture(&["alpha"]);
    // vanished.rs is listed in the diff but missing on disk: the copy
    // fails, the other file still lands.
    fs::write(fx.repo.join("good.rs"), b"fine").unwrap();
    fx.fake.expect_ok(
        jj_args(&["diff", "--summary"]),
        "M vanished.rs\nM good.rs\n",
    );

    let log = DaemonLog::new(&fx.state);
    let stats = route_preview_edits(&fx.vcs, &fx.state, &fx.repo, &log).unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.copied, 1);
    assert!(
        fx.state
            .workspace_dir(&fx.repo, "alpha")
            .join("good.rs")
            .exists()
    );
    let logged = fs::read_to_string(fx.state.log_path()).unwrap();
    assert!(logged.contains("vanished.rs"));
}
