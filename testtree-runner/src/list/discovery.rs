// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two-phase test discovery.
//!
//! Phase A builds every test target in the workspace (without running
//! anything) and interprets the JSON message stream into a list of test
//! binaries. Phase B runs the harness's `--list` mode over the same scope
//! and reconciles the reported test names into a tree, one root per target.

use crate::{
    cargo_cli::ArtifactSpec,
    command::{self, CommandLine},
    errors::DiscoveryError,
    events::EventSink,
    list::artifact_list,
    tree::{TargetKind, TestTarget, TestTree},
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Counts from a completed discovery pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    /// Number of test targets discovered.
    pub targets: usize,
    /// Number of leaf tests discovered.
    pub tests: usize,
}

/// Matches the harness header the tool prints before each binary's listing,
/// e.g. `Running unittests src/lib.rs (target/debug/deps/foo-abc123)`.
static RUNNING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Running\s.*\((?P<path>[^()]+)\)\s*$").expect("running-line regex is valid")
});

/// Matches one listed test, e.g. `    tests::it_works: test`. The harness
/// emits these unindented; some frontends indent them, so leading whitespace
/// is optional.
static TEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<name>\S+): (?:test|benchmark)$").expect("test-line regex is valid")
});

/// Rebuilds `tree` from scratch for the workspace at `workspace_dir`.
///
/// A build failure yields a partial or empty tree rather than an error;
/// only a tool that cannot be launched at all is fatal.
pub async fn discover(
    tool: &Utf8Path,
    workspace_dir: &Utf8Path,
    tree: &mut TestTree,
    sink: &mut dyn EventSink,
) -> Result<DiscoverySummary, DiscoveryError> {
    tree.clear();

    // Phase A: enumerate test binaries.
    let spec = ArtifactSpec::from_args(["test", "--workspace", "--all-targets"]);
    let artifacts = artifact_list::collect_artifacts(tool, workspace_dir, &spec, sink)
        .await
        .map_err(DiscoveryError::Launch)?;
    for artifact in artifacts {
        let target = TestTarget {
            package: artifact.package_name,
            kind: TargetKind::from_cargo_kind(&artifact.kind),
            name: artifact.name,
        };
        tree.register_target(target, artifact.binary_path);
    }

    // Phase B: enumerate test names per binary.
    let list_args = ["test", "--workspace", "--all-targets", "--", "--list"]
        .map(str::to_owned)
        .to_vec();
    let cmd = CommandLine::new(tool.to_owned(), list_args, workspace_dir.to_owned());
    let mut current = None;
    let result = command::stream_buffered(&cmd, |line| {
        process_list_line(tree, &mut current, workspace_dir, line);
    })
    .await;
    if let Err(error) = result {
        warn!("test listing did not complete cleanly: {error}");
    }

    Ok(DiscoverySummary {
        targets: tree.roots().len(),
        tests: tree.test_count(),
    })
}

/// Processes one line of merged list-mode output against the phase-A tree.
fn process_list_line(
    tree: &mut TestTree,
    current: &mut Option<crate::tree::NodeId>,
    workspace_dir: &Utf8Path,
    line: &str,
) {
    if let Some(captures) = RUNNING_LINE.captures(line) {
        let path = Utf8Path::new(&captures["path"]);
        *current = tree
            .root_for_binary(path)
            .or_else(|| tree.root_for_binary(&resolve_relative(workspace_dir, path)));
        if current.is_none() {
            warn!("no artifact known for list output path `{path}`");
        }
        return;
    }
    if let Some(captures) = TEST_LINE.captures(line) {
        let Some(root) = *current else {
            // No target context; the name cannot be attributed to a binary.
            debug!("dropping listed test `{}` outside any target", &captures["name"]);
            return;
        };
        let segments: Vec<String> = captures["name"].split("::").map(str::to_owned).collect();
        tree.insert_test_path(root, &segments);
    }
}

fn resolve_relative(workspace_dir: &Utf8Path, path: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        workspace_dir.join(path)
    }
}
