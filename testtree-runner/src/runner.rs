// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Executing a selected subset of the test tree and reconciling the live
//! event stream back onto it.
//!
//! The requested nodes are grouped by build target; each group becomes one
//! tool invocation with the minimal name filters, run strictly sequentially
//! so that output interleaving and status updates stay unambiguous per
//! target.

use crate::{
    command::{self, CommandLine, OutputLine},
    errors::CommandError,
    events::{EventSink, TestEvent},
    tree::{NodeId, TestOutcome, TestTree},
};
use camino::Utf8Path;
use indexmap::IndexMap;
use serde::Deserialize;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{error, warn};

/// A request to run some subset of the discovered tree.
#[derive(Clone, Debug, Default)]
pub struct RunRequest {
    /// Nodes to run. When empty, every target root is included.
    pub include: Vec<NodeId>,
    /// Nodes to exclude from the run.
    pub exclude: Vec<NodeId>,
}

/// Counts for a completed run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of target groups executed.
    pub groups: usize,
    /// Number of target groups that failed.
    pub failed_groups: usize,
}

/// Requests that a run stop scheduling further target groups.
///
/// Cancellation is cooperative and coarse: it is checked between target
/// groups only, so a subprocess that is already running is allowed to
/// finish. Cloned handles share the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Creates a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags the run as cancelled.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True if [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One target's worth of work in a run request.
#[derive(Debug)]
struct TargetGroup {
    report_node: NodeId,
    package: String,
    selector: Vec<String>,
    filters: BTreeSet<String>,
    run_all: bool,
}

/// Runs the requested subset of the tree, strictly one target group at a
/// time, and returns the per-group tallies.
pub(crate) async fn run_tests(
    tool: &Utf8Path,
    workspace_dir: &Utf8Path,
    tree: &mut TestTree,
    request: &RunRequest,
    cancel: &CancelHandle,
    sink: &mut dyn EventSink,
) -> RunSummary {
    let (groups, skips) = group_request(tree, request);
    let no_skips = BTreeSet::new();
    let mut summary = RunSummary::default();

    for group in groups {
        if cancel.is_cancelled() {
            sink.event(TestEvent::Output {
                node: Some(group.report_node),
                line: "run cancelled; skipping remaining targets".to_owned(),
            });
            break;
        }

        let args = build_run_args(&group, skips.get(&group.package).unwrap_or(&no_skips));
        let cmd = CommandLine::new(tool.to_owned(), args, workspace_dir.to_owned());
        sink.event(TestEvent::Output {
            node: Some(group.report_node),
            line: format!("Running: {}", cmd.display()),
        });
        tree.set_running(group.report_node, true);
        sink.event(TestEvent::Started {
            node: group.report_node,
        });

        let mut state = GroupState::default();
        let result = command::stream(&cmd, |line| match line {
            OutputLine::Stdout(text) => {
                state.handle_stdout(tree, sink, group.report_node, &group.package, text);
            }
            OutputLine::Stderr(text) => sink.event(TestEvent::Output {
                node: Some(group.report_node),
                line: text.to_owned(),
            }),
        })
        .await;

        summary.groups += 1;
        if result.is_err() {
            summary.failed_groups += 1;
        }
        state.finalize(tree, sink, group.report_node, result);
    }

    summary
}

/// Partitions the request into per-target groups and per-package skip sets.
///
/// Included nodes are grouped by their owning target, in request order. An
/// inclusion with an empty name path means "this whole target" and
/// suppresses name filters for its group. Excluded nodes contribute their
/// name paths to the skip set of their package; excluding a target root
/// removes that target's group outright.
fn group_request(
    tree: &TestTree,
    request: &RunRequest,
) -> (Vec<TargetGroup>, HashMap<String, BTreeSet<String>>) {
    let mut skips: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut excluded_targets = Vec::new();
    for &node in &request.exclude {
        let path = tree.name_path(node);
        if path.is_empty() {
            excluded_targets.push(tree.target_slot(node));
        } else {
            skips
                .entry(tree.target(node).package.clone())
                .or_default()
                .insert(path.join("::"));
        }
    }

    let roots;
    let include = if request.include.is_empty() {
        roots = tree.roots().to_vec();
        &roots
    } else {
        &request.include
    };

    let mut groups: IndexMap<usize, TargetGroup> = IndexMap::new();
    for &node in include {
        let slot = tree.target_slot(node);
        if excluded_targets.contains(&slot) {
            continue;
        }
        let target = tree.target(node);
        let group = groups.entry(slot).or_insert_with(|| TargetGroup {
            // The root registered first for this target reports its summary.
            report_node: root_of(tree, node),
            package: target.package.clone(),
            selector: target.kind.selector_args(&target.name),
            filters: BTreeSet::new(),
            run_all: false,
        });
        let path = tree.name_path(node);
        if path.is_empty() {
            group.run_all = true;
        } else {
            group.filters.insert(path.join("::"));
        }
    }

    (groups.into_values().collect(), skips)
}

fn root_of(tree: &TestTree, node: NodeId) -> NodeId {
    let slot = tree.target_slot(node);
    tree.roots()
        .iter()
        .copied()
        .find(|&root| tree.target_slot(root) == slot)
        .unwrap_or(node)
}

/// Builds the final argument vector for one target group.
fn build_run_args(group: &TargetGroup, skips: &BTreeSet<String>) -> Vec<String> {
    let mut args = vec![
        "test".to_owned(),
        "--package".to_owned(),
        group.package.clone(),
    ];
    args.extend(group.selector.iter().cloned());
    args.push("--".to_owned());
    // The JSON event stream is behind an unstable harness flag.
    args.extend(
        ["-Z", "unstable-options", "--format", "json"]
            .iter()
            .map(|s| (*s).to_owned()),
    );
    for skip in skips {
        args.push("--skip".to_owned());
        args.push(skip.clone());
    }
    if !group.run_all {
        for filter in &group.filters {
            args.push(filter.clone());
        }
    }
    args
}

/// One line of the test harness's JSON event stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HarnessMessage {
    Suite {
        #[serde(default)]
        exec_time: Option<f64>,
        #[serde(default)]
        failed: Option<u64>,
    },
    Test {
        event: String,
        name: String,
        #[serde(default)]
        stdout: Option<String>,
    },
}

/// Per-group stream state: the suite tallies seen so far.
#[derive(Debug, Default)]
struct GroupState {
    exec_time: Option<f64>,
    failed: Option<u64>,
}

impl GroupState {
    /// Applies one stdout line to the tree.
    ///
    /// Lines that are not recognized harness messages are ignored; the tool
    /// is free to print other things on stdout.
    fn handle_stdout(
        &mut self,
        tree: &mut TestTree,
        sink: &mut dyn EventSink,
        report_node: NodeId,
        package: &str,
        line: &str,
    ) {
        let Ok(message) = serde_json::from_str::<HarnessMessage>(line) else {
            return;
        };
        match message {
            HarnessMessage::Suite { exec_time, failed } => {
                if exec_time.is_some() {
                    self.exec_time = exec_time;
                }
                if failed.is_some() {
                    self.failed = failed;
                }
            }
            HarnessMessage::Test {
                event,
                name,
                stdout,
            } => {
                let key = format!("{package}::{name}");
                let Some(node) = tree.resolve(&key) else {
                    // Discovery should have produced a node for every test
                    // the harness can report.
                    error!("test event for `{key}` does not match any discovered test");
                    return;
                };
                self.apply_test_event(tree, sink, report_node, node, &event, stdout, line);
            }
        }
    }

    #[expect(clippy::too_many_arguments)]
    fn apply_test_event(
        &mut self,
        tree: &mut TestTree,
        sink: &mut dyn EventSink,
        report_node: NodeId,
        node: NodeId,
        event: &str,
        stdout: Option<String>,
        raw_line: &str,
    ) {
        match event {
            "started" => {
                tree.set_running(node, true);
                sink.event(TestEvent::Started { node });
            }
            "ok" => {
                tree.set_running(node, false);
                tree.record_outcome(node, TestOutcome::Passed { exec_time: None });
                sink.event(TestEvent::Passed {
                    node,
                    exec_time: None,
                });
            }
            "ignored" => {
                tree.set_running(node, false);
                sink.event(TestEvent::Finished { node });
            }
            "failed" => {
                tree.set_running(node, false);
                let message = stdout.unwrap_or_else(|| "test failed".to_owned());
                tree.record_outcome(
                    node,
                    TestOutcome::Failed {
                        message: message.clone(),
                    },
                );
                sink.event(TestEvent::Failed { node, message });
            }
            other => {
                // Unknown event vocabulary: fail the node rather than drop
                // the event, so forward-incompatible harnesses stay visible.
                warn!("unhandled test event `{other}`");
                sink.event(TestEvent::Output {
                    node: Some(report_node),
                    line: raw_line.to_owned(),
                });
                tree.set_running(node, false);
                let message = format!("unhandled test event `{other}`");
                tree.record_outcome(
                    node,
                    TestOutcome::Failed {
                        message: message.clone(),
                    },
                );
                sink.event(TestEvent::Failed { node, message });
            }
        }
    }

    /// Records the target-level verdict once the process has exited.
    ///
    /// The exit code is authoritative: a non-zero exit marks the group
    /// failed even if every received per-test event reported ok.
    fn finalize(
        self,
        tree: &mut TestTree,
        sink: &mut dyn EventSink,
        report_node: NodeId,
        result: Result<(), CommandError>,
    ) {
        tree.set_running(report_node, false);
        match result {
            Ok(()) => {
                tree.record_outcome(
                    report_node,
                    TestOutcome::Passed {
                        exec_time: self.exec_time,
                    },
                );
                sink.event(TestEvent::Passed {
                    node: report_node,
                    exec_time: self.exec_time,
                });
            }
            Err(error) => {
                let message = match (self.failed, &error) {
                    (Some(failed), _) => format!("{failed} test(s) failed"),
                    (None, CommandError::Launch { .. }) => {
                        format!("failed to start test run: {error}")
                    }
                    (None, _) => "test run failed (unknown failed count)".to_owned(),
                };
                tree.record_outcome(
                    report_node,
                    TestOutcome::Failed {
                        message: message.clone(),
                    },
                );
                sink.event(TestEvent::Failed {
                    node: report_node,
                    message,
                });
            }
        }
    }
}
