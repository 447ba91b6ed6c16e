// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{OutputOpts, Styles};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, bail};
use owo_colors::OwoColorize;
use std::collections::HashMap;
use testtree_runner::{
    events::{EventSink, TestEvent},
    runner::{CancelHandle, RunRequest},
    session::TestSession,
    tree::{NodeId, TestTree},
};

/// Discover and run a workspace's tests as a live status tree.
#[derive(Debug, Parser)]
#[command(name = "cargo-testtree", version)]
pub(crate) struct TesttreeApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover tests and print the test tree
    List {
        /// Path to the workspace to discover
        #[arg(long, value_name = "DIR", default_value = ".")]
        workspace_dir: Utf8PathBuf,
    },
    /// Run tests, streaming live status transitions
    Run {
        /// Path to the workspace to run in
        #[arg(long, value_name = "DIR", default_value = ".")]
        workspace_dir: Utf8PathBuf,

        /// Tests to run, as `package` or `package::test::path`. Runs
        /// everything when omitted.
        filters: Vec<String>,

        /// Tests to exclude, same syntax as the filters
        #[arg(long = "skip", value_name = "FILTER")]
        skip: Vec<String>,
    },
}

impl TesttreeApp {
    pub(crate) fn exec(self) -> Result<i32> {
        let styles = self.output.init();
        // The engine is fully sequential; a current-thread runtime is the
        // single cooperative event loop it expects.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .wrap_err("failed to build Tokio runtime")?;

        match self.command {
            Command::List { workspace_dir } => {
                runtime.block_on(exec_list(workspace_dir, styles))
            }
            Command::Run {
                workspace_dir,
                filters,
                skip,
            } => runtime.block_on(exec_run(workspace_dir, filters, skip, styles)),
        }
    }
}

async fn exec_list(workspace_dir: Utf8PathBuf, styles: Styles) -> Result<i32> {
    let mut session = TestSession::new(workspace_dir);
    let mut sink = DiscoverySink;
    let summary = session
        .discover(&mut sink)
        .await
        .wrap_err("test discovery failed")?;

    let tree = session.tree();
    for &root in tree.roots() {
        print_subtree(tree, root, 0, &styles);
    }
    println!(
        "{} targets, {} tests",
        summary.targets.style(styles.count),
        summary.tests.style(styles.count),
    );
    Ok(0)
}

async fn exec_run(
    workspace_dir: Utf8PathBuf,
    filters: Vec<String>,
    skip: Vec<String>,
    styles: Styles,
) -> Result<i32> {
    let mut session = TestSession::new(workspace_dir);
    let mut sink = DiscoverySink;
    session
        .discover(&mut sink)
        .await
        .wrap_err("test discovery failed")?;

    let request = build_request(session.tree(), &filters, &skip)?;
    let labels: HashMap<NodeId, String> = session
        .tree()
        .ids()
        .map(|id| (id, session.tree().qualified_name(id)))
        .collect();

    let mut sink = StatusSink {
        labels: &labels,
        styles: &styles,
    };
    let summary = session
        .run(&request, &CancelHandle::new(), &mut sink)
        .await;

    println!(
        "{} target(s) run, {} failed",
        summary.groups.style(styles.count),
        summary.failed_groups.style(if summary.failed_groups > 0 {
            styles.fail
        } else {
            styles.pass
        }),
    );
    Ok(if summary.failed_groups > 0 { 1 } else { 0 })
}

/// Maps user filters onto tree nodes: an exact `package::path` key, or a
/// package/label match selecting whole targets.
fn resolve_filter(tree: &TestTree, filter: &str) -> Vec<NodeId> {
    if let Some(node) = tree.resolve(filter) {
        return vec![node];
    }
    tree.roots()
        .iter()
        .copied()
        .filter(|&root| tree.target(root).package == filter || tree.label(root) == filter)
        .collect()
}

fn build_request(tree: &TestTree, filters: &[String], skip: &[String]) -> Result<RunRequest> {
    let mut request = RunRequest::default();
    for filter in filters {
        let nodes = resolve_filter(tree, filter);
        if nodes.is_empty() {
            bail!("filter `{filter}` does not match any discovered test");
        }
        request.include.extend(nodes);
    }
    for filter in skip {
        let nodes = resolve_filter(tree, filter);
        if nodes.is_empty() {
            bail!("skip filter `{filter}` does not match any discovered test");
        }
        request.exclude.extend(nodes);
    }
    Ok(request)
}

fn print_subtree(tree: &TestTree, node: NodeId, depth: usize, styles: &Styles) {
    let label = tree.label(node);
    let indent = "  ".repeat(depth);
    if depth == 0 {
        println!("{indent}{}", label.style(styles.target));
    } else {
        println!("{indent}{label}");
    }
    for &child in tree.children(node) {
        print_subtree(tree, child, depth + 1, styles);
    }
}

/// Forwards discovery output (compiler diagnostics, build logs) to stderr.
struct DiscoverySink;

impl EventSink for DiscoverySink {
    fn event(&mut self, event: TestEvent) {
        if let TestEvent::Output { line, .. } = event {
            eprintln!("{line}");
        }
    }
}

/// Renders live status transitions as they arrive.
struct StatusSink<'a> {
    labels: &'a HashMap<NodeId, String>,
    styles: &'a Styles,
}

impl StatusSink<'_> {
    fn label(&self, node: NodeId) -> &str {
        self.labels.get(&node).map_or("<unknown>", String::as_str)
    }
}

impl EventSink for StatusSink<'_> {
    fn event(&mut self, event: TestEvent) {
        match event {
            TestEvent::Started { node } => {
                println!(
                    "{:>8}  {}",
                    "RUN".style(self.styles.running),
                    self.label(node)
                );
            }
            TestEvent::Passed { node, exec_time } => match exec_time {
                Some(seconds) => println!(
                    "{:>8}  {} ({seconds:.2}s)",
                    "PASS".style(self.styles.pass),
                    self.label(node)
                ),
                None => println!(
                    "{:>8}  {}",
                    "PASS".style(self.styles.pass),
                    self.label(node)
                ),
            },
            TestEvent::Failed { node, message } => {
                let first_line = message.lines().next().unwrap_or_default();
                println!(
                    "{:>8}  {}: {first_line}",
                    "FAIL".style(self.styles.fail),
                    self.label(node)
                );
            }
            TestEvent::Finished { node } => {
                println!("{:>8}  {}", "IGNORED", self.label(node));
            }
            TestEvent::Output { line, .. } => {
                println!("{line}");
            }
        }
    }
}
