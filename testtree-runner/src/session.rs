// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A test session: tree storage, configuration, and the discovery and run
//! operations that mutate the tree.
//!
//! Sessions replace process-wide state. Everything a discovery pass or a
//! run needs is owned here and passed by reference, so hosts can hold
//! several independent sessions.

use crate::{
    cargo_cli,
    errors::DiscoveryError,
    events::EventSink,
    list::{self, DiscoverySummary},
    runner::{self, CancelHandle, RunRequest, RunSummary},
    tree::TestTree,
};
use camino::{Utf8Path, Utf8PathBuf};

/// Owns the test tree and configuration for one workspace.
#[derive(Debug)]
pub struct TestSession {
    workspace_dir: Utf8PathBuf,
    tool: Utf8PathBuf,
    tree: TestTree,
}

impl TestSession {
    /// Creates a session rooted at `workspace_dir`, resolving the build tool
    /// once for the session's lifetime.
    pub fn new(workspace_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            tool: cargo_cli::resolve_tool("cargo"),
            tree: TestTree::new(),
        }
    }

    /// Overrides the build tool this session invokes.
    pub fn with_build_tool(mut self, tool: impl Into<Utf8PathBuf>) -> Self {
        self.tool = tool.into();
        self
    }

    /// The workspace directory this session operates on.
    pub fn workspace_dir(&self) -> &Utf8Path {
        &self.workspace_dir
    }

    /// The discovered test tree. Empty until [`discover`](Self::discover)
    /// has run.
    pub fn tree(&self) -> &TestTree {
        &self.tree
    }

    /// Rebuilds the test tree from scratch via two-phase discovery.
    ///
    /// Compiler diagnostics and build output are forwarded to `sink` as
    /// session-level output events. Build failures degrade to a partial or
    /// empty tree; only an unlaunchable build tool is an error.
    pub async fn discover(
        &mut self,
        sink: &mut dyn EventSink,
    ) -> Result<DiscoverySummary, DiscoveryError> {
        list::discover(&self.tool, &self.workspace_dir, &mut self.tree, sink).await
    }

    /// Runs the requested subset of the tree, streaming status transitions
    /// to `sink`.
    ///
    /// Target groups run strictly sequentially; `cancel` is honored between
    /// groups, letting an in-flight subprocess finish. A failing group never
    /// aborts the run as a whole.
    pub async fn run(
        &mut self,
        request: &RunRequest,
        cancel: &CancelHandle,
        sink: &mut dyn EventSink,
    ) -> RunSummary {
        runner::run_tests(
            &self.tool,
            &self.workspace_dir,
            &mut self.tree,
            request,
            cancel,
            sink,
        )
        .await
    }
}
