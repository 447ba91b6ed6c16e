// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events delivered to the host while discovering and running tests.

use crate::tree::NodeId;

/// A status or output event produced by a discovery or run operation.
///
/// Events are produced by [`TestSession`](crate::session::TestSession)
/// operations and consumed by whatever renders the test tree. Status events
/// mirror the transitions recorded on the tree itself; output events carry
/// log lines the host should append to its output pane.
#[derive(Clone, Debug, PartialEq)]
pub enum TestEvent {
    /// A test or target started running.
    Started {
        /// The node that started.
        node: NodeId,
    },

    /// A test or target passed.
    Passed {
        /// The node that passed.
        node: NodeId,
        /// Wall-clock execution time in seconds, if the harness reported one.
        exec_time: Option<f64>,
    },

    /// A test or target failed.
    Failed {
        /// The node that failed.
        node: NodeId,
        /// Failure detail, typically the test's captured stdout.
        message: String,
    },

    /// A test finished without a pass/fail verdict (for example, an ignored
    /// test).
    Finished {
        /// The node that finished.
        node: NodeId,
    },

    /// A line of log output.
    Output {
        /// The target this output belongs to, or `None` for session-level
        /// output such as compiler diagnostics during discovery.
        node: Option<NodeId>,
        /// The output text. May contain embedded newlines.
        line: String,
    },
}

/// Consumes [`TestEvent`] values as an operation produces them.
pub trait EventSink {
    /// Handles a single event.
    fn event(&mut self, event: TestEvent);
}

/// Collects events for later inspection. Mostly useful in tests.
impl EventSink for Vec<TestEvent> {
    fn event(&mut self, event: TestEvent) {
        self.push(event);
    }
}
