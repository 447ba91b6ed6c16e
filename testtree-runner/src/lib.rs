// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [cargo testtree](https://crates.io/crates/cargo-testtree).
//!
//! This crate discovers and runs the tests of a Cargo workspace and projects
//! the results into a hierarchical tree with live pass/fail/running status,
//! suitable for a test-explorer style host UI.
//!
//! The basic flow of operations:
//!
//! 1. [`session::TestSession::discover`] builds the workspace's test targets
//!    (`cargo test --no-run --message-format=json`), interprets the JSON
//!    message stream into a list of compiled artifacts, then asks each test
//!    binary for its test names (`--list`) and reconciles them into a
//!    [`tree::TestTree`].
//! 2. [`session::TestSession::run`] takes include/exclude sets of tree nodes,
//!    groups them by build target, invokes the tool once per group with the
//!    minimal name filters, and routes the libtest JSON event stream back
//!    onto the tree as live status transitions.
//!
//! Hosts observe both operations through an [`events::EventSink`].

pub mod cargo_cli;
pub mod command;
pub mod errors;
pub mod events;
pub mod list;
pub mod runner;
pub mod session;
pub mod tree;
