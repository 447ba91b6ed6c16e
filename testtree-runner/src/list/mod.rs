// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test discovery: artifact enumeration and test-name reconciliation.

mod artifact_list;
mod discovery;

pub use artifact_list::{ArtifactStream, BuildArtifact, collect_artifacts};
pub use discovery::{DiscoverySummary, discover};
