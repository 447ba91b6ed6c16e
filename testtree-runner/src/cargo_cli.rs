// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locating the build tool and deriving artifact-producing invocations.

use crate::list::BuildArtifact;
use camino::Utf8PathBuf;
use std::{
    collections::HashMap,
    env,
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

/// Resolved tool paths, keyed by executable name.
///
/// There is no invalidation policy: entries live for the rest of the
/// process. Tools are not expected to move while a session is open.
static TOOL_PATH_CACHE: LazyLock<Mutex<HashMap<String, Utf8PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Resolves the path to `tool`, memoizing the result.
///
/// Resolution order: the `CARGO` environment variable (for `cargo` itself),
/// a `PATH` search, the conventional `~/.cargo/bin` install directory, and
/// finally the bare name, deferring resolution to the OS.
pub fn resolve_tool(tool: &str) -> Utf8PathBuf {
    let mut cache = TOOL_PATH_CACHE.lock().expect("tool path cache lock poisoned");
    if let Some(path) = cache.get(tool) {
        return path.clone();
    }
    let path = resolve_tool_uncached(tool);
    cache.insert(tool.to_owned(), path.clone());
    path
}

fn resolve_tool_uncached(tool: &str) -> Utf8PathBuf {
    if tool == "cargo"
        && let Some(cargo_path) = env::var_os("CARGO")
        && let Ok(path) = Utf8PathBuf::try_from(PathBuf::from(cargo_path))
    {
        return path;
    }
    if let Some(path) = search_path(tool) {
        return path;
    }
    if let Some(home) = home::home_dir() {
        let candidate = home.join(".cargo").join("bin").join(tool);
        if candidate.is_file()
            && let Ok(path) = Utf8PathBuf::try_from(candidate)
        {
            return path;
        }
    }
    Utf8PathBuf::from(tool)
}

fn search_path(tool: &str) -> Option<Utf8PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path).find_map(|dir| {
        let candidate = dir.join(tool);
        candidate
            .is_file()
            .then(|| Utf8PathBuf::try_from(candidate).ok())
            .flatten()
    })
}

/// Filter applied to the artifacts collected from one build invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactFilter {
    /// Keep only artifacts built as test binaries.
    TestOnly,
}

impl ArtifactFilter {
    /// Applies the filter to a collected artifact list.
    pub fn apply(self, artifacts: Vec<BuildArtifact>) -> Vec<BuildArtifact> {
        match self {
            Self::TestOnly => artifacts.into_iter().filter(|a| a.is_test).collect(),
        }
    }
}

/// A build-tool invocation derived from a raw argument list, plus the filter
/// to apply to the artifacts it reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactSpec {
    /// Arguments to pass to the build tool.
    pub cargo_args: Vec<String>,
    /// Filter applied to the collected artifacts, if any.
    pub filter: Option<ArtifactFilter>,
}

impl ArtifactSpec {
    /// Derives the invocation that produces enumerable artifacts for `args`.
    ///
    /// `run` builds its artifact without running it, and `test` compiles
    /// tests without executing them; both leave binaries on disk for the
    /// caller to enumerate. JSON message output is always requested.
    ///
    /// This is a pure function of `args`.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cargo_args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut filter = None;
        match cargo_args.first().map(String::as_str) {
            Some("run") => {
                // Runnable artifacts are produced by building, not running.
                cargo_args[0] = "build".to_owned();
            }
            Some("test") => {
                if !cargo_args.iter().any(|arg| arg == "--no-run") {
                    cargo_args.push("--no-run".to_owned());
                }
                filter = Some(ArtifactFilter::TestOnly);
            }
            _ => {}
        }
        cargo_args.push("--message-format=json".to_owned());
        Self { cargo_args, filter }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn artifact(name: &str, is_test: bool) -> BuildArtifact {
        BuildArtifact {
            binary_path: format!("/t/{name}").into(),
            package_name: name.to_owned(),
            name: name.to_owned(),
            kind: "lib".to_owned(),
            is_test,
        }
    }

    #[test]
    fn run_is_rewritten_to_build() {
        let spec = ArtifactSpec::from_args(["run", "--bin", "cli"]);
        assert_eq!(spec.cargo_args[0], "build");
        assert_eq!(
            spec.cargo_args
                .iter()
                .filter(|arg| *arg == "--message-format=json")
                .count(),
            1
        );
        assert_eq!(spec.cargo_args.last().unwrap(), "--message-format=json");
        assert_eq!(spec.filter, None);
    }

    #[test]
    fn test_gains_no_run_exactly_once() {
        let spec = ArtifactSpec::from_args(["test", "--workspace"]);
        assert_eq!(
            spec.cargo_args.iter().filter(|arg| *arg == "--no-run").count(),
            1
        );

        let already = ArtifactSpec::from_args(["test", "--no-run"]);
        assert_eq!(
            already.cargo_args.iter().filter(|arg| *arg == "--no-run").count(),
            1
        );
    }

    #[test]
    fn test_filter_keeps_only_test_artifacts() {
        let spec = ArtifactSpec::from_args(["test"]);
        let filter = spec.filter.expect("test spec carries a filter");
        let kept = filter.apply(vec![
            artifact("a", true),
            artifact("b", false),
            artifact("c", true),
        ]);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|a| a.is_test));
    }

    #[test]
    fn build_passes_through_unchanged_apart_from_message_format() {
        let spec = ArtifactSpec::from_args(["build", "--release"]);
        assert_eq!(spec.cargo_args, ["build", "--release", "--message-format=json"]);
        assert_eq!(spec.filter, None);
    }

    #[test]
    fn spec_derivation_is_pure() {
        let first = ArtifactSpec::from_args(["test", "--workspace"]);
        let second = ArtifactSpec::from_args(["test", "--workspace"]);
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_tool_is_cached() {
        let first = resolve_tool("definitely-not-a-real-tool-name");
        let second = resolve_tool("definitely-not-a-real-tool-name");
        assert_eq!(first, second);
    }
}
