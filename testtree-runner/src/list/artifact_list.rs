// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interpreting the build tool's JSON message stream into built artifacts.

use crate::{
    cargo_cli::ArtifactSpec,
    command::{self, CommandLine, OutputLine},
    errors::CommandError,
    events::{EventSink, TestEvent},
};
use camino::{Utf8Path, Utf8PathBuf};
use cargo_metadata::{Artifact, CompilerMessage, CrateType, Message, TargetKind};
use tracing::warn;

/// A compiled executable reported by the build tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildArtifact {
    /// Absolute path to the executable.
    pub binary_path: Utf8PathBuf,
    /// Name of the package the artifact belongs to.
    pub package_name: String,
    /// The build target's name.
    pub name: String,
    /// The first entry of the build target's kind list.
    pub kind: String,
    /// Whether the artifact was built as a test binary.
    pub is_test: bool,
}

/// Accumulates artifacts and diagnostics from one build invocation's stdout.
///
/// Only two message shapes are understood: `compiler-artifact` lines become
/// [`BuildArtifact`]s, and `compiler-message` lines are forwarded to the log
/// sink. Everything else, including lines that are not JSON at all, is
/// skipped without error.
#[derive(Debug, Default)]
pub struct ArtifactStream {
    artifacts: Vec<BuildArtifact>,
}

impl ArtifactStream {
    /// Creates an empty stream state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one stdout line.
    pub fn process_line(&mut self, line: &str, sink: &mut dyn EventSink) {
        let Ok(message) = serde_json::from_str::<Message>(line) else {
            return;
        };
        match message {
            Message::CompilerArtifact(artifact) => self.process_artifact(artifact),
            Message::CompilerMessage(message) => forward_diagnostic(message, sink),
            _ => {}
        }
    }

    fn process_artifact(&mut self, artifact: Artifact) {
        let Some(executable) = artifact.executable else {
            return;
        };
        let is_binary = artifact
            .target
            .crate_types
            .iter()
            .any(|kind| matches!(kind, CrateType::Bin));
        let is_build_script = artifact
            .target
            .kind
            .iter()
            .any(|kind| matches!(kind, TargetKind::CustomBuild));
        if !((is_binary && !is_build_script) || artifact.profile.test) {
            return;
        }
        let kind = artifact
            .target
            .kind
            .first()
            .map(ToString::to_string)
            .unwrap_or_default();
        self.artifacts.push(BuildArtifact {
            binary_path: executable,
            package_name: package_name_of(&artifact.package_id.repr),
            name: artifact.target.name,
            kind,
            is_test: artifact.profile.test,
        });
    }

    /// Returns the collected artifacts, applying the spec's filter if present.
    pub fn finish(self, spec: &ArtifactSpec) -> Vec<BuildArtifact> {
        match spec.filter {
            Some(filter) => filter.apply(self.artifacts),
            None => self.artifacts,
        }
    }
}

fn forward_diagnostic(message: CompilerMessage, sink: &mut dyn EventSink) {
    if let Some(rendered) = message.message.rendered {
        sink.event(TestEvent::Output {
            node: None,
            line: normalize_newlines(&rendered),
        });
    }
}

/// Extracts the package name from a package-id string.
///
/// Historical ids look like `foo 0.1.0 (path+file:///...)`; the name is the
/// token before the first space. Modern ids look like
/// `path+file:///...#foo@0.1.0` (or `...#0.1.0` when the name matches the
/// last path segment of the source URL).
fn package_name_of(package_id: &str) -> String {
    if let Some((name, _)) = package_id.split_once(' ') {
        return name.to_owned();
    }
    if let Some((source, fragment)) = package_id.rsplit_once('#') {
        let name_part = match fragment.split_once('@') {
            Some((name, _version)) => name,
            None => "",
        };
        if !name_part.is_empty() {
            return name_part.to_owned();
        }
        // Fragment is a bare version; the name is the last path segment.
        if let Some(segment) = source.trim_end_matches('/').rsplit('/').next() {
            return segment.to_owned();
        }
    }
    package_id.to_owned()
}

fn normalize_newlines(text: &str) -> String {
    if cfg!(windows) {
        text.replace('\n', "\r\n")
    } else {
        text.to_owned()
    }
}

/// Runs the spec's invocation and collects the artifacts it produces.
///
/// Build failures are not fatal: whatever artifacts were collected before
/// the failure are returned, so discovery degrades to partial results when a
/// single crate fails to compile. Only a launch failure is surfaced.
pub async fn collect_artifacts(
    tool: &Utf8Path,
    workspace_dir: &Utf8Path,
    spec: &ArtifactSpec,
    sink: &mut dyn EventSink,
) -> Result<Vec<BuildArtifact>, CommandError> {
    let cmd = CommandLine::new(
        tool.to_owned(),
        spec.cargo_args.clone(),
        workspace_dir.to_owned(),
    );
    let mut stream = ArtifactStream::new();
    let result = command::stream(&cmd, |line| match line {
        OutputLine::Stdout(text) => stream.process_line(text, sink),
        OutputLine::Stderr(text) => sink.event(TestEvent::Output {
            node: None,
            line: text.to_owned(),
        }),
    })
    .await;
    match result {
        Ok(()) => {}
        Err(error @ CommandError::Launch { .. }) => return Err(error),
        Err(error) => {
            warn!("build did not complete cleanly during artifact collection: {error}");
        }
    }
    Ok(stream.finish(spec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const BIN_ARTIFACT: &str = indoc! {r#"
        {"reason":"compiler-artifact","package_id":"foo 0.1.0 (path+file:///w/foo)","manifest_path":"/w/foo/Cargo.toml","target":{"kind":["bin"],"crate_types":["bin"],"name":"foo","src_path":"/w/foo/src/main.rs","edition":"2021","doc":true,"doctest":false,"test":true},"profile":{"opt_level":"0","debuginfo":2,"debug_assertions":true,"overflow_checks":true,"test":false},"features":[],"filenames":["/w/target/debug/foo"],"executable":"/w/target/debug/foo","fresh":false}
    "#};

    fn process(lines: &str, sink: &mut Vec<TestEvent>) -> ArtifactStream {
        let mut stream = ArtifactStream::new();
        for line in lines.lines() {
            stream.process_line(line, sink);
        }
        stream
    }

    #[test]
    fn bin_artifact_is_extracted() {
        let mut sink = Vec::new();
        let stream = process(BIN_ARTIFACT, &mut sink);
        let spec = ArtifactSpec::from_args(["build"]);
        let artifacts = stream.finish(&spec);

        assert_eq!(
            artifacts,
            [BuildArtifact {
                binary_path: "/w/target/debug/foo".into(),
                package_name: "foo".to_owned(),
                name: "foo".to_owned(),
                kind: "bin".to_owned(),
                is_test: false,
            }]
        );
        assert!(sink.is_empty());
    }

    #[test]
    fn build_scripts_are_excluded() {
        let line = BIN_ARTIFACT.replace(r#""kind":["bin"]"#, r#""kind":["custom-build"]"#);
        let mut sink = Vec::new();
        let stream = process(&line, &mut sink);
        let artifacts = stream.finish(&ArtifactSpec::from_args(["build"]));
        assert!(artifacts.is_empty());
    }

    #[test]
    fn test_profile_artifacts_survive_the_test_filter() {
        let line = BIN_ARTIFACT
            .replace(r#""kind":["bin"]"#, r#""kind":["lib"]"#)
            .replace(r#""crate_types":["bin"]"#, r#""crate_types":["lib"]"#)
            .replace(r#""test":false"#, r#""test":true"#);
        let mut sink = Vec::new();
        let stream = process(&line, &mut sink);
        let artifacts = stream.finish(&ArtifactSpec::from_args(["test"]));

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, "lib");
        assert!(artifacts[0].is_test);
    }

    #[test]
    fn non_test_artifacts_are_dropped_by_the_test_filter() {
        let mut sink = Vec::new();
        let stream = process(BIN_ARTIFACT, &mut sink);
        let artifacts = stream.finish(&ArtifactSpec::from_args(["test"]));
        assert!(artifacts.is_empty());
    }

    #[test]
    fn artifacts_without_an_executable_are_ignored() {
        let line = BIN_ARTIFACT.replace(
            r#""executable":"/w/target/debug/foo""#,
            r#""executable":null"#,
        );
        let mut sink = Vec::new();
        let stream = process(&line, &mut sink);
        assert!(stream.finish(&ArtifactSpec::from_args(["build"])).is_empty());
    }

    #[test]
    fn compiler_messages_reach_the_log_sink() {
        let line = indoc! {r#"
            {"reason":"compiler-message","package_id":"foo 0.1.0 (path+file:///w/foo)","manifest_path":"/w/foo/Cargo.toml","target":{"kind":["lib"],"crate_types":["lib"],"name":"foo","src_path":"/w/foo/src/lib.rs","edition":"2021","doc":true,"doctest":true,"test":true},"message":{"rendered":"warning: unused variable: `x`\n","$message_type":"diagnostic","children":[],"code":null,"level":"warning","message":"unused variable: `x`","spans":[]}}
        "#};
        let mut sink = Vec::new();
        let stream = process(line, &mut sink);

        assert!(stream.finish(&ArtifactSpec::from_args(["build"])).is_empty());
        assert_eq!(
            sink,
            [TestEvent::Output {
                node: None,
                line: "warning: unused variable: `x`\n".to_owned(),
            }]
        );
    }

    #[test]
    fn malformed_and_unrecognized_lines_are_skipped() {
        let lines = indoc! {r#"
            this is not json
            {"reason":"build-finished","success":true}
            {"no_reason_at_all":1}
        "#};
        let mut sink = Vec::new();
        let stream = process(lines, &mut sink);
        assert!(stream.finish(&ArtifactSpec::from_args(["build"])).is_empty());
        assert!(sink.is_empty());
    }

    #[test]
    fn package_names_from_both_id_forms() {
        assert_eq!(package_name_of("foo 0.1.0 (path+file:///w/foo)"), "foo");
        assert_eq!(package_name_of("path+file:///w/foo#0.1.0"), "foo");
        assert_eq!(
            package_name_of("registry+https://github.com/rust-lang/crates.io-index#serde@1.0.0"),
            "serde"
        );
    }
}
