// Copyright (c) The testtree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test tree, its node side-table, and the reverse lookup index.
//!
//! The tree is rebuilt from scratch by every discovery pass; node ids are
//! only meaningful within the pass that produced them. Metadata lives in an
//! explicit side-table keyed by [`NodeId`] rather than hanging off host UI
//! handles, so nothing depends on the host for cleanup.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;

/// Identifies a node in a [`TestTree`].
///
/// Ids are invalidated wholesale when a new discovery pass begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// The kind of buildable unit a test target comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// A library's unit tests.
    Lib,
    /// A binary's unit tests.
    Bin,
    /// An example's tests.
    Example,
    /// An integration test target.
    Test,
    /// A benchmark target.
    Bench,
}

impl TargetKind {
    /// Maps a Cargo target-kind string to a test target kind.
    ///
    /// Library-like kinds (`lib`, `rlib`, `dylib`, `proc-macro`, ...) all
    /// build a single unit-test binary, so they collapse to `Lib`.
    pub fn from_cargo_kind(kind: &str) -> Self {
        match kind {
            "bin" => Self::Bin,
            "example" => Self::Example,
            "test" => Self::Test,
            "bench" => Self::Bench,
            _ => Self::Lib,
        }
    }

    /// Returns the Cargo target-selection arguments for a target of this kind.
    pub fn selector_args(self, name: &str) -> Vec<String> {
        match self {
            Self::Lib => vec!["--lib".to_owned()],
            Self::Bin => vec!["--bin".to_owned(), name.to_owned()],
            Self::Example => vec!["--example".to_owned(), name.to_owned()],
            Self::Test => vec!["--test".to_owned(), name.to_owned()],
            Self::Bench => vec!["--bench".to_owned(), name.to_owned()],
        }
    }
}

/// One compiled test-bearing unit within a package.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TestTarget {
    /// The package the target belongs to.
    pub package: String,
    /// The kind of target.
    pub kind: TargetKind,
    /// The target name defined in `Cargo.toml` or inferred from the filename.
    pub name: String,
}

/// The recorded verdict for a test or target.
#[derive(Clone, Debug, PartialEq)]
pub enum TestOutcome {
    /// The test or target passed.
    Passed {
        /// Wall-clock execution time in seconds, if reported.
        exec_time: Option<f64>,
    },
    /// The test or target failed.
    Failed {
        /// Failure detail.
        message: String,
    },
}

#[derive(Clone, Debug)]
struct TestNode {
    label: String,
    target: usize,
    name_path: Vec<String>,
    children: Vec<NodeId>,
    child_index: HashMap<String, NodeId>,
    running: bool,
    outcome: Option<TestOutcome>,
}

/// The tree of discovered tests for one discovery pass.
#[derive(Clone, Debug, Default)]
pub struct TestTree {
    targets: Vec<TestTarget>,
    nodes: Vec<TestNode>,
    roots: Vec<NodeId>,
    root_index: HashMap<TestTarget, NodeId>,
    by_binary: HashMap<Utf8PathBuf, NodeId>,
    reverse: HashMap<String, NodeId>,
}

impl TestTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards all nodes, targets, and index entries.
    ///
    /// Called at the start of every discovery pass so that stale entries
    /// cannot leak into the new tree.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Registers a root node for `target`, built at `binary_path`.
    ///
    /// Re-registering a known target returns the existing root rather than
    /// duplicating it; the binary-path index is updated either way.
    pub fn register_target(&mut self, target: TestTarget, binary_path: Utf8PathBuf) -> NodeId {
        if let Some(&id) = self.root_index.get(&target) {
            self.by_binary.insert(binary_path, id);
            return id;
        }

        let label = match target.kind {
            TargetKind::Bin => format!("{} ({})", target.package, target.name),
            _ => target.package.clone(),
        };
        let target_slot = self.targets.len();
        let id = self.push_node(TestNode {
            label,
            target: target_slot,
            name_path: Vec::new(),
            children: Vec::new(),
            child_index: HashMap::new(),
            running: false,
            outcome: None,
        });
        self.targets.push(target.clone());
        self.roots.push(id);
        self.root_index.insert(target, id);
        self.by_binary.insert(binary_path, id);
        id
    }

    /// Looks up the root node whose target was built at `binary_path`.
    pub fn root_for_binary(&self, binary_path: &Utf8Path) -> Option<NodeId> {
        self.by_binary.get(binary_path).copied()
    }

    /// Walks the tree from `root`, creating one child per path segment not
    /// yet present, and returns the deepest node reached.
    ///
    /// A reverse-index entry `package::<path so far>` is registered at every
    /// segment depth, so intermediate nodes are individually addressable.
    pub fn insert_test_path(&mut self, root: NodeId, segments: &[String]) -> NodeId {
        let package = self.targets[self.nodes[root.0].target].package.clone();
        let mut current = root;
        let mut qualified = package;
        for segment in segments {
            qualified.push_str("::");
            qualified.push_str(segment);
            current = self.ensure_child(current, segment);
            self.reverse.insert(qualified.clone(), current);
        }
        current
    }

    fn ensure_child(&mut self, parent: NodeId, segment: &str) -> NodeId {
        if let Some(&existing) = self.nodes[parent.0].child_index.get(segment) {
            return existing;
        }
        let target = self.nodes[parent.0].target;
        let mut name_path = self.nodes[parent.0].name_path.clone();
        name_path.push(segment.to_owned());
        let child = self.push_node(TestNode {
            label: segment.to_owned(),
            target,
            name_path,
            children: Vec::new(),
            child_index: HashMap::new(),
            running: false,
            outcome: None,
        });
        let parent_node = &mut self.nodes[parent.0];
        parent_node.children.push(child);
        parent_node.child_index.insert(segment.to_owned(), child);
        child
    }

    fn push_node(&mut self, node: TestNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Resolves a fully-qualified `package::path` key to its node.
    pub fn resolve(&self, key: &str) -> Option<NodeId> {
        self.reverse.get(key).copied()
    }

    /// The root nodes, one per discovered target, in discovery order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// The children of `node`, in first-seen order.
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    /// The display label for `node`.
    pub fn label(&self, node: NodeId) -> &str {
        &self.nodes[node.0].label
    }

    /// The nested test-name decomposition for `node`. Empty for target roots.
    pub fn name_path(&self, node: NodeId) -> &[String] {
        &self.nodes[node.0].name_path
    }

    /// The target `node` belongs to.
    pub fn target(&self, node: NodeId) -> &TestTarget {
        &self.targets[self.nodes[node.0].target]
    }

    pub(crate) fn target_slot(&self, node: NodeId) -> usize {
        self.nodes[node.0].target
    }

    /// The fully-qualified display name for `node`: the root label for
    /// roots, `package::<path>` otherwise.
    pub fn qualified_name(&self, node: NodeId) -> String {
        let inner = &self.nodes[node.0];
        if inner.name_path.is_empty() {
            inner.label.clone()
        } else {
            format!(
                "{}::{}",
                self.targets[inner.target].package,
                inner.name_path.join("::")
            )
        }
    }

    /// Whether `node` is currently running.
    pub fn is_running(&self, node: NodeId) -> bool {
        self.nodes[node.0].running
    }

    /// The recorded outcome for `node`, if any.
    pub fn outcome(&self, node: NodeId) -> Option<&TestOutcome> {
        self.nodes[node.0].outcome.as_ref()
    }

    pub(crate) fn set_running(&mut self, node: NodeId, running: bool) {
        self.nodes[node.0].running = running;
    }

    pub(crate) fn record_outcome(&mut self, node: NodeId, outcome: TestOutcome) {
        self.nodes[node.0].outcome = Some(outcome);
    }

    /// True if no targets have been discovered.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// All node ids, in creation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// The number of leaf test nodes in the tree.
    pub fn test_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| !node.name_path.is_empty() && node.children.is_empty())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lib_target(package: &str) -> TestTarget {
        TestTarget {
            package: package.to_owned(),
            kind: TargetKind::Lib,
            name: package.to_owned(),
        }
    }

    #[test]
    fn insert_registers_reverse_entries_at_every_depth() {
        let mut tree = TestTree::new();
        let root = tree.register_target(lib_target("foo"), "/t/foo-abc".into());
        let leaf = tree.insert_test_path(
            root,
            &["tests".to_owned(), "parsing".to_owned(), "roundtrip".to_owned()],
        );

        assert_eq!(tree.resolve("foo::tests::parsing::roundtrip"), Some(leaf));
        let mid = tree.resolve("foo::tests::parsing").expect("intermediate node indexed");
        assert_eq!(tree.name_path(mid), ["tests", "parsing"]);
        let top = tree.resolve("foo::tests").expect("first segment indexed");
        assert_eq!(tree.children(root), [top]);
    }

    #[test]
    fn children_are_created_once_per_segment() {
        let mut tree = TestTree::new();
        let root = tree.register_target(lib_target("foo"), "/t/foo-abc".into());
        let a = tree.insert_test_path(root, &["tests".to_owned(), "a".to_owned()]);
        let b = tree.insert_test_path(root, &["tests".to_owned(), "b".to_owned()]);
        let a_again = tree.insert_test_path(root, &["tests".to_owned(), "a".to_owned()]);

        assert_eq!(a, a_again);
        assert_ne!(a, b);
        let tests = tree.resolve("foo::tests").unwrap();
        assert_eq!(tree.children(root).len(), 1);
        assert_eq!(tree.children(tests), [a, b]);
        assert_eq!(tree.test_count(), 2);
    }

    #[test]
    fn reregistering_a_target_does_not_duplicate_the_root() {
        let mut tree = TestTree::new();
        let first = tree.register_target(lib_target("foo"), "/t/foo-abc".into());
        let second = tree.register_target(lib_target("foo"), "/t/foo-def".into());

        assert_eq!(first, second);
        assert_eq!(tree.roots().len(), 1);
        // Both binary paths resolve to the same root.
        assert_eq!(tree.root_for_binary(Utf8Path::new("/t/foo-abc")), Some(first));
        assert_eq!(tree.root_for_binary(Utf8Path::new("/t/foo-def")), Some(first));
    }

    #[test]
    fn same_package_lib_and_integration_targets_get_distinct_roots() {
        let mut tree = TestTree::new();
        let lib = tree.register_target(lib_target("foo"), "/t/foo-abc".into());
        let it = tree.register_target(
            TestTarget {
                package: "foo".to_owned(),
                kind: TargetKind::Test,
                name: "it".to_owned(),
            },
            "/t/it-abc".into(),
        );

        assert_ne!(lib, it);
        assert_eq!(tree.label(lib), "foo");
        assert_eq!(tree.label(it), "foo");
    }

    #[test]
    fn binary_targets_get_a_distinguishing_label() {
        let mut tree = TestTree::new();
        let root = tree.register_target(
            TestTarget {
                package: "foo".to_owned(),
                kind: TargetKind::Bin,
                name: "cli".to_owned(),
            },
            "/t/cli-abc".into(),
        );
        assert_eq!(tree.label(root), "foo (cli)");
    }

    #[test]
    fn clear_discards_reverse_index_entries() {
        let mut tree = TestTree::new();
        let root = tree.register_target(lib_target("foo"), "/t/foo-abc".into());
        tree.insert_test_path(root, &["it_works".to_owned()]);
        assert!(tree.resolve("foo::it_works").is_some());

        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(tree.resolve("foo::it_works"), None);
        assert_eq!(tree.root_for_binary(Utf8Path::new("/t/foo-abc")), None);
    }

    #[test]
    fn qualified_names() {
        let mut tree = TestTree::new();
        let root = tree.register_target(lib_target("foo"), "/t/foo-abc".into());
        let leaf = tree.insert_test_path(root, &["tests".to_owned(), "a".to_owned()]);
        assert_eq!(tree.qualified_name(root), "foo");
        assert_eq!(tree.qualified_name(leaf), "foo::tests::a");
    }

    #[test]
    fn selector_args_by_kind() {
        assert_eq!(TargetKind::Lib.selector_args("foo"), ["--lib"]);
        assert_eq!(TargetKind::Bin.selector_args("cli"), ["--bin", "cli"]);
        assert_eq!(TargetKind::Test.selector_args("it"), ["--test", "it"]);
        assert_eq!(TargetKind::from_cargo_kind("proc-macro"), TargetKind::Lib);
        assert_eq!(TargetKind::from_cargo_kind("rlib"), TargetKind::Lib);
        assert_eq!(TargetKind::from_cargo_kind("bench"), TargetKind::Bench);
    }
}
