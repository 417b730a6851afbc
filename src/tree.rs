//! Hierarchical test-result tree built from one run's event stream.
//!
//! The tree is a forest of package roots. Below each package, every
//! component of a test path becomes a node:
//!
//! ```text
//! example                    (package)
//! └── TestParent             (top-level test)
//!     ├── TestParent/Sub1    (subtest)
//!     └── TestParent/Sub2    (subtest)
//!         └── TestParent/Sub2/Nested
//! ```
//!
//! Nodes live in an arena owned by [`TestTree`]. Parent and child links are
//! plain [`NodeId`] indices and never own anything, so walking up or down
//! the tree needs no reference counting.

use std::collections::{BTreeMap, HashMap};

use crate::event::{Action, TestEvent, split_test_path};

/// Index of a node inside a [`TestTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// One package, test or subtest of a single run.
#[derive(Debug, Clone)]
pub struct TestNode {
    /// Full hierarchical path (`TestParent/Sub2`), or the package path for
    /// package roots.
    pub name: String,
    /// Package this node belongs to.
    pub package: String,
    /// Whether this is a package root.
    pub is_package: bool,
    /// Whether this node sits below a top-level test.
    pub is_subtest: bool,
    /// Whether a `fail` event addressed this node.
    pub failed: bool,
    /// Whether a `skip` event addressed this node.
    pub skipped: bool,
    /// Whether this node's failure should not be blamed on its ancestors.
    pub ignored: bool,
    /// Whether the ignore policy marked this node itself, as opposed to
    /// inheriting the status from its children.
    pub directly_ignored: bool,
    /// Output lines attributed to this node, in arrival order.
    pub outputs: Vec<String>,
    children: BTreeMap<String, NodeId>,
    parent: Option<NodeId>,
}

impl TestNode {
    fn new(name: String, package: &str, parent: Option<NodeId>) -> Self {
        Self {
            name,
            package: package.to_string(),
            is_package: false,
            is_subtest: false,
            failed: false,
            skipped: false,
            ignored: false,
            directly_ignored: false,
            outputs: Vec::new(),
            children: BTreeMap::new(),
            parent,
        }
    }

    /// Returns `true` if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Returns the parent node, `None` for package roots.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Returns `true` if the node printed something other than the
    /// `=== RUN`/`--- FAIL` banners, i.e. a failure message of its own.
    ///
    /// Package roots never report a direct failure: their output is the
    /// `go test` summary (`FAIL`, `ok`, coverage lines).
    pub fn has_direct_failure(&self) -> bool {
        !self.is_package && has_direct_failure(&self.outputs)
    }
}

/// Returns `true` iff at least one line contains neither `===` nor `---`.
pub fn has_direct_failure<S: AsRef<str>>(lines: &[S]) -> bool {
    lines.iter().any(|line| {
        let line = line.as_ref();
        !line.contains("===") && !line.contains("---")
    })
}

/// A forest of package trees for one run file.
#[derive(Debug, Clone, Default)]
pub struct TestTree {
    nodes: Vec<TestNode>,
    packages: BTreeMap<String, NodeId>,
    index: HashMap<(String, String), NodeId>,
}

impl TestTree {
    /// Builds the tree for one run.
    ///
    /// Every package and every test path mentioned by any event gets a
    /// node. Failures, skips and output lines are then attached to the
    /// exact node each event addresses. A `fail` event whose node cannot be
    /// resolved is logged and otherwise ignored.
    pub fn build(events: &[TestEvent]) -> Self {
        let mut tree = Self::default();

        for event in events {
            if event.package.is_empty() {
                continue;
            }
            let root = tree.ensure_package(&event.package);
            if let Some(test) = event.test_name() {
                tree.ensure_path(root, &event.package, test);
            }
        }

        for event in events {
            match event.action {
                Action::Fail => match tree.resolve(&event.package, event.test_name()) {
                    Some(id) => tree.nodes[id.0].failed = true,
                    None => tracing::warn!(
                        package = %event.package,
                        test = event.test_name().unwrap_or_default(),
                        "Could not find node for failed test"
                    ),
                },
                Action::Skip => {
                    if let Some(id) = tree.resolve(&event.package, event.test_name()) {
                        tree.nodes[id.0].skipped = true;
                    }
                }
                Action::Output => {
                    if let Some(output) = event.output_text()
                        && let Some(id) = tree.resolve(&event.package, event.test_name())
                    {
                        tree.nodes[id.0].outputs.push(output.to_string());
                    }
                }
                _ => {}
            }
        }

        tree
    }

    fn ensure_package(&mut self, package: &str) -> NodeId {
        if let Some(id) = self.packages.get(package) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        let mut node = TestNode::new(package.to_string(), package, None);
        node.is_package = true;
        self.nodes.push(node);
        self.packages.insert(package.to_string(), id);
        id
    }

    fn ensure_path(&mut self, root: NodeId, package: &str, test: &str) {
        let mut current = root;
        let mut path = String::with_capacity(test.len());
        for (depth, component) in split_test_path(test).enumerate() {
            if depth > 0 {
                path.push(crate::event::TEST_PATH_SEPARATOR);
            }
            path.push_str(component);

            current = match self.nodes[current.0].children.get(component) {
                Some(child) => *child,
                None => {
                    let id = NodeId(self.nodes.len());
                    let mut node = TestNode::new(path.clone(), package, Some(current));
                    node.is_subtest = depth > 0;
                    self.nodes.push(node);
                    self.nodes[current.0]
                        .children
                        .insert(component.to_string(), id);
                    self.index.insert((package.to_string(), path.clone()), id);
                    id
                }
            };
        }
    }

    /// Resolves a package-level (`test == None`) or test-level node.
    pub fn resolve(&self, package: &str, test: Option<&str>) -> Option<NodeId> {
        match test {
            None => self.packages.get(package).copied(),
            Some(test) => self
                .index
                .get(&(package.to_string(), test.to_string()))
                .copied(),
        }
    }

    /// Returns the node behind `id`.
    pub fn node(&self, id: NodeId) -> &TestNode {
        &self.nodes[id.0]
    }

    /// Returns the node behind `id` for mutation.
    pub fn node_mut(&mut self, id: NodeId) -> &mut TestNode {
        &mut self.nodes[id.0]
    }

    /// Looks up a node by package and test path.
    pub fn get(&self, package: &str, test: Option<&str>) -> Option<&TestNode> {
        self.resolve(package, test).map(|id| self.node(id))
    }

    /// Returns the package roots, ordered by package path.
    pub fn packages(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.packages.values().copied()
    }

    /// Returns the direct children of `id`.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0].children.values().copied()
    }

    /// Returns every node strictly below `id`, depth first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next));
        }
        out
    }

    /// Returns every node id in the tree.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Returns the number of nodes, package roots included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no event named a package.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
