//! Ignore policies and bottom-up ignore propagation.
//!
//! A policy decides which failing nodes are ignorable on their own. The
//! propagation pass then walks each package tree from the leaves up: a
//! failing node becomes ignored when every one of its failing children is
//! ignored and it printed no failure message of its own. A failing node with
//! no failing children and no direct mark stays a real failure.

use crate::tree::{NodeId, TestNode, TestTree};

/// Decides which failures may be ignored.
pub trait IgnorePolicy {
    /// Returns `true` if this failing node is ignorable by itself.
    fn ignores_failure(&self, node: &TestNode) -> bool;

    /// Returns `true` if a failing node should be ignored regardless of its
    /// children. The default never forces.
    fn always_propagates(&self, _tree: &TestTree, _id: NodeId) -> bool {
        false
    }
}

/// The standard policy: optionally ignore every failing subtest.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubtestPolicy {
    /// Mark every failing subtest as ignorable.
    pub ignore_all_subtest_failures: bool,
}

impl SubtestPolicy {
    /// Creates the policy.
    pub fn new(ignore_all_subtest_failures: bool) -> Self {
        Self {
            ignore_all_subtest_failures,
        }
    }
}

impl IgnorePolicy for SubtestPolicy {
    fn ignores_failure(&self, node: &TestNode) -> bool {
        self.ignore_all_subtest_failures && node.is_subtest
    }
}

/// Wraps a policy and forces ignore status onto any failing node whose name,
/// or any descendant's name, contains one of the configured substrings.
///
/// Exists for suites whose fixture tests are known to fail only through
/// their subtests. With no substrings it behaves exactly like the inner
/// policy.
#[derive(Debug, Clone)]
pub struct ForcePropagate<P> {
    inner: P,
    substrings: Vec<String>,
}

impl<P> ForcePropagate<P> {
    /// Wraps `inner` with the given name substrings.
    pub fn new(inner: P, substrings: Vec<String>) -> Self {
        Self { inner, substrings }
    }

    fn matches(&self, name: &str) -> bool {
        self.substrings.iter().any(|s| name.contains(s.as_str()))
    }
}

impl<P: IgnorePolicy> IgnorePolicy for ForcePropagate<P> {
    fn ignores_failure(&self, node: &TestNode) -> bool {
        self.inner.ignores_failure(node)
    }

    fn always_propagates(&self, tree: &TestTree, id: NodeId) -> bool {
        if self.substrings.is_empty() {
            return self.inner.always_propagates(tree, id);
        }
        self.matches(&tree.node(id).name)
            || tree
                .descendants(id)
                .into_iter()
                .any(|d| self.matches(&tree.node(d).name))
            || self.inner.always_propagates(tree, id)
    }
}

/// Marks ignorable failures and propagates ignore status up every package
/// tree.
pub fn apply_policy(tree: &mut TestTree, policy: &dyn IgnorePolicy) {
    let failing: Vec<NodeId> = tree.ids().filter(|id| tree.node(*id).failed).collect();
    for id in failing {
        if policy.ignores_failure(tree.node(id)) {
            let node = tree.node_mut(id);
            node.directly_ignored = true;
            node.ignored = true;
        }
    }

    let roots: Vec<NodeId> = tree.packages().collect();
    for root in roots {
        resolve(tree, policy, root);
    }
}

/// Returns `true` if the subtree at `id` is safe to hide from its parent.
fn resolve(tree: &mut TestTree, policy: &dyn IgnorePolicy, id: NodeId) -> bool {
    let children: Vec<NodeId> = tree.children(id).collect();
    let mut failing_children = 0usize;
    let mut all_resolved = true;
    for child in children {
        let resolved = resolve(tree, policy, child);
        if tree.node(child).failed {
            failing_children += 1;
            all_resolved &= resolved;
        }
    }

    let node = tree.node(id);
    if !node.failed || node.ignored {
        return true;
    }

    let forced = policy.always_propagates(tree, id);
    let blamed_on_children =
        failing_children > 0 && all_resolved && !tree.node(id).has_direct_failure();
    if forced || blamed_on_children {
        tree.node_mut(id).ignored = true;
        return true;
    }
    false
}
