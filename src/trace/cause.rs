//! Cause chain collection
//!
//! Errors may wrap an underlying cause, which may wrap another. The walk is
//! bounded by an identity set and a depth cap so a cause graph that loops
//! back on itself ends the chain instead of hanging the pipeline.

use super::{parse_stack, Frame};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Longest cause chain that will be walked.
pub const MAX_CAUSE_DEPTH: usize = 16;

/// One link of a cause chain with its own parsed frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CauseRecord {
    pub message: String,
    pub name: String,
    pub raw_stack: String,
    pub frames: Vec<Frame>,
}

/// Anything that can be walked as an error with an optional cause.
pub trait CauseNode {
    fn message(&self) -> &str;

    fn name(&self) -> &str;

    fn stack(&self) -> &str;

    fn cause(&self) -> Option<&Self>;

    /// Identity used for cycle detection. Defaults to the node's address.
    fn node_id(&self) -> usize {
        (self as *const Self).cast::<()>() as usize
    }
}

/// Walk `root`'s cause links, root-to-leaf. `root` itself is not included.
pub fn collect_cause_chain<N: CauseNode>(root: &N) -> Vec<CauseRecord> {
    let mut visited = HashSet::new();
    visited.insert(root.node_id());

    let mut records = Vec::new();
    let mut current = root.cause();

    while let Some(node) = current {
        if !visited.insert(node.node_id()) {
            tracing::warn!(
                depth = records.len(),
                "cause chain loops back to an earlier error; truncating"
            );
            break;
        }
        if records.len() >= MAX_CAUSE_DEPTH {
            tracing::warn!(
                max_depth = MAX_CAUSE_DEPTH,
                "cause chain exceeds depth limit; truncating"
            );
            break;
        }

        records.push(CauseRecord {
            message: node.message().to_string(),
            name: node.name().to_string(),
            raw_stack: node.stack().to_string(),
            frames: parse_stack(node.stack()),
        });
        current = node.cause();
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Node<'a> {
        message: String,
        stack: String,
        cause: Cell<Option<&'a Node<'a>>>,
    }

    impl<'a> Node<'a> {
        fn new(message: &str) -> Self {
            Self {
                message: message.to_string(),
                stack: format!("Error: {}\n    at fn_{} (src/{}.js:1:1)", message, message, message),
                cause: Cell::new(None),
            }
        }
    }

    impl CauseNode for Node<'_> {
        fn message(&self) -> &str {
            &self.message
        }

        fn name(&self) -> &str {
            "Error"
        }

        fn stack(&self) -> &str {
            &self.stack
        }

        fn cause(&self) -> Option<&Self> {
            self.cause.get()
        }
    }

    #[test]
    fn test_no_cause_yields_empty_chain() {
        let root = Node::new("root");
        assert!(collect_cause_chain(&root).is_empty());
    }

    #[test]
    fn test_chain_is_root_to_leaf() {
        let root = Node::new("root");
        let a = Node::new("a");
        let b = Node::new("b");
        let c = Node::new("c");
        root.cause.set(Some(&a));
        a.cause.set(Some(&b));
        b.cause.set(Some(&c));

        let chain = collect_cause_chain(&root);
        let messages: Vec<&str> = chain.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
        assert_eq!(chain[1].frames.len(), 1);
        assert_eq!(chain[1].frames[0].file, "src/b.js");
        assert_eq!(chain[1].frames[0].function, "fn_b");
    }

    #[test]
    fn test_cycle_to_ancestor_terminates() {
        let root = Node::new("root");
        let a = Node::new("a");
        let b = Node::new("b");
        root.cause.set(Some(&a));
        a.cause.set(Some(&b));
        b.cause.set(Some(&a));

        let chain = collect_cause_chain(&root);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_self_referential_root_terminates() {
        let root = Node::new("root");
        root.cause.set(Some(&root));
        assert!(collect_cause_chain(&root).is_empty());
    }

    #[test]
    fn test_depth_is_capped() {
        let nodes: Vec<Node> = (0..MAX_CAUSE_DEPTH + 5)
            .map(|i| Node::new(&i.to_string()))
            .collect();
        for pair in nodes.windows(2) {
            pair[0].cause.set(Some(&pair[1]));
        }

        let chain = collect_cause_chain(&nodes[0]);
        assert_eq!(chain.len(), MAX_CAUSE_DEPTH);
    }
}
