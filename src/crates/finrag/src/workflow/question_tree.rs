//! Arena-backed tree of a decomposed question.
//!
//! Layer 0 is the question, layer 1 the heads of the decomposition groups and
//! layer 2 the serial follow-ups of each head. Nodes refer to each other by
//! index, so the tree serializes as plain data inside graph state.

use serde::{Deserialize, Serialize};

use crate::error::{FinragError, Result};

/// Deepest layer a decomposition may produce
pub const DECOMPOSER_DEPTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionNode {
    pub text: String,
    pub layer: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Answers of the children, in child order
    #[serde(default)]
    pub sub_answers: Vec<String>,
    #[serde(default)]
    pub answer: Option<String>,
    /// Sufficiency verdict once judged
    #[serde(default)]
    pub sufficient: Option<bool>,
}

impl QuestionNode {
    fn new(text: String, layer: usize, parent: Option<usize>) -> Self {
        Self {
            text,
            layer,
            parent,
            children: Vec::new(),
            sub_answers: Vec::new(),
            answer: None,
            sufficient: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionTree {
    nodes: Vec<QuestionNode>,
}

impl QuestionTree {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            nodes: vec![QuestionNode::new(root.into(), 0, None)],
        }
    }

    /// Tree of one decomposition: the first question of each group hangs
    /// under the root, the rest of the group under that first question.
    pub fn from_groups(root: impl Into<String>, groups: &[Vec<String>]) -> Self {
        let mut tree = Self::new(root);
        for group in groups {
            let mut items = group.iter();
            let Some(head) = items.next() else { continue };
            let Ok(head) = tree.add_child(0, head.clone()) else { continue };
            for item in items {
                // head sits at layer 1, so its children are in range
                let _ = tree.add_child(head, item.clone());
            }
        }
        tree
    }

    pub const fn root(&self) -> usize {
        0
    }

    pub fn node(&self, index: usize) -> Option<&QuestionNode> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut QuestionNode> {
        self.nodes.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add `text` below `parent`; fails past [`DECOMPOSER_DEPTH`]
    pub fn add_child(&mut self, parent: usize, text: impl Into<String>) -> Result<usize> {
        let layer = match self.nodes.get(parent) {
            Some(node) => node.layer + 1,
            None => return Err(FinragError::Session(format!("no question node {parent}"))),
        };
        if layer > DECOMPOSER_DEPTH {
            return Err(FinragError::Session(format!(
                "question tree is limited to depth {DECOMPOSER_DEPTH}"
            )));
        }
        let index = self.nodes.len();
        self.nodes.push(QuestionNode::new(text.into(), layer, Some(parent)));
        self.nodes[parent].children.push(index);
        Ok(index)
    }

    /// Record the answer of `index` and mirror it into its parent's sub-answers
    pub fn set_answer(&mut self, index: usize, answer: impl Into<String>) {
        let answer = answer.into();
        let Some(node) = self.nodes.get_mut(index) else { return };
        node.answer = Some(answer.clone());
        if let Some(parent) = node.parent {
            let position = self.nodes[parent].children.iter().position(|c| *c == index);
            let parent = &mut self.nodes[parent];
            if let Some(position) = position {
                if parent.sub_answers.len() <= position {
                    parent.sub_answers.resize(position + 1, String::new());
                }
                parent.sub_answers[position] = answer;
            }
        }
    }

    pub fn get_nodes_by_layer(&self, layer: usize) -> Vec<&QuestionNode> {
        self.nodes.iter().filter(|n| n.layer == layer).collect()
    }

    pub fn get_max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.layer).max().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuestionNode> {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn groups(items: &[&[&str]]) -> Vec<Vec<String>> {
        items
            .iter()
            .map(|g| g.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_from_groups_layers() {
        let tree = QuestionTree::from_groups(
            "Compare Apple and Microsoft margins",
            &groups(&[
                &["What was Apple's gross margin?", "How did it change from the prior year?"],
                &["What was Microsoft's gross margin?"],
            ]),
        );
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.get_nodes_by_layer(1).len(), 2);
        let layer2 = tree.get_nodes_by_layer(2);
        assert_eq!(layer2.len(), 1);
        assert_eq!(layer2[0].parent, Some(1));
        assert_eq!(tree.get_max_depth(), 2);
    }

    #[test]
    fn test_depth_is_capped() {
        let mut tree = QuestionTree::new("root");
        let a = tree.add_child(0, "a").unwrap();
        let b = tree.add_child(a, "b").unwrap();
        assert!(tree.add_child(b, "c").is_err());
        assert!(tree.add_child(42, "d").is_err());
    }

    #[test]
    fn test_answers_flow_to_parent() {
        let mut tree = QuestionTree::from_groups("root", &groups(&[&["a"], &["b"]]));
        tree.set_answer(2, "answer b");
        tree.set_answer(1, "answer a");
        let root = tree.node(tree.root()).unwrap();
        assert_eq!(root.sub_answers, vec!["answer a", "answer b"]);
    }

    #[test]
    fn test_serializes_as_data() {
        let tree = QuestionTree::from_groups("root", &groups(&[&["a", "b"]]));
        let value = serde_json::to_value(&tree).unwrap();
        let back: QuestionTree = serde_json::from_value(value).unwrap();
        assert_eq!(back, tree);
    }

    proptest! {
        #[test]
        fn prop_decomposition_never_exceeds_depth(
            shape in proptest::collection::vec(proptest::collection::vec("[a-z]{1,6}", 0..5), 0..6)
        ) {
            let tree = QuestionTree::from_groups("root", &shape);
            prop_assert!(tree.get_max_depth() <= DECOMPOSER_DEPTH);
            let heads = shape.iter().filter(|g| !g.is_empty()).count();
            prop_assert_eq!(tree.get_nodes_by_layer(1).len(), heads);
        }
    }
}
