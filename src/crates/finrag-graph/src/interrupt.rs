//! Human-in-the-loop interrupt configuration.
//!
//! When any task scheduled for the next superstep targets a node listed in
//! `interrupt_before`, the run saves a checkpoint and halts. The caller can
//! inspect the state with `get_state`, patch it with `update_state`, and resume
//! by streaming again without input.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterruptConfig {
    interrupt_before: BTreeSet<String>,
}

impl InterruptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupt_before.extend(nodes.into_iter().map(Into::into));
        self
    }

    pub fn should_interrupt_before(&self, node: &str) -> bool {
        self.interrupt_before.contains(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &String> {
        self.interrupt_before.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.interrupt_before.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_before() {
        let config = InterruptConfig::new().with_interrupt_before(["await_clarification", "confirm_download"]);
        assert!(config.should_interrupt_before("confirm_download"));
        assert!(!config.should_interrupt_before("retrieve"));
        assert_eq!(config.nodes().count(), 2);
    }
}
