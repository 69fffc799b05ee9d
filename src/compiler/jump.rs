// Jvmgen Jump Scopes
// Open loops, ensure blocks and method bodies that non-local jumps pass through

use smallvec::SmallVec;

use crate::ast::Node;
use crate::bytecode::Label;

/// Labels a loop exposes to `break`, `next` and `redo`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLabels {
    pub break_label: Label,
    pub next_label: Label,
    pub redo_label: Label,
}

/// One open structured node
#[derive(Debug, Clone)]
pub enum JumpScope<'a> {
    Method,
    Loop(LoopLabels),
    Ensure {
        clause: &'a Node,
        /// Inlined copies of the clause run by jumps; excluded from the
        /// protected region so the handler does not run the clause again
        gaps: Vec<(Label, Label)>,
    },
}

/// Kind of node a jump resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpTarget {
    Loop,
    Method,
}

impl JumpTarget {
    fn matches(self, scope: &JumpScope<'_>) -> bool {
        matches!(
            (self, scope),
            (JumpTarget::Loop, JumpScope::Loop(_)) | (JumpTarget::Method, JumpScope::Method)
        )
    }

    pub fn describe(self) -> &'static str {
        match self {
            JumpTarget::Loop => "loop",
            JumpTarget::Method => "method",
        }
    }
}

/// Ensure clauses a jump must run, innermost first, with the depth of each
/// one and the depth of the jump's target
#[derive(Debug, Clone)]
pub struct PendingEnsures<'a> {
    pub target_depth: usize,
    pub ensures: SmallVec<[(usize, &'a Node); 2]>,
}

/// Stack of open jump scopes
#[derive(Debug, Clone, Default)]
pub struct JumpScopes<'a> {
    stack: Vec<JumpScope<'a>>,
}

impl<'a> JumpScopes<'a> {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn push(&mut self, scope: JumpScope<'a>) {
        self.stack.push(scope);
    }

    pub fn pop(&mut self) -> Option<JumpScope<'a>> {
        self.stack.pop()
    }

    /// Walk from the top collecting ensure clauses until the first scope of
    /// kind `stop_at`, which bounds the walk and is not included. `None`
    /// when no such scope is open.
    pub fn find_ensures(&self, stop_at: JumpTarget) -> Option<PendingEnsures<'a>> {
        let mut ensures = SmallVec::new();
        for (depth, scope) in self.stack.iter().enumerate().rev() {
            if stop_at.matches(scope) {
                return Some(PendingEnsures {
                    target_depth: depth,
                    ensures,
                });
            }
            if let JumpScope::Ensure { clause, .. } = scope {
                ensures.push((depth, *clause));
            }
        }
        None
    }

    pub fn loop_labels(&self, depth: usize) -> Option<LoopLabels> {
        match self.stack.get(depth) {
            Some(JumpScope::Loop(labels)) => Some(*labels),
            _ => None,
        }
    }

    /// Detach every scope at `depth` and above. Used while an ensure clause
    /// is inlined so jumps inside it only see the scopes around it.
    pub fn split_off(&mut self, depth: usize) -> Vec<JumpScope<'a>> {
        self.stack.split_off(depth.min(self.stack.len()))
    }

    pub fn restore(&mut self, detached: Vec<JumpScope<'a>>) {
        self.stack.extend(detached);
    }

    /// Mark `[start, end)` as an inlined copy of the ensure clause at `depth`
    pub fn record_gap(&mut self, depth: usize, start: Label, end: Label) {
        if let Some(JumpScope::Ensure { gaps, .. }) = self.stack.get_mut(depth) {
            gaps.push((start, end));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Node, NodeKind};
    use pretty_assertions::assert_eq;

    fn clause(id: usize) -> Node {
        Node {
            id,
            span: None,
            kind: NodeKind::Null,
        }
    }

    fn labels(n: u32) -> LoopLabels {
        LoopLabels {
            break_label: Label(n),
            next_label: Label(n + 1),
            redo_label: Label(n + 2),
        }
    }

    #[test]
    fn test_find_ensures_innermost_first_up_to_loop() {
        let outer = clause(1);
        let middle = clause(2);
        let inner = clause(3);
        let mut jumps = JumpScopes::new();
        jumps.push(JumpScope::Method);
        jumps.push(JumpScope::Ensure { clause: &outer, gaps: Vec::new() });
        jumps.push(JumpScope::Loop(labels(0)));
        jumps.push(JumpScope::Ensure { clause: &middle, gaps: Vec::new() });
        jumps.push(JumpScope::Ensure { clause: &inner, gaps: Vec::new() });

        let to_loop = jumps.find_ensures(JumpTarget::Loop).unwrap();
        assert_eq!(to_loop.target_depth, 2);
        let ids: Vec<usize> = to_loop.ensures.iter().map(|(_, n)| n.id).collect();
        assert_eq!(ids, vec![3, 2]);

        let to_method = jumps.find_ensures(JumpTarget::Method).unwrap();
        assert_eq!(to_method.target_depth, 0);
        let ids: Vec<usize> = to_method.ensures.iter().map(|(_, n)| n.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_missing_target_is_none() {
        let mut jumps = JumpScopes::new();
        jumps.push(JumpScope::Method);
        assert!(jumps.find_ensures(JumpTarget::Loop).is_none());
        assert_eq!(jumps.loop_labels(0), None);
    }

    #[test]
    fn test_split_off_and_restore() {
        let c = clause(9);
        let mut jumps = JumpScopes::new();
        jumps.push(JumpScope::Method);
        jumps.push(JumpScope::Loop(labels(4)));
        jumps.push(JumpScope::Ensure { clause: &c, gaps: Vec::new() });
        let detached = jumps.split_off(2);
        assert_eq!(jumps.depth(), 2);
        assert!(jumps.find_ensures(JumpTarget::Loop).unwrap().ensures.is_empty());
        jumps.restore(detached);
        jumps.record_gap(2, Label(7), Label(8));
        match jumps.pop() {
            Some(JumpScope::Ensure { gaps, .. }) => assert_eq!(gaps, vec![(Label(7), Label(8))]),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(jumps.loop_labels(1), Some(labels(4)));
    }
}
