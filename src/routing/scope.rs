//! Routing scopes
//!
//! A scope is a stack of directives passed explicitly into every routed call.
//! Entering a block creates a child scope that shares its parent's frames;
//! leaving the block drops the child, so the stack shrinks even when the
//! block fails. Nothing is stored per thread or per task.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    ForcePrimary,
    ForceReplica,
    /// Read only from nodes that have applied at least this position
    RequireConsistency(Clock),
}

struct Frame {
    directive: Directive,
    /// Set once a write ran inside this consistency frame
    wrote: AtomicBool,
    parent: Option<Arc<Frame>>,
}

/// Call-local routing context
///
/// `Scope::default()` is the empty stack: writes go to the primary and reads
/// are spread over the replicas.
#[derive(Clone, Default)]
pub struct Scope {
    top: Option<Arc<Frame>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, directive: Directive) -> Scope {
        Scope {
            top: Some(Arc::new(Frame {
                directive,
                wrote: AtomicBool::new(false),
                parent: self.top.clone(),
            })),
        }
    }

    pub fn force_primary(&self) -> Scope {
        self.push(Directive::ForcePrimary)
    }

    pub fn force_replica(&self) -> Scope {
        self.push(Directive::ForceReplica)
    }

    pub fn require_consistency(&self, clock: Clock) -> Scope {
        self.push(Directive::RequireConsistency(clock))
    }

    /// Innermost directive, `None` for the empty stack
    pub fn directive(&self) -> Option<&Directive> {
        self.top.as_ref().map(|frame| &frame.directive)
    }

    /// Scope the current block was entered from
    pub fn parent(&self) -> Scope {
        Scope {
            top: self.top.as_ref().and_then(|frame| frame.parent.clone()),
        }
    }

    pub fn depth(&self) -> usize {
        self.frames().count()
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    /// Remember a write for every enclosing consistency frame.
    pub(crate) fn record_write(&self) {
        for frame in self.frames() {
            if matches!(frame.directive, Directive::RequireConsistency(_)) {
                frame.wrote.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Whether the innermost frame is a consistency frame that saw a write
    pub fn has_written(&self) -> bool {
        self.top.as_ref().is_some_and(|frame| {
            matches!(frame.directive, Directive::RequireConsistency(_))
                && frame.wrote.load(Ordering::SeqCst)
        })
    }

    fn frames(&self) -> impl Iterator<Item = &Frame> {
        std::iter::successors(self.top.as_deref(), |frame| frame.parent.as_deref())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.frames().map(|frame| &frame.directive))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_scope() {
        let scope = Scope::new();
        assert!(scope.is_empty());
        assert_eq!(scope.directive(), None);
        assert_eq!(scope.depth(), 0);
        assert!(scope.parent().is_empty());
    }

    #[test]
    fn test_innermost_directive_wins() {
        let root = Scope::new();
        let primary = root.force_primary();
        let replica = primary.force_replica();

        assert_eq!(replica.directive(), Some(&Directive::ForceReplica));
        assert_eq!(replica.depth(), 2);
        assert_eq!(replica.parent().directive(), Some(&Directive::ForcePrimary));
    }

    #[test]
    fn test_child_does_not_change_parent() {
        let root = Scope::new();
        let outer = root.force_replica();
        {
            let inner = outer.force_primary();
            assert_eq!(inner.directive(), Some(&Directive::ForcePrimary));
        }
        assert_eq!(outer.directive(), Some(&Directive::ForceReplica));
        assert!(root.is_empty());
    }

    #[test]
    fn test_write_marks_enclosing_consistency_frames() {
        let clock = Clock::new("mysql-bin.000001", 10);
        let consistent = Scope::new().require_consistency(clock);
        let nested = consistent.force_primary();

        assert!(!consistent.has_written());
        nested.record_write();

        assert!(consistent.has_written());
        // the innermost frame is not a consistency frame
        assert!(!nested.has_written());
    }

    #[test]
    fn test_write_is_local_to_its_frame() {
        let clock = Clock::new("mysql-bin.000001", 10);
        let first = Scope::new().require_consistency(clock.clone());
        let second = Scope::new().require_consistency(clock);

        first.record_write();
        assert!(first.has_written());
        assert!(!second.has_written());
    }

    #[test]
    fn test_debug_lists_innermost_first() {
        let scope = Scope::new().force_primary().force_replica();
        assert_eq!(format!("{:?}", scope), "[ForceReplica, ForcePrimary]");
    }
}
