//! Bookkeeping of the writes issued inside one transaction scope.

use crate::entity::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Removed,
}

/// One write that reached the storage session, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub table: &'static str,
    pub id: Value,
}

/// Ordered journal of changes plus the set of entities managed by the scope.
///
/// Writes are forwarded to the session as they happen, so the journal order is the
/// order the store applied them. Committing makes the whole journal durable; rolling
/// back discards it.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    changes: Vec<Change>,
    managed: Vec<(&'static str, Value)>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: ChangeKind, table: &'static str, id: Value) {
        match kind {
            ChangeKind::Inserted | ChangeKind::Updated => {
                if !self.is_managed(table, &id) {
                    self.managed.push((table, id.clone()));
                }
            }
            ChangeKind::Removed => self.managed.retain(|(t, v)| !(*t == table && *v == id)),
        }
        self.changes.push(Change { kind, table, id });
    }

    /// Whether the entity `(table, id)` was written in this scope and still exists.
    pub fn is_managed(&self, table: &str, id: &Value) -> bool {
        self.managed.iter().any(|(t, v)| *t == table && v == id)
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Drop the journal and the managed set.
    pub fn clear(&mut self) {
        self.changes.clear();
        self.managed.clear();
    }
}
