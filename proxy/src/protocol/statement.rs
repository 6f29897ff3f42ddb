//! Prepared statement bookkeeping for one session
use std::collections::HashMap;

/// A statement registered by a successful prepare response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    /// Server-assigned statement id
    pub id: u32,

    /// SQL text sent with the prepare request
    pub sql: String,

    /// Number of parameter placeholders
    pub param_count: u16,
}

impl PreparedStatement {
    /// Size of the NULL bitmap sent with an execute request
    pub fn null_bitmap_len(&self) -> usize {
        (self.param_count as usize + 7) / 8
    }
}

/// Prepared statements keyed by statement id
#[derive(Debug, Default)]
pub struct PreparedStatementTable {
    statements: HashMap<u32, PreparedStatement>,
}

impl PreparedStatementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a statement, replacing any previous entry with the same id
    pub fn insert(&mut self, statement: PreparedStatement) -> Option<PreparedStatement> {
        self.statements.insert(statement.id, statement)
    }

    pub fn get(&self, id: u32) -> Option<&PreparedStatement> {
        self.statements.get(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<PreparedStatement> {
        self.statements.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
