//! Database access plumbing.
//!
//! Persistence operations are expressed as query messages processed by
//! a [`DatabaseProcessor`] via `kanau::processor::Processor`, keeping
//! each query a small, named, independently testable unit.

use sqlx::PgPool;

/// Executes query messages against the connection pool.
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
