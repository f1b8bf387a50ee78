pub mod ledger;
pub mod memory;
pub mod pg_ledger;
pub mod pool;

pub use ledger::{Ledger, SharedLedger};
pub use memory::MemoryLedger;
pub use pg_ledger::PgLedger;
pub use pool::{create_pool, run_migrations};
