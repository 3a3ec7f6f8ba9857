//! The sync engine (spec.md §4): driver, space planner, header/expunge
//! handlers, seek coordinator, index updater, and change detector, wired
//! together around one in-memory pass over the mbox file.

pub mod change;
pub mod context;
pub mod driver;
pub mod header;
pub mod indexer;
pub mod reader;
pub mod record;
pub mod records;
pub mod seek;
pub mod space;

pub use change::ChangeState;
pub use context::{SyncContext, SyncMode};
pub use driver::{Driver, SyncFlags};
pub use record::MessageRecord;
