//! Local SQLite persistence.

mod outbox;
mod pool;
mod schema;
mod sync_state;
mod writer;

pub use outbox::*;
pub use pool::*;
pub use schema::*;
pub use sync_state::*;
pub use writer::*;
