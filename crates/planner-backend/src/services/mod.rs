//! Task, category and profile operations behind the HTTP handlers.
//!
//! Each mutation reports success as a flag (`bool` / `Option<T>`), logs the
//! failure, and announces the change on the realtime feed.

mod categories;
mod profile;
mod tasks;

pub use categories::CategoryService;
pub use profile::ProfileService;
pub use tasks::TaskService;
