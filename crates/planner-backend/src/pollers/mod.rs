//! Background sync tasks, run as tokio tasks inside the server process.

pub mod todo;

pub use todo::{start_todo_polling_task, TodoPollerConfig};
