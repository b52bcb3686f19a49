//! Domain model (ids, task record, due date, status, outcome, scheduled job).
//!
//! この層は I/O を持たない。ストア・キュー・時計は ports 経由でのみ触る。

pub mod due_date;
pub mod errors;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod state;
pub mod task;

pub use self::due_date::{DueDate, DueDateParseError};
pub use self::errors::ErrorKind;
pub use self::ids::{IdParseError, TaskId};
pub use self::job::ScheduledJob;
pub use self::outcome::{TransitionOutcome, decide};
pub use self::state::{TaskStatus, UnknownStatus};
pub use self::task::Task;
