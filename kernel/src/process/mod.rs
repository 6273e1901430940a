//! Process Management
//!
//! Creation, waiting and termination of user processes, and the parent/child
//! bookkeeping between them.

pub mod context;
pub mod manager;
pub mod table;

pub use context::UserFrame;
pub use manager::{thread_name, Process};
pub use table::{ChildSet, ProcessId, ProcessRecord, ProcessState};
