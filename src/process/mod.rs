/// Process management for the supervised backend
/// - `SupervisedProcess`: the one backend handle and its liveness
/// - `tree`: terminating a process and everything it spawned
/// - `registry`: live trees that must die with the host, even on panic

pub mod registry;
pub mod supervised;
pub mod tree;

pub use supervised::{ExitRecord, Liveness, ProcessSlot, SupervisedProcess};
pub use tree::TermSignal;
