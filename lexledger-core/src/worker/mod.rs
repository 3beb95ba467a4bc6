pub mod scheduler;

pub use scheduler::OverdueSweeper;
