//! Out-of-process job execution: a supervisor in the caller's process and a
//! worker process that runs the inference loop.

pub mod protocol;
pub mod supervisor;
pub mod worker;

pub use supervisor::{JobHandle, JobSupervisor, SupervisorConfig, WorkerCommand};
pub use worker::run_worker;
