//! pm-worker: background job processing for pm-crawler
//!
//! Jobs are JSON payloads of the form `{"type": <action>, ...params}`. The
//! worker owns its own browser session manager and closes the browser after
//! every job, whatever the outcome.
//!
//! Two front ends feed it: an in-process bounded queue ([`JobQueue`]) used by
//! the HTTP server, and a line-oriented stdio loop ([`run_stdio`]) for
//! external queue consumers.

pub mod error;
pub mod stdio;
pub mod worker;

pub use error::{Result, WorkerError};
pub use stdio::{run_lines, run_stdio};
pub use worker::{JobOutcome, JobQueue, JobWorker, WorkerHandle};
