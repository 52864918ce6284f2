//! # Summary
//!
//! This module contains the long-running threads of the master and slave
//! processes. Every listener runs its own accept loop and hands each
//! connection to a worker [`Pool`](crate::pool::Pool) as a job, so request
//! handling never blocks accepting.

/// Accept loop.
pub(crate) mod listener;

/// Client-facing coordinator process.
pub mod master;

/// Storage participant process.
pub mod slave;
