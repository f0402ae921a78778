//! Import orchestration for docimport.
//!
//! This crate ties the planner and the writer into end-to-end runs:
//! - [`LocalSource`] reads markdown trees from disk
//! - [`Importer::run`] plans, resolves destinations, and dispatches groups
//! - [`run_grouped`] runs directory groups through a [`GroupDispatcher`],
//!   by default one worker process per group ([`ProcessDispatcher`])
//! - [`run_worker_stdio`] is the worker side of that protocol

mod executor;
mod nav;
mod orchestrator;
mod protocol;
mod source;
#[cfg(test)]
mod testing;
mod title;
mod worker;

pub use executor::{
    GroupDispatcher, ProcessDispatcher, SHUTDOWN_GRACE, WORKER_SUBCOMMAND, ctrl_c_cancellation, group_key,
    group_payloads, run_grouped,
};
pub use nav::{DEFAULT_NAV_TITLE, build_nav_markdown, write_nav_doc};
pub use orchestrator::{ConcurrencySettings, ImportRequest, Importer, ProgressReporter, SilentProgress};
pub use protocol::{DocumentSnapshot, WorkerDestination, WorkerPayload, WorkerSettings, display_group};
pub use source::LocalSource;
pub use title::{TITLE_MAX_BYTES, UNTITLED, create_with_title_strategy, normalize_title, path_title, title_candidates};
pub use worker::{process_payload, run_worker_stdio, serve};
