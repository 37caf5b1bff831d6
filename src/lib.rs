//! Grade journal and analytics engine behind the `scorebookd` sidecar.
//!
//! Raw weekly scores and flags go in through [`grading`], per-subject totals
//! come out of [`calc::rollup`], and cross-student reports read a cached
//! snapshot in [`analytics`]. Storage is a SQLite file per workspace.

pub mod aggregate;
pub mod analytics;
pub mod calc;
pub mod db;
pub mod grading;
pub mod ipc;
pub mod store;
pub mod taxonomy;
