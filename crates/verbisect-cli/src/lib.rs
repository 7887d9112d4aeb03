//! Command-line plumbing around the verbisect engine.
//!
//! - [`command`]: an [`Oracle`](verbisect_core::Oracle) that runs shell
//!   commands against each snapshot
//! - [`files`]: environment, sequence and version-index files
//! - [`report`]: human-readable reports
//! - [`serialize`]: JSON reports on disk

pub mod command;
pub mod files;
pub mod report;
pub mod serialize;

pub use command::CommandOracle;
pub use files::{load_environment, load_repository, load_sequence, InputError};
pub use report::{format_diff, format_log, format_result};
pub use serialize::{load_result, result_to_json, save_result, SerializeError};
