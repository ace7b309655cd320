// Sweep Kernel
//
// Resource lifecycle primitives for a streaming-SQL control plane:
// run-scoped naming, retry on transient refusals, listing, and
// dependency-ordered teardown.

pub mod naming;
pub mod resource;
pub mod client;
pub mod retry;
pub mod lister;
pub mod ops;
pub mod teardown;
pub mod sweep;
pub mod config;
