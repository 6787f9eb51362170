//! Background jobs (SPEC_FULL §4.11, §4.12): scheduled work with no
//! request-scoped caller. A fixed-tick supervisor drives independent
//! job handlers — dunning, renewal, data retention, and webhook retry —
//! each a bounded-batch sweep over its own repositories.

pub mod dunning;
pub mod renewal;
pub mod retention;
pub mod supervisor;

pub use dunning::{DunningController, DunningRunReport};
pub use renewal::{RenewalJob, RenewalRunReport};
pub use retention::{RetentionJob, RetentionRunReport};
pub use supervisor::{JobSupervisor, TickReport};
