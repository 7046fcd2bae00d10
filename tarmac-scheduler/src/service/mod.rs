//! Service layer
//!
//! Business logic for job leasing, session liveness, cancellation, and log
//! streaming. Each service owns its store handle and its event broker, so
//! every successful mutation is paired with its event publication in one
//! place.

pub mod cancel;
pub mod job;
pub mod log;
pub mod session;

pub use cancel::CancellationService;
pub use job::JobService;
pub use log::{LogService, LogTail};
pub use session::SessionService;
