pub mod absentee;
pub mod guard;
pub mod ports;
pub mod report;
pub mod rollover;
pub mod service;
pub mod stats;

pub use guard::{RateLimiter, UserLocks};
pub use service::AttendanceService;
pub use stats::ActivityStats;
