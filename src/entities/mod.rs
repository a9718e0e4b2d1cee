pub mod lead;
pub mod rate_limit;
pub mod report;

pub use report::{AuditStatus, PageType, Platform};

pub use lead::Entity as Lead;
pub use rate_limit::Entity as RateLimit;
pub use report::Entity as Report;
