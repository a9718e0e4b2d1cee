pub mod audit;
pub mod lead;

pub use audit::*;
pub use lead::*;
