pub mod admin;
pub mod ml;
pub mod refund;
pub mod system;
