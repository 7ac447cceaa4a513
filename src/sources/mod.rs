mod base;
pub mod images;
pub mod sakurazaka;

pub use base::*;
