//! Command implementations

pub mod build;
pub mod completions;
pub mod configure;
pub mod test;
pub mod testall;
