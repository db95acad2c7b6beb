pub mod args;
pub mod docker;

pub use docker::*;
