pub mod digest;
pub mod loader;
pub mod workload;

pub use digest::*;
pub use loader::*;
pub use workload::*;
