pub mod backoff;
pub mod batch;
pub mod descriptor;
pub mod error;
pub mod ids;
pub mod model;
pub mod record;
pub mod request;
pub mod source;
pub mod timeout;

pub use backoff::*;
pub use batch::*;
pub use descriptor::*;
pub use error::*;
pub use ids::*;
pub use model::*;
pub use record::*;
pub use request::*;
pub use source::*;
pub use timeout::*;
