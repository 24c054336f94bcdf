pub mod endpoint;
pub mod request;
pub mod snapshot;
pub mod transport;

pub use endpoint::*;
pub use request::*;
pub use snapshot::*;
pub use transport::*;
