mod coordinator;
pub mod endpoints;
mod remote;

pub use coordinator::*;
pub use remote::*;
