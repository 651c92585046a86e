mod codec;
pub mod endpoints;

pub use codec::*;
