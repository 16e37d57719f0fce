//! Ring positions.

pub mod sip;
pub mod traits;

pub use sip::SipToken;
pub use traits::Token;
