//! `fpsnet_shared`
//!
//! Pieces shared by the client and the development server.
//!
//! Design goals:
//! - One canonical framing: 4-byte big-endian length + JSON envelope.
//! - Message kinds as a closed enum with an explicit escape hatch for ids
//!   this build does not know.
//! - No `unsafe`.

pub mod codec;
pub mod config;
pub mod math;
pub mod protocol;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::codec::{CodecError, MAX_BODY_LEN};
    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::protocol::*;
}
