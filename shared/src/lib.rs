//! Wire types and plumbing shared by the relay and its clients.

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod raster;

pub mod prelude {
    //! Common imports that are frequently used across binaries.
    pub use crate::codec::{decode, encode, encode_with_limit, FrameCodec, DEFAULT_MAX_FRAME_BYTES};
    pub use crate::config::{ClientConfig, LoginRejection, OverflowPolicy, RelayConfig, StopPolicy};
    pub use crate::error::{DecodeError, EncodeError, FrameError};
    pub use crate::logging::init_tracing;
    pub use crate::message::{FrameKind, Message};
    pub use crate::raster::{pack_rgb, unpack_rgb, RasterSnapshot};
}
