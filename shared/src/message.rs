use crate::raster::RasterSnapshot;

/// Discriminant written as the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Login = 0,
    Snapshot = 1,
    Rejected = 2,
}

impl FrameKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FrameKind::Login),
            1 => Some(FrameKind::Snapshot),
            2 => Some(FrameKind::Rejected),
            _ => None,
        }
    }
}

/// Messages exchanged between relay clients and the relay.
///
/// The origin of a `Snapshot` is implicit: it is whichever connection the frame
/// arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// First frame on every client connection, announcing a display name.
    Login { display_name: String },
    /// A whole-canvas raster shared with every other session.
    Snapshot(RasterSnapshot),
    /// Sent by the relay before closing a connection whose login was refused.
    Rejected { reason: String },
}

impl Message {
    pub fn login(display_name: impl Into<String>) -> Self {
        Message::Login {
            display_name: display_name.into(),
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Message::Login { .. } => FrameKind::Login,
            Message::Snapshot(_) => FrameKind::Snapshot,
            Message::Rejected { .. } => FrameKind::Rejected,
        }
    }
}

impl From<RasterSnapshot> for Message {
    fn from(snapshot: RasterSnapshot) -> Self {
        Message::Snapshot(snapshot)
    }
}
