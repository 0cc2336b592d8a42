//! Fan-out relay that shares canvas snapshots between drawing clients.
//!
//! Each accepted connection gets its own handler task. A client logs in with a
//! display name, then every snapshot it sends is queued for every other
//! logged-in session. Each session has a bounded outbound queue drained by a
//! dedicated writer task, so a slow peer never stalls the others.

pub mod events;
pub mod handler;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;

pub use events::{RelayEvent, TerminationReason};
pub use registry::{RegistryError, SessionRegistry};
pub use relay::Relay;
pub use router::{BroadcastRouter, DeliveryReport};
pub use session::{DeliveryError, OutboundQueue, Session};
