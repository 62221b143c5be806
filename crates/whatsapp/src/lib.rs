//! WhatsApp side of the bridge.
//!
//! The platform protocol runs in a Node.js sidecar reached over a local
//! WebSocket; this crate owns the session handle, the connection lifecycle
//! and the normalization of inbound platform events.

pub mod connection;
pub mod error;
pub mod events;
pub mod lifecycle;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod process;
pub mod session;
pub mod sidecar;
pub mod types;

pub use {
    connection::Connection,
    error::{Error, Result},
    events::{normalize_message, run_event_loop},
    lifecycle::{LifecycleManager, LifecycleState},
    process::{SidecarLaunch, SidecarProcess, find_sidecar_dir, start_sidecar},
    session::Session,
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarConnection},
    types::{
        DownloadRequest, Identity, InboundMessage, Jid, MediaContext, MediaMessage,
        OutgoingMessage, PairingEvent, PlatformEvent, Presence, UploadDescriptor,
    },
};
