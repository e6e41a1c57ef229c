//! OESP host side: link transport, HTTP sync upload and configuration.

pub mod ble;
pub mod config;
pub mod link;
pub mod sync;

pub use ble::BleTransport;
pub use config::Config;
pub use link::{FrameLink, LinkError, MemoryLink};
pub use sync::{build_journal, SyncClient, SyncError, SyncSummary};
