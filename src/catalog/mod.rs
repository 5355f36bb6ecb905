//! The frame catalog (spec §4.4): append-only log of typed frames with metadata,
//! supersession, compression tagging, and lookups.

pub mod frame;
pub mod store;

pub use frame::Frame;
pub use store::FrameCatalog;
