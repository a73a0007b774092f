//! Recovers deleted BMP files from a live, unmounted ext2-family block device by
//! reconstructing inodes, indirect blocks and a root-directory entry over candidate
//! data blocks that are still intact but unreferenced.
//!
//! The engine never touches standard streams or calls `exit`; all user-visible
//! behavior is through the [`status::StatusSink`] a caller supplies.

pub mod assembler;
pub mod bmp;
pub mod classifier;
pub mod device;
pub mod engine;
pub mod error;
pub mod ext;
pub mod groups;
pub mod status;

pub use assembler::CollectReport;
pub use assembler::EngineConfig;
pub use assembler::RecoveredFile;
pub use engine::Engine;
pub use error::RecoverError;
