//! Error kinds produced by the recovery engine.

use std::fmt;
use std::io;

/// An error produced by the recovery engine.
///
/// The two "recoverable" kinds are never returned to a caller: the assembler
/// constructs them only to format their [`Display`](fmt::Display) text into a
/// [`crate::status::StatusEvent::Warn`] event.
/// [`RecoverError::SanityFailed`] is used when a candidate's pre-collect sanity check
/// fails, and the candidate is skipped before an inode is ever reserved for it.
/// [`RecoverError::IndirectMissing`] is used when, after an inode has already been
/// populated, a deeper indirect level it needed to reach its last block was never
/// resolved; recovery still proceeds with the partial result, per this tool's
/// no-rollback contract.
#[derive(Debug)]
pub enum RecoverError {
	/// The device could not be opened.
	DeviceOpen(io::Error),
	/// The device's size could not be determined.
	DeviceSize(io::Error),
	/// The device could not be memory-mapped.
	DeviceMap(io::Error),
	/// A heap allocation failed.
	AllocFailure,
	/// No candidate BMP header was found during the scan.
	NoBmpStarts,
	/// No free inode was left to reserve.
	InodeExhausted,
	/// The root directory has no room left for a new entry.
	DirectoryFull,
	/// Linking the recovered inode into the root directory failed.
	LinkFailure,
	/// A BMP candidate needs an indirect block that the scan never found.
	IndirectMissing,
	/// A BMP candidate failed its pre-collect sanity check.
	SanityFailed,
}

impl fmt::Display for RecoverError {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::DeviceOpen(e) => write!(fmt, "unable to open device: {e}"),
			Self::DeviceSize(e) => write!(fmt, "unable to get size of device: {e}"),
			Self::DeviceMap(e) => write!(fmt, "unable to mmap device: {e}"),
			Self::AllocFailure => write!(fmt, "allocation failure"),
			Self::NoBmpStarts => write!(fmt, "no BMP candidates were found"),
			Self::InodeExhausted => write!(fmt, "no free inode left to reserve"),
			Self::DirectoryFull => write!(fmt, "root directory has no room for a new entry"),
			Self::LinkFailure => write!(fmt, "failed to link recovered inode"),
			Self::IndirectMissing => write!(fmt, "no matching indirect block was found"),
			Self::SanityFailed => write!(fmt, "sanity precondition failed"),
		}
	}
}

impl std::error::Error for RecoverError {}
