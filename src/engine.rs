//! Ties the device view, group cache, classifier and assembler together behind one
//! value with a small explicit state machine, so a caller (the CLI, a future TUI, or a
//! test) can hold several independent engines without any process-global state.

use crate::assembler;
use crate::assembler::CollectReport;
use crate::assembler::EngineConfig;
use crate::classifier;
use crate::classifier::ScanResult;
use crate::device::DeviceView;
use crate::error::RecoverError;
use crate::groups::GroupCache;
use crate::status::StatusSink;
use std::path::Path;

/// The engine's current phase. `scan`/`collect` only make sense from the phase their
/// name implies; calling them from the wrong phase is a contract violation on the
/// caller's part, not a recoverable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Ready,
	Scanned,
	Collected,
}

/// One recovery run against one device. Constructed by [`Engine::open`]; `scan` and
/// `collect` are then called in that order.
pub struct Engine {
	device: DeviceView,
	groups: GroupCache,
	config: EngineConfig,
	phase: Phase,
	scan_result: Option<ScanResult>,
}

impl Engine {
	/// Opens the device at `path`, memory-maps it, and builds the group cache. Leaves
	/// the engine in the `Ready` phase.
	pub fn open(path: &Path, config: EngineConfig, sink: &mut dyn StatusSink) -> Result<Self, RecoverError> {
		let device = DeviceView::open(path)?;
		let groups = GroupCache::build(&device, sink);
		Ok(Self { device, groups, config, phase: Phase::Ready, scan_result: None })
	}

	/// Wraps an in-memory image as an engine, for tests.
	#[cfg(test)]
	pub fn from_image(image: Vec<u8>, config: EngineConfig, sink: &mut dyn StatusSink) -> Self {
		let device = DeviceView::from_image(image);
		let groups = GroupCache::build(&device, sink);
		Self { device, groups, config, phase: Phase::Ready, scan_result: None }
	}

	/// Scans every free block on the device, classifying each one as a BMP candidate or
	/// an N-level indirect candidate. On success (at least one BMP candidate found),
	/// moves to the `Scanned` phase. On failure, the engine is left unusable; only
	/// `close`-equivalent teardown (dropping the engine) is meaningful afterwards.
	pub fn scan(&mut self, sink: &mut dyn StatusSink) -> Result<(), RecoverError> {
		debug_assert_eq!(self.phase, Phase::Ready, "scan called outside the Ready phase");

		let result = classifier::scan(&self.device, &self.groups, sink)?;
		self.scan_result = Some(result);
		self.phase = Phase::Scanned;
		Ok(())
	}

	/// Reconstructs inodes, blocks and directory entries for every scanned BMP
	/// candidate that survives its sanity check. Requires `scan` to have completed.
	/// Moves to the `Collected` phase on success.
	pub fn collect(&mut self, sink: &mut dyn StatusSink) -> Result<CollectReport, RecoverError> {
		debug_assert_eq!(self.phase, Phase::Scanned, "collect called outside the Scanned phase");

		let scan_result = self.scan_result.as_ref().expect("Scanned phase always carries a scan result");
		let report = assembler::collect(&mut self.device, &self.groups, scan_result, &self.config, sink)?;
		self.phase = Phase::Collected;
		Ok(report)
	}
}
