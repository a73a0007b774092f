//! Turns an ordered list of BMP-start candidates into concrete inodes, block
//! allocations, and root-directory entries.

use crate::classifier::is_block_used;
use crate::classifier::read_entries;
use crate::classifier::ScanResult;
use crate::device::DeviceView;
use crate::error::RecoverError;
use crate::ext;
use crate::groups::block_group_and_bit;
use crate::groups::inode_group_and_index;
use crate::groups::GroupCache;
use crate::status::IndirectLevel;
use crate::status::StatusEvent;
use crate::status::StatusSink;
use utils::util::ceil_division;

/// Inode numbers tried before the ordinary free-inode scan, preserved for
/// historical/cosmetic reasons (spec history, not this tool's own invention).
const PRIORITY_INODES: [u32; 3] = [6969, 666, 420];

/// Knobs that change `collect`'s behavior without changing its on-disk semantics.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
	/// Whether `reserve` tries the priority inodes before the ordinary free-inode scan.
	pub use_priority_inodes: bool,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self { use_priority_inodes: true }
	}
}

/// One file recovered by a `collect` run.
#[derive(Debug, Clone)]
pub struct RecoveredFile {
	/// The directory entry name, e.g. `recovered_000.bmp`.
	pub name: String,
	/// The inode number it was linked under.
	pub inode: u32,
	/// The first direct data block of the file.
	pub first_block: u32,
	/// Number of 4 KiB blocks the file spans.
	pub size_blocks: u32,
}

/// The outcome of one `collect` run.
#[derive(Debug, Default)]
pub struct CollectReport {
	pub recovered: Vec<RecoveredFile>,
}

/// Sets the single bit for `block`, and if `level` is `Some`, recurses into `block`
/// viewed as an array of 1024 block-number entries, marking every non-zero entry at
/// one level shallower. Returns the highest-numbered direct block transitively marked.
fn mark_used(device: &mut DeviceView, groups: &GroupCache, block: u32, level: Option<IndirectLevel>) -> u32 {
	let (group, bit) = block_group_and_bit(block);
	let bitmap_block = groups.block_bitmap_block(group);
	ext::bitmap_set(device.block_mut(bitmap_block), bit);

	let Some(level) = level else {
		return block;
	};

	let entries = read_entries(device, block);
	let sub_level = level.sub_level();
	let mut last = block;
	for &entry in entries.iter() {
		if entry != 0 {
			last = mark_used(device, groups, entry, sub_level);
		}
	}
	last
}

/// Searches `scan`'s candidate list for `level` for one whose "logical predecessor"
/// is `last`: at level 1, its first non-zero entry equals `last + 1`; at a higher
/// level, its first non-zero entry is itself the predecessor-match found by recursing
/// on the level below. Skips any candidate already marked used (by an earlier
/// candidate in this same `collect` run).
fn find_next_indirect(
	device: &DeviceView,
	groups: &GroupCache,
	scan: &ScanResult,
	level: IndirectLevel,
	last: u32,
) -> Option<u32> {
	for &candidate in scan.indirects(level) {
		if is_block_used(device, groups, candidate) {
			continue;
		}
		let entries = read_entries(device, candidate);
		let first_nonzero = if entries[0] != 0 { entries[0] } else { entries[1] };

		let matches = match level.sub_level() {
			None => first_nonzero == last + 1,
			Some(sub) => find_next_indirect(device, groups, scan, sub, last) == Some(first_nonzero),
		};
		if matches {
			return Some(candidate);
		}
	}
	None
}

/// Tries to set bit `(inum - 1) mod ipg` in group `(inum - 1) / ipg`'s inode bitmap.
/// Returns whether the bit was previously clear (and so is now reserved).
fn try_reserve(device: &mut DeviceView, groups: &GroupCache, inum: u32) -> bool {
	let (group, idx) = inode_group_and_index(inum, device.inodes_per_group);
	if group >= groups.len() {
		return false;
	}
	let bitmap_block = groups.inode_bitmap_block(group);
	let bitmap = device.block_mut(bitmap_block);
	if ext::bitmap_bit(bitmap, idx) {
		return false;
	}
	ext::bitmap_set(bitmap, idx);
	true
}

/// Reserves the first free inode, trying the priority inodes first (if configured),
/// then every inode from `first_ino + 1` upward.
fn reserve(device: &mut DeviceView, groups: &GroupCache, config: &EngineConfig) -> Option<u32> {
	if config.use_priority_inodes {
		for &inum in &PRIORITY_INODES {
			if try_reserve(device, groups, inum) {
				return Some(inum);
			}
		}
	}

	for inum in (device.first_inode + 1)..device.total_inodes {
		if try_reserve(device, groups, inum) {
			return Some(inum);
		}
	}
	None
}

/// Returns the deepest indirection level a file of `size_blocks` blocks needs to reach
/// its last block, given 12 direct pointers and 1024 pointers per indirect block.
fn deepest_level_needed(size_blocks: u32) -> IndirectLevel {
	let ptrs = ext::PTRS_PER_BLOCK as u64;
	let single_capacity = 12 + ptrs;
	let double_capacity = single_capacity + ptrs * ptrs;
	match size_blocks as u64 {
		n if n <= single_capacity => IndirectLevel::Single,
		n if n <= double_capacity => IndirectLevel::Double,
		_ => IndirectLevel::Triple,
	}
}

/// Writes the inode's fixed fields, direct block pointers, and (if needed) indirect
/// pointers, marking every block it touches used along the way.
fn populate(
	device: &mut DeviceView,
	groups: &GroupCache,
	scan: &ScanResult,
	inode_num: u32,
	start_block: u32,
	file_size: u32,
	size_blocks: u32,
	sink: &mut dyn StatusSink,
) {
	sink.emit(StatusEvent::Populate(inode_num));

	let (group, idx) = inode_group_and_index(inode_num, device.inodes_per_group);
	let table_block = groups.inode_table_block(group);

	{
		let slot = device.inode_slot_mut(table_block, idx);
		let mut view = ext::InodeView::new(slot);
		view.set_mode(ext::MODE_REGULAR_0777);
		view.set_size_lo(file_size);
		view.set_links_count(1);
	}

	let direct_count = size_blocks.min(12);
	let mut last = start_block;
	for cx in 0..direct_count {
		let bnum = start_block + cx;
		{
			let slot = device.inode_slot_mut(table_block, idx);
			let mut view = ext::InodeView::new(slot);
			view.set_block_ptr(cx as usize, bnum);
		}
		last = mark_used(device, groups, bnum, None);
	}
	sink.emit(StatusEvent::PopulateDirect { first: start_block, last });

	if size_blocks > 12 {
		let mut resolved = [false; 3];
		for level in [IndirectLevel::Single, IndirectLevel::Double, IndirectLevel::Triple] {
			if let Some(bnum) = find_next_indirect(device, groups, scan, level, last) {
				{
					let slot_idx = ext::SINGLE_INDIRECT_IDX + (level.number() - 1) as usize;
					let slot = device.inode_slot_mut(table_block, idx);
					let mut view = ext::InodeView::new(slot);
					view.set_block_ptr(slot_idx, bnum);
				}
				sink.emit(StatusEvent::PopulateIndirect { level, block: bnum });
				last = mark_used(device, groups, bnum, Some(level));
				resolved[(level.number() - 1) as usize] = true;
			}
		}

		let required_level = deepest_level_needed(size_blocks);
		if !resolved[(required_level.number() - 1) as usize] {
			let reason = RecoverError::IndirectMissing;
			sink.emit(StatusEvent::Warn(format!(
				"inode {inode_num}: {reason} (needed a level-{required_level} indirect)"
			)));
		}
	}

	let slot = device.inode_slot_mut(table_block, idx);
	let mut view = ext::InodeView::new(slot);
	view.set_extra_isize(32);
}

/// Appends a directory entry for `inode`/`name` into the root directory's first data
/// block, splitting the final entry's `rec_len` to make room.
fn link_into_root(device: &mut DeviceView, groups: &GroupCache, inode: u32, name: &str) -> Result<(), RecoverError> {
	let (root_group, root_idx) = inode_group_and_index(ext::ROOT_INODE, device.inodes_per_group);
	let root_table_block = groups.inode_table_block(root_group);
	let root_block = {
		let slot = device.inode_slot_mut(root_table_block, root_idx);
		let view = ext::InodeView::new(slot);
		view.block_ptr(0)
	};

	let name_bytes = name.as_bytes();
	let new_rec_len = ext::round4(ext::DIR_ENTRY_HEADER_LEN as u16 + name_bytes.len() as u16);

	let block = device.block_mut(root_block);
	let mut offset = 0usize;
	loop {
		let rec_len = ext::DirEntryView::new(&mut block[offset..]).rec_len();
		if rec_len == 0 {
			return Err(RecoverError::DirectoryFull);
		}

		let is_last = offset + rec_len as usize == ext::BLOCK_SIZE as usize;
		if !is_last {
			offset += rec_len as usize;
			continue;
		}

		let real_rec_len = ext::DirEntryView::new(&mut block[offset..]).real_rec_len();
		if rec_len - real_rec_len < new_rec_len {
			return Err(RecoverError::LinkFailure);
		}

		ext::DirEntryView::new(&mut block[offset..]).set_rec_len(real_rec_len);

		let new_offset = offset + real_rec_len as usize;
		let mut new_entry = ext::DirEntryView::new(&mut block[new_offset..]);
		new_entry.set_inode(inode);
		new_entry.set_rec_len(rec_len - real_rec_len);
		new_entry.set_name_len(name_bytes.len() as u8);
		new_entry.set_file_type(ext::FILE_TYPE_REGULAR);
		new_entry.set_name(name_bytes);
		return Ok(());
	}
}

/// Iterates the BMP-start candidate list in order, reconstructing an inode and a
/// root-directory entry for each one that passes its sanity precondition.
pub fn collect(
	device: &mut DeviceView,
	groups: &GroupCache,
	scan: &ScanResult,
	config: &EngineConfig,
	sink: &mut dyn StatusSink,
) -> Result<CollectReport, RecoverError> {
	sink.emit(StatusEvent::CollectStart);

	let mut report = CollectReport::default();
	for &start in &scan.bmp_starts {
		if is_block_used(device, groups, start) {
			continue;
		}

		let header = device.block(start);
		let file_size = crate::bmp::file_size(header);
		let size_blocks = ceil_division(file_size as u64, ext::BLOCK_SIZE) as u32;

		sink.emit(StatusEvent::Sanity(start));
		if size_blocks > 12 {
			let expected_last = start + 11;
			if find_next_indirect(device, groups, scan, IndirectLevel::Single, expected_last).is_none() {
				let reason = RecoverError::SanityFailed;
				sink.emit(StatusEvent::Warn(format!("block {start}: {reason}, skipping candidate")));
				continue;
			}
		}

		let Some(inode_num) = reserve(device, groups, config) else {
			sink.emit(StatusEvent::Error("no free inode left to reserve".to_string()));
			return Err(RecoverError::InodeExhausted);
		};
		sink.emit(StatusEvent::Inode(inode_num));

		populate(device, groups, scan, inode_num, start, file_size, size_blocks, sink);

		let name = format!("recovered_{:03}.bmp", report.recovered.len());
		sink.emit(StatusEvent::Link(inode_num));
		link_into_root(device, groups, inode_num, &name)?;
		sink.emit(StatusEvent::Recovered(name.clone()));

		report.recovered.push(RecoveredFile {
			name,
			inode: inode_num,
			first_block: start,
			size_blocks,
		});
	}

	// Best-effort: per the engine's documented crash-consistency contract, this mirrors
	// `msync`'s optional final push rather than a guarantee, so its result isn't fatal.
	let _ = device.flush();
	sink.emit(StatusEvent::Done);
	Ok(report)
}
