//! Partitions every free block into at most one of: a candidate BMP header, or a
//! candidate 1x/2x/3x indirect block.
//!
//! The indirect-block heuristic is the interesting part: with no surviving metadata
//! about which blocks used to be indirect blocks, it recognizes the common case of a
//! contiguous ascending run of data block numbers (how a fresh filesystem lays out a
//! large file), terminated by a suffix of zeros.

use crate::bmp;
use crate::device::DeviceView;
use crate::error::RecoverError;
use crate::ext;
use crate::groups::block_group_and_bit;
use crate::groups::GroupCache;
use crate::status::IndirectLevel;
use crate::status::StatusEvent;
use crate::status::StatusSink;

/// The four ordered candidate lists produced by a scan.
#[derive(Debug, Default)]
pub struct ScanResult {
	/// Blocks whose first two bytes are the BMP magic.
	pub bmp_starts: Vec<u32>,
	/// Blocks that look like a single-indirect block.
	pub single_indirects: Vec<u32>,
	/// Blocks that look like a double-indirect block.
	pub double_indirects: Vec<u32>,
	/// Blocks that look like a triple-indirect block.
	pub triple_indirects: Vec<u32>,
}

impl ScanResult {
	/// Returns the candidate list for the given indirection level.
	pub fn indirects(&self, level: IndirectLevel) -> &[u32] {
		match level {
			IndirectLevel::Single => &self.single_indirects,
			IndirectLevel::Double => &self.double_indirects,
			IndirectLevel::Triple => &self.triple_indirects,
		}
	}
}

/// Returns whether `block` is currently marked used in its group's data bitmap.
pub fn is_block_used(device: &DeviceView, groups: &GroupCache, block: u32) -> bool {
	if block >= device.block_count {
		return false;
	}
	let (group, bit) = block_group_and_bit(block);
	let bitmap_block = groups.block_bitmap_block(group);
	ext::bitmap_bit(device.block(bitmap_block), bit)
}

/// Reads block `block` as an array of 1024 little-endian block-number entries.
pub(crate) fn read_entries(device: &DeviceView, block: u32) -> [u32; ext::PTRS_PER_BLOCK] {
	let data = device.block(block);
	let mut entries = [0u32; ext::PTRS_PER_BLOCK];
	for (i, e) in entries.iter_mut().enumerate() {
		*e = ext::read_u32(data, i * 4);
	}
	entries
}

/// Tests whether the 1024 entries of a candidate block form a valid run for the given
/// level of indirection.
pub fn is_indirect(device: &DeviceView, block: u32, level: IndirectLevel) -> bool {
	if block >= device.block_count {
		return false;
	}
	let entries = read_entries(device, block);
	match level {
		IndirectLevel::Single => is_ascending_run(&entries),
		IndirectLevel::Double => is_pointer_run(device, &entries, IndirectLevel::Single),
		IndirectLevel::Triple => is_pointer_run(device, &entries, IndirectLevel::Double),
	}
}

/// The level-1 shape: `S . Z*`, where `S` is a sequence of 4-entry groups each
/// ascending by one from the previous entry, and `Z*` is a maximal suffix of zeros.
/// The first entry must be non-zero.
fn is_ascending_run(entries: &[u32; ext::PTRS_PER_BLOCK]) -> bool {
	if entries[0] == 0 {
		return false;
	}

	let mut i = 0usize;
	let mut in_zero_run = false;
	while i < entries.len() {
		if in_zero_run {
			if entries[i] != 0 {
				return false;
			}
			i += 1;
			continue;
		}

		if i % 4 == 0 && entries[i] == 0 {
			// `i` cannot be 0 here: that case was rejected above.
			in_zero_run = true;
			i += 1;
			continue;
		}

		// Inspect the remainder of this group of 4 for either a consistent ascending
		// chain or the start of the zero suffix.
		let mut rejected = false;
		let mut zero_started_at = None;
		let mut last_checked = i;
		for k in 1..4 {
			let idx = i + k;
			if idx >= entries.len() {
				break;
			}
			if entries[idx] == 0 {
				zero_started_at = Some(idx);
				break;
			}
			if entries[idx] == entries[idx - 1] + 1 {
				last_checked = idx;
				continue;
			}
			rejected = true;
			break;
		}

		if rejected {
			return false;
		}
		match zero_started_at {
			Some(idx) => {
				in_zero_run = true;
				i = idx + 1;
			}
			None => i = last_checked + 1,
		}
	}

	true
}

/// The level-2/3 shape: every non-zero entry must itself satisfy `sub_level`'s shape.
/// A single leading zero is tolerated (two leading zeros reject); once any entry after
/// that is zero, every following entry must be zero too.
fn is_pointer_run(
	device: &DeviceView,
	entries: &[u32; ext::PTRS_PER_BLOCK],
	sub_level: IndirectLevel,
) -> bool {
	let mut in_zero_run = false;
	for (cx, &entry) in entries.iter().enumerate() {
		if cx == 0 && entry == 0 {
			if entries[1] == 0 {
				return false;
			}
			continue;
		}

		if in_zero_run {
			if entry != 0 {
				return false;
			}
			continue;
		}

		if entry == 0 {
			in_zero_run = true;
			continue;
		}

		if !is_indirect(device, entry, sub_level) {
			return false;
		}
	}

	true
}

/// Scans every block on the device, sequentially, classifying each free block as a
/// BMP candidate or an N-level indirect candidate.
pub fn scan(
	device: &DeviceView,
	groups: &GroupCache,
	sink: &mut dyn StatusSink,
) -> Result<ScanResult, RecoverError> {
	sink.emit(StatusEvent::ScanStart);

	let mut result = ScanResult::default();
	let nblocks = device.block_count;
	let mut percent = 0u32;

	for b in 0..nblocks {
		let cur_percent = (b as u64 * 100 / nblocks as u64) as u32;

		if !is_block_used(device, groups, b) {
			let matched = [
				IndirectLevel::Triple,
				IndirectLevel::Double,
				IndirectLevel::Single,
			]
			.into_iter()
			.find(|&level| is_indirect(device, b, level));

			match matched {
				Some(level) => {
					sink.emit(StatusEvent::ScanIndirect { level, block: b });
					match level {
						IndirectLevel::Single => result.single_indirects.push(b),
						IndirectLevel::Double => result.double_indirects.push(b),
						IndirectLevel::Triple => result.triple_indirects.push(b),
					}
				}
				None => {
					if bmp::is_bmp_start(device.block(b)) {
						sink.emit(StatusEvent::ScanBmp(b));
						result.bmp_starts.push(b);
					}
				}
			}
		}

		if cur_percent >= percent + 1 {
			percent += 1;
			sink.emit(StatusEvent::ScanProgress(percent));
		}
	}

	sink.emit(StatusEvent::Done);

	if result.bmp_starts.is_empty() {
		Err(RecoverError::NoBmpStarts)
	} else {
		Ok(result)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn block_of(entries: &[u32]) -> Vec<u8> {
		let mut block = vec![0u8; ext::BLOCK_SIZE as usize];
		for (i, &e) in entries.iter().enumerate() {
			ext::write_u32(&mut block, i * 4, e);
		}
		block
	}

	fn device_with_block(block_num: u32, content: Vec<u8>, group_count: u32) -> DeviceView {
		let size = group_count as u64 * ext::BYTES_PER_GROUP;
		let mut image = vec![0u8; size as usize];
		let off = block_num as u64 * ext::BLOCK_SIZE;
		image[off as usize..off as usize + content.len()].copy_from_slice(&content);
		ext::write_u32(&mut image, ext::SUPERBLOCK_OFFSET as usize + 40, 1024);
		ext::write_u16(&mut image, ext::SUPERBLOCK_OFFSET as usize + 88, 128);
		DeviceView::from_image(image)
	}

	#[test]
	fn ascending_run_accepts_full_contiguous() {
		let mut entries = [0u32; ext::PTRS_PER_BLOCK];
		for (i, e) in entries.iter_mut().enumerate() {
			*e = 100 + i as u32;
		}
		assert!(is_ascending_run(&entries));
	}

	#[test]
	fn ascending_run_accepts_zero_suffix() {
		let mut entries = [0u32; ext::PTRS_PER_BLOCK];
		for i in 0..20 {
			entries[i] = 100 + i as u32;
		}
		assert!(is_ascending_run(&entries));
	}

	#[test]
	fn ascending_run_rejects_leading_zero() {
		let entries = [0u32; ext::PTRS_PER_BLOCK];
		assert!(!is_ascending_run(&entries));
	}

	#[test]
	fn ascending_run_rejects_gap() {
		let mut entries = [0u32; ext::PTRS_PER_BLOCK];
		for i in 0..8 {
			entries[i] = 100 + i as u32;
		}
		entries[8] = 999; // breaks the ascending chain instead of continuing or zeroing
		assert!(!is_ascending_run(&entries));
	}

	#[test]
	fn ascending_run_rejects_nonzero_after_zero_suffix() {
		let mut entries = [0u32; ext::PTRS_PER_BLOCK];
		for i in 0..8 {
			entries[i] = 100 + i as u32;
		}
		entries[500] = 5; // nonzero reappearing in what should be the zero suffix
		assert!(!is_ascending_run(&entries));
	}

	#[test]
	fn scan_finds_bmp_candidate_not_shaped_like_indirect() {
		let mut content = vec![0u8; ext::BLOCK_SIZE as usize];
		content[0..2].copy_from_slice(&bmp::MAGIC);
		content[2..6].copy_from_slice(&16384u32.to_le_bytes());
		let device = device_with_block(200, content, 1);
		let groups = GroupCache::build(&device, &mut crate::status::NullSink);
		let result = scan(&device, &groups, &mut crate::status::NullSink).unwrap();
		assert_eq!(result.bmp_starts, vec![200]);
		assert!(result.single_indirects.is_empty());
	}

	#[test]
	fn level2_tolerates_one_leading_zero() {
		let mut l1 = [0u32; ext::PTRS_PER_BLOCK];
		for (i, e) in l1.iter_mut().enumerate() {
			*e = 300 + i as u32;
		}
		let mut l2 = [0u32; ext::PTRS_PER_BLOCK];
		l2[0] = 0;
		l2[1] = 50;

		let size = ext::BYTES_PER_GROUP;
		let mut image = vec![0u8; size as usize];
		ext::write_u32(&mut image, ext::SUPERBLOCK_OFFSET as usize + 40, 1024);
		ext::write_u16(&mut image, ext::SUPERBLOCK_OFFSET as usize + 88, 128);
		let l1_bytes = block_of(&l1);
		let off1 = 50u64 * ext::BLOCK_SIZE;
		image[off1 as usize..off1 as usize + l1_bytes.len()].copy_from_slice(&l1_bytes);
		let l2_bytes = block_of(&l2);
		let off2 = 60u64 * ext::BLOCK_SIZE;
		image[off2 as usize..off2 as usize + l2_bytes.len()].copy_from_slice(&l2_bytes);
		let device = DeviceView::from_image(image);

		assert!(is_indirect(&device, 60, IndirectLevel::Double));
	}

	#[test]
	fn level2_rejects_two_leading_zeros() {
		let mut l2 = [0u32; ext::PTRS_PER_BLOCK];
		l2[0] = 0;
		l2[1] = 0;
		l2[2] = 50;
		let device = device_with_block(60, block_of(&l2), 1);
		assert!(!is_indirect(&device, 60, IndirectLevel::Double));
	}

	/// Writes a 4-entry ascending run (then an implicit zero suffix, since the rest of
	/// the image is already zeroed) at `block`, starting at `start`.
	fn put_ascending_leaf(image: &mut [u8], block: u32, start: u32) {
		let entries: Vec<u32> = (0..4).map(|i| start + i).collect();
		let bytes = block_of(&entries);
		let off = (block as u64 * ext::BLOCK_SIZE) as usize;
		image[off..off + bytes.len()].copy_from_slice(&bytes);
	}

	/// Writes a 4-entry pointer run (then an implicit zero suffix) at `block`,
	/// pointing at `targets`.
	fn put_pointer_run(image: &mut [u8], block: u32, targets: [u32; 4]) {
		let bytes = block_of(&targets);
		let off = (block as u64 * ext::BLOCK_SIZE) as usize;
		image[off..off + bytes.len()].copy_from_slice(&bytes);
	}

	/// Builds a one-group image containing a three-level pyramid: block 500 is a
	/// triple-indirect block pointing at blocks 100/101/102/103 (each a valid
	/// double-indirect block), which in turn point at groups of four plain
	/// ascending-run leaves. Block 500's own bytes, read as a plain ascending run,
	/// also happen to satisfy the level-1 shape, and read as a pointer run into
	/// 100/101/102/103 also happen to satisfy the level-2 shape — exactly the
	/// ambiguity the scan's level-3-first priority order exists to resolve.
	fn triple_indirect_pyramid() -> Vec<u8> {
		let size = ext::BYTES_PER_GROUP;
		let mut image = vec![0u8; size as usize];
		ext::write_u32(&mut image, ext::SUPERBLOCK_OFFSET as usize + 40, 1024);
		ext::write_u16(&mut image, ext::SUPERBLOCK_OFFSET as usize + 88, 128);

		let leaf_groups: [[u32; 4]; 4] = [[200, 201, 202, 203], [210, 211, 212, 213], [220, 221, 222, 223], [230, 231, 232, 233]];
		for group in &leaf_groups {
			for &leaf in group {
				put_ascending_leaf(&mut image, leaf, 9000 + leaf * 10);
			}
		}

		let double_blocks = [100u32, 101, 102, 103];
		for (&dbl, group) in double_blocks.iter().zip(leaf_groups.iter()) {
			put_pointer_run(&mut image, dbl, *group);
		}

		put_pointer_run(&mut image, 500, double_blocks);

		// `scan` requires at least one BMP candidate to succeed; block 600 is
		// unrelated to the pyramid above.
		let bmp_off = (600u64 * ext::BLOCK_SIZE) as usize;
		image[bmp_off..bmp_off + 2].copy_from_slice(&bmp::MAGIC);
		image[bmp_off + 2..bmp_off + 6].copy_from_slice(&4096u32.to_le_bytes());

		image
	}

	#[test]
	fn is_indirect_recognizes_triple_shape() {
		let device = DeviceView::from_image(triple_indirect_pyramid());
		assert!(is_indirect(&device, 500, IndirectLevel::Triple));
	}

	#[test]
	fn scan_prioritizes_triple_over_single_and_double() {
		let device = DeviceView::from_image(triple_indirect_pyramid());
		let groups = GroupCache::build(&device, &mut crate::status::NullSink);
		let result = scan(&device, &groups, &mut crate::status::NullSink).unwrap();

		assert!(result.triple_indirects.contains(&500));
		assert!(!result.double_indirects.contains(&500));
		assert!(!result.single_indirects.contains(&500));
	}
}
