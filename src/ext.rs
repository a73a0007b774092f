//! On-disk layout of the one ext-family variant this tool targets: 4 KiB blocks, groups
//! of 32768 blocks, 64-byte group descriptors, ext2-style inodes and directory entries.
//!
//! Multi-byte fields are always read and written with explicit little-endian
//! conversions (`from_le_bytes`/`to_le_bytes`), regardless of host byte order, per the
//! format's on-disk endianness contract.

use std::mem::size_of;

/// Size of one block, in bytes.
pub const BLOCK_SIZE: u64 = 4096;
/// Number of blocks in one group.
pub const BLOCKS_PER_GROUP: u64 = 8 * BLOCK_SIZE;
/// Size of one group, in bytes.
pub const BYTES_PER_GROUP: u64 = BLOCKS_PER_GROUP * BLOCK_SIZE;
/// Byte offset of the primary superblock from the start of the device.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// Byte offset of the group descriptor table from the start of the device.
pub const GDT_OFFSET: u64 = BLOCK_SIZE;
/// Size of one group descriptor entry, in bytes.
pub const GD_SIZE: u64 = 64;
/// Number of 32-bit block pointers addressable by one indirect block.
pub const PTRS_PER_BLOCK: usize = (BLOCK_SIZE as usize) / size_of::<u32>();
/// Inode number of the root directory.
pub const ROOT_INODE: u32 = 2;
/// Index of the first single-indirect slot in an inode's block pointer array.
pub const SINGLE_INDIRECT_IDX: usize = 12;
/// Index of the first double-indirect slot.
pub const DOUBLE_INDIRECT_IDX: usize = 13;
/// Index of the first triple-indirect slot.
pub const TRIPLE_INDIRECT_IDX: usize = 14;
/// Number of block pointer slots in an inode.
pub const BLOCK_PTRS_COUNT: usize = 15;

/// Regular-file inode mode bits (`S_IFREG | 0o777`).
pub const MODE_REGULAR_0777: u16 = 0x8000 | 0o777;
/// `file_type` value for a regular file in a directory entry.
pub const FILE_TYPE_REGULAR: u8 = 1;

/// Byte offset of the `rec_len` field within the group descriptor for the group
/// descriptor table's byte offset of a group `g`.
pub fn gd_offset(g: u32) -> u64 {
	GDT_OFFSET + g as u64 * GD_SIZE
}

/// Returns the offset, in the group descriptor, of the block usage bitmap pointer.
pub const GD_BLOCK_BITMAP_OFF: usize = 0;
/// Returns the offset, in the group descriptor, of the inode usage bitmap pointer.
pub const GD_INODE_BITMAP_OFF: usize = 4;
/// Returns the offset, in the group descriptor, of the inode table pointer.
pub const GD_INODE_TABLE_OFF: usize = 8;

/// Reads a little-endian `u32` at byte offset `off` in `bytes`.
pub fn read_u32(bytes: &[u8], off: usize) -> u32 {
	u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap())
}

/// Writes a little-endian `u32` at byte offset `off` in `bytes`.
pub fn write_u32(bytes: &mut [u8], off: usize, value: u32) {
	bytes[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// Reads a little-endian `u16` at byte offset `off` in `bytes`.
pub fn read_u16(bytes: &[u8], off: usize) -> u16 {
	u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap())
}

/// Writes a little-endian `u16` at byte offset `off` in `bytes`.
pub fn write_u16(bytes: &mut [u8], off: usize, value: u16) {
	bytes[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

/// Read-only view of the primary superblock, borrowed from the mapped device.
///
/// Only the fields this tool actually consults are exposed; the rest of the 1024-byte
/// superblock is left untouched (this tool never needs to write it).
pub struct SuperblockView<'a> {
	bytes: &'a [u8],
}

impl<'a> SuperblockView<'a> {
	/// Wraps the 1024+ bytes starting at the superblock's offset in the device.
	pub fn new(bytes: &'a [u8]) -> Self {
		Self { bytes }
	}

	/// Total number of inodes in the filesystem.
	pub fn inodes_count(&self) -> u32 {
		read_u32(self.bytes, 0)
	}

	/// Total number of blocks in the filesystem.
	pub fn blocks_count(&self) -> u32 {
		read_u32(self.bytes, 4)
	}

	/// Number of inodes per group.
	pub fn inodes_per_group(&self) -> u32 {
		read_u32(self.bytes, 40)
	}

	/// The first inode number not reserved for internal filesystem use.
	pub fn first_inode(&self) -> u32 {
		read_u32(self.bytes, 84)
	}

	/// The size, in bytes, of one on-disk inode.
	pub fn inode_size(&self) -> u16 {
		read_u16(self.bytes, 88)
	}
}

/// Read-only view of one block group descriptor.
pub struct GroupDescriptorView<'a> {
	bytes: &'a [u8],
}

impl<'a> GroupDescriptorView<'a> {
	/// Wraps the `GD_SIZE` bytes of one descriptor entry.
	pub fn new(bytes: &'a [u8]) -> Self {
		Self { bytes }
	}

	/// Block number of this group's block usage bitmap.
	pub fn block_bitmap(&self) -> u32 {
		read_u32(self.bytes, GD_BLOCK_BITMAP_OFF)
	}

	/// Block number of this group's inode usage bitmap.
	pub fn inode_bitmap(&self) -> u32 {
		read_u32(self.bytes, GD_INODE_BITMAP_OFF)
	}

	/// Block number of this group's inode table.
	pub fn inode_table(&self) -> u32 {
		read_u32(self.bytes, GD_INODE_TABLE_OFF)
	}
}

/// Tests whether bit `bit` is set in a bitmap byte array (bit 0 = LSB of byte 0).
pub fn bitmap_bit(bitmap: &[u8], bit: u32) -> bool {
	let byte = bitmap[(bit / 8) as usize];
	(byte >> (bit % 8)) & 1 != 0
}

/// Sets bit `bit` in a bitmap byte array.
pub fn bitmap_set(bitmap: &mut [u8], bit: u32) {
	let byte = &mut bitmap[(bit / 8) as usize];
	*byte |= 1 << (bit % 8);
}

/// Byte offsets of the fields of an on-disk inode this tool reads or writes.
mod inode_off {
	pub const MODE: usize = 0;
	pub const SIZE_LO: usize = 4;
	pub const LINKS_COUNT: usize = 26;
	pub const BLOCK: usize = 40;
	pub const EXTRA_ISIZE: usize = 128;
}

/// Mutable view of one on-disk inode, addressed by its byte window in the mapped
/// device.
pub struct InodeView<'a> {
	bytes: &'a mut [u8],
}

impl<'a> InodeView<'a> {
	/// Wraps the `inode_size` bytes of one inode slot.
	pub fn new(bytes: &'a mut [u8]) -> Self {
		Self { bytes }
	}

	/// Sets the mode field.
	pub fn set_mode(&mut self, mode: u16) {
		write_u16(self.bytes, inode_off::MODE, mode);
	}

	/// Sets the lower 32 bits of the file size.
	pub fn set_size_lo(&mut self, size: u32) {
		write_u32(self.bytes, inode_off::SIZE_LO, size);
	}

	/// Sets the hard link count.
	pub fn set_links_count(&mut self, count: u16) {
		write_u16(self.bytes, inode_off::LINKS_COUNT, count);
	}

	/// Sets `i_extra_isize`, if this inode slot is large enough to hold it.
	pub fn set_extra_isize(&mut self, value: u16) {
		if self.bytes.len() >= inode_off::EXTRA_ISIZE + 2 {
			write_u16(self.bytes, inode_off::EXTRA_ISIZE, value);
		}
	}

	/// Returns the block pointer stored at slot `idx` (0..15).
	pub fn block_ptr(&self, idx: usize) -> u32 {
		read_u32(self.bytes, inode_off::BLOCK + idx * 4)
	}

	/// Sets the block pointer stored at slot `idx` (0..15).
	pub fn set_block_ptr(&mut self, idx: usize, block: u32) {
		write_u32(self.bytes, inode_off::BLOCK + idx * 4, block);
	}
}

/// Byte length of a directory entry's fixed-size header (before the name).
pub const DIR_ENTRY_HEADER_LEN: usize = 8;

/// View of one directory entry packed into a directory data block.
pub struct DirEntryView<'a> {
	bytes: &'a mut [u8],
}

impl<'a> DirEntryView<'a> {
	/// Wraps the bytes starting at the entry's first byte, up to the end of the block.
	pub fn new(bytes: &'a mut [u8]) -> Self {
		Self { bytes }
	}

	/// The inode this entry points at.
	pub fn inode(&self) -> u32 {
		read_u32(self.bytes, 0)
	}

	/// Sets the inode this entry points at.
	pub fn set_inode(&mut self, inode: u32) {
		write_u32(self.bytes, 0, inode);
	}

	/// The total length of this entry, including header and name.
	pub fn rec_len(&self) -> u16 {
		read_u16(self.bytes, 4)
	}

	/// Sets the total length of this entry.
	pub fn set_rec_len(&mut self, rec_len: u16) {
		write_u16(self.bytes, 4, rec_len);
	}

	/// The length of the entry's name, in bytes.
	pub fn name_len(&self) -> u8 {
		self.bytes[6]
	}

	/// Sets the length of the entry's name, in bytes.
	pub fn set_name_len(&mut self, name_len: u8) {
		self.bytes[6] = name_len;
	}

	/// Sets the entry's file type tag.
	pub fn set_file_type(&mut self, file_type: u8) {
		self.bytes[7] = file_type;
	}

	/// Writes `name` into the entry's name field.
	pub fn set_name(&mut self, name: &[u8]) {
		self.bytes[DIR_ENTRY_HEADER_LEN..DIR_ENTRY_HEADER_LEN + name.len()].copy_from_slice(name);
	}

	/// The on-disk length actually required by this entry's current name: the header
	/// plus the name, rounded up to a multiple of 4.
	pub fn real_rec_len(&self) -> u16 {
		round4(DIR_ENTRY_HEADER_LEN as u16 + self.name_len() as u16)
	}
}

/// Rounds `n` up to the next multiple of 4.
pub fn round4(n: u16) -> u16 {
	(n + 3) & !3
}
