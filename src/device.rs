//! The sole view of the raw block device: opens it, sizes it, memory-maps it, and
//! exposes geometry derived from the superblock.

use crate::error::RecoverError;
use crate::ext;
use libc::ioctl;
use memmap2::MmapMut;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// ioctl macro: command encoding, mirrors `utils::disk`'s `ior!`.
macro_rules! ioc {
	($a:expr, $b:expr, $c:expr, $d:expr) => {
		(($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
	};
}

macro_rules! ior {
	($a:expr, $b:expr, $c:ty) => {
		ioc!(2u64, $a, $b, std::mem::size_of::<$c>() as u64)
	};
}

/// ioctl command: get the size of a block device, in bytes.
const BLKGETSIZE64: u64 = ior!(0x12, 114, u64);

/// Where the mapped bytes of the device actually live.
enum Backing {
	/// A real device or regular file, memory-mapped read/write.
	Mapped(MmapMut),
	/// An in-memory image, used by tests to exercise the engine without a real device
	/// file.
	Buffer(Vec<u8>),
}

impl Backing {
	fn as_slice(&self) -> &[u8] {
		match self {
			Self::Mapped(m) => &m[..],
			Self::Buffer(b) => &b[..],
		}
	}

	fn as_mut_slice(&mut self) -> &mut [u8] {
		match self {
			Self::Mapped(m) => &mut m[..],
			Self::Buffer(b) => &mut b[..],
		}
	}
}

/// The sole view of the mapped block device plus the geometry cached at open time.
pub struct DeviceView {
	/// Kept open for as long as the mapping lives; `None` for an in-memory test image.
	_file: Option<File>,
	backing: Backing,

	/// Total size of the device, in bytes.
	pub size: u64,
	/// Total number of 4 KiB blocks on the device.
	pub block_count: u32,
	/// Total number of groups on the device.
	pub group_count: u32,

	/// Number of inodes per group, read from the superblock.
	pub inodes_per_group: u32,
	/// Size of one on-disk inode, in bytes, read from the superblock.
	pub inode_size: u16,
	/// First inode number not reserved for internal filesystem use.
	pub first_inode: u32,
	/// Total number of inodes in the filesystem, read from the superblock.
	pub total_inodes: u32,
}

impl DeviceView {
	/// Opens the device at `path` read/write and memory-maps its whole extent.
	pub fn open(path: &Path) -> Result<Self, RecoverError> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.open(path)
			.map_err(RecoverError::DeviceOpen)?;

		let size = device_size(&file).map_err(RecoverError::DeviceSize)?;

		let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(RecoverError::DeviceMap)?;

		Ok(Self::from_parts(Some(file), Backing::Mapped(mmap), size))
	}

	/// Wraps an in-memory image as a device view, for tests.
	#[cfg(test)]
	pub fn from_image(image: Vec<u8>) -> Self {
		let size = image.len() as u64;
		Self::from_parts(None, Backing::Buffer(image), size)
	}

	fn from_parts(file: Option<File>, backing: Backing, size: u64) -> Self {
		let block_count = (size / ext::BLOCK_SIZE) as u32;
		let group_count = (size / ext::BYTES_PER_GROUP) as u32;

		let mut view = Self {
			_file: file,
			backing,
			size,
			block_count,
			group_count,
			inodes_per_group: 0,
			inode_size: 0,
			first_inode: 0,
			total_inodes: 0,
		};

		let sb = ext::SuperblockView::new(view.superblock_bytes());
		view.inodes_per_group = sb.inodes_per_group();
		view.inode_size = sb.inode_size();
		view.first_inode = sb.first_inode();
		view.total_inodes = sb.inodes_count();
		view
	}

	/// Flushes pending writes to the underlying device. A no-op on an in-memory test
	/// image.
	pub fn flush(&mut self) -> io::Result<()> {
		match &mut self.backing {
			Backing::Mapped(m) => m.flush(),
			Backing::Buffer(_) => Ok(()),
		}
	}

	/// Returns the full mapped extent, read-only.
	pub fn bytes(&self) -> &[u8] {
		self.backing.as_slice()
	}

	/// Returns the full mapped extent, mutable.
	pub fn bytes_mut(&mut self) -> &mut [u8] {
		self.backing.as_mut_slice()
	}

	/// Returns the bytes of block `block`, read-only.
	pub fn block(&self, block: u32) -> &[u8] {
		let off = block as u64 * ext::BLOCK_SIZE;
		&self.bytes()[off as usize..(off + ext::BLOCK_SIZE) as usize]
	}

	/// Returns the bytes of block `block`, mutable.
	pub fn block_mut(&mut self, block: u32) -> &mut [u8] {
		let off = block as u64 * ext::BLOCK_SIZE;
		&mut self.bytes_mut()[off as usize..(off + ext::BLOCK_SIZE) as usize]
	}

	/// Returns the superblock's raw bytes.
	fn superblock_bytes(&self) -> &[u8] {
		&self.bytes()[ext::SUPERBLOCK_OFFSET as usize..]
	}

	/// Returns a view of the primary superblock.
	pub fn superblock(&self) -> ext::SuperblockView<'_> {
		ext::SuperblockView::new(self.superblock_bytes())
	}

	/// Number of inodes addressable per block, derived from the inode size.
	pub fn inodes_per_block(&self) -> u32 {
		ext::BLOCK_SIZE as u32 / self.inode_size as u32
	}

	/// Returns the on-disk bytes of the inode slot at index `idx_in_group` (0-based)
	/// within the inode table starting at block `inode_table_block`.
	pub fn inode_slot_mut(&mut self, inode_table_block: u32, idx_in_group: u32) -> &mut [u8] {
		let inode_size = self.inode_size as u64;
		let byte_off_in_table = idx_in_group as u64 * inode_size;
		let block_off = byte_off_in_table / ext::BLOCK_SIZE;
		let in_block_off = byte_off_in_table % ext::BLOCK_SIZE;
		let abs = (inode_table_block as u64 + block_off) * ext::BLOCK_SIZE + in_block_off;
		&mut self.bytes_mut()[abs as usize..abs as usize + inode_size as usize]
	}
}

/// Returns the size, in bytes, of the device or regular file at `path`.
fn device_size(file: &File) -> io::Result<u64> {
	let metadata = file.metadata()?;
	let file_type = metadata.file_type();

	if file_type.is_block_device() || file_type.is_char_device() {
		// BLKGETSIZE64 reports the device's size directly in bytes.
		let mut size_bytes: u64 = 0;
		let ret = unsafe { ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut size_bytes) };
		if ret < 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(size_bytes)
	} else {
		Ok(metadata.len())
	}
}
