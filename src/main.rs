//! The `bmp-undelete` tool recovers deleted BMP files from an unmounted ext2-family
//! block device by reconstructing inodes, indirect blocks and a root directory entry
//! over intact-but-unreferenced data blocks.

use recover::status::StatusEvent;
use recover::status::StatusSink;
use recover::Engine;
use recover::EngineConfig;
use std::env;
use std::path::PathBuf;
use std::process::exit;
use utils::prompt::prompt;
use utils::util::ByteSize;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
	/// The name of the current program used in command line.
	prog: String,

	/// If true, print command line help and exit.
	help: bool,
	/// If true, skip the pre-collect confirmation prompt.
	yes: bool,

	/// The path to the device file to recover from.
	device_path: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut args: Args = Default::default();
	let mut iter = env::args();

	args.prog = iter.next().unwrap_or("bmp-undelete".to_owned());

	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,
			"-y" | "--yes" => args.yes = true,

			_ => args.device_path = Some(PathBuf::from(arg)),
		}
	}

	args
}

fn print_usage(prog: &str) {
	println!("usage: {prog} [-y|--yes] <device>");
	println!();
	println!("recovers deleted BMP files from an unmounted ext2-family device");
	println!();
	println!("  -y, --yes    skip the confirmation prompt");
	println!("  -h, --help   print this message");
}

/// The default sink: maps `Error`/`Warn` to stderr and everything else to stdout,
/// mirroring the original tool's `BAD`/`INFO`/`GOOD` status levels.
struct ConsoleSink;

impl StatusSink for ConsoleSink {
	fn emit(&mut self, event: StatusEvent) {
		match event {
			StatusEvent::Error(msg) => eprintln!("error: {msg}"),
			StatusEvent::Warn(msg) => eprintln!("warning: {msg}"),

			StatusEvent::Cleanup => println!("cleaning up..."),

			StatusEvent::GroupInfoStart => println!("reading group descriptors..."),
			StatusEvent::GroupProg(_) => {}

			StatusEvent::ScanStart => println!("scanning free blocks..."),
			StatusEvent::ScanIndirect { level, block } => {
				println!("found candidate level-{level} indirect block at {block}")
			}
			StatusEvent::ScanBmp(block) => println!("found candidate BMP header at block {block}"),
			StatusEvent::ScanProgress(pct) => {
				if pct % 10 == 0 {
					println!("scan: {pct}%");
				}
			}

			StatusEvent::CollectStart => println!("recovering candidates..."),
			StatusEvent::Sanity(block) => println!("checking candidate at block {block}..."),
			StatusEvent::Inode(inum) => println!("reserved inode {inum}"),
			StatusEvent::Populate(inum) => println!("populating inode {inum}"),
			StatusEvent::PopulateDirect { first, last } => {
				println!("wrote direct blocks {first}..={last}")
			}
			StatusEvent::PopulateIndirect { level, block } => {
				println!("wrote level-{level} indirect block {block}")
			}
			StatusEvent::Link(inum) => println!("linking inode {inum} into root directory"),
			StatusEvent::Recovered(name) => println!("recovered {name}"),

			StatusEvent::Done => {}
		}
	}
}

fn main() {
	let args = parse_args();

	if args.help {
		print_usage(&args.prog);
		exit(0);
	}

	let device_path = args.device_path.unwrap_or_else(|| {
		eprintln!("{}: specify path to a device", args.prog);
		print_usage(&args.prog);
		exit(-1);
	});

	if !args.yes {
		if let Ok(sectors) = utils::disk::get_disk_size(&device_path) {
			println!("{}: {}", device_path.display(), ByteSize::from_sectors_count(sectors));
		}

		let confirm = prompt(Some("This will write to the device. Proceed? (y/N) "), false)
			.map(|s| s.to_lowercase() == "y")
			.unwrap_or(false);
		if !confirm {
			eprintln!("Abort.");
			exit(-1);
		}
	}

	let mut sink = ConsoleSink;
	let config = EngineConfig::default();

	let mut engine = Engine::open(&device_path, config, &mut sink).unwrap_or_else(|e| {
		eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
		exit(-1);
	});

	engine.scan(&mut sink).unwrap_or_else(|e| {
		eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
		exit(-1);
	});

	let report = engine.collect(&mut sink).unwrap_or_else(|e| {
		eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
		exit(-1);
	});

	println!("recovered {} file(s)", report.recovered.len());
}
