use std::fmt;

pub const SECTOR_COUNT: usize = 5;
pub const SECTOR_SIZE: usize = 8;

/// erase mask selecting every sector
pub const ALL_SECTORS: u8 = (1 << SECTOR_COUNT) - 1;

pub type Sector = [u8; SECTOR_SIZE];

/// Complete NVM content: all five sectors
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Config {
	pub sectors: [Sector; SECTOR_COUNT],
}

/// Vendor (ST) default NVM content
pub const DEFAULT_SECTORS: [Sector; SECTOR_COUNT] = [
	[0x00, 0x00, 0xb0, 0xaa, 0x00, 0x45, 0x00, 0x00],
	[0x10, 0x40, 0x9c, 0x1c, 0xff, 0x01, 0x3c, 0xdf],
	[0x02, 0x40, 0x0f, 0x00, 0x32, 0x00, 0xfc, 0xf1],
	[0x00, 0x19, 0x56, 0xaf, 0xf5, 0x35, 0x5f, 0x00],
	[0x00, 0x4b, 0x90, 0x21, 0x43, 0x00, 0x40, 0xfb],
];

impl Config {
	pub fn vendor_defaults() -> Self {
		Config { sectors: DEFAULT_SECTORS }
	}

	pub fn zeroed() -> Self {
		Config { sectors: [[0u8; SECTOR_SIZE]; SECTOR_COUNT] }
	}
}

impl Default for Config {
	fn default() -> Self {
		Config::vendor_defaults()
	}
}

impl fmt::Display for Config {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, sector) in self.sectors.iter().enumerate() {
			write!(f, "{}:", i)?;
			for b in sector {
				write!(f, " {:02x}", b)?;
			}
			if i + 1 < SECTOR_COUNT {
				writeln!(f)?;
			}
		}
		Ok(())
	}
}

impl fmt::Debug for Config {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_list()
			.entries(self.sectors.iter().map(|s| format!("{:02x?}", s)))
			.finish()
	}
}

/// In-memory mirror of the NVM
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConfigCache {
	/// nothing read yet (or invalidated)
	Unloaded,
	/// same content as the NVM
	Loaded(Config),
	/// modified, needs flushing
	Dirty(Config),
}

impl ConfigCache {
	pub fn get(&self) -> Option<&Config> {
		match self {
			ConfigCache::Unloaded => None,
			ConfigCache::Loaded(c) | ConfigCache::Dirty(c) => Some(c),
		}
	}

	pub fn is_dirty(&self) -> bool {
		match self {
			ConfigCache::Dirty(_) => true,
			_ => false,
		}
	}
}

impl Default for ConfigCache {
	fn default() -> Self {
		ConfigCache::Unloaded
	}
}
