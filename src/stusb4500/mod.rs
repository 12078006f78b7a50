/* Chip documentation: https://www.st.com/en/interfaces-and-transceivers/stusb4500.html */

/* NVM ("FTP") programming sequences follow ST's STUSB4500 NVM flasher application note */

use std::time::{
	Duration,
	Instant,
};

use crate::i2c::RegisterBus;

mod error;
mod fields;
pub mod ftp;
mod nvm;

#[cfg(test)]
mod sim;

pub use self::error::NvmError;
pub use self::fields::{
	BitRange,
	Field,
	Pdo,
	PdoSettings,
	layout,
	decode_current,
	decode_flex_current,
	decode_limit,
	decode_voltage,
	encode_current,
	encode_flex_current,
	encode_limit,
	encode_voltage,
};
pub use self::nvm::{
	ALL_SECTORS,
	Config,
	ConfigCache,
	DEFAULT_SECTORS,
	SECTOR_COUNT,
	SECTOR_SIZE,
	Sector,
};

use self::error::hardware;
use self::ftp::{
	FtpCtrl0,
	FtpCtrl1,
	Opcode,
};

#[allow(dead_code)]
mod consts {
	pub const DEFAULT_ADDRESS: u16 = 0x28;

	pub const DEVICE_ID_REG: u8 = 0x2f;
	pub const DEVICE_ID: u8 = 0x21;
	pub const DEVICE_ID_B: u8 = 0x25; // later silicon revisions

	pub const RW_BUFFER: u8 = 0x53; // 8 bytes, 0x53..0x5a

	pub const FTP_CUST_PASSWORD_REG: u8 = 0x95;
	pub const FTP_CUST_PASSWORD: u8 = 0x47;

	pub const FTP_CTRL_0: u8 = 0x96;
	pub const FTP_CTRL_1: u8 = 0x97;
}

use self::consts::*;

pub use self::consts::DEFAULT_ADDRESS;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Options {
	/// 7-bit I2C address
	pub address: u16,
	/// how long to wait for the NVM controller to finish a request
	pub exec_timeout: Duration,
	/// read the NVM back after writing and compare
	pub verify: bool,
}

impl Default for Options {
	fn default() -> Self {
		Options {
			address: DEFAULT_ADDRESS,
			exec_timeout: Duration::from_secs(1),
			verify: true,
		}
	}
}

/// NVM access sequences on top of the register interface
trait RegisterBusFtpExt: RegisterBus {
	fn ftp_ctrl0_read(&mut self) -> crate::AResult<FtpCtrl0> {
		let data = FtpCtrl0(self.read_register(FTP_CTRL_0)?);
		trace!("FTP_CTRL_0 read : {:?}", data);
		Ok(data)
	}

	fn ftp_ctrl0_write(&mut self, data: FtpCtrl0) -> crate::AResult<()> {
		trace!("FTP_CTRL_0 write: {:?}", data);
		self.write_register(FTP_CTRL_0, data.0)
	}

	fn ftp_ctrl1_write(&mut self, data: FtpCtrl1) -> crate::AResult<()> {
		trace!("FTP_CTRL_1 write: {:?}", data);
		self.write_register(FTP_CTRL_1, data.0)
	}

	/// polls until the controller cleared REQ; returns error on timeout
	fn ftp_wait_exec(&mut self, timeout: Duration) -> crate::AResult<FtpCtrl0> {
		let start = Instant::now();
		loop {
			let ctrl0 = self.ftp_ctrl0_read()?;
			if !ctrl0.is_req() {
				return Ok(ctrl0);
			}
			if start.elapsed() >= timeout {
				return Err(NvmError::HardwareFault(format!(
					"NVM request timeout - still busy after {:?} (FTP_CTRL_0: {:?})", timeout, ctrl0
				)).into());
			}
		}
	}

	/// load `ctrl1`, then request execution on `sector` and wait for it
	fn ftp_exec(&mut self, ctrl1: FtpCtrl1, sector: u8, timeout: Duration) -> crate::AResult<()> {
		debug!("NVM opcode {:?} (sector {})", ctrl1.get_opcode(), sector);
		self.ftp_ctrl1_write(ctrl1)?;
		self.ftp_ctrl0_write(FtpCtrl0::request(sector))?;
		self.ftp_wait_exec(timeout)?;
		Ok(())
	}

	fn ftp_enter_read_mode(&mut self) -> crate::AResult<()> {
		debug!("NVM enter read mode");
		self.write_register(FTP_CUST_PASSWORD_REG, FTP_CUST_PASSWORD)?;
		// NVM is powered off after start-up; reset internal controller
		self.ftp_ctrl0_write(FtpCtrl0::reset())?;
		self.ftp_ctrl0_write(FtpCtrl0::powered())
	}

	fn ftp_exit_mode(&mut self) -> crate::AResult<()> {
		debug!("NVM exit programming mode");
		// drop PWR, keep the controller out of reset
		self.ftp_ctrl0_write(FtpCtrl0::idle())?;
		self.ftp_ctrl1_write(FtpCtrl1(0))?;
		self.write_register(FTP_CUST_PASSWORD_REG, 0)
	}

	fn ftp_read_sector(&mut self, index: u8, timeout: Duration) -> crate::AResult<Sector> {
		self.ftp_ctrl0_write(FtpCtrl0::powered())?;
		self.ftp_exec(FtpCtrl1::opcode(Opcode::Read), index, timeout)?;
		let mut sector = [0u8; SECTOR_SIZE];
		self.read_registers(RW_BUFFER, &mut sector)?;
		trace!("NVM sector {}: {:02x?}", index, sector);
		Ok(sector)
	}

	/// unlock and erase the sectors in `erased_sectors` (bit n: sector n)
	fn ftp_enter_write_mode(&mut self, erased_sectors: u8, timeout: Duration) -> crate::AResult<()> {
		debug!("NVM enter write mode (erasing sectors 0b{:05b})", erased_sectors);
		self.write_register(FTP_CUST_PASSWORD_REG, FTP_CUST_PASSWORD)?;
		// buffer must be zero for a partial erase
		self.write_register(RW_BUFFER, 0)?;
		self.ftp_ctrl0_write(FtpCtrl0::reset())?;
		self.ftp_ctrl0_write(FtpCtrl0::powered())?;

		self.ftp_exec(FtpCtrl1::write_ser(erased_sectors), 0, timeout)?;
		self.ftp_exec(FtpCtrl1::opcode(Opcode::SoftProgSector), 0, timeout)?;
		self.ftp_exec(FtpCtrl1::opcode(Opcode::EraseSector), 0, timeout)
	}

	/// sector must have been erased by `ftp_enter_write_mode`
	fn ftp_write_sector(&mut self, index: u8, data: &Sector, timeout: Duration) -> crate::AResult<()> {
		debug!("NVM program sector {}: {:02x?}", index, data);
		for (offset, b) in data.iter().enumerate() {
			self.write_register(RW_BUFFER + offset as u8, *b)?;
		}
		self.ftp_ctrl0_write(FtpCtrl0::powered())?;
		self.ftp_exec(FtpCtrl1::opcode(Opcode::WritePl), 0, timeout)?;
		self.ftp_exec(FtpCtrl1::opcode(Opcode::ProgSector), index, timeout)
	}
}
impl<B: RegisterBus + ?Sized> RegisterBusFtpExt for B {}

/// STUSB4500 with a cached copy of its NVM configuration
pub struct Stusb4500<B: RegisterBus> {
	bus: B,
	options: Options,
	cache: ConfigCache,
}

impl<B: RegisterBus> Stusb4500<B> {
	pub fn read_device_id(&mut self) -> crate::AResult<u8> {
		let bus = &mut self.bus;
		hardware("reading DEVICE_ID", || bus.read_register(DEVICE_ID_REG))
	}

	/// Reads all sectors from the NVM, bypassing the cache
	pub fn read_nvm(&mut self) -> crate::AResult<Config> {
		let timeout = self.options.exec_timeout;
		let bus = &mut self.bus;
		let result = hardware("reading NVM", || {
			bus.ftp_enter_read_mode()?;
			let mut config = Config::zeroed();
			for (index, sector) in config.sectors.iter_mut().enumerate() {
				*sector = bus.ftp_read_sector(index as u8, timeout)?;
			}
			bus.ftp_exit_mode()?;
			Ok(config)
		});
		if result.is_err() {
			// reading doesn't modify the NVM, try to leave the programming mode
			if let Err(e) = self.bus.ftp_exit_mode() {
				warn!("Couldn't leave NVM programming mode: {}", e);
			}
		}
		let config = result?;
		info!("Read NVM configuration");
		Ok(config)
	}

	/// Erases and programs all sectors, bypassing the cache.
	///
	/// A failure leaves the NVM in an unknown state.
	pub fn write_nvm(&mut self, config: &Config) -> crate::AResult<()> {
		let timeout = self.options.exec_timeout;
		{
			let bus = &mut self.bus;
			hardware("writing NVM", || {
				bus.ftp_enter_write_mode(ALL_SECTORS, timeout)?;
				for (index, sector) in config.sectors.iter().enumerate() {
					bus.ftp_write_sector(index as u8, sector, timeout)?;
				}
				bus.ftp_exit_mode()
			})?;
		}

		if self.options.verify {
			let flash = self.read_nvm()?;
			for index in 0..SECTOR_COUNT {
				if flash.sectors[index] != config.sectors[index] {
					return Err(NvmError::HardwareFault(format!(
						"Verify failed in sector {}: expected {:02x?}, NVM is {:02x?}",
						index, config.sectors[index], flash.sectors[index]
					)).into());
				}
			}
		}

		info!("Wrote NVM configuration");
		Ok(())
	}

	/// Cached configuration; reads the NVM if nothing is cached
	pub fn config(&mut self) -> crate::AResult<&Config> {
		if let ConfigCache::Unloaded = self.cache {
			self.cache = ConfigCache::Loaded(self.read_nvm()?);
		}
		match &self.cache {
			ConfigCache::Loaded(c) | ConfigCache::Dirty(c) => Ok(c),
			ConfigCache::Unloaded => unreachable!(),
		}
	}

	pub fn cache(&self) -> &ConfigCache {
		&self.cache
	}

	pub fn is_dirty(&self) -> bool {
		self.cache.is_dirty()
	}

	/// Drops the cached configuration (including unflushed changes)
	pub fn invalidate(&mut self) {
		if self.cache.is_dirty() {
			warn!("Discarding unflushed NVM changes");
		}
		self.cache = ConfigCache::Unloaded;
	}

	/// Replaces the cached configuration; needs `flush` to reach the NVM
	pub fn set_config(&mut self, config: Config) {
		self.cache = ConfigCache::Dirty(config);
	}

	/// Replaces the cached configuration with the vendor defaults
	pub fn load_defaults(&mut self) {
		self.set_config(Config::vendor_defaults());
	}

	/// Applies `f` to the cached configuration, marking it dirty if it changed
	pub fn modify<F>(&mut self, f: F) -> crate::AResult<()>
	where
		F: FnOnce(&mut Config),
	{
		let current = *self.config()?;
		let mut updated = current;
		f(&mut updated);
		if updated != current {
			self.cache = ConfigCache::Dirty(updated);
		}
		Ok(())
	}

	/// Writes modified configuration to the NVM; returns whether anything
	/// was written.
	pub fn flush(&mut self) -> crate::AResult<bool> {
		let config = match self.cache {
			ConfigCache::Unloaded => {
				return Err(NvmError::InvalidArgument("no configuration loaded, nothing to flush".into()).into());
			},
			ConfigCache::Loaded(_) => {
				debug!("NVM configuration unchanged, not flushing");
				return Ok(false);
			},
			ConfigCache::Dirty(config) => config,
		};
		self.write_nvm(&config)?;
		self.cache = ConfigCache::Loaded(config);
		Ok(true)
	}

	pub fn pdo(&mut self, pdo: u8) -> crate::AResult<PdoSettings> {
		let pdo = Pdo::from_number(pdo)?;
		Ok(self.config()?.pdo(pdo))
	}

	pub fn voltage(&mut self, pdo: u8) -> crate::AResult<f32> {
		let pdo = Pdo::from_number(pdo)?;
		Ok(self.config()?.voltage(pdo))
	}

	/// volts, clamped to 5..20; ignored for PDO1 (fixed 5V)
	pub fn set_voltage(&mut self, pdo: u8, volts: f32) -> crate::AResult<()> {
		let pdo = Pdo::from_number(pdo)?;
		self.modify(|c| c.set_voltage(pdo, volts))
	}

	pub fn current(&mut self, pdo: u8) -> crate::AResult<f32> {
		let pdo = Pdo::from_number(pdo)?;
		Ok(self.config()?.current(pdo))
	}

	/// amps, rounded down to a supported value
	pub fn set_current(&mut self, pdo: u8, amps: f32) -> crate::AResult<()> {
		let pdo = Pdo::from_number(pdo)?;
		self.modify(|c| c.set_current(pdo, amps))
	}

	pub fn lower_voltage_limit(&mut self, pdo: u8) -> crate::AResult<u8> {
		let pdo = Pdo::from_number(pdo)?;
		Ok(self.config()?.lower_voltage_limit(pdo))
	}

	/// percent, clamped to 5..20; ignored for PDO1
	pub fn set_lower_voltage_limit(&mut self, pdo: u8, percent: u8) -> crate::AResult<()> {
		let pdo = Pdo::from_number(pdo)?;
		self.modify(|c| c.set_lower_voltage_limit(pdo, percent))
	}

	pub fn upper_voltage_limit(&mut self, pdo: u8) -> crate::AResult<u8> {
		let pdo = Pdo::from_number(pdo)?;
		Ok(self.config()?.upper_voltage_limit(pdo))
	}

	/// percent, clamped to 5..20
	pub fn set_upper_voltage_limit(&mut self, pdo: u8, percent: u8) -> crate::AResult<()> {
		let pdo = Pdo::from_number(pdo)?;
		self.modify(|c| c.set_upper_voltage_limit(pdo, percent))
	}

	pub fn flex_current(&mut self) -> crate::AResult<f32> {
		Ok(self.config()?.flex_current())
	}

	pub fn set_flex_current(&mut self, amps: f32) -> crate::AResult<()> {
		self.modify(|c| c.set_flex_current(amps))
	}

	pub fn pdo_count(&mut self) -> crate::AResult<u8> {
		Ok(self.config()?.pdo_count())
	}

	pub fn set_pdo_count(&mut self, count: u8) -> crate::AResult<()> {
		self.modify(|c| c.set_pdo_count(count))
	}

	pub fn external_power(&mut self) -> crate::AResult<bool> {
		Ok(self.config()?.external_power())
	}

	pub fn set_external_power(&mut self, value: bool) -> crate::AResult<()> {
		self.modify(|c| c.set_external_power(value))
	}

	pub fn usb_comm_capable(&mut self) -> crate::AResult<bool> {
		Ok(self.config()?.usb_comm_capable())
	}

	pub fn set_usb_comm_capable(&mut self, value: bool) -> crate::AResult<()> {
		self.modify(|c| c.set_usb_comm_capable(value))
	}

	pub fn gpio_ctrl(&mut self) -> crate::AResult<u8> {
		Ok(self.config()?.gpio_ctrl())
	}

	pub fn set_gpio_ctrl(&mut self, value: u8) -> crate::AResult<()> {
		self.modify(|c| c.set_gpio_ctrl(value))
	}

	pub fn config_ok_gpio(&mut self) -> crate::AResult<u8> {
		Ok(self.config()?.config_ok_gpio())
	}

	pub fn set_config_ok_gpio(&mut self, value: u8) -> crate::AResult<()> {
		self.modify(|c| c.set_config_ok_gpio(value))
	}

	pub fn power_only_above_5v(&mut self) -> crate::AResult<bool> {
		Ok(self.config()?.power_only_above_5v())
	}

	pub fn set_power_only_above_5v(&mut self, value: bool) -> crate::AResult<()> {
		self.modify(|c| c.set_power_only_above_5v(value))
	}

	pub fn req_src_current(&mut self) -> crate::AResult<bool> {
		Ok(self.config()?.req_src_current())
	}

	pub fn set_req_src_current(&mut self, value: bool) -> crate::AResult<()> {
		self.modify(|c| c.set_req_src_current(value))
	}
}

/// Checks the device id; doesn't touch the NVM.
pub fn open_stusb4500<B: RegisterBus>(bus: B, options: Options) -> crate::AResult<Stusb4500<B>> {
	let mut chip = Stusb4500 {
		bus,
		options,
		cache: ConfigCache::Unloaded,
	};

	let id = chip.read_device_id()?;
	match id {
		DEVICE_ID => (),
		DEVICE_ID_B => debug!("STUSB4500 revision B (device id 0x{:02x})", id),
		_ => {
			return Err(NvmError::IdentityMismatch {
				found: id,
				expected: DEVICE_ID,
			}.into());
		},
	}

	Ok(chip)
}
