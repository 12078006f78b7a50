//! Simulated STUSB4500 register interface and NVM controller for tests.

use crate::i2c::RegisterBus;

use super::consts::*;
use super::ftp::{
	FtpCtrl0,
	FtpCtrl1,
	Opcode,
};
use super::nvm::{
	SECTOR_COUNT,
	SECTOR_SIZE,
	Sector,
};

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Access {
	Read(u8, usize),
	Write(u8, Vec<u8>),
}

pub struct SimChip {
	pub device_id: u8,
	pub password: u8,
	pub ctrl0: FtpCtrl0,
	pub ctrl1: FtpCtrl1,
	pub buffer: Sector,
	latch: Sector,
	erase_mask: u8,
	pub flash: [Sector; SECTOR_COUNT],
	/// bus accesses in order
	pub log: Vec<Access>,
	/// executed opcodes with the selected sector
	pub executed: Vec<(Opcode, u8)>,
	/// controller never finishes a request
	pub stuck: bool,
	/// fail every bus access once this many accesses happened
	pub fail_after: Option<usize>,
	/// ERASE_SECTOR doesn't do anything
	pub broken_erase: bool,
}

impl SimChip {
	pub fn new(flash: [Sector; SECTOR_COUNT]) -> Self {
		SimChip {
			device_id: DEVICE_ID,
			password: 0,
			ctrl0: FtpCtrl0::reset(),
			ctrl1: FtpCtrl1(0),
			buffer: [0u8; SECTOR_SIZE],
			latch: [0u8; SECTOR_SIZE],
			erase_mask: 0,
			flash,
			log: Vec::new(),
			executed: Vec::new(),
			stuck: false,
			fail_after: None,
			broken_erase: false,
		}
	}

	pub fn writes_to(&self, register: u8) -> Vec<Vec<u8>> {
		self.log.iter().filter_map(|a| match a {
			Access::Write(r, data) if *r == register => Some(data.clone()),
			_ => None,
		}).collect()
	}

	fn check_bus(&self) -> crate::AResult<()> {
		if let Some(limit) = self.fail_after {
			ensure!(self.log.len() < limit, "simulated bus error (NACK)");
		}
		Ok(())
	}

	fn unlocked(&self) -> bool {
		self.password == FTP_CUST_PASSWORD && self.ctrl0.is_pwr() && self.ctrl0.is_rst_n()
	}

	fn execute(&mut self) {
		let opcode = self.ctrl1.get_opcode();
		let sector = self.ctrl0.sector() as usize;
		self.executed.push((opcode, sector as u8));
		match opcode {
			Opcode::Read => {
				if sector < SECTOR_COUNT {
					self.buffer = self.flash[sector];
				}
			},
			Opcode::WritePl => self.latch = self.buffer,
			Opcode::WriteSer => self.erase_mask = self.ctrl1.sector_mask(),
			Opcode::ReadPl => self.buffer = self.latch,
			Opcode::ReadSer => self.buffer[0] = self.erase_mask,
			// partial erase only works with a cleared buffer
			Opcode::EraseSector if self.broken_erase || self.buffer[0] != 0 => (),
			Opcode::EraseSector => {
				for s in 0..SECTOR_COUNT {
					if 0 != self.erase_mask & (1 << s) {
						self.flash[s] = [0u8; SECTOR_SIZE];
					}
				}
			},
			// programming can only set bits; needs erase before
			Opcode::ProgSector => {
				if sector < SECTOR_COUNT {
					for (f, l) in self.flash[sector].iter_mut().zip(self.latch.iter()) {
						*f |= *l;
					}
				}
			},
			Opcode::SoftProgSector => (),
		}
	}

	fn write_one(&mut self, register: u8, value: u8) {
		match register {
			FTP_CUST_PASSWORD_REG => self.password = value,
			FTP_CTRL_0 => {
				self.ctrl0 = FtpCtrl0(value);
				if self.ctrl0.is_req() && self.unlocked() {
					self.execute();
					if !self.stuck {
						self.ctrl0.clear_req();
					}
				}
			},
			FTP_CTRL_1 => self.ctrl1 = FtpCtrl1(value),
			r if r >= RW_BUFFER && ((r - RW_BUFFER) as usize) < SECTOR_SIZE => {
				self.buffer[(r - RW_BUFFER) as usize] = value;
			},
			_ => (),
		}
	}

	fn read_one(&self, register: u8) -> u8 {
		match register {
			DEVICE_ID_REG => self.device_id,
			FTP_CUST_PASSWORD_REG => self.password,
			FTP_CTRL_0 => self.ctrl0.0,
			FTP_CTRL_1 => self.ctrl1.0,
			r if r >= RW_BUFFER && ((r - RW_BUFFER) as usize) < SECTOR_SIZE => {
				self.buffer[(r - RW_BUFFER) as usize]
			},
			_ => 0,
		}
	}
}

impl RegisterBus for SimChip {
	fn read_registers(&mut self, register: u8, target: &mut [u8]) -> crate::AResult<()> {
		self.check_bus()?;
		self.log.push(Access::Read(register, target.len()));
		for (i, t) in target.iter_mut().enumerate() {
			*t = self.read_one(register.wrapping_add(i as u8));
		}
		Ok(())
	}

	fn write_registers(&mut self, register: u8, data: &[u8]) -> crate::AResult<()> {
		self.check_bus()?;
		self.log.push(Access::Write(register, data.to_vec()));
		for (i, d) in data.iter().enumerate() {
			self.write_one(register.wrapping_add(i as u8), *d);
		}
		Ok(())
	}
}
