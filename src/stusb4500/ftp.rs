use std::fmt;

// FTP_CTRL_0 flags
const FTP_CUST_PWR:   u8 = 0x80;
const FTP_CUST_RST_N: u8 = 0x40;
const FTP_CUST_REQ:   u8 = 0x10;
const FTP_CUST_SECT:  u8 = 0x07;

// FTP_CTRL_1 fields
const FTP_CUST_SER:       u8 = 0xf8;
const FTP_CUST_SER_SHIFT: u8 = 3;
const FTP_CUST_OPCODE:    u8 = 0x07;

/// NVM controller commands, loaded into the low bits of FTP_CTRL_1
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Opcode {
	/// read sector (selected in FTP_CTRL_0) into RW_BUFFER
	Read,
	/// load RW_BUFFER into the program latch
	WritePl,
	/// latch the sector erase mask from the FTP_CTRL_1 SER bits
	WriteSer,
	ReadPl,
	ReadSer,
	/// erase all sectors selected by the erase mask
	EraseSector,
	/// program the latch into the sector selected in FTP_CTRL_0
	ProgSector,
	/// soft program the sectors selected by the erase mask
	SoftProgSector,
}

impl Opcode {
	pub fn bits(self) -> u8 {
		match self {
			Opcode::Read => 0,
			Opcode::WritePl => 1,
			Opcode::WriteSer => 2,
			Opcode::ReadPl => 3,
			Opcode::ReadSer => 4,
			Opcode::EraseSector => 5,
			Opcode::ProgSector => 6,
			Opcode::SoftProgSector => 7,
		}
	}

	pub fn from_bits(v: u8) -> Self {
		match v & FTP_CUST_OPCODE {
			0 => Opcode::Read,
			1 => Opcode::WritePl,
			2 => Opcode::WriteSer,
			3 => Opcode::ReadPl,
			4 => Opcode::ReadSer,
			5 => Opcode::EraseSector,
			6 => Opcode::ProgSector,
			7 => Opcode::SoftProgSector,
			_ => unreachable!(),
		}
	}
}

/// FTP_CTRL_0: power, reset, request and sector select
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FtpCtrl0(pub u8);

impl FtpCtrl0 {
	/// everything off; resets the NVM controller
	pub fn reset() -> Self {
		FtpCtrl0(0)
	}

	/// controller out of reset, NVM unpowered
	pub fn idle() -> Self {
		*FtpCtrl0(0).set_rst_n()
	}

	/// controller powered and out of reset
	pub fn powered() -> Self {
		*FtpCtrl0(0).set_pwr().set_rst_n()
	}

	/// execute the loaded opcode on `sector`
	pub fn request(sector: u8) -> Self {
		*FtpCtrl0::powered().set_sector(sector).set_req()
	}

	pub fn sector(&self) -> u8 {
		self.0 & FTP_CUST_SECT
	}
	pub fn set_sector(&mut self, sector: u8) -> &mut Self {
		self.0 = (self.0 & !FTP_CUST_SECT) | (sector & FTP_CUST_SECT);
		self
	}

	pub fn is_pwr(&self) -> bool {
		0 != self.0 & FTP_CUST_PWR
	}
	pub fn set_pwr(&mut self) -> &mut Self {
		self.0 |= FTP_CUST_PWR;
		self
	}

	pub fn is_rst_n(&self) -> bool {
		0 != self.0 & FTP_CUST_RST_N
	}
	pub fn set_rst_n(&mut self) -> &mut Self {
		self.0 |= FTP_CUST_RST_N;
		self
	}

	/// set while the controller executes a request
	pub fn is_req(&self) -> bool {
		0 != self.0 & FTP_CUST_REQ
	}
	pub fn set_req(&mut self) -> &mut Self {
		self.0 |= FTP_CUST_REQ;
		self
	}
	pub fn clear_req(&mut self) -> &mut Self {
		self.0 &= !FTP_CUST_REQ;
		self
	}
}

impl fmt::Debug for FtpCtrl0 {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "0x{:02x} (sector: {}", self.0, self.sector())?;
		if self.is_pwr() { write!(f, " [PWR]")?; }
		if self.is_rst_n() { write!(f, " [RST_N]")?; }
		if self.is_req() { write!(f, " [REQ]")?; }
		write!(f, ")")
	}
}

/// FTP_CTRL_1: sector erase mask and opcode
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FtpCtrl1(pub u8);

impl FtpCtrl1 {
	pub fn opcode(opcode: Opcode) -> Self {
		FtpCtrl1(opcode.bits())
	}

	/// `WRITE_SER` with the erase mask (bit n selects sector n)
	pub fn write_ser(sector_mask: u8) -> Self {
		FtpCtrl1(((sector_mask << FTP_CUST_SER_SHIFT) & FTP_CUST_SER) | Opcode::WriteSer.bits())
	}

	pub fn get_opcode(&self) -> Opcode {
		Opcode::from_bits(self.0)
	}

	pub fn sector_mask(&self) -> u8 {
		(self.0 & FTP_CUST_SER) >> FTP_CUST_SER_SHIFT
	}
}

impl fmt::Debug for FtpCtrl1 {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "0x{:02x} ({:?}, sector mask: 0b{:05b})", self.0, self.get_opcode(), self.sector_mask())
	}
}
