use std::fmt;
use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{
	Path,
	PathBuf,
};

use libc::{
	c_int,
	ioctl,
};

use super::RegisterBus;

// linux/i2c-dev.h, linux/i2c.h
const I2C_RDWR: u32 = 0x0707;
const I2C_M_RD: u16 = 0x0001;

#[repr(C)]
struct I2cMsg {
	addr: u16,
	flags: u16,
	len: u16,
	buf: *mut u8,
}

#[repr(C)]
struct I2cRdwrIoctlData {
	msgs: *mut I2cMsg,
	nmsgs: u32,
}

/// A single device (7-bit address) on a linux `/dev/i2c-N` adapter
pub struct I2cDev {
	file: fs::File,
	path: PathBuf,
	address: u16,
}

impl fmt::Display for I2cDev {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}@0x{:02x}", self.path.display(), self.address)
	}
}

impl I2cDev {
	fn transfer(&mut self, msgs: &mut [I2cMsg]) -> io::Result<()> {
		let mut data = I2cRdwrIoctlData {
			msgs: msgs.as_mut_ptr(),
			nmsgs: msgs.len() as u32,
		};
		let res: c_int = unsafe {
			ioctl(self.file.as_raw_fd(), I2C_RDWR as _, &mut data as *mut I2cRdwrIoctlData)
		};
		if res < 0 {
			return Err(io::Error::last_os_error());
		}
		Ok(())
	}
}

impl RegisterBus for I2cDev {
	fn read_registers(&mut self, register: u8, target: &mut [u8]) -> crate::AResult<()> {
		ensure!(target.len() <= u16::max_value() as usize, "read too long: {} bytes", target.len());
		let mut reg = [register];
		// register address, then repeated start for the read
		let mut msgs = [
			I2cMsg {
				addr: self.address,
				flags: 0,
				len: 1,
				buf: reg.as_mut_ptr(),
			},
			I2cMsg {
				addr: self.address,
				flags: I2C_M_RD,
				len: target.len() as u16,
				buf: target.as_mut_ptr(),
			},
		];
		let dev = self.to_string();
		with_context!(("read of register 0x{:02x} on {} failed", register, dev), {
			self.transfer(&mut msgs)?;
			Ok(())
		})
	}

	fn write_registers(&mut self, register: u8, data: &[u8]) -> crate::AResult<()> {
		ensure!(data.len() < u16::max_value() as usize, "write too long: {} bytes", data.len());
		let mut buf = Vec::with_capacity(data.len() + 1);
		buf.push(register);
		buf.extend_from_slice(data);
		let mut msgs = [
			I2cMsg {
				addr: self.address,
				flags: 0,
				len: buf.len() as u16,
				buf: buf.as_mut_ptr(),
			},
		];
		let dev = self.to_string();
		with_context!(("write of register 0x{:02x} on {} failed", register, dev), {
			self.transfer(&mut msgs)?;
			Ok(())
		})
	}
}

// TODO: exclusive open / file locking?
pub fn open_i2c_device<P: AsRef<Path>>(path: P, address: u16) -> crate::AResult<I2cDev> {
	let path = path.as_ref().to_path_buf();
	ensure!(address < 0x80, "invalid 7-bit I2C address: 0x{:x}", address);

	let file = with_context!(("couldn't open I2C adapter {}", path.display()), {
		Ok(fs::OpenOptions::new()
			.read(true)
			.write(true)
			.open(&path)?)
	})?;

	Ok(I2cDev {
		file,
		path,
		address,
	})
}
