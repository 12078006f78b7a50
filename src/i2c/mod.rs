mod linux;

// OS-specific. for now linux only.
pub use self::linux::{
	I2cDev,
	open_i2c_device,
};

/// Byte-addressed register access to a single device on a two-wire bus.
///
/// Multi-byte accesses address consecutive registers (the device
/// auto-increments the register address).
pub trait RegisterBus {
	fn read_registers(&mut self, register: u8, target: &mut [u8]) -> crate::AResult<()>;
	fn write_registers(&mut self, register: u8, data: &[u8]) -> crate::AResult<()>;

	fn read_register(&mut self, register: u8) -> crate::AResult<u8> {
		let mut buf = [0u8];
		self.read_registers(register, &mut buf)?;
		Ok(buf[0])
	}

	fn write_register(&mut self, register: u8, data: u8) -> crate::AResult<()> {
		self.write_registers(register, &[data])
	}
}

impl<'a, B: ?Sized + RegisterBus> RegisterBus for &'a mut B {
	fn read_registers(&mut self, register: u8, target: &mut [u8]) -> crate::AResult<()> {
		B::read_registers(*self, register, target)
	}
	fn write_registers(&mut self, register: u8, data: &[u8]) -> crate::AResult<()> {
		B::write_registers(*self, register, data)
	}
}
