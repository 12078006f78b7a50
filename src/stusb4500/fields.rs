//! NVM field layout and unit conversion
//!
//! Every setting is described by one or more bit ranges inside the five
//! NVM sectors; `Field::get` and `Field::set` are the only places that
//! mask and shift.

use std::fmt;

use super::error::NvmError;
use super::nvm::Config;

/// Bits `shift .. shift + width` of one NVM byte
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BitRange {
	pub sector: usize,
	pub byte: usize,
	pub shift: u8,
	pub width: u8,
}

const fn bits(sector: usize, byte: usize, shift: u8, width: u8) -> BitRange {
	BitRange { sector, byte, shift, width }
}

impl BitRange {
	pub fn mask(&self) -> u8 {
		(((1u16 << self.width) - 1) as u8) << self.shift
	}
}

/// A raw NVM value, assembled from `parts` (most significant part first)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Field {
	pub name: &'static str,
	pub parts: &'static [BitRange],
}

impl Field {
	pub fn width(&self) -> u8 {
		self.parts.iter().map(|r| r.width).sum()
	}

	pub fn max(&self) -> u16 {
		((1u32 << self.width()) - 1) as u16
	}

	pub fn get(&self, config: &Config) -> u16 {
		self.parts.iter().fold(0u16, |value, r| {
			let raw = (config.sectors[r.sector][r.byte] & r.mask()) >> r.shift;
			(value << r.width) | raw as u16
		})
	}

	/// stores the low `width()` bits of `value`; other bits stay untouched
	pub fn set(&self, config: &mut Config, value: u16) {
		let mut value = value;
		for r in self.parts.iter().rev() {
			let mask = r.mask();
			let byte = &mut config.sectors[r.sector][r.byte];
			*byte = (*byte & !mask) | (((value as u8) << r.shift) & mask);
			value >>= r.width;
		}
	}
}

pub mod layout {
	use super::{
		Field,
		bits,
	};

	pub const PDO2_VOLTAGE: Field = Field { name: "V_SNK_PDO2", parts: &[bits(4, 1, 0, 8), bits(4, 0, 6, 2)] };
	pub const PDO3_VOLTAGE: Field = Field { name: "V_SNK_PDO3", parts: &[bits(4, 3, 0, 2), bits(4, 2, 0, 8)] };

	pub const PDO1_CURRENT: Field = Field { name: "I_SNK_PDO1", parts: &[bits(3, 2, 4, 4)] };
	pub const PDO2_CURRENT: Field = Field { name: "I_SNK_PDO2", parts: &[bits(3, 4, 0, 4)] };
	pub const PDO3_CURRENT: Field = Field { name: "I_SNK_PDO3", parts: &[bits(3, 5, 4, 4)] };

	pub const PDO1_UPPER_LIMIT: Field = Field { name: "SHIFT_VBUS_HL1", parts: &[bits(3, 3, 4, 4)] };
	pub const PDO2_LOWER_LIMIT: Field = Field { name: "SHIFT_VBUS_LL2", parts: &[bits(3, 4, 4, 4)] };
	pub const PDO2_UPPER_LIMIT: Field = Field { name: "SHIFT_VBUS_HL2", parts: &[bits(3, 5, 0, 4)] };
	pub const PDO3_LOWER_LIMIT: Field = Field { name: "SHIFT_VBUS_LL3", parts: &[bits(3, 6, 0, 4)] };
	pub const PDO3_UPPER_LIMIT: Field = Field { name: "SHIFT_VBUS_HL3", parts: &[bits(3, 6, 4, 4)] };

	pub const FLEX_CURRENT: Field = Field { name: "I_SNK_PDO_FLEX", parts: &[bits(4, 4, 0, 4), bits(4, 3, 2, 6)] };

	pub const USB_COMM_CAPABLE: Field = Field { name: "USB_COMM_CAPABLE", parts: &[bits(3, 2, 0, 1)] };
	pub const PDO_COUNT: Field = Field { name: "DPM_SNK_PDO_NUMB", parts: &[bits(3, 2, 1, 2)] };
	pub const EXTERNAL_POWER: Field = Field { name: "SNK_UNCONS_POWER", parts: &[bits(3, 2, 3, 1)] };
	pub const GPIO_CTRL: Field = Field { name: "GPIO_CFG", parts: &[bits(1, 0, 4, 2)] };
	pub const CONFIG_OK_GPIO: Field = Field { name: "POWER_OK_CFG", parts: &[bits(4, 4, 5, 2)] };
	pub const POWER_ONLY_ABOVE_5V: Field = Field { name: "POWER_ONLY_ABOVE_5V", parts: &[bits(4, 6, 3, 1)] };
	pub const REQ_SRC_CURRENT: Field = Field { name: "REQ_SRC_CURRENT", parts: &[bits(4, 6, 4, 1)] };

	pub const ALL: [Field; 18] = [
		PDO2_VOLTAGE, PDO3_VOLTAGE,
		PDO1_CURRENT, PDO2_CURRENT, PDO3_CURRENT,
		PDO1_UPPER_LIMIT, PDO2_LOWER_LIMIT, PDO2_UPPER_LIMIT, PDO3_LOWER_LIMIT, PDO3_UPPER_LIMIT,
		FLEX_CURRENT,
		USB_COMM_CAPABLE, PDO_COUNT, EXTERNAL_POWER,
		GPIO_CTRL, CONFIG_OK_GPIO, POWER_ONLY_ABOVE_5V, REQ_SRC_CURRENT,
	];
}

/// Sink power profile slot
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Pdo {
	/// fixed 5V
	One,
	Two,
	Three,
}

impl Pdo {
	pub const ALL: [Pdo; 3] = [Pdo::One, Pdo::Two, Pdo::Three];

	pub fn from_number(number: u8) -> crate::AResult<Self> {
		match number {
			1 => Ok(Pdo::One),
			2 => Ok(Pdo::Two),
			3 => Ok(Pdo::Three),
			_ => Err(NvmError::InvalidArgument(format!("PDO {} doesn't exist (1..3)", number)).into()),
		}
	}

	pub fn number(self) -> u8 {
		match self {
			Pdo::One => 1,
			Pdo::Two => 2,
			Pdo::Three => 3,
		}
	}

	fn voltage_field(self) -> Option<Field> {
		match self {
			Pdo::One => None,
			Pdo::Two => Some(layout::PDO2_VOLTAGE),
			Pdo::Three => Some(layout::PDO3_VOLTAGE),
		}
	}

	fn current_field(self) -> Field {
		match self {
			Pdo::One => layout::PDO1_CURRENT,
			Pdo::Two => layout::PDO2_CURRENT,
			Pdo::Three => layout::PDO3_CURRENT,
		}
	}

	fn lower_limit_field(self) -> Option<Field> {
		match self {
			Pdo::One => None,
			Pdo::Two => Some(layout::PDO2_LOWER_LIMIT),
			Pdo::Three => Some(layout::PDO3_LOWER_LIMIT),
		}
	}

	fn upper_limit_field(self) -> Field {
		match self {
			Pdo::One => layout::PDO1_UPPER_LIMIT,
			Pdo::Two => layout::PDO2_UPPER_LIMIT,
			Pdo::Three => layout::PDO3_UPPER_LIMIT,
		}
	}
}

impl fmt::Display for Pdo {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "PDO{}", self.number())
	}
}

pub const PDO1_VOLTAGE: f32 = 5.0;
pub const MIN_VOLTAGE: f32 = 5.0;
pub const MAX_VOLTAGE: f32 = 20.0;
pub const MAX_CURRENT: f32 = 5.0;
pub const MIN_LIMIT_PERCENT: u8 = 5;
pub const MAX_LIMIT_PERCENT: u8 = 20;

// voltages in 50mV steps
pub fn decode_voltage(raw: u16) -> f32 {
	raw as f32 / 20.0
}

pub fn encode_voltage(volts: f32) -> u16 {
	(volts.max(MIN_VOLTAGE).min(MAX_VOLTAGE) * 20.0).round() as u16
}

// 0.25A steps up to 3A, 0.5A steps above
pub fn decode_current(raw: u8) -> f32 {
	match raw & 0x0f {
		0 => 0.0,
		n @ 1..=10 => n as f32 * 0.25 + 0.25,
		n => n as f32 * 0.50 - 2.50,
	}
}

/// rounds down to the next supported current
pub fn encode_current(amps: f32) -> u8 {
	if !(amps >= 0.5) {
		0
	} else if amps <= 3.0 {
		(4.0 * amps - 1.0).floor() as u8
	} else {
		(2.0 * amps.min(MAX_CURRENT) + 5.0).floor() as u8
	}
}

// percent
pub fn decode_limit(raw: u8) -> u8 {
	raw + MIN_LIMIT_PERCENT
}

pub fn encode_limit(percent: u8) -> u8 {
	percent.max(MIN_LIMIT_PERCENT).min(MAX_LIMIT_PERCENT) - MIN_LIMIT_PERCENT
}

// 10mA steps
pub fn decode_flex_current(raw: u16) -> f32 {
	raw as f32 / 100.0
}

pub fn encode_flex_current(amps: f32) -> u16 {
	(amps.max(0.0).min(MAX_CURRENT) * 100.0).round() as u16
}

/// Decoded settings of one PDO
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PdoSettings {
	pub pdo: Pdo,
	pub voltage: f32,
	pub current: f32,
	/// percent; `None` if not configurable (PDO1)
	pub lower_limit: Option<u8>,
	pub upper_limit: u8,
}

impl fmt::Display for PdoSettings {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}: {:.2} V, {:.2} A", self.pdo, self.voltage, self.current)?;
		if let Some(lower) = self.lower_limit {
			write!(f, ", lower limit -{}%", lower)?;
		}
		write!(f, ", upper limit +{}%", self.upper_limit)
	}
}

impl Config {
	pub fn voltage(&self, pdo: Pdo) -> f32 {
		match pdo.voltage_field() {
			None => PDO1_VOLTAGE,
			Some(field) => decode_voltage(field.get(self)),
		}
	}

	/// clamps to 5..20V; PDO1 can't be changed
	pub fn set_voltage(&mut self, pdo: Pdo, volts: f32) {
		if let Some(field) = pdo.voltage_field() {
			field.set(self, encode_voltage(volts));
		}
	}

	pub fn current(&self, pdo: Pdo) -> f32 {
		decode_current(pdo.current_field().get(self) as u8)
	}

	pub fn set_current(&mut self, pdo: Pdo, amps: f32) {
		pdo.current_field().set(self, encode_current(amps) as u16);
	}

	/// under voltage lock out in percent below the PDO voltage; always 0 for PDO1
	pub fn lower_voltage_limit(&self, pdo: Pdo) -> u8 {
		match pdo.lower_limit_field() {
			None => 0,
			Some(field) => decode_limit(field.get(self) as u8),
		}
	}

	pub fn set_lower_voltage_limit(&mut self, pdo: Pdo, percent: u8) {
		if let Some(field) = pdo.lower_limit_field() {
			field.set(self, encode_limit(percent) as u16);
		}
	}

	/// over voltage lock out in percent above the PDO voltage
	pub fn upper_voltage_limit(&self, pdo: Pdo) -> u8 {
		decode_limit(pdo.upper_limit_field().get(self) as u8)
	}

	pub fn set_upper_voltage_limit(&mut self, pdo: Pdo, percent: u8) {
		pdo.upper_limit_field().set(self, encode_limit(percent) as u16);
	}

	pub fn pdo(&self, pdo: Pdo) -> PdoSettings {
		PdoSettings {
			pdo,
			voltage: self.voltage(pdo),
			current: self.current(pdo),
			lower_limit: pdo.lower_limit_field().map(|_| self.lower_voltage_limit(pdo)),
			upper_limit: self.upper_voltage_limit(pdo),
		}
	}

	pub fn flex_current(&self) -> f32 {
		decode_flex_current(layout::FLEX_CURRENT.get(self))
	}

	pub fn set_flex_current(&mut self, amps: f32) {
		layout::FLEX_CURRENT.set(self, encode_flex_current(amps));
	}

	/// number of sink PDOs advertised (1..3)
	pub fn pdo_count(&self) -> u8 {
		layout::PDO_COUNT.get(self) as u8
	}

	pub fn set_pdo_count(&mut self, count: u8) {
		layout::PDO_COUNT.set(self, count.max(1).min(3) as u16);
	}

	pub fn external_power(&self) -> bool {
		0 != layout::EXTERNAL_POWER.get(self)
	}

	pub fn set_external_power(&mut self, value: bool) {
		layout::EXTERNAL_POWER.set(self, value as u16);
	}

	pub fn usb_comm_capable(&self) -> bool {
		0 != layout::USB_COMM_CAPABLE.get(self)
	}

	pub fn set_usb_comm_capable(&mut self, value: bool) {
		layout::USB_COMM_CAPABLE.set(self, value as u16);
	}

	/// GPIO function: 0 software controlled, 1 error recovery, 2 debug, 3 sink power
	pub fn gpio_ctrl(&self) -> u8 {
		layout::GPIO_CTRL.get(self) as u8
	}

	pub fn set_gpio_ctrl(&mut self, value: u8) {
		layout::GPIO_CTRL.set(self, value.min(3) as u16);
	}

	/// POWER_OK pin configuration; valid modes are 0, 2 and 3
	pub fn config_ok_gpio(&self) -> u8 {
		layout::CONFIG_OK_GPIO.get(self) as u8
	}

	pub fn set_config_ok_gpio(&mut self, value: u8) {
		let value = if value < 2 { 0 } else { value.min(3) };
		layout::CONFIG_OK_GPIO.set(self, value as u16);
	}

	pub fn power_only_above_5v(&self) -> bool {
		0 != layout::POWER_ONLY_ABOVE_5V.get(self)
	}

	pub fn set_power_only_above_5v(&mut self, value: bool) {
		layout::POWER_ONLY_ABOVE_5V.set(self, value as u16);
	}

	/// request the source's maximum current instead of the PDO current
	pub fn req_src_current(&self) -> bool {
		0 != layout::REQ_SRC_CURRENT.get(self)
	}

	pub fn set_req_src_current(&mut self, value: bool) {
		layout::REQ_SRC_CURRENT.set(self, value as u16);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::stusb4500::nvm::{
		SECTOR_COUNT,
		SECTOR_SIZE,
	};

	const CURRENT_LEVELS: [f32; 16] = [
		0.0, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0,
		2.25, 2.5, 2.75, 3.0, 3.5, 4.0, 4.5, 5.0,
	];

	#[test]
	fn layout_fields_dont_overlap() {
		let mut used = [[0u8; SECTOR_SIZE]; SECTOR_COUNT];
		for field in layout::ALL.iter() {
			for r in field.parts {
				assert_eq!(used[r.sector][r.byte] & r.mask(), 0, "{} overlaps", field.name);
				used[r.sector][r.byte] |= r.mask();
			}
		}
	}

	#[test]
	fn split_field_assembly() {
		let mut c = Config::zeroed();
		layout::FLEX_CURRENT.set(&mut c, 0x3ff);
		assert_eq!(c.sectors[4][3], 0xfc);
		assert_eq!(c.sectors[4][4], 0x0f);

		let mut c = Config::zeroed();
		c.sectors[4][3] = 0x03; // PDO3 voltage bits, must survive
		c.sectors[4][4] = 0xf0;
		layout::FLEX_CURRENT.set(&mut c, 0x2c5);
		assert_eq!(c.sectors[4][3], (0x05 << 2) | 0x03);
		assert_eq!(c.sectors[4][4], 0xf0 | 0x0b);
		assert_eq!(layout::FLEX_CURRENT.get(&c), 0x2c5);
		assert_eq!(layout::FLEX_CURRENT.max(), 0x3ff);
	}

	#[test]
	fn vendor_defaults_decode() {
		let c = Config::vendor_defaults();
		assert_eq!(c.voltage(Pdo::One), 5.0);
		assert_eq!(c.voltage(Pdo::Two), 15.0);
		assert_eq!(c.voltage(Pdo::Three), 20.0);
		assert_eq!(c.current(Pdo::One), 1.5);
		assert_eq!(c.current(Pdo::Two), 1.5);
		assert_eq!(c.current(Pdo::Three), 1.0);
		assert_eq!(c.lower_voltage_limit(Pdo::One), 0);
		assert_eq!(c.lower_voltage_limit(Pdo::Two), 20);
		assert_eq!(c.lower_voltage_limit(Pdo::Three), 20);
		assert_eq!(c.upper_voltage_limit(Pdo::One), 15);
		assert_eq!(c.upper_voltage_limit(Pdo::Two), 10);
		assert_eq!(c.upper_voltage_limit(Pdo::Three), 10);
		assert_eq!(c.flex_current(), 2.0);
		assert_eq!(c.pdo_count(), 3);
		assert!(!c.external_power());
		assert!(!c.usb_comm_capable());
		assert_eq!(c.gpio_ctrl(), 1);
		assert_eq!(c.config_ok_gpio(), 2);
		assert!(!c.power_only_above_5v());
		assert!(!c.req_src_current());
	}

	#[test]
	fn pdo2_voltage_from_high_byte() {
		let mut c = Config::zeroed();
		c.sectors[4] = [0x00, 0x64, 0, 0, 0, 0, 0, 0];
		assert_eq!(c.voltage(Pdo::Two), 20.0);
	}

	#[test]
	fn voltage_round_trip_within_half_step() {
		for pdo in [Pdo::Two, Pdo::Three].iter() {
			let mut c = Config::vendor_defaults();
			for centivolts in 500..=2000u32 {
				let v = centivolts as f32 / 100.0;
				c.set_voltage(*pdo, v);
				let d = c.voltage(*pdo);
				assert!((d - v).abs() <= 0.025 + 1e-4, "{}: set {} got {}", pdo, v, d);
			}
		}
	}

	#[test]
	fn voltage_clamped() {
		let mut c = Config::vendor_defaults();
		c.set_voltage(Pdo::Two, 3.3);
		assert_eq!(c.voltage(Pdo::Two), 5.0);
		c.set_voltage(Pdo::Three, 48.0);
		assert_eq!(c.voltage(Pdo::Three), 20.0);
		c.set_voltage(Pdo::Three, std::f32::NAN);
		assert_eq!(c.voltage(Pdo::Three), 5.0);
	}

	#[test]
	fn voltage_setters_keep_neighbours() {
		let mut c = Config::vendor_defaults();
		let flex = c.flex_current();
		c.set_voltage(Pdo::Three, 9.0);
		c.set_voltage(Pdo::Two, 12.0);
		assert_eq!(c.voltage(Pdo::Two), 12.0);
		assert_eq!(c.voltage(Pdo::Three), 9.0);
		assert_eq!(c.flex_current(), flex);
		assert_eq!(c.sectors[4][0] & 0x3f, 0x00);
	}

	#[test]
	fn pdo1_is_fixed() {
		let mut c = Config::vendor_defaults();
		let before = c;
		c.set_voltage(Pdo::One, 12.0);
		c.set_lower_voltage_limit(Pdo::One, 10);
		assert_eq!(c, before);
		assert_eq!(c.voltage(Pdo::One), 5.0);
		assert_eq!(c.pdo(Pdo::One).lower_limit, None);
	}

	#[test]
	fn current_levels_round_trip() {
		for (raw, level) in CURRENT_LEVELS.iter().enumerate() {
			assert_eq!(decode_current(raw as u8), *level);
			assert_eq!(encode_current(*level), raw as u8);
			for pdo in Pdo::ALL.iter() {
				let mut c = Config::vendor_defaults();
				c.set_current(*pdo, *level);
				assert_eq!(c.current(*pdo), *level);
			}
		}
	}

	#[test]
	fn current_rounds_down() {
		assert_eq!(decode_current(encode_current(0.3)), 0.0);
		assert_eq!(decode_current(encode_current(0.6)), 0.5);
		assert_eq!(decode_current(encode_current(1.1)), 1.0);
		assert_eq!(decode_current(encode_current(2.99)), 2.75);
		assert_eq!(decode_current(encode_current(3.2)), 3.0);
		assert_eq!(decode_current(encode_current(4.9)), 4.5);
		assert_eq!(decode_current(encode_current(7.0)), 5.0);
		assert_eq!(decode_current(encode_current(-1.0)), 0.0);
	}

	#[test]
	fn limits_clamped() {
		let mut c = Config::vendor_defaults();
		c.set_lower_voltage_limit(Pdo::Two, 2);
		assert_eq!(c.lower_voltage_limit(Pdo::Two), 5);
		c.set_upper_voltage_limit(Pdo::Three, 30);
		assert_eq!(c.upper_voltage_limit(Pdo::Three), 20);
		c.set_upper_voltage_limit(Pdo::One, 12);
		assert_eq!(c.upper_voltage_limit(Pdo::One), 12);
		c.set_lower_voltage_limit(Pdo::Three, 7);
		assert_eq!(c.lower_voltage_limit(Pdo::Three), 7);
		// shares byte 6 with the PDO3 lower limit
		assert_eq!(c.upper_voltage_limit(Pdo::Three), 20);
	}

	#[test]
	fn flex_current() {
		let mut c = Config::vendor_defaults();
		c.set_flex_current(1.23);
		assert!((c.flex_current() - 1.23).abs() < 1e-4);
		c.set_flex_current(9.0);
		assert_eq!(c.flex_current(), 5.0);
		c.set_flex_current(-0.5);
		assert_eq!(c.flex_current(), 0.0);
		// PDO3 voltage shares byte 3
		assert_eq!(c.voltage(Pdo::Three), 20.0);
	}

	#[test]
	fn enum_fields_clamped() {
		let mut c = Config::zeroed();
		c.set_pdo_count(7);
		assert_eq!(c.pdo_count(), 3);
		c.set_pdo_count(1);
		assert_eq!(c.pdo_count(), 1);
		c.set_pdo_count(0);
		assert_eq!(c.pdo_count(), 1);

		c.set_gpio_ctrl(9);
		assert_eq!(c.gpio_ctrl(), 3);

		c.set_config_ok_gpio(1);
		assert_eq!(c.config_ok_gpio(), 0);
		c.set_config_ok_gpio(2);
		assert_eq!(c.config_ok_gpio(), 2);
		c.set_config_ok_gpio(200);
		assert_eq!(c.config_ok_gpio(), 3);
	}

	#[test]
	fn flags() {
		let mut c = Config::zeroed();
		c.set_external_power(true);
		c.set_usb_comm_capable(true);
		c.set_power_only_above_5v(true);
		c.set_req_src_current(true);
		assert_eq!(c.sectors[3][2], 0x09);
		assert_eq!(c.sectors[4][6], 0x18);
		assert!(c.external_power() && c.usb_comm_capable());
		assert!(c.power_only_above_5v() && c.req_src_current());
		c.set_external_power(false);
		assert_eq!(c.sectors[3][2], 0x01);
	}

	#[test]
	fn pdo_numbers() {
		for n in 1..=3 {
			assert_eq!(Pdo::from_number(n).unwrap().number(), n);
		}
		for n in [0u8, 4, 255].iter() {
			let e = Pdo::from_number(*n).unwrap_err();
			match e.downcast_ref::<NvmError>() {
				Some(NvmError::InvalidArgument(_)) => (),
				other => panic!("unexpected error: {:?}", other),
			}
		}
	}

	#[test]
	fn pdo_settings_display() {
		let c = Config::vendor_defaults();
		assert_eq!(c.pdo(Pdo::One).to_string(), "PDO1: 5.00 V, 1.50 A, upper limit +15%");
		assert_eq!(c.pdo(Pdo::Two).to_string(), "PDO2: 15.00 V, 1.50 A, lower limit -20%, upper limit +10%");
	}
}
