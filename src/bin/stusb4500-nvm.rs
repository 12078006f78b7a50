#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate stusb4500_nvm;
use stusb4500_nvm::*;

use std::process::exit;
use std::time::Duration;

use stusb4500_nvm::i2c::{
	I2cDev,
	open_i2c_device,
};
use stusb4500_nvm::stusb4500::{
	Pdo,
	Stusb4500,
};

const DEFAULT_BUS: &str = "/dev/i2c-1";

fn get_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<Option<T>>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => return Ok(None),
	};
	param.parse::<T>().map(Some).map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid paramater {}: {}", name, e);
		e.context(msg).into()
	})
}

fn get_bool_param(matches: &clap::ArgMatches, name: &str) -> AResult<Option<bool>> {
	match matches.value_of(name) {
		None => Ok(None),
		Some("1") | Some("yes") | Some("true") | Some("on") => Ok(Some(true)),
		Some("0") | Some("no") | Some("false") | Some("off") => Ok(Some(false)),
		Some(v) => bail!("invalid paramater {}: expected yes or no, got {:?}", name, v),
	}
}

// "0x28" or "40"
fn parse_address(s: &str) -> AResult<u16> {
	let result = if s.starts_with("0x") || s.starts_with("0X") {
		u16::from_str_radix(&s[2..], 16)
	} else {
		s.parse::<u16>()
	};
	result.map_err(|e| format_err!("invalid I2C address {:?}: {}", s, e))
}

fn yes_no(v: bool) -> &'static str {
	if v { "yes" } else { "no" }
}

fn open_chip(matches: &clap::ArgMatches) -> AResult<Stusb4500<I2cDev>> {
	let mut options = stusb4500::Options::default();
	if let Some(address) = matches.value_of("address") {
		options.address = parse_address(address)?;
	}
	if let Some(timeout) = get_param::<u64>(matches, "timeout")? {
		options.exec_timeout = Duration::from_millis(timeout);
	}
	options.verify = !matches.is_present("no_verify");

	let path = matches.value_of("bus").unwrap_or(DEFAULT_BUS);
	let dev = open_i2c_device(path, options.address)?;
	info!("Using STUSB4500 at {}", dev);
	stusb4500::open_stusb4500(dev, options)
}

fn show(chip: &mut Stusb4500<I2cDev>) -> AResult<()> {
	let config = *chip.config()?;
	for pdo in Pdo::ALL.iter() {
		println!("{}", config.pdo(*pdo));
	}
	println!("PDO count: {}", config.pdo_count());
	println!("Flex current: {:.2} A", config.flex_current());
	println!("External power: {}", yes_no(config.external_power()));
	println!("USB communication capable: {}", yes_no(config.usb_comm_capable()));
	println!("GPIO control: {}", config.gpio_ctrl());
	println!("Power OK config: {}", config.config_ok_gpio());
	println!("Power only above 5V: {}", yes_no(config.power_only_above_5v()));
	println!("Request source current: {}", yes_no(config.req_src_current()));
	Ok(())
}

fn dump(chip: &mut Stusb4500<I2cDev>) -> AResult<()> {
	println!("{}", chip.config()?);
	Ok(())
}

fn write_defaults(chip: &mut Stusb4500<I2cDev>) -> AResult<()> {
	chip.load_defaults();
	chip.flush()?;
	info!("Wrote ST default configuration; active after the next power cycle");
	Ok(())
}

fn set(chip: &mut Stusb4500<I2cDev>, sub_m: &clap::ArgMatches) -> AResult<()> {
	let pdo = get_param::<u8>(sub_m, "pdo")?;
	let per_pdo = ["voltage", "current", "lower_limit", "upper_limit"];
	if pdo.is_none() {
		for name in per_pdo.iter() {
			ensure!(!sub_m.is_present(name), "--{} requires --pdo", name);
		}
	}

	if let Some(pdo) = pdo {
		if let Some(v) = get_param::<f32>(sub_m, "voltage")? {
			if pdo == 1 {
				warn!("PDO1 is fixed to 5V, ignoring --voltage");
			}
			chip.set_voltage(pdo, v)?;
		}
		if let Some(a) = get_param::<f32>(sub_m, "current")? {
			chip.set_current(pdo, a)?;
		}
		if let Some(p) = get_param::<u8>(sub_m, "lower_limit")? {
			if pdo == 1 {
				warn!("PDO1 has no lower voltage limit, ignoring --lower_limit");
			}
			chip.set_lower_voltage_limit(pdo, p)?;
		}
		if let Some(p) = get_param::<u8>(sub_m, "upper_limit")? {
			chip.set_upper_voltage_limit(pdo, p)?;
		}
	}

	if let Some(count) = get_param::<u8>(sub_m, "pdo_count")? {
		chip.set_pdo_count(count)?;
	}
	if let Some(a) = get_param::<f32>(sub_m, "flex_current")? {
		chip.set_flex_current(a)?;
	}
	if let Some(v) = get_bool_param(sub_m, "external_power")? {
		chip.set_external_power(v)?;
	}
	if let Some(v) = get_bool_param(sub_m, "usb_comm")? {
		chip.set_usb_comm_capable(v)?;
	}
	if let Some(v) = get_param::<u8>(sub_m, "gpio")? {
		chip.set_gpio_ctrl(v)?;
	}
	if let Some(v) = get_param::<u8>(sub_m, "power_ok")? {
		chip.set_config_ok_gpio(v)?;
	}
	if let Some(v) = get_bool_param(sub_m, "above_5v_only")? {
		chip.set_power_only_above_5v(v)?;
	}
	if let Some(v) = get_bool_param(sub_m, "req_src_current")? {
		chip.set_req_src_current(v)?;
	}

	if !chip.is_dirty() {
		info!("Configuration unchanged");
		return Ok(());
	}

	show(chip)?;
	if sub_m.is_present("dry_run") {
		info!("Dry run, not writing NVM");
		return Ok(());
	}
	chip.flush()?;
	info!("NVM updated; active after the next power cycle");
	Ok(())
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@arg bus: -b --bus +takes_value "I2C adapter (default: /dev/i2c-1)")
		(@arg address: -a --address +takes_value "7-bit I2C address (default: 0x28)")
		(@arg timeout: --timeout +takes_value "NVM request timeout in milliseconds (default: 1000)")
		(@arg no_verify: --no_verify "don't read back NVM after writing")
		(@subcommand show =>
			(about: "show NVM configuration (default)")
		)
		(@subcommand dump =>
			(about: "dump raw NVM sectors")
		)
		(@subcommand defaults =>
			(about: "write ST default configuration to NVM")
		)
		(@subcommand set =>
			(about: "change NVM configuration")
			(@arg pdo: -p --pdo +takes_value "PDO (1..3) to change voltage, current and limits for")
			(@arg voltage: -v --voltage +takes_value "PDO voltage in V (5..20, PDO1 fixed at 5)")
			(@arg current: -c --current +takes_value "PDO current in A (0.5..5)")
			(@arg lower_limit: --lower_limit +takes_value "under voltage lock out in % (5..20)")
			(@arg upper_limit: --upper_limit +takes_value "over voltage lock out in % (5..20)")
			(@arg pdo_count: --pdo_count +takes_value "number of PDOs to advertise (1..3)")
			(@arg flex_current: --flex_current +takes_value "flexible current in A (0..5)")
			(@arg external_power: --external_power +takes_value "externally powered (yes/no)")
			(@arg usb_comm: --usb_comm +takes_value "USB communication capable (yes/no)")
			(@arg gpio: --gpio +takes_value "GPIO function (0: SW, 1: error recovery, 2: debug, 3: sink power)")
			(@arg power_ok: --power_ok +takes_value "POWER_OK pin configuration (0, 2 or 3)")
			(@arg above_5v_only: --above_5v_only +takes_value "only enable output above 5V (yes/no)")
			(@arg req_src_current: --req_src_current +takes_value "request source current (yes/no)")
			(@arg dry_run: -n --dry_run "show the resulting configuration without writing it")
		)
	).get_matches();

	let mut chip = open_chip(&matches)?;

	match matches.subcommand() {
		("show", _) | ("", _) => {
			show(&mut chip)
		},
		("dump", _) => {
			dump(&mut chip)
		},
		("defaults", _) => {
			write_defaults(&mut chip)
		},
		("set", Some(sub_m)) => {
			set(&mut chip, sub_m)
		},
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		exit(1);
	}
}
