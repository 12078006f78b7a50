use failure::Fail;

/// Protocol level failures; recover with `failure::Error::downcast_ref`.
#[derive(Clone, PartialEq, Eq, Debug, Fail)]
pub enum NvmError {
	/// DEVICE_ID register didn't contain a STUSB4500 id
	#[fail(display = "Unexpected device id 0x{:02x} (expected 0x{:02x})", found, expected)]
	IdentityMismatch {
		found: u8,
		expected: u8,
	},

	/// Bus failure or NVM controller not finishing a request; the NVM
	/// content is unknown afterwards.
	#[fail(display = "Hardware fault: {}", _0)]
	HardwareFault(String),

	#[fail(display = "Invalid argument: {}", _0)]
	InvalidArgument(String),
}

/// Maps errors of `f` to a `NvmError::HardwareFault` mentioning
/// `operation`; errors already being a `NvmError` pass through.
pub(crate) fn hardware<T, F>(operation: &str, f: F) -> crate::AResult<T>
where
	F: FnOnce() -> crate::AResult<T>,
{
	f().map_err(|e| {
		match e.downcast::<NvmError>() {
			Ok(e) => e.into(),
			Err(e) => NvmError::HardwareFault(format!("{}: {}", operation, e)).into(),
		}
	})
}
