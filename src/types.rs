// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use crate::hex_utils;
use crate::ser::{DecodeError, Readable, Writeable};

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The identifier of a payment, i.e., the hash whose preimage is claimed by a successful
/// attempt. For atomic multi-path payments this carries the set id instead.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentHash(pub [u8; 32]);

impl fmt::Display for PaymentHash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", hex_utils::to_string(&self.0))
	}
}

/// The secret preimage revealed by a settled attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PaymentPreimage(pub [u8; 32]);

impl fmt::Display for PaymentPreimage {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", hex_utils::to_string(&self.0))
	}
}

/// The payment address identifying the set of attempts belonging to one multi-path payment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PaymentAddress(pub [u8; 32]);

impl Writeable for PaymentHash {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
		self.0.write(writer)
	}
}

impl Readable for PaymentHash {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		Ok(Self(Readable::read(reader)?))
	}
}

impl Writeable for PaymentPreimage {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
		self.0.write(writer)
	}
}

impl Readable for PaymentPreimage {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		Ok(Self(Readable::read(reader)?))
	}
}

impl Writeable for PaymentAddress {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
		self.0.write(writer)
	}
}

impl Readable for PaymentAddress {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		Ok(Self(Readable::read(reader)?))
	}
}

/// A cloneable flag used to abort long-running scans.
///
/// Mutating operations are atomic and won't be interrupted once their transaction started
/// committing. Scanning operations check the token between records and return
/// [`Error::Cancelled`] when it fired, leaving no partial state behind.
///
/// [`Error::Cancelled`]: crate::Error::Cancelled
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
	cancelled: Arc<AtomicBool>,
}

impl CancelToken {
	/// Creates a new, untriggered token.
	pub fn new() -> Self {
		Self { cancelled: Arc::new(AtomicBool::new(false)) }
	}

	/// Signals all operations holding a clone of this token to abort.
	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::Release);
	}

	/// Returns whether the token was triggered.
	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Acquire)
	}
}
