// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

//! Serialization of the persisted payment entities.
//!
//! All multi-byte integers are written big-endian and all formats are strictly additive: a
//! newer writer only ever appends fields, and readers tolerate unknown trailing bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An error occurring when reading a persisted value back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
	/// A length prefix, enum tag, or field carried a value outside the supported range.
	InvalidValue,
	/// The byte stream ended before the full value was read.
	ShortRead,
	/// Reading from the underlying stream failed.
	Io(io::ErrorKind),
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Self::InvalidValue => write!(f, "Invalid value in persisted data."),
			Self::ShortRead => write!(f, "Persisted data ended unexpectedly."),
			Self::Io(kind) => write!(f, "Failed to read persisted data: {:?}.", kind),
		}
	}
}

impl std::error::Error for DecodeError {}

impl From<io::Error> for DecodeError {
	fn from(e: io::Error) -> Self {
		if e.kind() == io::ErrorKind::UnexpectedEof {
			DecodeError::ShortRead
		} else {
			DecodeError::Io(e.kind())
		}
	}
}

/// A value that can be serialized into the store's wire format.
pub trait Writeable {
	/// Writes `self` to the given writer.
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error>;

	/// Serializes `self` into a freshly allocated buffer.
	fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::new();
		self.write(&mut buf).expect("in-memory writes don't fail");
		buf
	}
}

/// A value that can be deserialized from the store's wire format.
pub trait Readable: Sized {
	/// Reads a `Self` from the given reader.
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError>;
}

impl Writeable for u8 {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(&[*self])
	}
}

impl Readable for u8 {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut buf = [0u8; 1];
		reader.read_exact(&mut buf)?;
		Ok(buf[0])
	}
}

impl Writeable for u16 {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(&self.to_be_bytes())
	}
}

impl Readable for u16 {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut buf = [0u8; 2];
		reader.read_exact(&mut buf)?;
		Ok(u16::from_be_bytes(buf))
	}
}

impl Writeable for u32 {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(&self.to_be_bytes())
	}
}

impl Readable for u32 {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut buf = [0u8; 4];
		reader.read_exact(&mut buf)?;
		Ok(u32::from_be_bytes(buf))
	}
}

impl Writeable for u64 {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(&self.to_be_bytes())
	}
}

impl Readable for u64 {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut buf = [0u8; 8];
		reader.read_exact(&mut buf)?;
		Ok(u64::from_be_bytes(buf))
	}
}

impl Writeable for [u8; 32] {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(self)
	}
}

impl Readable for [u8; 32] {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut buf = [0u8; 32];
		reader.read_exact(&mut buf)?;
		Ok(buf)
	}
}

impl Writeable for [u8; 33] {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(self)
	}
}

impl Readable for [u8; 33] {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut buf = [0u8; 33];
		reader.read_exact(&mut buf)?;
		Ok(buf)
	}
}

// Variable-length byte strings carry a 16-bit length prefix.
impl Writeable for Vec<u8> {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		let len = u16::try_from(self.len())
			.map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "value too long"))?;
		len.write(writer)?;
		writer.write_all(self)
	}
}

impl Readable for Vec<u8> {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let len: u16 = Readable::read(reader)?;
		let mut buf = vec![0u8; len as usize];
		reader.read_exact(&mut buf)?;
		Ok(buf)
	}
}

// Optional values are prefixed with a presence byte.
impl<T: Writeable> Writeable for Option<T> {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		match self {
			None => 0u8.write(writer),
			Some(value) => {
				1u8.write(writer)?;
				value.write(writer)
			},
		}
	}
}

impl<T: Readable> Readable for Option<T> {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		match u8::read(reader)? {
			0 => Ok(None),
			1 => Ok(Some(Readable::read(reader)?)),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

// Timestamps are persisted as unix nanoseconds, with zero denoting the unset "zero time".
// Encoders must never substitute the current time for an unset value.
impl Writeable for SystemTime {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		let nanos = self
			.duration_since(UNIX_EPOCH)
			.map(|duration| duration.as_nanos() as u64)
			.unwrap_or(0);
		nanos.write(writer)
	}
}

impl Readable for SystemTime {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let nanos: u64 = Readable::read(reader)?;
		Ok(UNIX_EPOCH + Duration::from_nanos(nanos))
	}
}

// Custom TLV records, ordered by key ascending via the map's iteration order.
impl Writeable for BTreeMap<u64, Vec<u8>> {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		let len = u16::try_from(self.len())
			.map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "too many records"))?;
		len.write(writer)?;
		for (key, value) in self.iter() {
			key.write(writer)?;
			value.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for BTreeMap<u64, Vec<u8>> {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let len: u16 = Readable::read(reader)?;
		let mut records = BTreeMap::new();
		for _ in 0..len {
			let key: u64 = Readable::read(reader)?;
			let value: Vec<u8> = Readable::read(reader)?;
			if records.insert(key, value).is_some() {
				return Err(DecodeError::InvalidValue);
			}
		}
		Ok(records)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn round_trip<T: Writeable + Readable + PartialEq + std::fmt::Debug>(value: T) {
		let encoded = value.encode();
		let mut reader = &encoded[..];
		let decoded = T::read(&mut reader).unwrap();
		assert_eq!(value, decoded);
		assert!(reader.is_empty());
	}

	#[test]
	fn primitives_round_trip() {
		round_trip(0x42u8);
		round_trip(0xbeefu16);
		round_trip(0xdeadbeefu32);
		round_trip(0xdeadbeefdeadbeefu64);
		round_trip([7u8; 32]);
		round_trip([9u8; 33]);
		round_trip(Vec::<u8>::new());
		round_trip(vec![1u8, 2, 3]);
		round_trip(Option::<u64>::None);
		round_trip(Some(21u64));
	}

	#[test]
	fn integers_are_big_endian() {
		assert_eq!(0x0102030405060708u64.encode(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
		assert_eq!(0x0102u16.encode(), vec![1, 2]);
	}

	#[test]
	fn zero_time_round_trips_to_zero() {
		let encoded = UNIX_EPOCH.encode();
		assert_eq!(encoded, vec![0u8; 8]);
		let mut reader = &encoded[..];
		assert_eq!(SystemTime::read(&mut reader).unwrap(), UNIX_EPOCH);
	}

	#[test]
	fn times_are_persisted_as_unix_nanos() {
		let time = UNIX_EPOCH + Duration::from_nanos(1_700_000_000_000_000_000);
		let encoded = time.encode();
		assert_eq!(u64::from_be_bytes(encoded.try_into().unwrap()), 1_700_000_000_000_000_000);
		round_trip(time);
	}

	#[test]
	fn empty_record_map_round_trips() {
		round_trip(BTreeMap::<u64, Vec<u8>>::new());
	}

	#[test]
	fn record_map_is_ordered_by_key() {
		let mut records = BTreeMap::new();
		records.insert(7u64, vec![0xcc]);
		records.insert(1u64, vec![0xaa]);
		let encoded = records.encode();
		// Count, then the entry with the smallest key first.
		assert_eq!(&encoded[..2], &[0, 2]);
		assert_eq!(&encoded[2..10], &1u64.to_be_bytes());
		round_trip(records);
	}

	#[test]
	fn short_reads_are_detected() {
		let encoded = 0xdeadbeefu32.encode();
		let mut reader = &encoded[..2];
		assert_eq!(u32::read(&mut reader).unwrap_err(), DecodeError::ShortRead);

		// A length prefix promising more bytes than available is a short read, too.
		let mut reader = &[0u8, 5, 1, 2][..];
		assert_eq!(Vec::<u8>::read(&mut reader).unwrap_err(), DecodeError::ShortRead);
	}

	#[test]
	fn invalid_presence_byte_is_rejected() {
		let mut reader = &[2u8][..];
		assert_eq!(Option::<u8>::read(&mut reader).unwrap_err(), DecodeError::InvalidValue);
	}

	proptest! {
		#[test]
		fn u64_round_trips(value: u64) {
			round_trip(value);
		}

		#[test]
		fn byte_strings_round_trip(value in proptest::collection::vec(any::<u8>(), 0..512)) {
			round_trip(value);
		}

		#[test]
		fn record_maps_round_trip(
			records in proptest::collection::btree_map(
				any::<u64>(),
				proptest::collection::vec(any::<u8>(), 0..32),
				0..16,
			)
		) {
			round_trip(records);
		}
	}
}
