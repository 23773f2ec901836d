// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use crate::ser::{DecodeError, Readable, Writeable};
use crate::types::PaymentAddress;

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

/// The multi-path record carried by the final hop of a partial attempt.
///
/// All attempts belonging to one multi-path payment carry the same payment address and total
/// amount, allowing the receiver to correlate them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MppRecord {
	/// The address identifying the payment the attempt belongs to.
	pub payment_addr: PaymentAddress,
	/// The total amount of the payment across all of its attempts, in millisatoshi.
	pub total_msat: u64,
}

/// The atomic multi-path record carried by the final hop of an AMP attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AmpRecord {
	/// This attempt's share of the root seed.
	pub root_share: [u8; 32],
	/// The identifier of the AMP set the attempt belongs to.
	pub set_id: [u8; 32],
	/// The index of this attempt within the set.
	pub child_index: u32,
}

/// A single hop of an attempt's route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteHop {
	/// The public key of the node the hop forwards to, in compressed serialization.
	pub pubkey: [u8; 33],
	/// The short channel id of the channel the hop traverses.
	pub short_channel_id: u64,
	/// The timelock the hop's outgoing HTLC carries.
	pub outgoing_time_lock: u32,
	/// The amount the hop forwards, in millisatoshi.
	pub amt_to_forward_msat: u64,
	/// The multi-path record, present on the final hop of a partial attempt.
	pub mpp_record: Option<MppRecord>,
	/// The atomic multi-path record, present on the final hop of an AMP attempt.
	pub amp_record: Option<AmpRecord>,
	/// Additional records to be carried to the hop, keyed by TLV type.
	pub custom_records: BTreeMap<u64, Vec<u8>>,
	/// Additional metadata destined for the receiving node. Empty if unset.
	pub metadata: Vec<u8>,
	/// The encrypted payload for a hop inside a blinded route. Empty outside blinded routes.
	pub encrypted_data: Vec<u8>,
	/// The blinding point handed to the hop introducing a blinded route.
	pub blinding_point: Option<[u8; 33]>,
	/// The total amount sent across all attempts of a blinded payment, in millisatoshi.
	/// Zero outside blinded routes.
	pub total_amt_msat: u64,
}

/// The full route an attempt is dispatched along.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
	/// The cumulative timelock across the whole route.
	pub total_time_lock: u32,
	/// The amount the first hop carries, i.e., receiver amount plus all fees, in
	/// millisatoshi.
	pub total_amt_msat: u64,
	/// The public key of the node the route originates from, in compressed serialization.
	pub source_pubkey: [u8; 33],
	/// The hops of the route, ordered from the node after the source to the receiver.
	pub hops: Vec<RouteHop>,
}

impl Route {
	/// Returns the final hop of the route, if any.
	pub fn final_hop(&self) -> Option<&RouteHop> {
		self.hops.last()
	}

	/// Returns the amount the receiver picks up from this attempt, in millisatoshi.
	pub fn receiver_amt_msat(&self) -> u64 {
		self.hops.last().map(|hop| hop.amt_to_forward_msat).unwrap_or(0)
	}

	/// Returns the total fees paid for this attempt, in millisatoshi.
	pub fn total_fees_msat(&self) -> u64 {
		self.total_amt_msat.saturating_sub(self.receiver_amt_msat())
	}

	/// Returns whether the route terminates in a blinded path, i.e., whether its final hop
	/// carries an encrypted payload.
	pub fn is_blinded(&self) -> bool {
		self.hops.last().map(|hop| !hop.encrypted_data.is_empty()).unwrap_or(false)
	}
}

impl Writeable for MppRecord {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.payment_addr.write(writer)?;
		self.total_msat.write(writer)
	}
}

impl Readable for MppRecord {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let payment_addr = Readable::read(reader)?;
		let total_msat = Readable::read(reader)?;
		Ok(Self { payment_addr, total_msat })
	}
}

impl Writeable for AmpRecord {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.root_share.write(writer)?;
		self.set_id.write(writer)?;
		self.child_index.write(writer)
	}
}

impl Readable for AmpRecord {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let root_share = Readable::read(reader)?;
		let set_id = Readable::read(reader)?;
		let child_index = Readable::read(reader)?;
		Ok(Self { root_share, set_id, child_index })
	}
}

impl Writeable for RouteHop {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.pubkey.write(writer)?;
		self.short_channel_id.write(writer)?;
		self.outgoing_time_lock.write(writer)?;
		self.amt_to_forward_msat.write(writer)?;
		self.mpp_record.write(writer)?;
		self.amp_record.write(writer)?;
		self.custom_records.write(writer)?;
		self.metadata.write(writer)?;
		self.encrypted_data.write(writer)?;
		self.blinding_point.write(writer)?;
		self.total_amt_msat.write(writer)
	}
}

impl Readable for RouteHop {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let pubkey = Readable::read(reader)?;
		let short_channel_id = Readable::read(reader)?;
		let outgoing_time_lock = Readable::read(reader)?;
		let amt_to_forward_msat = Readable::read(reader)?;
		let mpp_record = Readable::read(reader)?;
		let amp_record = Readable::read(reader)?;
		let custom_records = Readable::read(reader)?;
		let metadata = Readable::read(reader)?;
		let encrypted_data = Readable::read(reader)?;
		let blinding_point = Readable::read(reader)?;
		let total_amt_msat = Readable::read(reader)?;
		Ok(Self {
			pubkey,
			short_channel_id,
			outgoing_time_lock,
			amt_to_forward_msat,
			mpp_record,
			amp_record,
			custom_records,
			metadata,
			encrypted_data,
			blinding_point,
			total_amt_msat,
		})
	}
}

impl Writeable for Route {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.total_time_lock.write(writer)?;
		self.total_amt_msat.write(writer)?;
		self.source_pubkey.write(writer)?;
		let num_hops = u16::try_from(self.hops.len())
			.map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "too many hops"))?;
		num_hops.write(writer)?;
		for hop in self.hops.iter() {
			hop.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Route {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let total_time_lock = Readable::read(reader)?;
		let total_amt_msat = Readable::read(reader)?;
		let source_pubkey = Readable::read(reader)?;
		let num_hops: u16 = Readable::read(reader)?;
		let mut hops = Vec::with_capacity(num_hops as usize);
		for _ in 0..num_hops {
			hops.push(Readable::read(reader)?);
		}
		Ok(Self { total_time_lock, total_amt_msat, source_pubkey, hops })
	}
}
