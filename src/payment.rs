// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use crate::error::Error;
use crate::route::Route;
use crate::ser::{DecodeError, Readable, Writeable};
use crate::types::{PaymentHash, PaymentPreimage};

use bitcoin::secp256k1::SecretKey;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::OnceLock;
use std::time::SystemTime;

/// The immutable intent of a payment, recorded once when the payment is initiated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentCreationInfo {
	/// The identifier of the payment.
	pub identifier: PaymentHash,
	/// The total amount the user authorized for this payment, in millisatoshi.
	pub value_msat: u64,
	/// The time the payment was initiated. [`UNIX_EPOCH`] denotes an unset time.
	///
	/// [`UNIX_EPOCH`]: std::time::UNIX_EPOCH
	pub creation_time: SystemTime,
	/// The serialized payment request (invoice) this payment pays, if any.
	pub payment_request: Vec<u8>,
	/// Additional records attached to the update sent to the first hop, keyed by TLV type.
	pub first_hop_custom_records: BTreeMap<u64, Vec<u8>>,
}

impl Writeable for PaymentCreationInfo {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.identifier.write(writer)?;
		self.value_msat.write(writer)?;
		self.creation_time.write(writer)?;
		self.payment_request.write(writer)?;
		self.first_hop_custom_records.write(writer)
	}
}

impl Readable for PaymentCreationInfo {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let identifier = Readable::read(reader)?;
		let value_msat = Readable::read(reader)?;
		let creation_time = Readable::read(reader)?;
		let payment_request = Readable::read(reader)?;
		let first_hop_custom_records = Readable::read(reader)?;
		Ok(Self { identifier, value_msat, creation_time, payment_request, first_hop_custom_records })
	}
}

/// The immutable parameters of a single attempt dispatched on the network.
#[derive(Clone)]
pub struct HtlcAttemptInfo {
	/// The id uniquely identifying the attempt within its payment.
	pub attempt_id: u64,
	/// The raw ephemeral key the attempt's onion packet was constructed with.
	session_key: [u8; 32],
	/// The parsed session key, derived on demand. Never persisted.
	session_key_scalar: OnceLock<SecretKey>,
	/// The route the attempt was dispatched along.
	pub route: Route,
	/// The time the attempt was dispatched. [`UNIX_EPOCH`] denotes an unset time.
	///
	/// [`UNIX_EPOCH`]: std::time::UNIX_EPOCH
	pub attempt_time: SystemTime,
	/// The hash this specific attempt locks in, where it deviates from the payment
	/// identifier (e.g., for atomic multi-path attempts).
	pub hash: Option<PaymentHash>,
}

impl HtlcAttemptInfo {
	/// Creates the attempt parameters from the given session key bytes.
	///
	/// The key is kept in its raw form and only parsed into a scalar when
	/// [`session_key`] is called.
	///
	/// [`session_key`]: Self::session_key
	pub fn new(
		attempt_id: u64, session_key: [u8; 32], route: Route, attempt_time: SystemTime,
		hash: Option<PaymentHash>,
	) -> Self {
		Self { attempt_id, session_key, session_key_scalar: OnceLock::new(), route, attempt_time, hash }
	}

	/// Returns the raw session key bytes.
	pub fn session_key_bytes(&self) -> &[u8; 32] {
		&self.session_key
	}

	/// Parses the session key into a scalar, memoizing the result.
	pub fn session_key(&self) -> Result<SecretKey, Error> {
		if let Some(key) = self.session_key_scalar.get() {
			return Ok(*key);
		}
		let key = SecretKey::from_slice(&self.session_key).map_err(|e| {
			log::error!("Stored session key is not a valid scalar: {}", e);
			Error::Codec
		})?;
		let _ = self.session_key_scalar.set(key);
		Ok(key)
	}
}

impl fmt::Debug for HtlcAttemptInfo {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("HtlcAttemptInfo")
			.field("attempt_id", &self.attempt_id)
			.field("route", &self.route)
			.field("attempt_time", &self.attempt_time)
			.field("hash", &self.hash)
			.finish_non_exhaustive()
	}
}

impl PartialEq for HtlcAttemptInfo {
	fn eq(&self, other: &Self) -> bool {
		// The memoized scalar is derived data and doesn't take part in equality.
		self.attempt_id == other.attempt_id
			&& self.session_key == other.session_key
			&& self.route == other.route
			&& self.attempt_time == other.attempt_time
			&& self.hash == other.hash
	}
}

impl Eq for HtlcAttemptInfo {}

impl Writeable for HtlcAttemptInfo {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.attempt_id.write(writer)?;
		self.session_key.write(writer)?;
		self.attempt_time.write(writer)?;
		self.hash.write(writer)?;
		self.route.write(writer)
	}
}

impl Readable for HtlcAttemptInfo {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let attempt_id = Readable::read(reader)?;
		let session_key = Readable::read(reader)?;
		let attempt_time = Readable::read(reader)?;
		let hash = Readable::read(reader)?;
		let route = Readable::read(reader)?;
		Ok(Self::new(attempt_id, session_key, route, attempt_time, hash))
	}
}

/// The proof of success recorded for a settled attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HtlcSettleInfo {
	/// The preimage claimed by the receiver.
	pub preimage: PaymentPreimage,
	/// The time the settlement was recorded. [`UNIX_EPOCH`] denotes an unset time.
	///
	/// [`UNIX_EPOCH`]: std::time::UNIX_EPOCH
	pub settle_time: SystemTime,
}

impl Writeable for HtlcSettleInfo {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.preimage.write(writer)?;
		self.settle_time.write(writer)
	}
}

impl Readable for HtlcSettleInfo {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let preimage = Readable::read(reader)?;
		let settle_time = Readable::read(reader)?;
		Ok(Self { preimage, settle_time })
	}
}

/// The stage of the route an attempt failure originated from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HtlcFailReason {
	/// The failure could not be attributed.
	Unknown,
	/// A failure message was received but could not be decrypted.
	Unreadable,
	/// The attempt failed locally, before leaving the node.
	Internal,
	/// A failure message was received from the network and is recorded alongside.
	Message,
}

impl Writeable for HtlcFailReason {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		let tag: u8 = match self {
			Self::Unknown => 0,
			Self::Unreadable => 1,
			Self::Internal => 2,
			Self::Message => 3,
		};
		tag.write(writer)
	}
}

impl Readable for HtlcFailReason {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		match u8::read(reader)? {
			0 => Ok(Self::Unknown),
			1 => Ok(Self::Unreadable),
			2 => Ok(Self::Internal),
			3 => Ok(Self::Message),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

/// The failure recorded for a failed attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HtlcFailInfo {
	/// The time the failure was recorded. [`UNIX_EPOCH`] denotes an unset time.
	///
	/// [`UNIX_EPOCH`]: std::time::UNIX_EPOCH
	pub fail_time: SystemTime,
	/// The failure message received from the network, in wire encoding. May be empty.
	pub wire_failure: Vec<u8>,
	/// The stage the failure originated from.
	pub reason: HtlcFailReason,
	/// The index of the hop the failure was attributed to, counted from the sender.
	pub failure_source_index: u32,
}

impl Writeable for HtlcFailInfo {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		self.fail_time.write(writer)?;
		self.wire_failure.write(writer)?;
		self.reason.write(writer)?;
		self.failure_source_index.write(writer)
	}
}

impl Readable for HtlcFailInfo {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let fail_time = Readable::read(reader)?;
		let wire_failure = Readable::read(reader)?;
		let reason = Readable::read(reader)?;
		let failure_source_index = Readable::read(reader)?;
		Ok(Self { fail_time, wire_failure, reason, failure_source_index })
	}
}

/// The outcome recorded for an attempt.
///
/// An attempt is either still in flight, settled, or failed. The three cases are mutually
/// exclusive and a recorded outcome is never overwritten.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HtlcResolution {
	/// The attempt was dispatched and no outcome was recorded yet.
	InFlight,
	/// The attempt was settled by the receiver.
	Settled(HtlcSettleInfo),
	/// The attempt failed.
	Failed(HtlcFailInfo),
}

/// A single attempt of a payment, together with its recorded outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HtlcAttempt {
	/// The immutable parameters the attempt was dispatched with.
	pub info: HtlcAttemptInfo,
	/// The outcome recorded for the attempt so far.
	pub resolution: HtlcResolution,
}

impl HtlcAttempt {
	/// Returns the settlement record, if the attempt settled.
	pub fn settle_info(&self) -> Option<&HtlcSettleInfo> {
		match &self.resolution {
			HtlcResolution::Settled(settle_info) => Some(settle_info),
			_ => None,
		}
	}

	/// Returns the failure record, if the attempt failed.
	pub fn fail_info(&self) -> Option<&HtlcFailInfo> {
		match &self.resolution {
			HtlcResolution::Failed(fail_info) => Some(fail_info),
			_ => None,
		}
	}

	/// Returns whether no outcome was recorded for the attempt yet.
	pub fn is_in_flight(&self) -> bool {
		matches!(self.resolution, HtlcResolution::InFlight)
	}

	/// Returns whether the attempt settled.
	pub fn is_settled(&self) -> bool {
		matches!(self.resolution, HtlcResolution::Settled(_))
	}

	/// Returns whether the attempt failed.
	pub fn is_failed(&self) -> bool {
		matches!(self.resolution, HtlcResolution::Failed(_))
	}
}

/// The reason a payment as a whole was given up on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
	/// The payment timed out before completing.
	Timeout,
	/// No route to the receiver could be found.
	NoRoute,
	/// An unrecoverable error occurred while dispatching attempts.
	Error,
	/// The receiver rejected the payment details, e.g., due to a wrong amount or expiry.
	IncorrectPaymentDetails,
	/// The local balance doesn't cover the payment.
	InsufficientBalance,
	/// The payment was cancelled by the user.
	Canceled,
}

impl fmt::Display for FailureReason {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Self::Timeout => f.write_str("timeout"),
			Self::NoRoute => f.write_str("no route"),
			Self::Error => f.write_str("error"),
			Self::IncorrectPaymentDetails => f.write_str("incorrect payment details"),
			Self::InsufficientBalance => f.write_str("insufficient balance"),
			Self::Canceled => f.write_str("canceled"),
		}
	}
}

impl Writeable for FailureReason {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
		let tag: u8 = match self {
			Self::Timeout => 0,
			Self::NoRoute => 1,
			Self::Error => 2,
			Self::IncorrectPaymentDetails => 3,
			Self::InsufficientBalance => 4,
			Self::Canceled => 5,
		};
		tag.write(writer)
	}
}

impl Readable for FailureReason {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		match u8::read(reader)? {
			0 => Ok(Self::Timeout),
			1 => Ok(Self::NoRoute),
			2 => Ok(Self::Error),
			3 => Ok(Self::IncorrectPaymentDetails),
			4 => Ok(Self::InsufficientBalance),
			5 => Ok(Self::Canceled),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

/// The status of a payment, derived from its recorded attempts and failure reason.
///
/// The status is never persisted: it is recomputed from the authoritative records on every
/// fetch, so it can't drift out of sync with them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
	/// The payment was initiated and no attempt is outstanding or settled.
	Initiated,
	/// At least one attempt is outstanding.
	InFlight,
	/// At least one attempt settled and none are outstanding.
	Succeeded,
	/// No attempts remain outstanding and a failure reason was recorded.
	Failed,
}

impl fmt::Display for PaymentStatus {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Self::Initiated => f.write_str("initiated"),
			Self::InFlight => f.write_str("in-flight"),
			Self::Succeeded => f.write_str("succeeded"),
			Self::Failed => f.write_str("failed"),
		}
	}
}

impl PaymentStatus {
	/// Returns whether a payment carrying this status may be (re-)initiated, failing with
	/// the error describing the conflicting state otherwise.
	pub fn initializable(&self) -> Result<(), Error> {
		match *self {
			Self::Initiated => Err(Error::PaymentInFlight),
			Self::InFlight => Err(Error::PaymentAlreadyExists),
			Self::Succeeded => Err(Error::PaymentAlreadySucceeded),
			Self::Failed => Ok(()),
		}
	}

	/// Returns whether attempt outcomes may still be recorded for a payment carrying this
	/// status.
	///
	/// Late-arriving outcomes remain recordable as long as any attempt is outstanding: a
	/// settled attempt or a recorded failure reason keeps the payment in
	/// [`PaymentStatus::InFlight`] until the last outstanding attempt resolved.
	pub fn updatable(&self) -> Result<(), Error> {
		match *self {
			Self::Initiated | Self::InFlight => Ok(()),
			Self::Succeeded => Err(Error::PaymentAlreadySucceeded),
			Self::Failed => Err(Error::PaymentAlreadyFailed),
		}
	}

	/// Returns whether a payment carrying this status may be deleted as a whole.
	pub fn removable(&self) -> Result<(), Error> {
		match *self {
			Self::Initiated | Self::InFlight => Err(Error::PaymentInFlight),
			Self::Succeeded | Self::Failed => Ok(()),
		}
	}
}

/// Aggregate figures derived from a payment's recorded attempts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PaymentState {
	/// The number of attempts with no recorded outcome.
	pub num_attempts_in_flight: usize,
	/// The amount still missing towards the payment's total, in millisatoshi.
	pub remaining_msat: u64,
	/// The fees paid across all non-failed attempts, in millisatoshi.
	pub fees_paid_msat: u64,
	/// Whether any attempt settled.
	pub has_settled_htlc: bool,
	/// Whether a failure reason was recorded for the payment.
	pub payment_failed: bool,
}

/// A consistent snapshot of a payment, its attempts, and its derived status.
///
/// Snapshots are produced by the store and reflect the payment at the time of the producing
/// transaction; they are not live views.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payment {
	sequence_num: u64,
	info: PaymentCreationInfo,
	htlcs: Vec<HtlcAttempt>,
	failure_reason: Option<FailureReason>,
	status: PaymentStatus,
	state: PaymentState,
}

impl Payment {
	/// Assembles a snapshot from the persisted records, deriving status and state.
	///
	/// Fails with [`Error::PaymentInternal`] if the records contradict each other, and with
	/// [`Error::SentExceedsTotal`] if the recorded attempts pay out more than the payment's
	/// total amount.
	pub(crate) fn new(
		sequence_num: u64, info: PaymentCreationInfo, htlcs: Vec<HtlcAttempt>,
		failure_reason: Option<FailureReason>,
	) -> Result<Self, Error> {
		let mut num_attempts_in_flight = 0;
		let mut sent_msat: u64 = 0;
		let mut fees_paid_msat: u64 = 0;
		let mut has_settled_htlc = false;

		for htlc in htlcs.iter() {
			match htlc.resolution {
				HtlcResolution::Failed(_) => continue,
				HtlcResolution::Settled(_) => has_settled_htlc = true,
				HtlcResolution::InFlight => num_attempts_in_flight += 1,
			}
			sent_msat = sent_msat.saturating_add(htlc.info.route.receiver_amt_msat());
			fees_paid_msat = fees_paid_msat.saturating_add(htlc.info.route.total_fees_msat());
		}

		let remaining_msat = match info.value_msat.checked_sub(sent_msat) {
			Some(remaining_msat) => remaining_msat,
			None => {
				log::error!(
					"Payment {} has attempts paying {} msat of a {} msat total",
					info.identifier,
					sent_msat,
					info.value_msat
				);
				return Err(Error::SentExceedsTotal);
			},
		};

		let payment_failed = failure_reason.is_some();
		let state = PaymentState {
			num_attempts_in_flight,
			remaining_msat,
			fees_paid_msat,
			has_settled_htlc,
			payment_failed,
		};

		let status = if num_attempts_in_flight > 0 {
			PaymentStatus::InFlight
		} else if has_settled_htlc {
			PaymentStatus::Succeeded
		} else if payment_failed {
			PaymentStatus::Failed
		} else {
			PaymentStatus::Initiated
		};

		let consistent = match status {
			PaymentStatus::Initiated => remaining_msat == info.value_msat,
			PaymentStatus::InFlight => true,
			PaymentStatus::Succeeded => remaining_msat == 0 && has_settled_htlc,
			PaymentStatus::Failed => {
				num_attempts_in_flight == 0 && (remaining_msat > 0 || !has_settled_htlc)
			},
		};
		if !consistent {
			log::error!(
				"Payment {} derived status {} contradicts its state: {:?}",
				info.identifier,
				status,
				state
			);
			return Err(Error::PaymentInternal);
		}

		Ok(Self { sequence_num, info, htlcs, failure_reason, status, state })
	}

	/// Returns the sequence number assigned to the payment, ordering it among all payments.
	pub fn sequence_num(&self) -> u64 {
		self.sequence_num
	}

	/// Returns the payment's immutable creation parameters.
	pub fn info(&self) -> &PaymentCreationInfo {
		&self.info
	}

	/// Returns all attempts recorded for the payment, ordered by attempt id.
	pub fn htlcs(&self) -> &[HtlcAttempt] {
		&self.htlcs
	}

	/// Returns the failure reason recorded for the payment, if any.
	pub fn failure_reason(&self) -> Option<FailureReason> {
		self.failure_reason
	}

	/// Returns the payment's derived status.
	pub fn status(&self) -> PaymentStatus {
		self.status
	}

	/// Returns the payment's derived aggregate state.
	pub fn state(&self) -> &PaymentState {
		&self.state
	}

	/// Returns whether the payment reached a terminal state, i.e., succeeded or failed with
	/// no attempts outstanding.
	pub fn terminated(&self) -> bool {
		matches!(self.status, PaymentStatus::Succeeded | PaymentStatus::Failed)
	}

	/// Returns the attempts with no recorded outcome.
	pub fn in_flight_htlcs(&self) -> impl Iterator<Item = &HtlcAttempt> {
		self.htlcs.iter().filter(|htlc| htlc.is_in_flight())
	}

	/// Returns the amount paid out by the non-failed attempts so far, in millisatoshi.
	pub fn sent_amt_msat(&self) -> u64 {
		self.info.value_msat - self.state.remaining_msat
	}

	/// Returns the preimage proving the payment's success, if any attempt settled.
	pub fn first_settled_preimage(&self) -> Option<PaymentPreimage> {
		self.htlcs.iter().find_map(|htlc| htlc.settle_info()).map(|settle_info| settle_info.preimage)
	}

	/// Returns whether a new attempt may be registered for the payment.
	///
	/// Registration requires the payment to accept updates, no attempt to have settled, and
	/// no failure reason to be recorded.
	pub fn registrable(&self) -> Result<(), Error> {
		self.status.updatable()?;
		if self.state.has_settled_htlc {
			return Err(Error::PaymentPendingSettled);
		}
		if self.state.payment_failed {
			return Err(Error::PaymentPendingFailed);
		}
		Ok(())
	}

	/// Returns whether the caller should hold off dispatching further attempts and wait for
	/// the outstanding ones to resolve first.
	///
	/// This is the case while attempts are outstanding but the payment's fate is already
	/// decided: an attempt settled, a failure reason was recorded, or the outstanding
	/// attempts already cover the full amount.
	pub fn need_wait_attempts(&self) -> Result<bool, Error> {
		let has_inflight = self.state.num_attempts_in_flight > 0;
		match self.status {
			PaymentStatus::Initiated => {
				if self.state.remaining_msat == 0 {
					log::error!(
						"Payment {} is initiated with nothing remaining to send",
						self.info.identifier
					);
					return Err(Error::PaymentInternal);
				}
				Ok(false)
			},
			PaymentStatus::InFlight => Ok(has_inflight
				&& (self.state.has_settled_htlc
					|| self.state.payment_failed
					|| self.state.remaining_msat == 0)),
			PaymentStatus::Succeeded => {
				if self.state.remaining_msat > 0 {
					log::error!(
						"Payment {} succeeded with {} msat remaining",
						self.info.identifier,
						self.state.remaining_msat
					);
					return Err(Error::PaymentInternal);
				}
				Ok(has_inflight)
			},
			PaymentStatus::Failed => Ok(false),
		}
	}

	/// Returns whether the caller may dispatch further attempts for the payment.
	///
	/// No further attempts are allowed once the outstanding attempts cover the full amount,
	/// once the payment reached a terminal state, or while registration is barred.
	pub fn allow_more_attempts(&self) -> Result<bool, Error> {
		if self.state.remaining_msat == 0 {
			return Ok(false);
		}

		if self.status == PaymentStatus::Succeeded {
			log::error!(
				"Payment {} succeeded with {} msat remaining",
				self.info.identifier,
				self.state.remaining_msat
			);
			return Err(Error::PaymentInternal);
		}

		if self.terminated() {
			return Ok(false);
		}

		Ok(self.registrable().is_ok())
	}

	/// Validates that the given attempt is compatible with the payment's recorded attempts
	/// before it is persisted.
	pub(crate) fn verify_new_attempt(&self, attempt: &HtlcAttemptInfo) -> Result<(), Error> {
		if self.htlcs.iter().any(|htlc| htlc.info.attempt_id == attempt.attempt_id) {
			log::error!(
				"Attempt id {} is already recorded for payment {}",
				attempt.attempt_id,
				self.info.identifier
			);
			return Err(Error::PaymentInternal);
		}

		let final_hop = match attempt.route.final_hop() {
			Some(final_hop) => final_hop,
			None => {
				log::error!(
					"Attempt {} for payment {} carries a route without hops",
					attempt.attempt_id,
					self.info.identifier
				);
				return Err(Error::PaymentInternal);
			},
		};
		let amt_msat = attempt.route.receiver_amt_msat();
		let is_blinded = !final_hop.encrypted_data.is_empty();

		if is_blinded && final_hop.mpp_record.is_some() {
			return Err(Error::MppRecordInBlindedPayment);
		}

		for htlc in self.htlcs.iter().filter(|htlc| !htlc.is_failed()) {
			let other_hop = match htlc.info.route.final_hop() {
				Some(other_hop) => other_hop,
				None => return Err(Error::PaymentInternal),
			};

			if is_blinded {
				if other_hop.mpp_record.is_some() {
					return Err(Error::MppRecordInBlindedPayment);
				}
				if final_hop.total_amt_msat != other_hop.total_amt_msat {
					return Err(Error::BlindedTotalMismatch);
				}
				// Blinded attempts carry no further correlatable records.
				continue;
			}

			match (&final_hop.mpp_record, &other_hop.mpp_record) {
				(None, Some(_)) => return Err(Error::NonMppIntoMpp),
				(Some(_), None) => return Err(Error::MppIntoNonMpp),
				(None, None) => {},
				(Some(new_record), Some(other_record)) => {
					if new_record.payment_addr != other_record.payment_addr {
						return Err(Error::MppAddrMismatch);
					}
					if new_record.total_msat != other_record.total_msat {
						return Err(Error::MppTotalMismatch);
					}
				},
			}
		}

		if !is_blinded && final_hop.mpp_record.is_none() && amt_msat != self.info.value_msat {
			return Err(Error::ValueMismatch);
		}

		if self.sent_amt_msat().saturating_add(amt_msat) > self.info.value_msat {
			return Err(Error::ValueExceedsAmount);
		}

		Ok(())
	}
}
