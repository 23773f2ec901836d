// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use crate::error::Error;
use crate::io::{
	self, ReadTxn, ScopePath, TxnStore, WriteTxn, PAYMENTS_INDEX_SCOPE, PAYMENTS_SCOPE,
};
use crate::payment::{
	FailureReason, HtlcAttempt, HtlcAttemptInfo, HtlcFailInfo, HtlcResolution, HtlcSettleInfo,
	Payment, PaymentCreationInfo, PaymentStatus,
};
use crate::ser::{DecodeError, Readable, Writeable};
use crate::types::{CancelToken, PaymentHash};

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, UNIX_EPOCH};

// Keys of a payment's scope.
const CREATION_INFO_KEY: &[u8] = b"creation-info";
const SEQUENCE_KEY: &[u8] = b"sequence";
const FAIL_INFO_KEY: &[u8] = b"fail-info";

// Name of the nested scope holding a payment's attempts, and the key prefixes used within.
// Each prefix is followed by the big-endian attempt id.
const HTLCS_SCOPE: &[u8] = b"htlcs";
const HTLC_ATTEMPT_INFO_PREFIX: &[u8] = b"attempt-info/";
const HTLC_SETTLE_INFO_PREFIX: &[u8] = b"settle-info/";
const HTLC_FAIL_INFO_PREFIX: &[u8] = b"fail-info/";

// Sequence numbers are reserved in blocks to keep transactional contention low when many
// payments are initiated in quick succession. Numbers left unused when the process exits
// are never handed out again, so sequences are strictly increasing but may have gaps.
const SEQUENCE_BLOCK_SIZE: u64 = 1000;

// How often full-store scans report progress.
const SCAN_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

fn payments_scope() -> ScopePath {
	ScopePath::top(PAYMENTS_SCOPE)
}

fn payment_scope(identifier: &PaymentHash) -> ScopePath {
	payments_scope().child(&identifier.0)
}

fn htlcs_scope(identifier: &PaymentHash) -> ScopePath {
	payment_scope(identifier).child(HTLCS_SCOPE)
}

fn index_scope() -> ScopePath {
	ScopePath::top(PAYMENTS_INDEX_SCOPE)
}

fn htlc_key(prefix: &[u8], attempt_id: u64) -> Vec<u8> {
	let mut key = prefix.to_vec();
	key.extend_from_slice(&attempt_id.to_be_bytes());
	key
}

fn parse_htlc_id(key: &[u8], prefix: &[u8]) -> Option<u64> {
	let rest = key.strip_prefix(prefix)?;
	let bytes: [u8; 8] = rest.try_into().ok()?;
	Some(u64::from_be_bytes(bytes))
}

fn decode_value<T: Readable>(bytes: &[u8]) -> Result<T, Error> {
	let mut reader = bytes;
	T::read(&mut reader).map_err(|e| {
		log::error!("Failed to decode persisted payment data: {}", e);
		Error::Codec
	})
}

// An entry of the sequence index, mapping a sequence number back to the payment it was
// assigned to. Only hash-type identifiers exist so far; the tag leaves room for more.
const INDEX_TYPE_HASH: u8 = 0;

struct PaymentIndexEntry {
	identifier: PaymentHash,
}

impl Writeable for PaymentIndexEntry {
	fn write<W: Write>(&self, writer: &mut W) -> Result<(), std::io::Error> {
		INDEX_TYPE_HASH.write(writer)?;
		self.identifier.write(writer)
	}
}

impl Readable for PaymentIndexEntry {
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		match u8::read(reader)? {
			INDEX_TYPE_HASH => Ok(Self { identifier: Readable::read(reader)? }),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

// Hands out strictly increasing sequence numbers, reserving them from the persisted upper
// bound in blocks. The mutex serializes allocations within the process; across processes
// the persisted bound is the coordination point.
struct SequenceAllocator {
	block: Mutex<SequenceBlock>,
}

#[derive(Default)]
struct SequenceBlock {
	next: u64,
	ceiling: u64,
}

impl SequenceAllocator {
	fn new() -> Self {
		Self { block: Mutex::new(SequenceBlock::default()) }
	}

	fn next_sequence<K: TxnStore>(&self, store: &K) -> Result<u64, Error> {
		let mut block = self.block.lock().unwrap();
		if block.next >= block.ceiling {
			let ceiling = io::update(store, |txn| {
				txn.create_scope(&payments_scope())?;
				let stored = txn.sequence(&payments_scope())?;
				let ceiling =
					stored.checked_add(SEQUENCE_BLOCK_SIZE).ok_or(Error::PaymentInternal)?;
				txn.set_sequence(&payments_scope(), ceiling)?;
				Ok(ceiling)
			})?;
			block.next = ceiling - SEQUENCE_BLOCK_SIZE;
			block.ceiling = ceiling;
		}
		block.next += 1;
		Ok(block.next)
	}
}

/// The options of a [`query_payments`] call.
///
/// [`query_payments`]: PaymentStore::query_payments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentsQuery {
	/// The sequence number to resume after, exclusive. Zero starts at the first payment,
	/// or, with [`reversed`] set, at the last.
	///
	/// [`reversed`]: Self::reversed
	pub index_offset: u64,
	/// The maximum number of payments returned. Must be greater than zero.
	pub max_payments: u64,
	/// Whether to page backwards through the sequence index.
	pub reversed: bool,
	/// Whether payments that haven't succeeded (yet) are included.
	pub include_incomplete: bool,
	/// Whether the response carries the total number of payments in the store.
	pub count_total: bool,
	/// Lower inclusive bound on the payments' creation time, in unix seconds. Zero means
	/// unbounded.
	pub creation_date_start: u64,
	/// Upper inclusive bound on the payments' creation time, in unix seconds. Zero means
	/// unbounded.
	pub creation_date_end: u64,
}

/// A page of payments returned by [`query_payments`].
///
/// [`query_payments`]: PaymentStore::query_payments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentsQueryResponse {
	/// The page of payments, always in ascending sequence order.
	pub payments: Vec<Payment>,
	/// The sequence number of the first payment in the page, zero if the page is empty.
	pub first_index_offset: u64,
	/// The sequence number of the last payment in the page, zero if the page is empty.
	pub last_index_offset: u64,
	/// The total number of payments in the store, if requested.
	pub total_count: Option<u64>,
}

/// The persistent store owning the lifecycle of outgoing payments and their attempts.
///
/// The store is the single source of truth consulted before, during, and after each attempt
/// is dispatched on the wire. It guarantees that a payment is never paid twice, that the
/// attempts of a payment never pay out more than the user authorized, and that payments
/// in flight across a restart can always be recovered via
/// [`fetch_in_flight_payments`].
///
/// Every operation runs inside a single transaction of the backing [`TxnStore`], so
/// concurrent callers always observe consistent snapshots and a crash never leaves
/// partially applied operations behind.
///
/// [`fetch_in_flight_payments`]: Self::fetch_in_flight_payments
pub struct PaymentStore<K: TxnStore> {
	store: Arc<K>,
	sequence: SequenceAllocator,
}

impl<K: TxnStore> PaymentStore<K> {
	/// Creates a new store persisting to the given backend.
	pub fn new(store: Arc<K>) -> Self {
		Self { store, sequence: SequenceAllocator::new() }
	}

	/// Initiates a payment, recording its creation parameters and assigning it a fresh
	/// sequence number.
	///
	/// A payment that failed before may be initiated again: its previous attempts, failure
	/// reason, and index entry are erased and it starts over with a clean slate. Initiating
	/// a payment that is initiated, in flight, or succeeded fails with the corresponding
	/// error and changes nothing.
	pub fn init_payment(
		&self, identifier: &PaymentHash, creation_info: PaymentCreationInfo,
	) -> Result<(), Error> {
		let sequence_num = self.sequence.next_sequence(&*self.store)?;
		io::update(&*self.store, |txn| {
			let scope = payment_scope(identifier);

			match fetch_payment_in_txn(txn, identifier) {
				Ok(payment) => {
					payment.status().initializable()?;
					// The sequence number moves on retry; drop the superseded index entry.
					txn.delete(&index_scope(), &payment.sequence_num().to_be_bytes())?;
				},
				Err(Error::PaymentNotInitiated) => {},
				Err(e) => return Err(e),
			}

			txn.create_scope(&scope)?;
			txn.create_scope(&index_scope())?;

			let sequence_bytes = sequence_num.to_be_bytes();
			let index_entry = PaymentIndexEntry { identifier: *identifier };
			txn.put(&index_scope(), &sequence_bytes, &index_entry.encode())?;
			txn.put(&scope, SEQUENCE_KEY, &sequence_bytes)?;
			txn.put(&scope, CREATION_INFO_KEY, &creation_info.encode())?;

			// Clean slate: earlier attempts and failure reason don't carry over.
			txn.delete_scope(&htlcs_scope(identifier))?;
			txn.delete(&scope, FAIL_INFO_KEY)?;
			Ok(())
		})
	}

	/// Records a new attempt dispatched for the payment, returning the refreshed snapshot.
	///
	/// The attempt must be compatible with the payment's prior attempts: partial attempts
	/// of one payment agree on their multi-path record (or, for blinded payments, their
	/// total amount), a non-multi-path attempt pays the exact payment amount, and the
	/// non-failed attempts together never pay more than the payment amount.
	pub fn register_attempt(
		&self, identifier: &PaymentHash, attempt: HtlcAttemptInfo,
	) -> Result<Payment, Error> {
		io::update(&*self.store, |txn| {
			let payment = fetch_payment_in_txn(txn, identifier)?;
			payment.registrable()?;
			payment.verify_new_attempt(&attempt)?;

			let scope = htlcs_scope(identifier);
			txn.create_scope(&scope)?;
			txn.put(
				&scope,
				&htlc_key(HTLC_ATTEMPT_INFO_PREFIX, attempt.attempt_id),
				&attempt.encode(),
			)?;

			fetch_payment_in_txn(txn, identifier)
		})
	}

	/// Records the settlement of an attempt, returning the refreshed snapshot.
	///
	/// The attempt must have been registered and must not carry an outcome yet. Settling
	/// remains possible while other attempts are still outstanding, even if the payment's
	/// fate is already decided.
	pub fn settle_attempt(
		&self, identifier: &PaymentHash, attempt_id: u64, settle_info: HtlcSettleInfo,
	) -> Result<Payment, Error> {
		io::update(&*self.store, |txn| {
			let payment = fetch_payment_in_txn(txn, identifier)?;
			payment.status().updatable()?;
			check_attempt_unresolved(&payment, attempt_id)?;

			txn.put(
				&htlcs_scope(identifier),
				&htlc_key(HTLC_SETTLE_INFO_PREFIX, attempt_id),
				&settle_info.encode(),
			)?;

			fetch_payment_in_txn(txn, identifier)
		})
	}

	/// Records the failure of an attempt, returning the refreshed snapshot.
	///
	/// The attempt must have been registered and must not carry an outcome yet.
	pub fn fail_attempt(
		&self, identifier: &PaymentHash, attempt_id: u64, fail_info: HtlcFailInfo,
	) -> Result<Payment, Error> {
		io::update(&*self.store, |txn| {
			let payment = fetch_payment_in_txn(txn, identifier)?;
			payment.status().updatable()?;
			check_attempt_unresolved(&payment, attempt_id)?;

			txn.put(
				&htlcs_scope(identifier),
				&htlc_key(HTLC_FAIL_INFO_PREFIX, attempt_id),
				&fail_info.encode(),
			)?;

			fetch_payment_in_txn(txn, identifier)
		})
	}

	/// Records the reason the payment as a whole was given up on, returning the refreshed
	/// snapshot.
	///
	/// Recording a failure reason doesn't require the outstanding attempts to have
	/// resolved: the payment stays in flight until the last of them does, and late
	/// arrivals may still record their outcomes. The payment derives
	/// [`PaymentStatus::Failed`] once no non-failed attempts remain.
	pub fn fail_payment(
		&self, identifier: &PaymentHash, reason: FailureReason,
	) -> Result<Payment, Error> {
		io::update(&*self.store, |txn| {
			let payment = fetch_payment_in_txn(txn, identifier)?;
			if payment.terminated() {
				return Err(Error::PaymentTerminal);
			}

			txn.put(&payment_scope(identifier), FAIL_INFO_KEY, &reason.encode())?;

			fetch_payment_in_txn(txn, identifier)
		})
	}

	/// Returns the payment's current snapshot.
	pub fn fetch_payment(&self, identifier: &PaymentHash) -> Result<Payment, Error> {
		io::view(&*self.store, |txn| fetch_payment_in_txn(txn, identifier))
	}

	/// Returns all payments that haven't reached a terminal state, for the router to resume
	/// after a restart.
	///
	/// This scans every payment in the store and may take a while; progress is logged in
	/// 30-second intervals and the scan aborts with [`Error::Cancelled`] once the given
	/// token fires.
	pub fn fetch_in_flight_payments(&self, cancel: &CancelToken) -> Result<Vec<Payment>, Error> {
		io::view(&*self.store, |txn| {
			let scope = payments_scope();
			if !txn.scope_exists(&scope)? {
				return Ok(Vec::new());
			}

			let start = Instant::now();
			let mut last_log = Instant::now();
			let mut scanned: u64 = 0;
			let mut in_flight = Vec::new();
			txn.for_each_child_scope(&scope, &mut |name| {
				if cancel.is_cancelled() {
					return Err(Error::Cancelled);
				}
				let identifier = match name.try_into() {
					Ok(bytes) => PaymentHash(bytes),
					Err(_) => {
						log::warn!("Skipping unexpected scope in payment storage");
						return Ok(true);
					},
				};
				let payment = fetch_payment_in_txn(txn, &identifier)?;
				if !payment.terminated() {
					in_flight.push(payment);
				}
				scanned += 1;
				if last_log.elapsed() >= SCAN_PROGRESS_INTERVAL {
					log::info!(
						"Still scanning for in-flight payments: {} scanned, {} in flight.",
						scanned,
						in_flight.len()
					);
					last_log = Instant::now();
				}
				Ok(true)
			})?;
			log::trace!(
				"Scanned {} payments in {}ms, {} in flight.",
				scanned,
				start.elapsed().as_millis(),
				in_flight.len()
			);
			Ok(in_flight)
		})
	}

	/// Returns a page of payments in sequence order, according to the given query.
	///
	/// With [`reversed`] set the page is taken walking backwards from the cursor (where an
	/// offset of zero means the very end), but is returned in ascending order either way.
	/// Payments skipped by the filters don't count towards [`max_payments`].
	///
	/// [`reversed`]: PaymentsQuery::reversed
	/// [`max_payments`]: PaymentsQuery::max_payments
	pub fn query_payments(
		&self, query: &PaymentsQuery, cancel: &CancelToken,
	) -> Result<PaymentsQueryResponse, Error> {
		if query.max_payments == 0 {
			return Err(Error::QueryInvalid);
		}

		io::view(&*self.store, |txn| {
			let scope = index_scope();
			let mut page = Vec::new();
			if txn.scope_exists(&scope)? {
				let start_key =
					if query.index_offset == 0 { None } else { Some(query.index_offset.to_be_bytes()) };
				txn.for_each_key_from(
					&scope,
					start_key.as_ref().map(|key| &key[..]),
					query.reversed,
					&mut |_, value| {
						if cancel.is_cancelled() {
							return Err(Error::Cancelled);
						}
						let entry: PaymentIndexEntry = decode_value(value)?;
						let payment = match fetch_payment_in_txn(txn, &entry.identifier) {
							Ok(payment) => payment,
							Err(Error::PaymentNotInitiated) => {
								log::error!(
									"Sequence index references missing payment {}",
									entry.identifier
								);
								return Err(Error::PaymentInternal);
							},
							Err(e) => return Err(e),
						};

						if !query.include_incomplete
							&& payment.status() != PaymentStatus::Succeeded
						{
							return Ok(true);
						}
						let creation_secs = payment
							.info()
							.creation_time
							.duration_since(UNIX_EPOCH)
							.map(|duration| duration.as_secs())
							.unwrap_or(0);
						if query.creation_date_start != 0
							&& creation_secs < query.creation_date_start
						{
							return Ok(true);
						}
						if query.creation_date_end != 0 && creation_secs > query.creation_date_end
						{
							return Ok(true);
						}

						page.push(payment);
						Ok((page.len() as u64) < query.max_payments)
					},
				)?;
			}

			let total_count =
				if query.count_total { Some(txn.key_count(&scope)?) } else { None };

			// Pages are always returned in ascending order, regardless of walk direction.
			if query.reversed {
				page.reverse();
			}
			let first_index_offset = page.first().map(|p| p.sequence_num()).unwrap_or(0);
			let last_index_offset = page.last().map(|p| p.sequence_num()).unwrap_or(0);
			Ok(PaymentsQueryResponse {
				payments: page,
				first_index_offset,
				last_index_offset,
				total_count,
			})
		})
	}

	/// Deletes the payment, or, with `failed_htlcs_only` set, only the records of its
	/// failed attempts.
	///
	/// Deleting the whole payment requires it to have reached a terminal state and drops
	/// its index entry along with it. Failed attempt records may be pruned from any
	/// payment, as they no longer take part in any lifecycle decision.
	pub fn delete_payment(
		&self, identifier: &PaymentHash, failed_htlcs_only: bool,
	) -> Result<(), Error> {
		io::update(&*self.store, |txn| {
			let payment = fetch_payment_in_txn(txn, identifier)?;
			delete_payment_in_txn(txn, &payment, failed_htlcs_only)
		})
	}

	/// Deletes all payments that reached a terminal state, returning how many the deletion
	/// applied to.
	///
	/// With `failed_only` set, succeeded payments are kept. With `failed_htlcs_only` set,
	/// payments themselves are kept and only the records of their failed attempts are
	/// pruned.
	pub fn delete_payments(
		&self, failed_only: bool, failed_htlcs_only: bool, cancel: &CancelToken,
	) -> Result<usize, Error> {
		io::update(&*self.store, |txn| {
			let scope = payments_scope();
			if !txn.scope_exists(&scope)? {
				return Ok(0);
			}

			let mut identifiers = Vec::new();
			txn.for_each_child_scope(&scope, &mut |name| {
				if cancel.is_cancelled() {
					return Err(Error::Cancelled);
				}
				if let Ok(bytes) = name.try_into() {
					identifiers.push(PaymentHash(bytes));
				}
				Ok(true)
			})?;

			let mut num_deleted = 0;
			for identifier in identifiers {
				if cancel.is_cancelled() {
					return Err(Error::Cancelled);
				}
				let payment = fetch_payment_in_txn(txn, &identifier)?;
				if payment.status().removable().is_err() {
					continue;
				}
				if failed_only && payment.status() != PaymentStatus::Failed {
					continue;
				}
				delete_payment_in_txn(txn, &payment, failed_htlcs_only)?;
				num_deleted += 1;
			}
			Ok(num_deleted)
		})
	}
}

fn check_attempt_unresolved(payment: &Payment, attempt_id: u64) -> Result<(), Error> {
	let htlc = payment
		.htlcs()
		.iter()
		.find(|htlc| htlc.info.attempt_id == attempt_id)
		.ok_or(Error::AttemptNotFound)?;
	match htlc.resolution {
		HtlcResolution::InFlight => Ok(()),
		HtlcResolution::Settled(_) => Err(Error::AttemptAlreadySettled),
		HtlcResolution::Failed(_) => Err(Error::AttemptAlreadyFailed),
	}
}

fn delete_payment_in_txn<T: WriteTxn + ?Sized>(
	txn: &mut T, payment: &Payment, failed_htlcs_only: bool,
) -> Result<(), Error> {
	let identifier = &payment.info().identifier;
	if !failed_htlcs_only {
		payment.status().removable()?;
		txn.delete(&index_scope(), &payment.sequence_num().to_be_bytes())?;
		txn.delete_scope(&payment_scope(identifier))?;
		return Ok(());
	}

	let scope = htlcs_scope(identifier);
	for htlc in payment.htlcs().iter().filter(|htlc| htlc.is_failed()) {
		txn.delete(&scope, &htlc_key(HTLC_ATTEMPT_INFO_PREFIX, htlc.info.attempt_id))?;
		txn.delete(&scope, &htlc_key(HTLC_FAIL_INFO_PREFIX, htlc.info.attempt_id))?;
	}
	Ok(())
}

fn fetch_payment_in_txn<T: ReadTxn + ?Sized>(
	txn: &T, identifier: &PaymentHash,
) -> Result<Payment, Error> {
	let scope = payment_scope(identifier);
	txn.prefetch(&[scope.clone(), scope.child(HTLCS_SCOPE)])?;
	let creation_bytes = match txn.get(&scope, CREATION_INFO_KEY)? {
		Some(bytes) => bytes,
		None => return Err(Error::PaymentNotInitiated),
	};
	let creation_info: PaymentCreationInfo = decode_value(&creation_bytes)?;

	let sequence_num = match txn.get(&scope, SEQUENCE_KEY)? {
		Some(bytes) => decode_value::<u64>(&bytes)?,
		None => {
			log::error!("Payment {} is missing its sequence number", identifier);
			return Err(Error::PaymentInternal);
		},
	};

	let failure_reason = match txn.get(&scope, FAIL_INFO_KEY)? {
		Some(bytes) => Some(decode_value::<FailureReason>(&bytes)?),
		None => None,
	};

	let mut attempts: BTreeMap<u64, HtlcAttemptInfo> = BTreeMap::new();
	let mut settles: BTreeMap<u64, HtlcSettleInfo> = BTreeMap::new();
	let mut fails: BTreeMap<u64, HtlcFailInfo> = BTreeMap::new();
	let attempts_scope = scope.child(HTLCS_SCOPE);
	if txn.scope_exists(&attempts_scope)? {
		txn.for_each_key(&attempts_scope, &mut |key, value| {
			if let Some(attempt_id) = parse_htlc_id(key, HTLC_ATTEMPT_INFO_PREFIX) {
				attempts.insert(attempt_id, decode_value(value)?);
			} else if let Some(attempt_id) = parse_htlc_id(key, HTLC_SETTLE_INFO_PREFIX) {
				settles.insert(attempt_id, decode_value(value)?);
			} else if let Some(attempt_id) = parse_htlc_id(key, HTLC_FAIL_INFO_PREFIX) {
				fails.insert(attempt_id, decode_value(value)?);
			} else {
				// Tolerate keys written by newer versions.
				log::warn!("Skipping unknown attempt record for payment {}", identifier);
			}
			Ok(true)
		})?;
	}

	let mut htlcs = Vec::with_capacity(attempts.len());
	for (attempt_id, info) in attempts {
		let resolution = if let Some(settle_info) = settles.remove(&attempt_id) {
			HtlcResolution::Settled(settle_info)
		} else if let Some(fail_info) = fails.remove(&attempt_id) {
			HtlcResolution::Failed(fail_info)
		} else {
			HtlcResolution::InFlight
		};
		htlcs.push(HtlcAttempt { info, resolution });
	}
	// An outcome must belong to a registered attempt, and never both outcomes at once.
	if !settles.is_empty() || !fails.is_empty() {
		log::error!("Payment {} carries attempt outcomes without a matching attempt", identifier);
		return Err(Error::PaymentInternal);
	}

	Payment::new(sequence_num, creation_info, htlcs, failure_reason)
}
