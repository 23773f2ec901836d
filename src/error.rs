// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use std::fmt;

/// An error returned by the payment store.
///
/// The set of kinds is stable: callers may pattern-match on it to drive their retry and
/// bookkeeping decisions. Semantic errors are returned without any side effect on the
/// persisted state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
	/// No payment with the given identifier has been initiated.
	PaymentNotInitiated,
	/// The payment was already initiated and has attempts in flight.
	PaymentAlreadyExists,
	/// The payment was already paid in full.
	PaymentAlreadySucceeded,
	/// The payment was already initiated and hasn't reached a terminal state yet.
	PaymentInFlight,
	/// The payment was already failed.
	PaymentAlreadyFailed,
	/// The payment reached a terminal state and may no longer be altered.
	PaymentTerminal,
	/// The payment carries a status outside of the known set.
	UnknownPaymentStatus,
	/// The persisted payment data is inconsistent with itself.
	PaymentInternal,
	/// No attempt with the given id was registered for the payment.
	AttemptNotFound,
	/// The referenced attempt was already settled.
	AttemptAlreadySettled,
	/// The referenced attempt was already failed.
	AttemptAlreadyFailed,
	/// A non-multi-path attempt doesn't pay the full payment amount.
	ValueMismatch,
	/// Registering the attempt would push the total sent beyond the payment amount.
	ValueExceedsAmount,
	/// The recorded attempts already pay more than the payment amount.
	SentExceedsTotal,
	/// A multi-path attempt was registered against a non-multi-path payment.
	MppIntoNonMpp,
	/// A non-multi-path attempt was registered against a multi-path payment.
	NonMppIntoMpp,
	/// The attempt's payment address doesn't match the payment's other attempts.
	MppAddrMismatch,
	/// The attempt's total amount doesn't match the payment's other attempts.
	MppTotalMismatch,
	/// An attempt for a blinded payment carries a multi-path record.
	MppRecordInBlindedPayment,
	/// The blinded attempt's total amount doesn't match the payment's other attempts.
	BlindedTotalMismatch,
	/// New attempts may not be registered while a settled attempt is recorded.
	PaymentPendingSettled,
	/// New attempts may not be registered while a payment failure reason is recorded.
	PaymentPendingFailed,
	/// Reading from or writing to the underlying store failed.
	StoreIo,
	/// The underlying store reported a transaction conflict; the operation may be retried.
	StoreConflict,
	/// Persisted data could not be decoded, or data to persist could not be encoded.
	Codec,
	/// The operation was cancelled via its [`CancelToken`] before completing.
	///
	/// [`CancelToken`]: crate::CancelToken
	Cancelled,
	/// The given query parameters are invalid, e.g., a zero page size was passed.
	QueryInvalid,
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Self::PaymentNotInitiated => write!(f, "Payment isn't initiated."),
			Self::PaymentAlreadyExists => {
				write!(f, "Payment already exists and has attempts in flight.")
			},
			Self::PaymentAlreadySucceeded => write!(f, "Payment already succeeded."),
			Self::PaymentInFlight => write!(f, "Payment with the same identifier is in flight."),
			Self::PaymentAlreadyFailed => write!(f, "Payment already failed."),
			Self::PaymentTerminal => write!(f, "Payment is in a terminal state."),
			Self::UnknownPaymentStatus => write!(f, "Unknown payment status."),
			Self::PaymentInternal => write!(f, "Persisted payment data is inconsistent."),
			Self::AttemptNotFound => {
				write!(f, "No attempt with the given id is known for the payment.")
			},
			Self::AttemptAlreadySettled => write!(f, "Attempt already settled."),
			Self::AttemptAlreadyFailed => write!(f, "Attempt already failed."),
			Self::ValueMismatch => {
				write!(f, "Attempt value doesn't match the full payment amount.")
			},
			Self::ValueExceedsAmount => {
				write!(f, "Attempt value exceeds the remaining payment amount.")
			},
			Self::SentExceedsTotal => {
				write!(f, "Recorded attempts exceed the total payment amount.")
			},
			Self::MppIntoNonMpp => {
				write!(f, "Multi-path attempt registered against a non-multi-path payment.")
			},
			Self::NonMppIntoMpp => {
				write!(f, "Non-multi-path attempt registered against a multi-path payment.")
			},
			Self::MppAddrMismatch => {
				write!(f, "Attempt payment address doesn't match the other attempts.")
			},
			Self::MppTotalMismatch => {
				write!(f, "Attempt total amount doesn't match the other attempts.")
			},
			Self::MppRecordInBlindedPayment => {
				write!(f, "Blinded attempt may not carry a multi-path record.")
			},
			Self::BlindedTotalMismatch => {
				write!(f, "Blinded attempt total doesn't match the other attempts.")
			},
			Self::PaymentPendingSettled => {
				write!(f, "Payment has a settled attempt and accepts no new attempts.")
			},
			Self::PaymentPendingFailed => {
				write!(f, "Payment has a failure reason recorded and accepts no new attempts.")
			},
			Self::StoreIo => write!(f, "Failed to access the underlying store."),
			Self::StoreConflict => write!(f, "Underlying store reported a transaction conflict."),
			Self::Codec => write!(f, "Failed to encode or decode persisted data."),
			Self::Cancelled => write!(f, "Operation was cancelled by the caller."),
			Self::QueryInvalid => write!(f, "Given query parameters are invalid."),
		}
	}
}

impl std::error::Error for Error {}
