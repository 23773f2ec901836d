// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

#![crate_name = "payment_control"]

//! # Payment Control
//! A persistent control store for the lifecycle of outgoing multi-path Lightning payments.
//!
//! The store is the single source of truth the payment router consults before, during, and
//! after each HTLC attempt is dispatched on the wire. It owns the legal state transitions
//! of a payment, validates that partial attempts belong together, enforces that a payment
//! is never paid twice and never pays out more than the user authorized, and recovers
//! payments that were in flight across a process restart.
//!
//! All state lives in an embedded transactional backend plugged in via the
//! [`TxnStore`] trait; a SQLite-backed implementation ships as [`SqliteStore`].
//! Every operation runs in a single transaction, so concurrent callers always observe the
//! store moving through consistent states.
//!
//! ## Getting Started
//!
//! ```no_run
//! use payment_control::io::SqliteStore;
//! use payment_control::{CancelToken, Error, PaymentCreationInfo, PaymentHash, PaymentStore};
//!
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use std::time::SystemTime;
//!
//! fn main() -> Result<(), Error> {
//! 	let store = Arc::new(SqliteStore::open("payments.sqlite")?);
//! 	let payments = PaymentStore::new(store);
//!
//! 	let identifier = PaymentHash([0xaa; 32]);
//! 	let creation_info = PaymentCreationInfo {
//! 		identifier,
//! 		value_msat: 100_000,
//! 		creation_time: SystemTime::now(),
//! 		payment_request: Vec::new(),
//! 		first_hop_custom_records: BTreeMap::new(),
//! 	};
//! 	payments.init_payment(&identifier, creation_info)?;
//!
//! 	// ... register, settle, and fail attempts as the router dispatches them ...
//!
//! 	for payment in payments.fetch_in_flight_payments(&CancelToken::new())? {
//! 		println!("resuming payment {}", payment.info().identifier);
//! 	}
//! 	Ok(())
//! }
//! ```
//!
//! [`TxnStore`]: io::TxnStore
//! [`SqliteStore`]: io::SqliteStore

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

mod error;
mod hex_utils;
pub mod io;
mod payment;
mod payment_store;
mod route;
mod ser;
mod types;

pub use bitcoin;

pub use error::Error;
pub use payment::{
	FailureReason, HtlcAttempt, HtlcAttemptInfo, HtlcFailInfo, HtlcFailReason, HtlcResolution,
	HtlcSettleInfo, Payment, PaymentCreationInfo, PaymentState, PaymentStatus,
};
pub use payment_store::{PaymentStore, PaymentsQuery, PaymentsQueryResponse};
pub use route::{AmpRecord, MppRecord, Route, RouteHop};
pub use ser::{DecodeError, Readable, Writeable};
pub use types::{CancelToken, PaymentAddress, PaymentHash, PaymentPreimage};
