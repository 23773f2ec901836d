// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

//! Objects and traits for data persistence.
//!
//! The payment store runs every public operation inside a single transaction of an
//! embedded transactional backend. Backends expose hierarchical, named scopes addressed by
//! [`ScopePath`] and are plugged in via the [`TxnStore`] trait.

pub mod sqlite_store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use sqlite_store::SqliteStore;

use crate::error::Error;

/// The top-level scope holding one nested scope per payment.
pub(crate) const PAYMENTS_SCOPE: &[u8] = b"payments";

/// The top-level scope mapping sequence numbers to payment identifiers.
pub(crate) const PAYMENTS_INDEX_SCOPE: &[u8] = b"payments-index";

/// The path of a (possibly nested) scope within the backend.
///
/// Scope names are arbitrary byte strings of at most `u16::MAX` bytes. A scope is an
/// ancestor of another exactly if its path is a prefix of the other's.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopePath {
	segments: Vec<Vec<u8>>,
}

impl ScopePath {
	/// Creates the path of a top-level scope.
	pub fn top(name: &[u8]) -> Self {
		Self { segments: vec![name.to_vec()] }
	}

	/// Returns the path of the scope nested under `self` with the given name.
	pub fn child(&self, name: &[u8]) -> Self {
		let mut segments = self.segments.clone();
		segments.push(name.to_vec());
		Self { segments }
	}

	/// Returns the path's segments, outermost first.
	pub fn segments(&self) -> &[Vec<u8>] {
		&self.segments
	}

	/// Encodes the path into a single self-delimiting byte string.
	///
	/// Each segment is written as a 16-bit big-endian length followed by its bytes, so the
	/// encoding of an ancestor is always a byte prefix of its descendants' encodings.
	pub(crate) fn encode(&self) -> Vec<u8> {
		let mut encoded = Vec::new();
		for segment in self.segments.iter() {
			let len = segment.len() as u16;
			encoded.extend_from_slice(&len.to_be_bytes());
			encoded.extend_from_slice(segment);
		}
		encoded
	}

	/// Decodes a byte string produced by [`Self::encode`].
	pub(crate) fn decode(mut encoded: &[u8]) -> Option<Self> {
		let mut segments = Vec::new();
		while !encoded.is_empty() {
			if encoded.len() < 2 {
				return None;
			}
			let len = u16::from_be_bytes([encoded[0], encoded[1]]) as usize;
			encoded = &encoded[2..];
			if encoded.len() < len {
				return None;
			}
			segments.push(encoded[..len].to_vec());
			encoded = &encoded[len..];
		}
		if segments.is_empty() {
			return None;
		}
		Some(Self { segments })
	}
}

/// A read-only transaction over the backend, providing a consistent snapshot.
pub trait ReadTxn {
	/// Reads the value stored under the given key, if any.
	///
	/// Reading from a scope that doesn't exist yields `None`.
	fn get(&self, scope: &ScopePath, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

	/// Returns whether the given scope was created.
	fn scope_exists(&self, scope: &ScopePath) -> Result<bool, Error>;

	/// Visits the keys of a scope in ascending key order, starting after the (exclusive)
	/// `start` key, in the given direction.
	///
	/// The callback returns whether iteration should continue. With `reverse` set, keys
	/// strictly below `start` are visited in descending order; a `start` of `None` then
	/// begins at the largest key.
	fn for_each_key_from(
		&self, scope: &ScopePath, start: Option<&[u8]>, reverse: bool,
		f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, Error>,
	) -> Result<(), Error>;

	/// Visits all keys of a scope in ascending key order.
	fn for_each_key(
		&self, scope: &ScopePath, f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, Error>,
	) -> Result<(), Error> {
		self.for_each_key_from(scope, None, false, f)
	}

	/// Visits the names of the scopes nested directly under the given scope, in ascending
	/// order.
	///
	/// The callback returns whether iteration should continue.
	fn for_each_child_scope(
		&self, scope: &ScopePath, f: &mut dyn FnMut(&[u8]) -> Result<bool, Error>,
	) -> Result<(), Error>;

	/// Hints the backend to load the given scopes ahead of the following reads.
	///
	/// Backends over remote engines use this to batch round trips; embedded backends
	/// typically have nothing to do.
	fn prefetch(&self, _scopes: &[ScopePath]) -> Result<(), Error> {
		Ok(())
	}

	/// Returns the number of keys stored in the given scope.
	fn key_count(&self, scope: &ScopePath) -> Result<u64, Error>;

	/// Returns the sequence counter of the given scope, zero if it was never set.
	fn sequence(&self, scope: &ScopePath) -> Result<u64, Error>;
}

/// A read-write transaction over the backend.
///
/// Changes become visible to other transactions only once [`commit`] returns successfully.
/// Dropping the transaction without committing rolls every change back.
///
/// [`commit`]: Self::commit
pub trait WriteTxn: ReadTxn {
	/// Creates the given scope and any missing ancestors. Creating an existing scope is a
	/// no-op.
	fn create_scope(&mut self, scope: &ScopePath) -> Result<(), Error>;

	/// Stores a value under the given key, replacing any previous value.
	fn put(&mut self, scope: &ScopePath, key: &[u8], value: &[u8]) -> Result<(), Error>;

	/// Removes the value stored under the given key. Removing an absent key is a no-op.
	fn delete(&mut self, scope: &ScopePath, key: &[u8]) -> Result<(), Error>;

	/// Removes the given scope, its keys, and all scopes nested under it. Removing an
	/// absent scope is a no-op.
	fn delete_scope(&mut self, scope: &ScopePath) -> Result<(), Error>;

	/// Sets the sequence counter of the given scope.
	fn set_sequence(&mut self, scope: &ScopePath, sequence: u64) -> Result<(), Error>;

	/// Atomically publishes all changes made within the transaction.
	fn commit(self) -> Result<(), Error>;
}

/// An embedded transactional backend the payment store persists to.
///
/// Implementations must provide serializable isolation: committed transactions behave as if
/// they executed one after another.
pub trait TxnStore: Send + Sync {
	/// The backend's read-only transaction type.
	type ReadTxn<'a>: ReadTxn
	where
		Self: 'a;
	/// The backend's read-write transaction type.
	type WriteTxn<'a>: WriteTxn
	where
		Self: 'a;

	/// Opens a read-only transaction.
	fn read_txn(&self) -> Result<Self::ReadTxn<'_>, Error>;

	/// Opens a read-write transaction.
	fn write_txn(&self) -> Result<Self::WriteTxn<'_>, Error>;
}

/// Runs the given closure inside a read-only transaction.
pub(crate) fn view<'a, K: TxnStore, T, F>(store: &'a K, f: F) -> Result<T, Error>
where
	F: FnOnce(&K::ReadTxn<'a>) -> Result<T, Error>,
{
	let txn = store.read_txn()?;
	f(&txn)
}

/// Runs the given closure inside a read-write transaction, committing on success and
/// rolling back on error.
///
/// When the backend reports a transaction conflict the closure is re-run once on a fresh
/// transaction before the conflict is surfaced to the caller. The closure must therefore
/// derive all of its state from the transaction it is handed.
pub(crate) fn update<'a, K: TxnStore, T, F>(store: &'a K, f: F) -> Result<T, Error>
where
	F: Fn(&mut K::WriteTxn<'a>) -> Result<T, Error>,
{
	match run_update(store, &f) {
		Err(Error::StoreConflict) => run_update(store, &f),
		res => res,
	}
}

fn run_update<'a, K: TxnStore, T, F>(store: &'a K, f: &F) -> Result<T, Error>
where
	F: Fn(&mut K::WriteTxn<'a>) -> Result<T, Error>,
{
	let mut txn = store.write_txn()?;
	match f(&mut txn) {
		Ok(value) => {
			txn.commit()?;
			Ok(value)
		},
		Err(e) => Err(e),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scope_paths_encode_with_length_prefixes() {
		let path = ScopePath::top(b"payments").child(&[0xaa; 32]);
		let encoded = path.encode();
		assert_eq!(&encoded[..2], &[0, 8]);
		assert_eq!(&encoded[2..10], b"payments");
		assert_eq!(&encoded[10..12], &[0, 32]);
		assert_eq!(ScopePath::decode(&encoded), Some(path));
	}

	#[test]
	fn ancestor_encodings_are_prefixes() {
		let parent = ScopePath::top(b"payments");
		let child = parent.child(&[0xaa; 32]).child(b"htlcs");
		assert!(child.encode().starts_with(&parent.encode()));
		// Sibling top-level scopes don't prefix each other.
		let other = ScopePath::top(b"payments-index");
		assert!(!other.encode().starts_with(&parent.encode()));
	}

	#[test]
	fn truncated_path_encodings_are_rejected() {
		let encoded = ScopePath::top(b"payments").encode();
		assert_eq!(ScopePath::decode(&encoded[..encoded.len() - 1]), None);
		assert_eq!(ScopePath::decode(&[]), None);
	}
}
