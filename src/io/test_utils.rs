// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

use crate::error::Error;
use crate::io::{ReadTxn, ScopePath, TxnStore, WriteTxn};

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use std::collections::BTreeMap;
use std::ops::Bound;
use std::ops::Bound::{Excluded, Unbounded};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

pub(crate) fn random_storage_path() -> PathBuf {
	let mut temp_path = std::env::temp_dir();
	let mut rng = thread_rng();
	let rand_dir: String = (0..7).map(|_| rng.sample(Alphanumeric) as char).collect();
	temp_path.push(rand_dir);
	temp_path
}

/// An in-memory [`TxnStore`] with snapshot readers and mutex-serialized writers.
#[derive(Default)]
pub(crate) struct TestStore {
	data: Mutex<StoreData>,
}

impl TestStore {
	pub(crate) fn new() -> Self {
		Self::default()
	}
}

#[derive(Clone, Default)]
struct StoreData {
	// Encoded scope path -> key -> value.
	entries: BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>,
	// Encoded scope path -> sequence counter.
	scopes: BTreeMap<Vec<u8>, u64>,
}

impl TxnStore for TestStore {
	type ReadTxn<'a> = TestReadTxn where Self: 'a;
	type WriteTxn<'a> = TestWriteTxn<'a> where Self: 'a;

	fn read_txn(&self) -> Result<Self::ReadTxn<'_>, Error> {
		Ok(TestReadTxn { snapshot: self.data.lock().unwrap().clone() })
	}

	fn write_txn(&self) -> Result<Self::WriteTxn<'_>, Error> {
		let guard = self.data.lock().unwrap();
		let staged = guard.clone();
		Ok(TestWriteTxn { guard, staged })
	}
}

pub(crate) struct TestReadTxn {
	snapshot: StoreData,
}

pub(crate) struct TestWriteTxn<'a> {
	guard: MutexGuard<'a, StoreData>,
	staged: StoreData,
}

fn get(data: &StoreData, scope: &ScopePath, key: &[u8]) -> Option<Vec<u8>> {
	data.entries.get(&scope.encode()).and_then(|entries| entries.get(key)).cloned()
}

fn for_each_key_from(
	data: &StoreData, scope: &ScopePath, start: Option<&[u8]>, reverse: bool,
	f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, Error>,
) -> Result<(), Error> {
	let entries = match data.entries.get(&scope.encode()) {
		Some(entries) => entries,
		None => return Ok(()),
	};
	let range = match (start, reverse) {
		(Some(start), false) => entries.range((Excluded(start.to_vec()), Unbounded)),
		(Some(start), true) => entries.range((Unbounded, Excluded(start.to_vec()))),
		(None, _) => entries.range::<Vec<u8>, (Bound<Vec<u8>>, Bound<Vec<u8>>)>((Unbounded, Unbounded)),
	};
	if reverse {
		for (key, value) in range.rev() {
			if !f(key, value)? {
				return Ok(());
			}
		}
	} else {
		for (key, value) in range {
			if !f(key, value)? {
				return Ok(());
			}
		}
	}
	Ok(())
}

fn for_each_child_scope(
	data: &StoreData, scope: &ScopePath, f: &mut dyn FnMut(&[u8]) -> Result<bool, Error>,
) -> Result<(), Error> {
	let prefix = scope.encode();
	let depth = scope.segments().len();
	for encoded in data.scopes.keys() {
		if encoded.len() <= prefix.len() || !encoded.starts_with(&prefix) {
			continue;
		}
		let path = match ScopePath::decode(encoded) {
			Some(path) => path,
			None => continue,
		};
		let name = match path.segments().last() {
			Some(name) if path.segments().len() == depth + 1 => name.clone(),
			_ => continue,
		};
		if !f(&name)? {
			return Ok(());
		}
	}
	Ok(())
}

macro_rules! impl_test_read_txn {
	($target: ty, $data: ident) => {
		impl ReadTxn for $target {
			fn get(&self, scope: &ScopePath, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
				Ok(get(&self.$data, scope, key))
			}

			fn scope_exists(&self, scope: &ScopePath) -> Result<bool, Error> {
				Ok(self.$data.scopes.contains_key(&scope.encode()))
			}

			fn for_each_key_from(
				&self, scope: &ScopePath, start: Option<&[u8]>, reverse: bool,
				f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, Error>,
			) -> Result<(), Error> {
				for_each_key_from(&self.$data, scope, start, reverse, f)
			}

			fn for_each_child_scope(
				&self, scope: &ScopePath, f: &mut dyn FnMut(&[u8]) -> Result<bool, Error>,
			) -> Result<(), Error> {
				for_each_child_scope(&self.$data, scope, f)
			}

			fn key_count(&self, scope: &ScopePath) -> Result<u64, Error> {
				Ok(self
					.$data
					.entries
					.get(&scope.encode())
					.map(|entries| entries.len() as u64)
					.unwrap_or(0))
			}

			fn sequence(&self, scope: &ScopePath) -> Result<u64, Error> {
				Ok(self.$data.scopes.get(&scope.encode()).copied().unwrap_or(0))
			}
		}
	};
}

impl_test_read_txn!(TestReadTxn, snapshot);
impl_test_read_txn!(TestWriteTxn<'_>, staged);

impl WriteTxn for TestWriteTxn<'_> {
	fn create_scope(&mut self, scope: &ScopePath) -> Result<(), Error> {
		let mut path: Option<ScopePath> = None;
		for segment in scope.segments() {
			let next = match path {
				Some(parent) => parent.child(segment),
				None => ScopePath::top(segment),
			};
			self.staged.scopes.entry(next.encode()).or_insert(0);
			path = Some(next);
		}
		Ok(())
	}

	fn put(&mut self, scope: &ScopePath, key: &[u8], value: &[u8]) -> Result<(), Error> {
		self.staged.entries.entry(scope.encode()).or_default().insert(key.to_vec(), value.to_vec());
		Ok(())
	}

	fn delete(&mut self, scope: &ScopePath, key: &[u8]) -> Result<(), Error> {
		if let Some(entries) = self.staged.entries.get_mut(&scope.encode()) {
			entries.remove(key);
		}
		Ok(())
	}

	fn delete_scope(&mut self, scope: &ScopePath) -> Result<(), Error> {
		let prefix = scope.encode();
		self.staged.entries.retain(|encoded, _| !encoded.starts_with(&prefix));
		self.staged.scopes.retain(|encoded, _| !encoded.starts_with(&prefix));
		Ok(())
	}

	fn set_sequence(&mut self, scope: &ScopePath, sequence: u64) -> Result<(), Error> {
		self.staged.scopes.insert(scope.encode(), sequence);
		Ok(())
	}

	fn commit(self) -> Result<(), Error> {
		let mut guard = self.guard;
		*guard = self.staged;
		Ok(())
	}
}

// Exercises the scope and key semantics every `TxnStore` backend must provide.
pub(crate) fn do_txn_store_scope_operations<K: TxnStore>(store: &K) {
	let scope = ScopePath::top(b"testspace");
	let nested = scope.child(b"testsubspace");

	// Reads before any writes see an empty store.
	{
		let txn = store.read_txn().unwrap();
		assert_eq!(txn.get(&scope, b"testkey").unwrap(), None);
		assert!(!txn.scope_exists(&scope).unwrap());
		assert_eq!(txn.key_count(&scope).unwrap(), 0);
		assert_eq!(txn.sequence(&scope).unwrap(), 0);
	}

	// Basic put/get and nested scope creation.
	{
		let mut txn = store.write_txn().unwrap();
		txn.create_scope(&nested).unwrap();
		txn.put(&scope, b"testkey", b"testvalue").unwrap();
		txn.put(&nested, b"nestedkey", b"nestedvalue").unwrap();
		txn.set_sequence(&scope, 42).unwrap();
		txn.commit().unwrap();
	}
	{
		let txn = store.read_txn().unwrap();
		// Creating the nested scope created its ancestor, too.
		assert!(txn.scope_exists(&scope).unwrap());
		assert!(txn.scope_exists(&nested).unwrap());
		assert_eq!(txn.get(&scope, b"testkey").unwrap(), Some(b"testvalue".to_vec()));
		assert_eq!(txn.get(&nested, b"nestedkey").unwrap(), Some(b"nestedvalue".to_vec()));
		assert_eq!(txn.key_count(&scope).unwrap(), 1);
		assert_eq!(txn.sequence(&scope).unwrap(), 42);

		let mut children = Vec::new();
		txn.for_each_child_scope(&scope, &mut |name| {
			children.push(name.to_vec());
			Ok(true)
		})
		.unwrap();
		assert_eq!(children, vec![b"testsubspace".to_vec()]);
	}

	// Ordered iteration with cursors in both directions.
	{
		let mut txn = store.write_txn().unwrap();
		for i in [3u8, 1, 2] {
			txn.put(&nested, &[i], &[i]).unwrap();
		}
		txn.commit().unwrap();
	}
	{
		let txn = store.read_txn().unwrap();
		let collect = |start: Option<&[u8]>, reverse: bool| {
			let mut keys = Vec::new();
			txn.for_each_key_from(&nested, start, reverse, &mut |key, _| {
				keys.push(key.to_vec());
				Ok(true)
			})
			.unwrap();
			keys
		};
		assert_eq!(collect(None, false), vec![vec![1], vec![2], vec![3], b"nestedkey".to_vec()]);
		assert_eq!(collect(Some(&[1]), false), vec![vec![2], vec![3], b"nestedkey".to_vec()]);
		assert_eq!(collect(None, true), vec![b"nestedkey".to_vec(), vec![3], vec![2], vec![1]]);
		assert_eq!(collect(Some(&[3]), true), vec![vec![2], vec![1]]);

		// Early termination is honored.
		let mut seen = 0;
		txn.for_each_key(&nested, &mut |_, _| {
			seen += 1;
			Ok(seen < 2)
		})
		.unwrap();
		assert_eq!(seen, 2);
	}

	// Uncommitted transactions leave no trace.
	{
		let mut txn = store.write_txn().unwrap();
		txn.put(&scope, b"uncommitted", b"value").unwrap();
		txn.delete(&scope, b"testkey").unwrap();
		drop(txn);
	}
	{
		let txn = store.read_txn().unwrap();
		assert_eq!(txn.get(&scope, b"uncommitted").unwrap(), None);
		assert_eq!(txn.get(&scope, b"testkey").unwrap(), Some(b"testvalue".to_vec()));
	}

	// Deleting a scope removes its keys and nested scopes, but not its siblings.
	{
		let sibling = ScopePath::top(b"siblingspace");
		let mut txn = store.write_txn().unwrap();
		txn.create_scope(&sibling).unwrap();
		txn.put(&sibling, b"siblingkey", b"siblingvalue").unwrap();
		txn.delete_scope(&scope).unwrap();
		txn.commit().unwrap();
	}
	{
		let txn = store.read_txn().unwrap();
		assert!(!txn.scope_exists(&scope).unwrap());
		assert!(!txn.scope_exists(&nested).unwrap());
		assert_eq!(txn.get(&scope, b"testkey").unwrap(), None);
		assert_eq!(txn.get(&nested, b"nestedkey").unwrap(), None);
		assert_eq!(
			txn.get(&ScopePath::top(b"siblingspace"), b"siblingkey").unwrap(),
			Some(b"siblingvalue".to_vec())
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn read_write_scope_operations() {
		let store = TestStore::new();
		do_txn_store_scope_operations(&store);
	}

	#[test]
	fn readers_see_a_snapshot() {
		let store = TestStore::new();
		let scope = ScopePath::top(b"testspace");
		{
			let mut txn = store.write_txn().unwrap();
			txn.create_scope(&scope).unwrap();
			txn.put(&scope, b"testkey", b"old").unwrap();
			txn.commit().unwrap();
		}

		let reader = store.read_txn().unwrap();
		{
			let mut txn = store.write_txn().unwrap();
			txn.put(&scope, b"testkey", b"new").unwrap();
			txn.commit().unwrap();
		}

		// The earlier reader still observes the pre-write state.
		assert_eq!(reader.get(&scope, b"testkey").unwrap(), Some(b"old".to_vec()));
		let reader = store.read_txn().unwrap();
		assert_eq!(reader.get(&scope, b"testkey").unwrap(), Some(b"new".to_vec()));
	}
}
