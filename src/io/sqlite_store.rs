// This file is Copyright its original authors, visible in version control history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. You may not use this file except in
// accordance with one or both of these licenses.

//! Objects related to [`SqliteStore`] live here.

use crate::error::Error;
use crate::io::{ReadTxn, ScopePath, TxnStore, WriteTxn};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// The schema version persisted via `PRAGMA user_version`.
const SCHEMA_USER_VERSION: i32 = 1;

/// How long a transaction waits on a locked database before reporting a conflict.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A [`TxnStore`] backed by an embedded SQLite database.
///
/// Scopes are persisted as length-prefix-encoded paths, so a scope's rows always sort
/// directly before the rows of the scopes nested under it. A single connection serializes
/// all transactions; lock contention reported by SQLite surfaces as
/// [`Error::StoreConflict`].
pub struct SqliteStore {
	connection: Mutex<Connection>,
}

impl SqliteStore {
	/// Opens the database at the given path, creating file and schema if needed.
	pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
		let connection = Connection::open(path).map_err(|e| {
			log::error!("Failed to open SQLite database: {}", e);
			Error::StoreIo
		})?;
		connection.busy_timeout(BUSY_TIMEOUT).map_err(map_sqlite_error)?;
		// The journal-mode pragma returns the newly set mode as a result row.
		connection
			.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
			.map_err(map_sqlite_error)?;
		connection
			.execute_batch(
				"CREATE TABLE IF NOT EXISTS kv_entries (
					scope BLOB NOT NULL,
					key BLOB NOT NULL,
					value BLOB NOT NULL,
					PRIMARY KEY (scope, key)
				);
				CREATE TABLE IF NOT EXISTS kv_scopes (
					scope BLOB NOT NULL PRIMARY KEY,
					sequence INTEGER NOT NULL DEFAULT 0
				);",
			)
			.map_err(|e| {
				log::error!("Failed to set up SQLite schema: {}", e);
				Error::StoreIo
			})?;
		connection
			.pragma_update(None, "user_version", SCHEMA_USER_VERSION)
			.map_err(map_sqlite_error)?;
		Ok(Self { connection: Mutex::new(connection) })
	}

	fn begin(&self, stmt: &str) -> Result<SqliteTxn<'_>, Error> {
		let connection = self.connection.lock().unwrap();
		connection.execute_batch(stmt).map_err(map_sqlite_error)?;
		Ok(SqliteTxn { connection, open: true })
	}
}

impl TxnStore for SqliteStore {
	type ReadTxn<'a> = SqliteTxn<'a> where Self: 'a;
	type WriteTxn<'a> = SqliteTxn<'a> where Self: 'a;

	fn read_txn(&self) -> Result<Self::ReadTxn<'_>, Error> {
		self.begin("BEGIN DEFERRED")
	}

	fn write_txn(&self) -> Result<Self::WriteTxn<'_>, Error> {
		self.begin("BEGIN IMMEDIATE")
	}
}

/// A transaction over a [`SqliteStore`].
///
/// Dropping the transaction without committing rolls it back.
pub struct SqliteTxn<'a> {
	connection: MutexGuard<'a, Connection>,
	open: bool,
}

fn map_sqlite_error(e: rusqlite::Error) -> Error {
	match e {
		rusqlite::Error::SqliteFailure(ffi_error, _)
			if ffi_error.code == ErrorCode::DatabaseBusy
				|| ffi_error.code == ErrorCode::DatabaseLocked =>
		{
			Error::StoreConflict
		},
		e => {
			log::error!("SQLite operation failed: {}", e);
			Error::StoreIo
		},
	}
}

impl ReadTxn for SqliteTxn<'_> {
	fn get(&self, scope: &ScopePath, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
		let mut stmt = self
			.connection
			.prepare_cached("SELECT value FROM kv_entries WHERE scope = ?1 AND key = ?2")
			.map_err(map_sqlite_error)?;
		stmt.query_row(params![scope.encode(), key], |row| row.get::<_, Vec<u8>>(0))
			.optional()
			.map_err(map_sqlite_error)
	}

	fn scope_exists(&self, scope: &ScopePath) -> Result<bool, Error> {
		let mut stmt = self
			.connection
			.prepare_cached("SELECT 1 FROM kv_scopes WHERE scope = ?1")
			.map_err(map_sqlite_error)?;
		stmt.query_row(params![scope.encode()], |_| Ok(()))
			.optional()
			.map(|row| row.is_some())
			.map_err(map_sqlite_error)
	}

	fn for_each_key_from(
		&self, scope: &ScopePath, start: Option<&[u8]>, reverse: bool,
		f: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool, Error>,
	) -> Result<(), Error> {
		let sql = match (start.is_some(), reverse) {
			(false, false) => "SELECT key, value FROM kv_entries WHERE scope = ?1 ORDER BY key ASC",
			(false, true) => "SELECT key, value FROM kv_entries WHERE scope = ?1 ORDER BY key DESC",
			(true, false) => {
				"SELECT key, value FROM kv_entries WHERE scope = ?1 AND key > ?2 ORDER BY key ASC"
			},
			(true, true) => {
				"SELECT key, value FROM kv_entries WHERE scope = ?1 AND key < ?2 ORDER BY key DESC"
			},
		};
		let mut stmt = self.connection.prepare_cached(sql).map_err(map_sqlite_error)?;
		let scope_blob = scope.encode();
		let mut rows = match start {
			Some(start) => stmt.query(params![scope_blob, start]),
			None => stmt.query(params![scope_blob]),
		}
		.map_err(map_sqlite_error)?;
		while let Some(row) = rows.next().map_err(map_sqlite_error)? {
			let key: Vec<u8> = row.get(0).map_err(map_sqlite_error)?;
			let value: Vec<u8> = row.get(1).map_err(map_sqlite_error)?;
			if !f(&key, &value)? {
				break;
			}
		}
		Ok(())
	}

	fn for_each_child_scope(
		&self, scope: &ScopePath, f: &mut dyn FnMut(&[u8]) -> Result<bool, Error>,
	) -> Result<(), Error> {
		let mut stmt = self
			.connection
			.prepare_cached(
				"SELECT scope FROM kv_scopes
				WHERE length(scope) > ?2 AND substr(scope, 1, ?2) = ?1
				ORDER BY scope ASC",
			)
			.map_err(map_sqlite_error)?;
		let prefix = scope.encode();
		let depth = scope.segments().len();
		let mut rows =
			stmt.query(params![prefix, prefix.len() as i64]).map_err(map_sqlite_error)?;
		while let Some(row) = rows.next().map_err(map_sqlite_error)? {
			let encoded: Vec<u8> = row.get(0).map_err(map_sqlite_error)?;
			let path = match ScopePath::decode(&encoded) {
				Some(path) => path,
				None => {
					log::error!("Failed to decode a persisted scope path");
					return Err(Error::StoreIo);
				},
			};
			// Skip grandchildren; only direct children are reported.
			let name = match path.segments().last() {
				Some(name) if path.segments().len() == depth + 1 => name.clone(),
				_ => continue,
			};
			if !f(&name)? {
				break;
			}
		}
		Ok(())
	}

	fn key_count(&self, scope: &ScopePath) -> Result<u64, Error> {
		let mut stmt = self
			.connection
			.prepare_cached("SELECT COUNT(*) FROM kv_entries WHERE scope = ?1")
			.map_err(map_sqlite_error)?;
		stmt.query_row(params![scope.encode()], |row| row.get::<_, i64>(0))
			.map(|count| count as u64)
			.map_err(map_sqlite_error)
	}

	fn sequence(&self, scope: &ScopePath) -> Result<u64, Error> {
		let mut stmt = self
			.connection
			.prepare_cached("SELECT sequence FROM kv_scopes WHERE scope = ?1")
			.map_err(map_sqlite_error)?;
		stmt.query_row(params![scope.encode()], |row| row.get::<_, i64>(0))
			.optional()
			.map(|sequence| sequence.unwrap_or(0) as u64)
			.map_err(map_sqlite_error)
	}
}

impl WriteTxn for SqliteTxn<'_> {
	fn create_scope(&mut self, scope: &ScopePath) -> Result<(), Error> {
		let mut stmt = self
			.connection
			.prepare_cached(
				"INSERT INTO kv_scopes (scope, sequence) VALUES (?1, 0)
				ON CONFLICT (scope) DO NOTHING",
			)
			.map_err(map_sqlite_error)?;
		let mut path: Option<ScopePath> = None;
		for segment in scope.segments() {
			let next = match path {
				Some(parent) => parent.child(segment),
				None => ScopePath::top(segment),
			};
			stmt.execute(params![next.encode()]).map_err(map_sqlite_error)?;
			path = Some(next);
		}
		Ok(())
	}

	fn put(&mut self, scope: &ScopePath, key: &[u8], value: &[u8]) -> Result<(), Error> {
		let mut stmt = self
			.connection
			.prepare_cached(
				"INSERT INTO kv_entries (scope, key, value) VALUES (?1, ?2, ?3)
				ON CONFLICT (scope, key) DO UPDATE SET value = excluded.value",
			)
			.map_err(map_sqlite_error)?;
		stmt.execute(params![scope.encode(), key, value]).map_err(map_sqlite_error)?;
		Ok(())
	}

	fn delete(&mut self, scope: &ScopePath, key: &[u8]) -> Result<(), Error> {
		let mut stmt = self
			.connection
			.prepare_cached("DELETE FROM kv_entries WHERE scope = ?1 AND key = ?2")
			.map_err(map_sqlite_error)?;
		stmt.execute(params![scope.encode(), key]).map_err(map_sqlite_error)?;
		Ok(())
	}

	fn delete_scope(&mut self, scope: &ScopePath) -> Result<(), Error> {
		let prefix = scope.encode();
		for table in ["kv_entries", "kv_scopes"] {
			let sql = format!(
				"DELETE FROM {} WHERE scope = ?1
				OR (length(scope) > ?2 AND substr(scope, 1, ?2) = ?1)",
				table
			);
			let mut stmt = self.connection.prepare_cached(&sql).map_err(map_sqlite_error)?;
			stmt.execute(params![prefix, prefix.len() as i64]).map_err(map_sqlite_error)?;
		}
		Ok(())
	}

	fn set_sequence(&mut self, scope: &ScopePath, sequence: u64) -> Result<(), Error> {
		let mut stmt = self
			.connection
			.prepare_cached(
				"INSERT INTO kv_scopes (scope, sequence) VALUES (?1, ?2)
				ON CONFLICT (scope) DO UPDATE SET sequence = excluded.sequence",
			)
			.map_err(map_sqlite_error)?;
		stmt.execute(params![scope.encode(), sequence as i64]).map_err(map_sqlite_error)?;
		Ok(())
	}

	fn commit(mut self) -> Result<(), Error> {
		self.open = false;
		match self.connection.execute_batch("COMMIT") {
			Ok(()) => Ok(()),
			Err(e) => {
				let _ = self.connection.execute_batch("ROLLBACK");
				Err(map_sqlite_error(e))
			},
		}
	}
}

impl Drop for SqliteTxn<'_> {
	fn drop(&mut self) {
		if self.open {
			let _ = self.connection.execute_batch("ROLLBACK");
		}
	}
}
