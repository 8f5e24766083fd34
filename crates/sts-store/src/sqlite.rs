//! [`Store`] implementation backed by a single SQLite connection.
//!
//! One connection, one [`Mutex`], matching the single-writer deployment model.
//! `rusqlite`'s `bundled` feature means no system SQLite is required.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use alloy_primitives::{Address, B256};
use rusqlite::{Connection, OptionalExtension, Row, params};
use sts_types::{ChecksumAddress, Network, Sign, SignedU256, UnixTimestamp};

use crate::error::StoreError;
use crate::models::{
    BroadcastAccount, BroadcastAccountId, DeltaSum, HolderAccount, HolderAccountId,
    NewHolderDelta, NewPreparedTransaction, PreparedTransaction, PreparedTransactionId,
    TokenMetadata, TokenScanStatus, TokenScanStatusId, sign_to_i64,
};
use crate::store::Store;

const MIGRATION_0001: &str = include_str!("migrations/0001_init.sql");

/// Schema version this build expects. Bumped alongside new files under `migrations/`.
pub const SCHEMA_VERSION: i64 = 1;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection mutex poisoned")
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
        return Ok(());
    }
    conn.execute_batch(MIGRATION_0001)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

// -- column (de)serialization helpers --------------------------------------------------------

fn addr_text(addr: Address) -> String {
    ChecksumAddress(addr).to_string()
}

fn opt_addr_text(addr: Option<ChecksumAddress>) -> Option<String> {
    addr.map(|a| a.to_string())
}

fn opt_parse_addr(s: Option<String>) -> Option<ChecksumAddress> {
    s.and_then(|s| ChecksumAddress::from_str(&s).ok())
}

fn b256_text(hash: B256) -> String {
    format!("{hash:#x}")
}

fn parse_b256(s: &str) -> B256 {
    B256::from_str(s).unwrap_or_default()
}

fn opt_parse_b256(s: Option<String>) -> Option<B256> {
    s.map(|s| parse_b256(&s))
}

fn ts_secs(ts: UnixTimestamp) -> i64 {
    ts.as_secs() as i64
}

fn opt_ts_secs(ts: Option<UnixTimestamp>) -> Option<i64> {
    ts.map(ts_secs)
}

fn parse_ts(secs: i64) -> UnixTimestamp {
    UnixTimestamp::from_secs(secs as u64)
}

fn opt_parse_ts(secs: Option<i64>) -> Option<UnixTimestamp> {
    secs.map(parse_ts)
}

fn signed_blob(value: SignedU256) -> Vec<u8> {
    value.to_storage_bytes().to_vec()
}

fn parse_signed(blob: &[u8]) -> SignedU256 {
    let mut bytes = [0u8; 33];
    let n = blob.len().min(33);
    bytes[..n].copy_from_slice(&blob[..n]);
    SignedU256::from_storage_bytes(&bytes)
}

fn opt_parse_signed(blob: Option<Vec<u8>>) -> Option<SignedU256> {
    blob.map(|b| parse_signed(&b))
}

// -- row -> model mapping ---------------------------------------------------------------------

fn row_to_broadcast_account(row: &Row) -> rusqlite::Result<BroadcastAccount> {
    let network: String = row.get("network")?;
    let address: String = row.get("address")?;
    Ok(BroadcastAccount {
        id: BroadcastAccountId(row.get("id")?),
        network: Network::from_str(&network).unwrap_or_else(|e| match e {}),
        address: ChecksumAddress::from_str(&address).unwrap_or(ChecksumAddress::NULL),
        current_nonce: row.get::<_, i64>("current_nonce")? as u64,
    })
}

fn row_to_prepared_transaction(row: &Row) -> rusqlite::Result<PreparedTransaction> {
    Ok(PreparedTransaction {
        id: PreparedTransactionId(row.get("id")?),
        account_id: BroadcastAccountId(row.get("account_id")?),
        nonce: row.get::<_, i64>("nonce")? as u64,
        contract_deployment: row.get::<_, i64>("contract_deployment")? != 0,
        receiver: opt_parse_addr(row.get("receiver")?),
        contract_address: opt_parse_addr(row.get("contract_address")?),
        unsigned_payload: row.get("unsigned_payload")?,
        external_id: row.get("external_id")?,
        note: row.get("note")?,
        txid: opt_parse_b256(row.get("txid")?),
        broadcasted_at: opt_parse_ts(row.get("broadcasted_at")?),
        result_block: row.get::<_, Option<i64>>("result_block")?.map(|v| v as u64),
        result_success: row
            .get::<_, Option<i64>>("result_success")?
            .map(|v| v != 0),
        result_fetched_at: opt_parse_ts(row.get("result_fetched_at")?),
        verified_at: opt_parse_ts(row.get("verified_at")?),
        other_data: row.get("other_data")?,
    })
}

fn row_to_scan_status(row: &Row) -> rusqlite::Result<TokenScanStatus> {
    let network: String = row.get("network")?;
    let token_address: String = row.get("token_address")?;
    Ok(TokenScanStatus {
        id: TokenScanStatusId(row.get("id")?),
        network: Network::from_str(&network).unwrap_or_else(|e| match e {}),
        token_address: ChecksumAddress::from_str(&token_address).unwrap_or(ChecksumAddress::NULL),
        start_block: row.get::<_, Option<i64>>("start_block")?.map(|v| v as u64),
        end_block: row.get::<_, Option<i64>>("end_block")?.map(|v| v as u64),
        end_block_timestamp: opt_parse_ts(row.get("end_block_timestamp")?),
        token_name: row.get("token_name")?,
        token_symbol: row.get("token_symbol")?,
        token_decimals: row
            .get::<_, Option<i64>>("token_decimals")?
            .map(|v| v as u8),
        total_supply: opt_parse_signed(row.get("total_supply")?),
    })
}

fn row_to_holder_account(row: &Row) -> rusqlite::Result<HolderAccount> {
    let address: String = row.get("address")?;
    let balance: Vec<u8> = row.get("balance")?;
    Ok(HolderAccount {
        id: HolderAccountId(row.get("id")?),
        scan_status_id: TokenScanStatusId(row.get("scan_status_id")?),
        address: ChecksumAddress::from_str(&address).unwrap_or(ChecksumAddress::NULL),
        balance: parse_signed(&balance),
        sortable_balance: row.get::<_, i64>("sortable_balance")? as i128,
        empty: row.get::<_, i64>("empty")? != 0,
        balance_calculated_at: opt_parse_ts(row.get("balance_calculated_at")?),
        last_block: row.get::<_, Option<i64>>("last_block")?.map(|v| v as u64),
        last_block_at: opt_parse_ts(row.get("last_block_at")?),
    })
}

impl Store for SqliteStore {
    fn get_or_create_broadcast_account(
        &self,
        network: &Network,
        address: Address,
    ) -> Result<BroadcastAccount, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO broadcast_account (network, address, current_nonce)
             VALUES (?1, ?2, 0)
             ON CONFLICT (network, address) DO NOTHING",
            params![network.to_string(), addr_text(address)],
        )?;
        conn.query_row(
            "SELECT * FROM broadcast_account WHERE network = ?1 AND address = ?2",
            params![network.to_string(), addr_text(address)],
            row_to_broadcast_account,
        )
        .map_err(StoreError::from)
    }

    fn allocate_prepared_transaction(
        &self,
        account_id: BroadcastAccountId,
        new_tx: NewPreparedTransaction,
    ) -> Result<PreparedTransaction, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let current_nonce: i64 = tx.query_row(
            "SELECT current_nonce FROM broadcast_account WHERE id = ?1",
            params![account_id.0],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO prepared_transaction
                (account_id, nonce, contract_deployment, receiver, contract_address,
                 unsigned_payload, external_id, note, other_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                account_id.0,
                current_nonce,
                new_tx.contract_deployment as i64,
                opt_addr_text(new_tx.receiver),
                opt_addr_text(new_tx.contract_address),
                new_tx.unsigned_payload,
                new_tx.external_id,
                new_tx.note,
                new_tx.other_data,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::AlreadyDistributed
            }
            other => StoreError::Sqlite(other),
        })?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE broadcast_account SET current_nonce = current_nonce + 1 WHERE id = ?1",
            params![account_id.0],
        )?;

        let row = tx.query_row(
            "SELECT * FROM prepared_transaction WHERE id = ?1",
            params![id],
            row_to_prepared_transaction,
        )?;
        tx.commit()?;
        Ok(row)
    }

    fn restart_nonce(
        &self,
        account_id: BroadcastAccountId,
        new_current_nonce: u64,
    ) -> Result<Vec<PreparedTransaction>, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut queued: Vec<PreparedTransaction> = {
            let mut stmt = tx.prepare(
                "SELECT * FROM prepared_transaction
                 WHERE account_id = ?1 AND broadcasted_at IS NULL
                 ORDER BY nonce ASC",
            )?;
            stmt.query_map(params![account_id.0], row_to_prepared_transaction)?
                .collect::<Result<_, _>>()?
        };

        // Clear the queued rows' nonces first so the rewrite below can't collide with
        // the UNIQUE(account_id, nonce) constraint on overlapping ranges.
        for row in &queued {
            tx.execute(
                "UPDATE prepared_transaction SET nonce = -1 - ?2 WHERE id = ?1",
                params![row.id.0, row.nonce as i64],
            )?;
        }

        for (offset, row) in queued.iter_mut().enumerate() {
            let nonce = new_current_nonce + offset as u64;
            tx.execute(
                "UPDATE prepared_transaction SET nonce = ?2 WHERE id = ?1",
                params![row.id.0, nonce as i64],
            )?;
            row.nonce = nonce;
        }

        tx.execute(
            "UPDATE broadcast_account SET current_nonce = ?2 WHERE id = ?1",
            params![account_id.0, (new_current_nonce + queued.len() as u64) as i64],
        )?;

        tx.commit()?;
        Ok(queued)
    }

    fn update_prepared_transaction_payload(
        &self,
        id: PreparedTransactionId,
        contract_address: Option<ChecksumAddress>,
        unsigned_payload: Vec<u8>,
        other_data: Option<String>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE prepared_transaction
             SET contract_address = ?2, unsigned_payload = ?3, other_data = ?4
             WHERE id = ?1",
            params![id.0, opt_addr_text(contract_address), unsigned_payload, other_data],
        )?;
        if changed == 0 {
            return Err(StoreError::TransactionNotFound(id));
        }
        Ok(())
    }

    fn find_prepared_transaction_by_external_id(
        &self,
        external_id: &str,
        contract_address: Address,
    ) -> Result<Option<PreparedTransaction>, StoreError> {
        self.conn()
            .query_row(
                "SELECT * FROM prepared_transaction
                 WHERE external_id = ?1 AND contract_address = ?2",
                params![external_id, addr_text(contract_address)],
                row_to_prepared_transaction,
            )
            .optional()
            .map_err(StoreError::from)
    }

    fn get_prepared_transaction(
        &self,
        id: PreparedTransactionId,
    ) -> Result<PreparedTransaction, StoreError> {
        self.conn()
            .query_row(
                "SELECT * FROM prepared_transaction WHERE id = ?1",
                params![id.0],
                row_to_prepared_transaction,
            )
            .optional()?
            .ok_or(StoreError::TransactionNotFound(id))
    }

    fn get_pending_broadcasts(
        &self,
        account_id: BroadcastAccountId,
    ) -> Result<Vec<PreparedTransaction>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM prepared_transaction
             WHERE account_id = ?1 AND broadcasted_at IS NULL
             ORDER BY nonce ASC",
        )?;
        let rows = stmt
            .query_map(params![account_id.0], row_to_prepared_transaction)?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    fn get_unmined_txs(
        &self,
        account_id: BroadcastAccountId,
    ) -> Result<Vec<PreparedTransaction>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM prepared_transaction
             WHERE account_id = ?1 AND broadcasted_at IS NOT NULL AND result_fetched_at IS NULL
             ORDER BY nonce ASC",
        )?;
        let rows = stmt
            .query_map(params![account_id.0], row_to_prepared_transaction)?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    fn get_last_transactions(
        &self,
        account_id: BroadcastAccountId,
        limit: u32,
    ) -> Result<Vec<PreparedTransaction>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM prepared_transaction
             WHERE account_id = ?1
             ORDER BY nonce DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![account_id.0, limit], row_to_prepared_transaction)?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    fn mark_broadcasted(
        &self,
        id: PreparedTransactionId,
        txid: B256,
        broadcasted_at: UnixTimestamp,
    ) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE prepared_transaction SET txid = ?2, broadcasted_at = ?3 WHERE id = ?1",
            params![id.0, b256_text(txid), ts_secs(broadcasted_at)],
        )?;
        if changed == 0 {
            return Err(StoreError::TransactionNotFound(id));
        }
        Ok(())
    }

    fn record_status(
        &self,
        id: PreparedTransactionId,
        result_block: u64,
        result_success: bool,
        fetched_at: UnixTimestamp,
    ) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE prepared_transaction
             SET result_block = ?2, result_success = ?3, result_fetched_at = ?4
             WHERE id = ?1",
            params![
                id.0,
                result_block as i64,
                result_success as i64,
                ts_secs(fetched_at)
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::TransactionNotFound(id));
        }
        Ok(())
    }

    fn mark_verified(
        &self,
        id: PreparedTransactionId,
        verified_at: UnixTimestamp,
    ) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE prepared_transaction SET verified_at = ?2 WHERE id = ?1",
            params![id.0, ts_secs(verified_at)],
        )?;
        if changed == 0 {
            return Err(StoreError::TransactionNotFound(id));
        }
        Ok(())
    }

    fn get_or_create_scan_status(
        &self,
        network: &Network,
        token_address: Address,
    ) -> Result<TokenScanStatus, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO token_scan_status (network, token_address)
             VALUES (?1, ?2)
             ON CONFLICT (network, token_address) DO NOTHING",
            params![network.to_string(), addr_text(token_address)],
        )?;
        conn.query_row(
            "SELECT * FROM token_scan_status WHERE network = ?1 AND token_address = ?2",
            params![network.to_string(), addr_text(token_address)],
            row_to_scan_status,
        )
        .map_err(StoreError::from)
    }

    fn update_token_metadata(
        &self,
        scan_id: TokenScanStatusId,
        metadata: TokenMetadata,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE token_scan_status
             SET token_name = ?2, token_symbol = ?3, token_decimals = ?4, total_supply = ?5
             WHERE id = ?1",
            params![
                scan_id.0,
                metadata.name,
                metadata.symbol,
                metadata.decimals as i64,
                signed_blob(metadata.total_supply),
            ],
        )?;
        Ok(())
    }

    fn advance_scan_window(
        &self,
        scan_id: TokenScanStatusId,
        start_block: u64,
        end_block: u64,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE token_scan_status
             SET start_block = COALESCE(start_block, ?2), end_block = ?3
             WHERE id = ?1",
            params![scan_id.0, start_block as i64, end_block as i64],
        )?;
        Ok(())
    }

    fn purge_forked_suffix(
        &self,
        scan_id: TokenScanStatusId,
        from_block: u64,
    ) -> Result<Vec<HolderAccountId>, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let dirty: Vec<HolderAccountId> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT ha.id
                 FROM holder_delta hd
                 JOIN holder_account ha ON ha.id = hd.holder_account_id
                 WHERE ha.scan_status_id = ?1 AND hd.block_num >= ?2",
            )?;
            stmt.query_map(params![scan_id.0, from_block as i64], |row| {
                Ok(HolderAccountId(row.get(0)?))
            })?
            .collect::<Result<_, _>>()?
        };

        tx.execute(
            "DELETE FROM holder_delta
             WHERE block_num >= ?2
               AND holder_account_id IN (
                   SELECT id FROM holder_account WHERE scan_status_id = ?1
               )",
            params![scan_id.0, from_block as i64],
        )?;

        tx.execute(
            "UPDATE token_scan_status SET end_block = ?2, end_block_timestamp = NULL
             WHERE id = ?1",
            params![scan_id.0, from_block.saturating_sub(1) as i64],
        )?;

        tx.commit()?;
        Ok(dirty)
    }

    fn get_or_create_holder_account(
        &self,
        scan_id: TokenScanStatusId,
        address: Address,
    ) -> Result<HolderAccount, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO holder_account (scan_status_id, address, balance, sortable_balance, empty)
             VALUES (?1, ?2, ?3, 0, 1)
             ON CONFLICT (scan_status_id, address) DO NOTHING",
            params![scan_id.0, addr_text(address), signed_blob(SignedU256::ZERO)],
        )?;
        conn.query_row(
            "SELECT * FROM holder_account WHERE scan_status_id = ?1 AND address = ?2",
            params![scan_id.0, addr_text(address)],
            row_to_holder_account,
        )
        .map_err(StoreError::from)
    }

    fn get_holder_account(&self, id: HolderAccountId) -> Result<HolderAccount, StoreError> {
        self.conn()
            .query_row(
                "SELECT * FROM holder_account WHERE id = ?1",
                params![id.0],
                row_to_holder_account,
            )
            .map_err(StoreError::from)
    }

    fn insert_delta(
        &self,
        holder_account_id: HolderAccountId,
        delta: NewHolderDelta,
    ) -> Result<(), StoreError> {
        let sign = if delta.raw_delta.is_negative() {
            Sign::Debit
        } else {
            Sign::Credit
        };
        self.conn()
            .execute(
                "INSERT INTO holder_delta
                    (holder_account_id, block_num, block_timestamp, txid, tx_internal_order,
                     raw_delta, sign)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    holder_account_id.0,
                    delta.block_num as i64,
                    ts_secs(delta.block_timestamp),
                    b256_text(delta.txid),
                    delta.tx_internal_order as i64,
                    signed_blob(delta.raw_delta),
                    sign_to_i64(sign),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::DuplicateEvent {
                        account: holder_account_id,
                        block_num: delta.block_num,
                        tx_internal_order: delta.tx_internal_order,
                    }
                }
                other => StoreError::Sqlite(other),
            })?;
        Ok(())
    }

    fn sum_deltas(&self, holder_account_id: HolderAccountId) -> Result<DeltaSum, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT raw_delta, block_num, block_timestamp FROM holder_delta
             WHERE holder_account_id = ?1
             ORDER BY block_num ASC, tx_internal_order ASC",
        )?;
        let mut balance = SignedU256::ZERO;
        let mut last_block = None;
        let mut last_block_at = None;
        let rows = stmt.query_map(params![holder_account_id.0], |row| {
            let raw: Vec<u8> = row.get(0)?;
            let block_num: i64 = row.get(1)?;
            let block_timestamp: i64 = row.get(2)?;
            Ok((parse_signed(&raw), block_num as u64, block_timestamp))
        })?;
        for row in rows {
            let (delta, block_num, block_timestamp) = row?;
            balance = balance.checked_add(delta).unwrap_or(balance);
            last_block = Some(block_num);
            last_block_at = Some(parse_ts(block_timestamp));
        }
        Ok(DeltaSum { balance, last_block, last_block_at })
    }

    fn mark_balance_calculated(
        &self,
        holder_account_id: HolderAccountId,
        sum: DeltaSum,
        calculated_at: UnixTimestamp,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE holder_account
             SET balance = ?2, sortable_balance = ?3, empty = ?4,
                 balance_calculated_at = ?5, last_block = ?6, last_block_at = ?7
             WHERE id = ?1",
            params![
                holder_account_id.0,
                signed_blob(sum.balance),
                sum.balance.to_sortable_i128() as i64,
                sum.balance.is_zero() as i64,
                ts_secs(calculated_at),
                sum.last_block.map(|b| b as i64),
                opt_ts_secs(sum.last_block_at),
            ],
        )?;
        Ok(())
    }

    fn get_holder_accounts(
        &self,
        scan_id: TokenScanStatusId,
        include_empty: bool,
    ) -> Result<Vec<HolderAccount>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM holder_account
             WHERE scan_status_id = ?1 AND (?2 OR empty = 0)
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![scan_id.0, include_empty], row_to_holder_account)?
            .collect::<Result<_, _>>()?;
        Ok(rows)
    }

    fn count_holder_accounts(
        &self,
        scan_id: TokenScanStatusId,
        include_empty: bool,
    ) -> Result<u64, StoreError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM holder_account WHERE scan_status_id = ?1 AND (?2 OR empty = 0)",
            params![scan_id.0, include_empty],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn broadcast_account_is_idempotent_and_nonce_allocates_contiguously() {
        let store = SqliteStore::open_in_memory().unwrap();
        let network = Network::from_str("eip155:1").unwrap();
        let account = store.get_or_create_broadcast_account(&network, addr(1)).unwrap();
        let again = store.get_or_create_broadcast_account(&network, addr(1)).unwrap();
        assert_eq!(account.id, again.id);

        let tx1 = store
            .allocate_prepared_transaction(
                account.id,
                NewPreparedTransaction {
                    contract_deployment: false,
                    receiver: Some(ChecksumAddress(addr(2))),
                    contract_address: None,
                    unsigned_payload: vec![1, 2, 3],
                    external_id: None,
                    note: "payout".into(),
                    other_data: None,
                },
            )
            .unwrap();
        let tx2 = store
            .allocate_prepared_transaction(
                account.id,
                NewPreparedTransaction {
                    contract_deployment: false,
                    receiver: Some(ChecksumAddress(addr(2))),
                    contract_address: None,
                    unsigned_payload: vec![4, 5, 6],
                    external_id: None,
                    note: "payout 2".into(),
                    other_data: None,
                },
            )
            .unwrap();
        assert_eq!(tx1.nonce, 0);
        assert_eq!(tx2.nonce, 1);
    }

    #[test]
    fn duplicate_external_id_for_same_contract_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let network = Network::from_str("eip155:1").unwrap();
        let account = store.get_or_create_broadcast_account(&network, addr(1)).unwrap();
        let new_tx = || NewPreparedTransaction {
            contract_deployment: false,
            receiver: None,
            contract_address: Some(ChecksumAddress(addr(9))),
            unsigned_payload: vec![],
            external_id: Some("batch-1".into()),
            note: "".into(),
            other_data: None,
        };
        store.allocate_prepared_transaction(account.id, new_tx()).unwrap();
        let err = store.allocate_prepared_transaction(account.id, new_tx()).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyDistributed));
    }

    #[test]
    fn restart_nonce_rewrites_queued_transactions_contiguously() {
        let store = SqliteStore::open_in_memory().unwrap();
        let network = Network::from_str("eip155:1").unwrap();
        let account = store.get_or_create_broadcast_account(&network, addr(1)).unwrap();
        for i in 0u8..3 {
            store
                .allocate_prepared_transaction(
                    account.id,
                    NewPreparedTransaction {
                        contract_deployment: false,
                        receiver: Some(ChecksumAddress(addr(i))),
                        contract_address: None,
                        unsigned_payload: vec![],
                        external_id: None,
                        note: "".into(),
                        other_data: None,
                    },
                )
                .unwrap();
        }
        let rewritten = store.restart_nonce(account.id, 10).unwrap();
        let nonces: Vec<u64> = rewritten.iter().map(|t| t.nonce).collect();
        assert_eq!(nonces, vec![10, 11, 12]);
    }

    #[test]
    fn delta_sum_nets_credits_and_debits_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let network = Network::from_str("eip155:1").unwrap();
        let scan = store.get_or_create_scan_status(&network, addr(5)).unwrap();
        let holder = store.get_or_create_holder_account(scan.id, addr(6)).unwrap();
        assert!(holder.empty);

        store
            .insert_delta(
                holder.id,
                NewHolderDelta {
                    block_num: 1,
                    block_timestamp: UnixTimestamp::from_secs(100),
                    txid: B256::repeat_byte(1),
                    tx_internal_order: 0,
                    raw_delta: SignedU256::from_magnitude_and_sign(
                        alloy_primitives::U256::from(100u64),
                        Sign::Credit,
                    ),
                },
            )
            .unwrap();
        store
            .insert_delta(
                holder.id,
                NewHolderDelta {
                    block_num: 2,
                    block_timestamp: UnixTimestamp::from_secs(200),
                    txid: B256::repeat_byte(2),
                    tx_internal_order: 0,
                    raw_delta: SignedU256::from_magnitude_and_sign(
                        alloy_primitives::U256::from(40u64),
                        Sign::Debit,
                    ),
                },
            )
            .unwrap();

        let sum = store.sum_deltas(holder.id).unwrap();
        assert_eq!(sum.balance.to_sortable_i128(), 60);
        assert_eq!(sum.last_block, Some(2));

        store
            .mark_balance_calculated(holder.id, sum, UnixTimestamp::from_secs(201))
            .unwrap();
        let refreshed = store.get_holder_account(holder.id).unwrap();
        assert!(!refreshed.empty);
        assert_eq!(refreshed.sortable_balance, 60);
    }

    #[test]
    fn duplicate_delta_at_same_block_and_order_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let network = Network::from_str("eip155:1").unwrap();
        let scan = store.get_or_create_scan_status(&network, addr(5)).unwrap();
        let holder = store.get_or_create_holder_account(scan.id, addr(6)).unwrap();
        let delta = NewHolderDelta {
            block_num: 1,
            block_timestamp: UnixTimestamp::from_secs(100),
            txid: B256::repeat_byte(1),
            tx_internal_order: 0,
            raw_delta: SignedU256::from_magnitude_and_sign(
                alloy_primitives::U256::from(1u64),
                Sign::Credit,
            ),
        };
        store.insert_delta(holder.id, delta.clone()).unwrap();
        let err = store.insert_delta(holder.id, delta).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEvent { .. }));
    }

    #[test]
    fn purge_forked_suffix_drops_deltas_and_reports_dirty_accounts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let network = Network::from_str("eip155:1").unwrap();
        let scan = store.get_or_create_scan_status(&network, addr(5)).unwrap();
        let holder = store.get_or_create_holder_account(scan.id, addr(6)).unwrap();
        store
            .insert_delta(
                holder.id,
                NewHolderDelta {
                    block_num: 10,
                    block_timestamp: UnixTimestamp::from_secs(1),
                    txid: B256::repeat_byte(3),
                    tx_internal_order: 0,
                    raw_delta: SignedU256::from_magnitude_and_sign(
                        alloy_primitives::U256::from(1u64),
                        Sign::Credit,
                    ),
                },
            )
            .unwrap();

        let dirty = store.purge_forked_suffix(scan.id, 10).unwrap();
        assert_eq!(dirty, vec![holder.id]);
        let sum = store.sum_deltas(holder.id).unwrap();
        assert!(sum.balance.is_zero());
    }

    #[test]
    fn advancing_an_empty_range_is_idempotent_and_keeps_start_block() {
        let store = SqliteStore::open_in_memory().unwrap();
        let network = Network::from_str("eip155:1").unwrap();
        let scan = store.get_or_create_scan_status(&network, addr(5)).unwrap();
        assert_eq!(scan.start_block, None);

        store.advance_scan_window(scan.id, 42, 42).unwrap();
        let first = store.get_or_create_scan_status(&network, addr(5)).unwrap();
        assert_eq!(first.start_block, Some(42));
        assert_eq!(first.end_block, Some(42));

        store.advance_scan_window(scan.id, 42, 42).unwrap();
        let second = store.get_or_create_scan_status(&network, addr(5)).unwrap();
        assert_eq!(second.start_block, Some(42));
        assert_eq!(second.end_block, Some(42));
    }

    #[test]
    fn count_holder_accounts_excludes_empty_unless_asked() {
        let store = SqliteStore::open_in_memory().unwrap();
        let network = Network::from_str("eip155:1").unwrap();
        let scan = store.get_or_create_scan_status(&network, addr(5)).unwrap();
        store.get_or_create_holder_account(scan.id, addr(1)).unwrap();
        let funded = store.get_or_create_holder_account(scan.id, addr(2)).unwrap();
        store
            .insert_delta(
                funded.id,
                NewHolderDelta {
                    block_num: 1,
                    block_timestamp: UnixTimestamp::from_secs(1),
                    txid: B256::repeat_byte(4),
                    tx_internal_order: 0,
                    raw_delta: SignedU256::from_magnitude_and_sign(
                        alloy_primitives::U256::from(101u64),
                        Sign::Credit,
                    ),
                },
            )
            .unwrap();
        let sum = store.sum_deltas(funded.id).unwrap();
        store
            .mark_balance_calculated(funded.id, sum, UnixTimestamp::from_secs(2))
            .unwrap();

        assert_eq!(store.count_holder_accounts(scan.id, false).unwrap(), 1);
        assert_eq!(store.count_holder_accounts(scan.id, true).unwrap(), 2);
    }
}
