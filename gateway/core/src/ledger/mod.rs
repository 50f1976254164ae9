//! Ledger Data Access
//!
//! The gateway reads ledger state through the [`LedgerStore`] trait. The
//! production data layers (core and history databases) live outside this
//! crate; [`MemoryLedger`] is the in-process implementation used by the
//! daemon's fixture mode and by tests.
//!
//! Store calls are synchronous: action steps are plain sequential units of
//! work, and a store backed by a real database is expected to answer within a
//! bounded time.

pub mod memory;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::PageQuery;

pub use memory::{LedgerFixture, MemoryLedger};

/// Errors returned by a ledger store
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The query matched nothing
    #[error("no matching row")]
    NoRows,

    /// The backend failed; the message is for operators only
    #[error("ledger backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for the "no matching row" condition
    #[must_use]
    pub fn is_no_rows(&self) -> bool {
        matches!(self, Self::NoRows)
    }
}

/// Asset identifier as stored in the ledger
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "asset_type", rename_all = "snake_case")]
pub enum Asset {
    /// The network's native currency
    Native,
    /// A credit issued by an account
    Credit {
        /// Asset code, 1 to 12 characters
        code: String,
        /// Issuing account address
        issuer: String,
    },
}

/// Core account entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Account address (`G...`)
    pub address: String,
    /// Native balance in stroops
    pub balance: i64,
    /// Current sequence number
    pub sequence: i64,
    /// Number of sub-entries (trustlines, offers, data, signers)
    #[serde(default)]
    pub num_subentries: u32,
    /// Home domain, may be empty
    #[serde(default)]
    pub home_domain: String,
    /// Master key weight followed by low/medium/high thresholds
    #[serde(default = "default_thresholds")]
    pub thresholds: [u8; 4],
    /// Account flags bitmask
    #[serde(default)]
    pub flags: u32,
    /// Ledger that last modified the entry
    #[serde(default)]
    pub last_modified_ledger: u32,
}

fn default_thresholds() -> [u8; 4] {
    [1, 0, 0, 0]
}

/// Additional signer attached to an account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerRecord {
    /// Signer key
    pub key: String,
    /// Signing weight
    pub weight: u8,
}

/// Trustline held by an account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustlineRecord {
    /// Trusted asset
    pub asset: Asset,
    /// Balance in stroops
    pub balance: i64,
    /// Limit in stroops
    pub limit: i64,
}

/// History-side account row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryAccountRecord {
    /// Internal history identifier, used as the paging token
    pub id: i64,
}

/// Offer entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRecord {
    /// Offer identifier, also the paging token
    pub offer_id: i64,
    /// Selling account address
    pub seller: String,
    /// Asset being sold
    pub selling: Asset,
    /// Asset being bought
    pub buying: Asset,
    /// Amount of `selling` in stroops
    pub amount: i64,
    /// Price numerator
    pub price_n: i32,
    /// Price denominator
    pub price_d: i32,
    /// Ledger that last modified the entry
    pub last_modified_ledger: u32,
}

/// Closed ledger header
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    /// Ledger sequence
    pub sequence: u32,
    /// Close time
    pub closed_at: DateTime<Utc>,
}

/// Read contract for ledger state
pub trait LedgerStore: Send + Sync {
    /// Core account entry for `address`
    fn account(&self, address: &str) -> Result<AccountRecord, StoreError>;

    /// Additional signers of `address`
    fn signers(&self, address: &str) -> Result<Vec<SignerRecord>, StoreError>;

    /// Trustlines of `address`
    fn trustlines(&self, address: &str) -> Result<Vec<TrustlineRecord>, StoreError>;

    /// All data entries of `address`, keyed by name
    fn data_entries(&self, address: &str) -> Result<BTreeMap<String, Vec<u8>>, StoreError>;

    /// History-side account row
    fn history_account(&self, address: &str) -> Result<HistoryAccountRecord, StoreError>;

    /// One page of offers sold by `address`
    fn offers_by_account(
        &self,
        address: &str,
        page: &PageQuery,
    ) -> Result<Vec<OfferRecord>, StoreError>;

    /// Headers for the given ledger sequences; unknown sequences are omitted
    fn ledgers(&self, sequences: &[u32]) -> Result<HashMap<u32, LedgerHeader>, StoreError>;

    /// Most recently closed ledger
    fn latest_ledger(&self) -> Result<LedgerHeader, StoreError>;

    /// Highest offer id currently in the ledger, `None` when there are no offers
    fn latest_offer_id(&self) -> Result<Option<i64>, StoreError>;
}
