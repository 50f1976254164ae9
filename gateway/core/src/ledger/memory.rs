//! In-memory ledger store
//!
//! Holds ledger state in maps behind a `RwLock` and publishes a change on the
//! bus for every write, the way an ingestion process would after committing a
//! ledger. Tests also use it to inject backend failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{
    AccountRecord, HistoryAccountRecord, LedgerHeader, LedgerStore, OfferRecord, SignerRecord,
    StoreError, TrustlineRecord,
};
use crate::bus::{Topic, TopicBus};
use crate::params::{Order, PageQuery};

/// Seed data for [`MemoryLedger`], usually loaded from a JSON file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerFixture {
    /// Closed ledgers
    pub ledgers: Vec<LedgerHeader>,
    /// Accounts and their sub-entries
    pub accounts: Vec<AccountFixture>,
    /// Offers
    pub offers: Vec<OfferRecord>,
}

/// One account in a [`LedgerFixture`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountFixture {
    /// Core account entry
    #[serde(flatten)]
    pub account: AccountRecord,
    /// History identifier, if the account is inside the known history range
    #[serde(default)]
    pub history_id: Option<i64>,
    /// Additional signers
    #[serde(default)]
    pub signers: Vec<SignerRecord>,
    /// Trustlines
    #[serde(default)]
    pub trustlines: Vec<TrustlineRecord>,
    /// Data entries as UTF-8 strings
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Default)]
struct LedgerState {
    ledgers: BTreeMap<u32, LedgerHeader>,
    accounts: HashMap<String, AccountRecord>,
    history: HashMap<String, HistoryAccountRecord>,
    signers: HashMap<String, Vec<SignerRecord>>,
    trustlines: HashMap<String, Vec<TrustlineRecord>>,
    data: HashMap<String, BTreeMap<String, Vec<u8>>>,
    offers: BTreeMap<i64, OfferRecord>,
    failure: Option<String>,
}

/// Ledger store kept entirely in memory
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
    bus: Option<Arc<TopicBus>>,
}

impl MemoryLedger {
    /// Create an empty ledger that publishes nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty ledger that announces account changes on `bus`
    #[must_use]
    pub fn with_bus(bus: Arc<TopicBus>) -> Self {
        Self {
            state: RwLock::default(),
            bus: Some(bus),
        }
    }

    /// Load every entry of a fixture
    pub fn load_fixture(&self, fixture: LedgerFixture) {
        for header in fixture.ledgers {
            self.close_ledger(header);
        }
        for entry in fixture.accounts {
            let address = entry.account.address.clone();
            self.upsert_account(entry.account);
            if let Some(id) = entry.history_id {
                self.set_history_account(&address, HistoryAccountRecord { id });
            }
            self.set_signers(&address, entry.signers);
            self.set_trustlines(&address, entry.trustlines);
            for (key, value) in entry.data {
                self.put_data(&address, &key, value.into_bytes());
            }
        }
        for offer in fixture.offers {
            self.upsert_offer(offer);
        }
    }

    /// Insert or replace an account entry
    pub fn upsert_account(&self, record: AccountRecord) {
        let address = record.address.clone();
        self.state.write().accounts.insert(address.clone(), record);
        self.announce(&address);
    }

    /// Remove an account and its sub-entries
    pub fn remove_account(&self, address: &str) {
        {
            let mut state = self.state.write();
            state.accounts.remove(address);
            state.signers.remove(address);
            state.trustlines.remove(address);
            state.data.remove(address);
            state.offers.retain(|_, offer| offer.seller != address);
        }
        self.announce(address);
    }

    /// Record the history-side row for an account
    pub fn set_history_account(&self, address: &str, record: HistoryAccountRecord) {
        self.state
            .write()
            .history
            .insert(address.to_string(), record);
    }

    /// Replace the signers of an account
    pub fn set_signers(&self, address: &str, signers: Vec<SignerRecord>) {
        self.state
            .write()
            .signers
            .insert(address.to_string(), signers);
        self.announce(address);
    }

    /// Replace the trustlines of an account
    pub fn set_trustlines(&self, address: &str, trustlines: Vec<TrustlineRecord>) {
        self.state
            .write()
            .trustlines
            .insert(address.to_string(), trustlines);
        self.announce(address);
    }

    /// Set one data entry
    pub fn put_data(&self, address: &str, key: &str, value: Vec<u8>) {
        self.state
            .write()
            .data
            .entry(address.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.announce(address);
    }

    /// Insert or replace an offer
    pub fn upsert_offer(&self, offer: OfferRecord) {
        let seller = offer.seller.clone();
        self.state.write().offers.insert(offer.offer_id, offer);
        self.announce(&seller);
    }

    /// Delete an offer
    pub fn remove_offer(&self, offer_id: i64) {
        let removed = self.state.write().offers.remove(&offer_id);
        if let Some(offer) = removed {
            self.announce(&offer.seller);
        }
    }

    /// Append a closed ledger
    pub fn close_ledger(&self, header: LedgerHeader) {
        self.state.write().ledgers.insert(header.sequence, header);
    }

    /// Make every read fail with a backend error until cleared with `None`
    pub fn set_failure(&self, failure: Option<String>) {
        self.state.write().failure = failure;
    }

    fn announce(&self, address: &str) {
        if let Some(bus) = &self.bus {
            bus.publish(&Topic::account(address));
        }
    }

    fn check_available(state: &LedgerState) -> Result<(), StoreError> {
        match &state.failure {
            Some(message) => Err(StoreError::Backend(message.clone())),
            None => Ok(()),
        }
    }
}

impl LedgerStore for MemoryLedger {
    fn account(&self, address: &str) -> Result<AccountRecord, StoreError> {
        let state = self.state.read();
        Self::check_available(&state)?;
        state.accounts.get(address).cloned().ok_or(StoreError::NoRows)
    }

    fn signers(&self, address: &str) -> Result<Vec<SignerRecord>, StoreError> {
        let state = self.state.read();
        Self::check_available(&state)?;
        Ok(state.signers.get(address).cloned().unwrap_or_default())
    }

    fn trustlines(&self, address: &str) -> Result<Vec<TrustlineRecord>, StoreError> {
        let state = self.state.read();
        Self::check_available(&state)?;
        Ok(state.trustlines.get(address).cloned().unwrap_or_default())
    }

    fn data_entries(&self, address: &str) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        let state = self.state.read();
        Self::check_available(&state)?;
        Ok(state.data.get(address).cloned().unwrap_or_default())
    }

    fn history_account(&self, address: &str) -> Result<HistoryAccountRecord, StoreError> {
        let state = self.state.read();
        Self::check_available(&state)?;
        state.history.get(address).cloned().ok_or(StoreError::NoRows)
    }

    fn offers_by_account(
        &self,
        address: &str,
        page: &PageQuery,
    ) -> Result<Vec<OfferRecord>, StoreError> {
        let state = self.state.read();
        Self::check_available(&state)?;

        if page.is_now() && page.order == Order::Asc {
            return Ok(Vec::new());
        }

        let cursor = page.cursor_id();
        let matches = |offer: &&OfferRecord| {
            offer.seller == address
                && match (page.order, cursor) {
                    (_, None) => true,
                    (Order::Asc, Some(after)) => offer.offer_id > after,
                    (Order::Desc, Some(before)) => offer.offer_id < before,
                }
        };
        let limit = page.limit as usize;

        let records = match page.order {
            Order::Asc => state
                .offers
                .values()
                .filter(matches)
                .take(limit)
                .cloned()
                .collect(),
            Order::Desc => state
                .offers
                .values()
                .rev()
                .filter(matches)
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(records)
    }

    fn ledgers(&self, sequences: &[u32]) -> Result<HashMap<u32, LedgerHeader>, StoreError> {
        let state = self.state.read();
        Self::check_available(&state)?;
        Ok(sequences
            .iter()
            .filter_map(|seq| state.ledgers.get(seq).map(|h| (*seq, h.clone())))
            .collect())
    }

    fn latest_offer_id(&self) -> Result<Option<i64>, StoreError> {
        let state = self.state.read();
        Self::check_available(&state)?;
        Ok(state.offers.keys().next_back().copied())
    }

    fn latest_ledger(&self) -> Result<LedgerHeader, StoreError> {
        let state = self.state.read();
        Self::check_available(&state)?;
        Ok(state
            .ledgers
            .values()
            .next_back()
            .cloned()
            .unwrap_or_else(|| LedgerHeader {
                sequence: 0,
                closed_at: Utc::now(),
            }))
    }
}
