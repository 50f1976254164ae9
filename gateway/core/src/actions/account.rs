//! `GET /accounts/:account_id`

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::action::{
    Action, ActionBase, ProducesDocument, ProducesSnapshotOnChange, StreamCapability,
};
use crate::bus::Topic;
use crate::error::ActionError;
use crate::ledger::{
    AccountRecord, HistoryAccountRecord, LedgerStore, SignerRecord, StoreError, TrustlineRecord,
};
use crate::pipeline;
use crate::resource::AccountResource;
use crate::streaming::Event;

/// Details of a single account
pub struct AccountShowAction {
    base: ActionBase,
    store: Arc<dyn LedgerStore>,
    address: String,
    record: Option<AccountRecord>,
    history: Option<HistoryAccountRecord>,
    signers: Vec<SignerRecord>,
    trustlines: Vec<TrustlineRecord>,
    data: BTreeMap<String, Vec<u8>>,
    resource: Option<AccountResource>,
}

impl AccountShowAction {
    /// Create the action for one request
    #[must_use]
    pub fn new(base: ActionBase, store: Arc<dyn LedgerStore>) -> Self {
        Self {
            base,
            store,
            address: String::new(),
            record: None,
            history: None,
            signers: Vec::new(),
            trustlines: Vec::new(),
            data: BTreeMap::new(),
            resource: None,
        }
    }

    fn load_params(&mut self) -> Result<(), ActionError> {
        self.address = self.base.params.address("account_id")?;
        Ok(())
    }

    fn load_record(&mut self) -> Result<(), ActionError> {
        let store = &self.store;
        self.record = Some(store.account(&self.address)?);
        self.data = store.data_entries(&self.address)?;
        self.signers = store.signers(&self.address)?;
        self.trustlines = store.trustlines(&self.address)?;

        // Accounts created outside the known history range have no history row.
        self.history = match store.history_account(&self.address) {
            Ok(history) => Some(history),
            Err(e) if e.is_no_rows() => None,
            Err(e) => return Err(e.into()),
        };
        Ok(())
    }

    fn load_resource(&mut self) -> Result<(), ActionError> {
        let Some(record) = &self.record else {
            return Err(StoreError::NoRows.into());
        };
        self.resource = Some(AccountResource::populate(
            record,
            self.history.as_ref(),
            &self.signers,
            &self.trustlines,
            &self.data,
        ));
        Ok(())
    }

    fn render(&mut self) -> Result<(), ActionError> {
        if let Some(resource) = &self.resource {
            self.base.render_document(resource)?;
        }
        Ok(())
    }
}

impl Action for AccountShowAction {
    fn base(&self) -> &ActionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ActionBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "account_show"
    }

    fn document(&mut self) -> Option<&mut dyn ProducesDocument> {
        Some(self)
    }

    fn event_stream(&mut self) -> Option<StreamCapability<'_>> {
        Some(StreamCapability::Snapshot(self))
    }
}

impl ProducesDocument for AccountShowAction {
    fn produce_document(&mut self) {
        pipeline::run(
            self,
            &[
                Self::load_params,
                Self::load_record,
                Self::load_resource,
                Self::render,
            ],
        );
    }
}

impl ProducesSnapshotOnChange for AccountShowAction {
    fn topic(&self) -> Topic {
        Topic::account(self.base.params.get_string("account_id"))
    }

    fn load_event(&mut self) -> Option<Event> {
        pipeline::run(
            self,
            &[Self::load_params, Self::load_record, Self::load_resource],
        );
        if self.base.has_error() {
            return None;
        }

        let resource = self.resource.as_ref()?;
        match Event::from_resource(resource) {
            Ok(event) => Some(event),
            Err(e) => {
                self.base.fail(e.into());
                None
            }
        }
    }
}
