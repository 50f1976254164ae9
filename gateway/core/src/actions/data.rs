//! `GET /accounts/:account_id/data/:key`

use std::sync::Arc;

use crate::action::{Action, ActionBase, ProducesDocument, ProducesRaw};
use crate::error::ActionError;
use crate::ledger::{LedgerStore, StoreError};
use crate::pipeline;
use crate::resource::DataValue;

/// One named data entry of an account
pub struct DataShowAction {
    base: ActionBase,
    store: Arc<dyn LedgerStore>,
    address: String,
    key: String,
    value: Vec<u8>,
}

impl DataShowAction {
    /// Create the action for one request
    #[must_use]
    pub fn new(base: ActionBase, store: Arc<dyn LedgerStore>) -> Self {
        Self {
            base,
            store,
            address: String::new(),
            key: String::new(),
            value: Vec::new(),
        }
    }

    fn load_params(&mut self) -> Result<(), ActionError> {
        self.address = self.base.params.address("account_id")?;
        self.key = self.base.params.required("key")?.to_string();
        Ok(())
    }

    fn load_record(&mut self) -> Result<(), ActionError> {
        let mut entries = self.store.data_entries(&self.address)?;
        self.value = entries.remove(&self.key).ok_or(StoreError::NoRows)?;
        Ok(())
    }

    fn render_document(&mut self) -> Result<(), ActionError> {
        self.base.render_document(&DataValue::encode(&self.value))
    }

    fn render_raw(&mut self) -> Result<(), ActionError> {
        self.base.render_raw(std::mem::take(&mut self.value));
        Ok(())
    }
}

impl Action for DataShowAction {
    fn base(&self) -> &ActionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ActionBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "data_show"
    }

    fn document(&mut self) -> Option<&mut dyn ProducesDocument> {
        Some(self)
    }

    fn raw(&mut self) -> Option<&mut dyn ProducesRaw> {
        Some(self)
    }
}

impl ProducesDocument for DataShowAction {
    fn produce_document(&mut self) {
        pipeline::run(
            self,
            &[Self::load_params, Self::load_record, Self::render_document],
        );
    }
}

impl ProducesRaw for DataShowAction {
    fn produce_raw(&mut self) {
        pipeline::run(
            self,
            &[Self::load_params, Self::load_record, Self::render_raw],
        );
    }
}
