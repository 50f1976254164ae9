//! `GET /`

use std::sync::Arc;

use crate::action::{Action, ActionBase, ProducesDocument};
use crate::error::ActionError;
use crate::ledger::LedgerStore;
use crate::resource::RootResource;

/// Gateway root: endpoint templates and the latest ledger
pub struct RootAction {
    base: ActionBase,
    store: Arc<dyn LedgerStore>,
}

impl RootAction {
    /// Create the action for one request
    #[must_use]
    pub fn new(base: ActionBase, store: Arc<dyn LedgerStore>) -> Self {
        Self { base, store }
    }

    fn render(&mut self) -> Result<(), ActionError> {
        let latest = self.store.latest_ledger()?;
        self.base.render_document(&RootResource::populate(&latest))
    }
}

impl Action for RootAction {
    fn base(&self) -> &ActionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ActionBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "root"
    }

    fn document(&mut self) -> Option<&mut dyn ProducesDocument> {
        Some(self)
    }
}

impl ProducesDocument for RootAction {
    fn produce_document(&mut self) {
        crate::pipeline::run(self, &[Self::render]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Output;
    use crate::actions::fixtures;

    #[test]
    fn test_root_reports_latest_ledger() {
        let mut action = RootAction::new(ActionBase::default(), fixtures::ledger());
        action.produce_document();

        let Some(Output::Document(doc)) = action.base.take_output() else {
            panic!("expected a document");
        };
        assert_eq!(doc["core_latest_ledger"], 3);
        assert_eq!(doc["_links"]["account"]["templated"], true);
    }
}
