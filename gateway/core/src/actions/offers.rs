//! `GET /accounts/:account_id/offers`

use std::collections::HashMap;
use std::sync::Arc;

use crate::action::{Action, ActionBase, ProducesDocument, ProducesPushEvents, StreamCapability};
use crate::bus::Topic;
use crate::error::ActionError;
use crate::ledger::{LedgerHeader, LedgerStore, OfferRecord};
use crate::params::PageQuery;
use crate::pipeline;
use crate::resource::{OfferResource, Page};
use crate::streaming::{Event, EventStream};

/// Offers currently open for an account
///
/// As a stream, the page query is read once and a `now` cursor is pinned to
/// the newest offer id; after each emitted offer the cursor moves past it, so
/// a re-evaluation only yields newer offers.
pub struct OffersByAccountAction {
    base: ActionBase,
    store: Arc<dyn LedgerStore>,
    address: String,
    page_query: PageQuery,
    records: Vec<OfferRecord>,
    ledgers: HashMap<u32, LedgerHeader>,
    page: Option<Page<OfferResource>>,
}

impl OffersByAccountAction {
    /// Create the action for one request
    #[must_use]
    pub fn new(base: ActionBase, store: Arc<dyn LedgerStore>) -> Self {
        Self {
            base,
            store,
            address: String::new(),
            page_query: PageQuery::default(),
            records: Vec::new(),
            ledgers: HashMap::new(),
            page: None,
        }
    }

    fn load_params(&mut self) -> Result<(), ActionError> {
        self.page_query = self.base.params.page_query()?;
        self.address = self.base.params.address("account_id")?;
        Ok(())
    }

    fn resolve_cursor(&mut self) -> Result<(), ActionError> {
        if self.page_query.is_now() {
            let latest = self.store.latest_offer_id()?.unwrap_or(0);
            self.page_query.cursor = latest.to_string();
        }
        Ok(())
    }

    fn load_records(&mut self) -> Result<(), ActionError> {
        self.records = self
            .store
            .offers_by_account(&self.address, &self.page_query)?;
        Ok(())
    }

    fn load_ledgers(&mut self) -> Result<(), ActionError> {
        let mut sequences: Vec<u32> = self
            .records
            .iter()
            .map(|offer| offer.last_modified_ledger)
            .collect();
        sequences.sort_unstable();
        sequences.dedup();
        self.ledgers = self.store.ledgers(&sequences)?;
        Ok(())
    }

    fn load_page(&mut self) -> Result<(), ActionError> {
        let resources = OfferResource::populate_all(&self.records, &self.ledgers);
        self.page = Some(Page::new(&self.base.full_url, &self.page_query, resources));
        Ok(())
    }

    fn render(&mut self) -> Result<(), ActionError> {
        if let Some(page) = &self.page {
            self.base.render_document(page)?;
        }
        Ok(())
    }
}

impl Action for OffersByAccountAction {
    fn base(&self) -> &ActionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ActionBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "offers_by_account"
    }

    fn document(&mut self) -> Option<&mut dyn ProducesDocument> {
        Some(self)
    }

    fn event_stream(&mut self) -> Option<StreamCapability<'_>> {
        Some(StreamCapability::Push(self))
    }
}

impl ProducesDocument for OffersByAccountAction {
    fn produce_document(&mut self) {
        pipeline::run(
            self,
            &[
                Self::load_params,
                Self::load_records,
                Self::load_ledgers,
                Self::load_page,
                Self::render,
            ],
        );
    }
}

impl ProducesPushEvents for OffersByAccountAction {
    fn topic(&self) -> Topic {
        Topic::account(self.base.params.get_string("account_id"))
    }

    fn push_events(&mut self, stream: &mut dyn EventStream) {
        pipeline::setup(self, &[Self::load_params, Self::resolve_cursor]);
        pipeline::run(self, &[Self::load_records, Self::load_ledgers]);
        if self.base.has_error() {
            return;
        }

        stream.set_limit(self.page_query.limit as usize);
        for record in &self.records {
            let resource =
                OfferResource::populate(record, self.ledgers.get(&record.last_modified_ledger));
            let event = match serde_json::to_value(&resource) {
                Ok(data) => Event::with_id(resource.paging_token.clone(), data),
                Err(e) => {
                    self.base.fail(e.into());
                    return;
                }
            };
            self.page_query.cursor = resource.paging_token;
            stream.send(event);
            if stream.is_done() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Output;
    use crate::actions::fixtures::{self, ADDRESS};
    use crate::ledger::MemoryLedger;
    use crate::params::Params;
    use crate::streaming::{Frame, SseStream};
    use std::time::Duration;

    fn action(store: Arc<MemoryLedger>, query: &[(&str, &str)]) -> OffersByAccountAction {
        let mut pairs = vec![("account_id", ADDRESS)];
        pairs.extend_from_slice(query);
        let base = ActionBase::new(
            Params::from_pairs(pairs),
            format!("/accounts/{ADDRESS}/offers"),
        );
        OffersByAccountAction::new(base, store)
    }

    fn data_ids(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Frame>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Frame::Data(event) = frame {
                ids.push(event.id.unwrap_or_default());
            }
        }
        ids
    }

    #[test]
    fn test_document_page() {
        let store = fixtures::ledger();
        store.upsert_offer(fixtures::offer(1, ADDRESS));
        store.upsert_offer(fixtures::offer(2, ADDRESS));
        store.upsert_offer(fixtures::offer(3, "GOTHER"));

        let mut action = action(store, &[("limit", "5")]);
        action.produce_document();

        let Some(Output::Document(doc)) = action.base.take_output() else {
            panic!("expected a document");
        };
        let records = doc["_embedded"]["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["price"], "0.5000000");
        assert_eq!(records[0]["last_modified_time"], "2024-01-01T00:00:00Z");
        assert!(doc["_links"]["next"]["href"]
            .as_str()
            .unwrap()
            .contains("cursor=2"));
    }

    #[test]
    fn test_bad_limit_is_rejected() {
        let mut action = action(fixtures::ledger(), &[("limit", "500")]);
        action.produce_document();
        assert!(matches!(
            action.base.error(),
            Some(ActionError::InvalidParam { field, .. }) if field == "limit"
        ));
    }

    #[test]
    fn test_push_advances_cursor() {
        let store = fixtures::ledger();
        store.upsert_offer(fixtures::offer(1, ADDRESS));
        store.upsert_offer(fixtures::offer(2, ADDRESS));

        let mut action = action(Arc::clone(&store), &[]);
        let (mut stream, mut rx) = SseStream::channel(Duration::from_secs(1));

        action.push_events(&mut stream);
        assert_eq!(data_ids(&mut rx), vec!["1", "2"]);

        action.push_events(&mut stream);
        assert!(data_ids(&mut rx).is_empty(), "nothing new since the cursor");

        store.upsert_offer(fixtures::offer(7, ADDRESS));
        action.push_events(&mut stream);
        assert_eq!(data_ids(&mut rx), vec!["7"]);
    }

    #[test]
    fn test_push_from_now_skips_existing_offers() {
        let store = fixtures::ledger();
        store.upsert_offer(fixtures::offer(1, ADDRESS));
        store.upsert_offer(fixtures::offer(2, ADDRESS));

        let mut action = action(Arc::clone(&store), &[("cursor", "now")]);
        let (mut stream, mut rx) = SseStream::channel(Duration::from_secs(1));

        action.push_events(&mut stream);
        assert!(data_ids(&mut rx).is_empty());
        assert_eq!(action.page_query.cursor, "2");

        store.upsert_offer(fixtures::offer(3, ADDRESS));
        store.upsert_offer(fixtures::offer(4, ADDRESS));
        action.push_events(&mut stream);
        assert_eq!(data_ids(&mut rx), vec!["3", "4"]);

        store.upsert_offer(fixtures::offer(5, ADDRESS));
        action.push_events(&mut stream);
        assert_eq!(data_ids(&mut rx), vec!["5"]);
    }

    #[test]
    fn test_push_from_now_on_empty_ledger() {
        let store = fixtures::ledger();
        let mut action = action(Arc::clone(&store), &[("cursor", "now")]);
        let (mut stream, mut rx) = SseStream::channel(Duration::from_secs(1));

        action.push_events(&mut stream);
        assert!(data_ids(&mut rx).is_empty());

        store.upsert_offer(fixtures::offer(1, ADDRESS));
        action.push_events(&mut stream);
        assert_eq!(data_ids(&mut rx), vec!["1"]);
    }

    #[test]
    fn test_push_honours_page_limit() {
        let store = fixtures::ledger();
        for id in 1..=3 {
            store.upsert_offer(fixtures::offer(id, ADDRESS));
        }

        let mut action = action(store, &[("limit", "2")]);
        let (mut stream, mut rx) = SseStream::channel(Duration::from_secs(1));
        action.push_events(&mut stream);

        assert_eq!(data_ids(&mut rx), vec!["1", "2"]);
        assert!(stream.is_done());
    }
}
