//! HAL Resources
//!
//! Client-facing JSON shapes built from ledger records. Amounts are rendered
//! as decimal strings with seven fractional digits; links are relative to the
//! gateway root.

use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ledger::{
    AccountRecord, Asset, HistoryAccountRecord, LedgerHeader, OfferRecord, SignerRecord,
    TrustlineRecord,
};
use crate::params::{Order, PageQuery};

/// Stroops per whole unit
const STROOPS_PER_UNIT: i64 = 10_000_000;

/// Account flag bits
const AUTH_REQUIRED: u32 = 0x1;
const AUTH_REVOCABLE: u32 = 0x2;
const AUTH_IMMUTABLE: u32 = 0x4;

// =============================================================================
// Links
// =============================================================================

/// A single HAL link
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Link {
    /// Target URL or URL template
    pub href: String,
    /// Whether `href` is an RFC 6570 template
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub templated: bool,
}

impl Link {
    /// Plain link
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            templated: false,
        }
    }

    /// Templated link
    pub fn templated(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            templated: true,
        }
    }
}

/// Named links of a resource
pub type Links = BTreeMap<&'static str, Link>;

// =============================================================================
// Formatting
// =============================================================================

/// Render stroops as a fixed seven-decimal amount
#[must_use]
pub fn format_amount(stroops: i64) -> String {
    let sign = if stroops < 0 { "-" } else { "" };
    let abs = stroops.unsigned_abs();
    let unit = STROOPS_PER_UNIT.unsigned_abs();
    format!("{sign}{}.{:07}", abs / unit, abs % unit)
}

/// Render `n/d` as a decimal with seven fractional digits, rounding half up
#[must_use]
pub fn format_price(n: i32, d: i32) -> String {
    if d == 0 {
        return "0.0000000".to_string();
    }
    let n = i128::from(n);
    let d = i128::from(d);
    let scaled = (2 * n * i128::from(STROOPS_PER_UNIT) + d) / (2 * d);
    format_amount(i64::try_from(scaled).unwrap_or(i64::MAX))
}

/// Client-facing asset description
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AssetView {
    /// `native`, `credit_alphanum4` or `credit_alphanum12`
    pub asset_type: &'static str,
    /// Asset code, absent for native
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_code: Option<String>,
    /// Issuer address, absent for native
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_issuer: Option<String>,
}

impl From<&Asset> for AssetView {
    fn from(asset: &Asset) -> Self {
        match asset {
            Asset::Native => Self {
                asset_type: "native",
                asset_code: None,
                asset_issuer: None,
            },
            Asset::Credit { code, issuer } => Self {
                asset_type: if code.len() <= 4 {
                    "credit_alphanum4"
                } else {
                    "credit_alphanum12"
                },
                asset_code: Some(code.clone()),
                asset_issuer: Some(issuer.clone()),
            },
        }
    }
}

// =============================================================================
// Account
// =============================================================================

/// One balance line of an account
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Balance {
    /// Amount held
    pub balance: String,
    /// Trustline limit, absent for native
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    /// The held asset
    #[serde(flatten)]
    pub asset: AssetView,
}

/// Signing thresholds
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    /// Low threshold
    pub low_threshold: u8,
    /// Medium threshold
    pub med_threshold: u8,
    /// High threshold
    pub high_threshold: u8,
}

/// Account flags
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Flags {
    /// Trustlines need issuer authorization
    pub auth_required: bool,
    /// Issuer may revoke authorization
    pub auth_revocable: bool,
    /// Flags can never change again
    pub auth_immutable: bool,
}

/// One account signer
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Signer {
    /// Signer key
    pub key: String,
    /// Signing weight
    pub weight: u8,
}

/// Account resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccountResource {
    /// HAL links
    #[serde(rename = "_links")]
    pub links: Links,
    /// Account address
    pub id: String,
    /// Account address
    pub account_id: String,
    /// History paging token, empty outside the known history range
    pub paging_token: String,
    /// Sequence number as a string
    pub sequence: String,
    /// Sub-entry count
    pub subentry_count: u32,
    /// Home domain
    #[serde(skip_serializing_if = "String::is_empty")]
    pub home_domain: String,
    /// Ledger that last modified the account
    pub last_modified_ledger: u32,
    /// Signing thresholds
    pub thresholds: Thresholds,
    /// Flags
    pub flags: Flags,
    /// Trustline balances followed by the native balance
    pub balances: Vec<Balance>,
    /// Additional signers followed by the master key
    pub signers: Vec<Signer>,
    /// Data entries, base64 encoded
    pub data: BTreeMap<String, String>,
}

impl AccountResource {
    /// Build from a core record and its sub-entries
    #[must_use]
    pub fn populate(
        record: &AccountRecord,
        history: Option<&HistoryAccountRecord>,
        signers: &[SignerRecord],
        trustlines: &[TrustlineRecord],
        data: &BTreeMap<String, Vec<u8>>,
    ) -> Self {
        let address = &record.address;
        let base = format!("/accounts/{address}");

        let mut links = Links::new();
        links.insert("self", Link::new(base.clone()));
        links.insert("offers", Link::templated(format!("{base}/offers{{?cursor,limit,order}}")));
        links.insert("data", Link::templated(format!("{base}/data/{{key}}")));

        let mut balances: Vec<Balance> = trustlines
            .iter()
            .map(|line| Balance {
                balance: format_amount(line.balance),
                limit: Some(format_amount(line.limit)),
                asset: AssetView::from(&line.asset),
            })
            .collect();
        balances.push(Balance {
            balance: format_amount(record.balance),
            limit: None,
            asset: AssetView::from(&Asset::Native),
        });

        let mut signer_views: Vec<Signer> = signers
            .iter()
            .map(|s| Signer {
                key: s.key.clone(),
                weight: s.weight,
            })
            .collect();
        signer_views.push(Signer {
            key: address.clone(),
            weight: record.thresholds[0],
        });

        Self {
            links,
            id: address.clone(),
            account_id: address.clone(),
            paging_token: history.map(|h| h.id.to_string()).unwrap_or_default(),
            sequence: record.sequence.to_string(),
            subentry_count: record.num_subentries,
            home_domain: record.home_domain.clone(),
            last_modified_ledger: record.last_modified_ledger,
            thresholds: Thresholds {
                low_threshold: record.thresholds[1],
                med_threshold: record.thresholds[2],
                high_threshold: record.thresholds[3],
            },
            flags: Flags {
                auth_required: record.flags & AUTH_REQUIRED != 0,
                auth_revocable: record.flags & AUTH_REVOCABLE != 0,
                auth_immutable: record.flags & AUTH_IMMUTABLE != 0,
            },
            balances,
            signers: signer_views,
            data: data
                .iter()
                .map(|(key, value)| (key.clone(), BASE64.encode(value)))
                .collect(),
        }
    }
}

// =============================================================================
// Offers
// =============================================================================

/// Exact price as a fraction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Price {
    /// Numerator
    pub n: i32,
    /// Denominator
    pub d: i32,
}

/// Offer resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OfferResource {
    /// HAL links
    #[serde(rename = "_links")]
    pub links: Links,
    /// Offer id
    pub id: i64,
    /// Paging token
    pub paging_token: String,
    /// Selling account
    pub seller: String,
    /// Asset sold
    pub selling: AssetView,
    /// Asset bought
    pub buying: AssetView,
    /// Amount sold
    pub amount: String,
    /// Exact price
    pub price_r: Price,
    /// Decimal price
    pub price: String,
    /// Ledger that last modified the offer
    pub last_modified_ledger: u32,
    /// Close time of that ledger, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_time: Option<DateTime<Utc>>,
}

impl OfferResource {
    /// Build from an offer and the header of the ledger that last touched it
    #[must_use]
    pub fn populate(record: &OfferRecord, ledger: Option<&LedgerHeader>) -> Self {
        let mut links = Links::new();
        links.insert("self", Link::new(format!("/offers/{}", record.offer_id)));
        links.insert("offer_maker", Link::new(format!("/accounts/{}", record.seller)));

        Self {
            links,
            id: record.offer_id,
            paging_token: record.offer_id.to_string(),
            seller: record.seller.clone(),
            selling: AssetView::from(&record.selling),
            buying: AssetView::from(&record.buying),
            amount: format_amount(record.amount),
            price_r: Price {
                n: record.price_n,
                d: record.price_d,
            },
            price: format_price(record.price_n, record.price_d),
            last_modified_ledger: record.last_modified_ledger,
            last_modified_time: ledger.map(|header| header.closed_at),
        }
    }

    /// Build one resource per offer, joining ledger close times
    #[must_use]
    pub fn populate_all(
        records: &[OfferRecord],
        ledgers: &HashMap<u32, LedgerHeader>,
    ) -> Vec<Self> {
        records
            .iter()
            .map(|record| Self::populate(record, ledgers.get(&record.last_modified_ledger)))
            .collect()
    }
}

// =============================================================================
// Pages
// =============================================================================

/// Embedded records of a page
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Embedded<T> {
    /// Records in page order
    pub records: Vec<T>,
}

/// A page of records with navigation links
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    /// `self`, `next` and `prev` links
    #[serde(rename = "_links")]
    pub links: Links,
    /// The records
    #[serde(rename = "_embedded")]
    pub embedded: Embedded<T>,
}

/// Anything with a paging token
pub trait Pageable {
    /// Cursor that pages past this record
    fn paging_token(&self) -> String;
}

impl Pageable for OfferResource {
    fn paging_token(&self) -> String {
        self.paging_token.clone()
    }
}

impl<T: Pageable> Page<T> {
    /// Build a page for `path` from the query that produced `records`
    #[must_use]
    pub fn new(path: &str, query: &PageQuery, records: Vec<T>) -> Self {
        let first = records.first().map_or_else(|| query.cursor.clone(), Pageable::paging_token);
        let last = records.last().map_or_else(|| query.cursor.clone(), Pageable::paging_token);
        let reversed = match query.order {
            Order::Asc => Order::Desc,
            Order::Desc => Order::Asc,
        };

        let mut links = Links::new();
        links.insert("self", Link::new(page_href(path, &query.cursor, query.order, query.limit)));
        links.insert("next", Link::new(page_href(path, &last, query.order, query.limit)));
        links.insert("prev", Link::new(page_href(path, &first, reversed, query.limit)));

        Self {
            links,
            embedded: Embedded { records },
        }
    }
}

fn page_href(path: &str, cursor: &str, order: Order, limit: u32) -> String {
    format!("{path}?cursor={cursor}&limit={limit}&order={order}")
}

// =============================================================================
// Small documents
// =============================================================================

/// Value of one account data entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DataValue {
    /// Base64-encoded value
    pub value: String,
}

impl DataValue {
    /// Encode raw bytes
    #[must_use]
    pub fn encode(bytes: &[u8]) -> Self {
        Self {
            value: BASE64.encode(bytes),
        }
    }
}

/// Gateway root document
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RootResource {
    /// Endpoint templates
    #[serde(rename = "_links")]
    pub links: Links,
    /// Most recently closed ledger
    pub core_latest_ledger: u32,
    /// Close time of that ledger
    pub core_latest_ledger_closed_at: DateTime<Utc>,
    /// Gateway version
    pub gateway_version: &'static str,
}

impl RootResource {
    /// Build from the latest ledger header
    #[must_use]
    pub fn populate(latest: &LedgerHeader) -> Self {
        let mut links = Links::new();
        links.insert("self", Link::new("/"));
        links.insert("account", Link::templated("/accounts/{account_id}"));
        links.insert(
            "account_offers",
            Link::templated("/accounts/{account_id}/offers{?cursor,limit,order}"),
        );
        links.insert("account_data", Link::templated("/accounts/{account_id}/data/{key}"));

        Self {
            links,
            core_latest_ledger: latest.sequence,
            core_latest_ledger_closed_at: latest.closed_at,
            gateway_version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const ADDRESS: &str = "GDJIN6W6PLTPKLLM57UW65ZH4BITUXUMYQHIMAZFYXF45PZVAWDBI77Z";

    fn record() -> AccountRecord {
        AccountRecord {
            address: ADDRESS.into(),
            balance: 1_000_000_000,
            sequence: 42,
            num_subentries: 1,
            home_domain: String::new(),
            thresholds: [1, 2, 3, 4],
            flags: AUTH_REQUIRED | AUTH_IMMUTABLE,
            last_modified_ledger: 7,
        }
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0.0000000");
        assert_eq!(format_amount(1), "0.0000001");
        assert_eq!(format_amount(123_456_789), "12.3456789");
        assert_eq!(format_amount(-5), "-0.0000005");
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(1, 2), "0.5000000");
        assert_eq!(format_price(2, 3), "0.6666667");
        assert_eq!(format_price(5, 1), "5.0000000");
        assert_eq!(format_price(1, 0), "0.0000000");
    }

    #[test]
    fn test_asset_view() {
        let long = Asset::Credit {
            code: "LONGCODE".into(),
            issuer: ADDRESS.into(),
        };
        assert_eq!(AssetView::from(&long).asset_type, "credit_alphanum12");
        assert_eq!(AssetView::from(&Asset::Native).asset_code, None);
    }

    #[test]
    fn test_account_resource() {
        let data = BTreeMap::from([("name".to_string(), b"kin".to_vec())]);
        let trustlines = vec![TrustlineRecord {
            asset: Asset::Credit {
                code: "USD".into(),
                issuer: ADDRESS.into(),
            },
            balance: 50,
            limit: 100,
        }];
        let resource = AccountResource::populate(
            &record(),
            Some(&HistoryAccountRecord { id: 99 }),
            &[],
            &trustlines,
            &data,
        );

        assert_eq!(resource.paging_token, "99");
        assert_eq!(resource.sequence, "42");
        assert_eq!(resource.balances.len(), 2);
        assert_eq!(resource.balances[1].balance, "100.0000000");
        assert_eq!(resource.balances[1].asset.asset_type, "native");
        assert_eq!(resource.signers.last().map(|s| s.weight), Some(1));
        assert_eq!(resource.thresholds.high_threshold, 4);
        assert!(resource.flags.auth_required && !resource.flags.auth_revocable);
        assert_eq!(resource.data["name"], "a2lu");

        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(value["_links"]["self"], json!({"href": format!("/accounts/{ADDRESS}")}));
        assert_eq!(value["_links"]["data"]["templated"], true);
        assert!(value.get("home_domain").is_none());
    }

    #[test]
    fn test_account_without_history() {
        let resource =
            AccountResource::populate(&record(), None, &[], &[], &BTreeMap::new());
        assert_eq!(resource.paging_token, "");
    }

    #[test]
    fn test_page_links() {
        let offer = |id: i64| OfferRecord {
            offer_id: id,
            seller: ADDRESS.into(),
            selling: Asset::Native,
            buying: Asset::Native,
            amount: 1,
            price_n: 1,
            price_d: 1,
            last_modified_ledger: 1,
        };
        let records = OfferResource::populate_all(&[offer(3), offer(8)], &HashMap::new());
        let query = PageQuery {
            cursor: String::new(),
            order: Order::Asc,
            limit: 2,
        };
        let page = Page::new("/accounts/GA/offers", &query, records);

        assert_eq!(page.links["next"].href, "/accounts/GA/offers?cursor=8&limit=2&order=asc");
        assert_eq!(page.links["prev"].href, "/accounts/GA/offers?cursor=3&limit=2&order=desc");
        assert_eq!(page.embedded.records.len(), 2);
        assert_eq!(page.embedded.records[0].last_modified_time, None);
    }
}
