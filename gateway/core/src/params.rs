//! Request Parameters
//!
//! Path and query parameters merged into one lookup table, with typed
//! accessors that fail with [`ActionError::InvalidParam`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// Default page size
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Largest page a client may request
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Cursor value meaning "start at the ledger's current tip"
pub const CURSOR_NOW: &str = "now";

/// Length of a strkey-encoded account address
const ADDRESS_LEN: usize = 56;

/// Sort order for paged collections
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Ascending paging token order
    #[default]
    Asc,
    /// Descending paging token order
    Desc,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => f.write_str("asc"),
            Self::Desc => f.write_str("desc"),
        }
    }
}

/// Cursor-based paging parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    /// Paging token to continue after; empty starts at the beginning
    pub cursor: String,
    /// Sort order
    pub order: Order,
    /// Maximum records per page
    pub limit: u32,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            cursor: String::new(),
            order: Order::Asc,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageQuery {
    /// Numeric cursor, or `None` when paging from the start or from "now"
    #[must_use]
    pub fn cursor_id(&self) -> Option<i64> {
        self.cursor.parse().ok()
    }

    /// True when the cursor asks to start at the current tip
    #[must_use]
    pub fn is_now(&self) -> bool {
        self.cursor == CURSOR_NOW
    }
}

/// Merged path and query parameters
#[derive(Clone, Debug, Default)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    /// Merge path and query parameters; path segments win on conflicts
    #[must_use]
    pub fn new(path: HashMap<String, String>, query: HashMap<String, String>) -> Self {
        let mut values = query;
        values.extend(path);
        Self { values }
    }

    /// Build from key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Raw value, or the empty string when absent
    #[must_use]
    pub fn get_string(&self, name: &str) -> &str {
        self.values.get(name).map_or("", String::as_str)
    }

    /// Non-empty value or an invalid parameter error
    pub fn required(&self, name: &str) -> Result<&str, ActionError> {
        match self.get_string(name) {
            "" => Err(ActionError::invalid_param(name, "parameter is required")),
            value => Ok(value),
        }
    }

    /// Validated account address
    pub fn address(&self, name: &str) -> Result<String, ActionError> {
        let value = self.required(name)?;
        if !is_valid_address(value) {
            return Err(ActionError::invalid_param(
                name,
                "expected a 56 character account address starting with G",
            ));
        }
        Ok(value.to_string())
    }

    /// Paging parameters from `cursor`, `order` and `limit`
    pub fn page_query(&self) -> Result<PageQuery, ActionError> {
        let cursor = self.get_string("cursor");
        if !cursor.is_empty() && cursor != CURSOR_NOW && cursor.parse::<u64>().is_err() {
            return Err(ActionError::invalid_param(
                "cursor",
                "expected a paging token or \"now\"",
            ));
        }

        let order = match self.get_string("order") {
            "" | "asc" => Order::Asc,
            "desc" => Order::Desc,
            _ => {
                return Err(ActionError::invalid_param(
                    "order",
                    "expected \"asc\" or \"desc\"",
                ))
            }
        };

        let limit = match self.get_string("limit") {
            "" => DEFAULT_PAGE_LIMIT,
            raw => match raw.parse::<u32>() {
                Ok(limit) if (1..=MAX_PAGE_LIMIT).contains(&limit) => limit,
                _ => {
                    return Err(ActionError::invalid_param(
                        "limit",
                        format!("expected an integer between 1 and {MAX_PAGE_LIMIT}"),
                    ))
                }
            },
        };

        Ok(PageQuery {
            cursor: cursor.to_string(),
            order,
            limit,
        })
    }
}

/// Shape check for strkey account addresses (`G` + 55 base32 characters)
#[must_use]
pub fn is_valid_address(value: &str) -> bool {
    value.len() == ADDRESS_LEN
        && value.starts_with('G')
        && value
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}
