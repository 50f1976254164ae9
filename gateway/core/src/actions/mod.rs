//! Endpoint Actions
//!
//! One action type per endpoint. Each holds the ledger store it reads from
//! and declares its capabilities through [`crate::action::Action`].
//!
//! | Endpoint                              | document | raw | event-stream |
//! |---------------------------------------|----------|-----|--------------|
//! | `GET /`                               | yes      |     |              |
//! | `GET /accounts/:account_id`           | yes      |     | snapshot     |
//! | `GET /accounts/:account_id/offers`    | yes      |     | push         |
//! | `GET /accounts/:account_id/data/:key` | yes      | yes |              |

mod account;
mod data;
mod offers;
mod root;

pub use account::AccountShowAction;
pub use data::DataShowAction;
pub use offers::OffersByAccountAction;
pub use root::RootAction;
