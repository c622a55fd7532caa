//! Billing core: reading verification, invoice generation and the access
//! policy shared by every endpoint.

pub mod billing;
pub mod clock;
pub mod consumption;
pub mod error;
pub mod invoice;
pub mod invoice_number;
pub mod page;
pub mod policy;
pub mod rates;
pub mod readings;
pub mod users;

#[cfg(test)]
mod testing;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ComputeError, Result};
pub use invoice::{BatchFailure, BatchReport, InvoiceDraft, InvoiceGenerator};
pub use page::{Page, Paged};
pub use policy::{authorize, list_scope, Action, Caller, Decision, ListScope};
pub use rates::RateTable;
