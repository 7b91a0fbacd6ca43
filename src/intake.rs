//! Recipient intake: reading the payout file, validating each row, and
//! normalising amounts before anything reaches the dispatcher.

pub mod amount;
pub mod recipients;

pub use recipients::{LoadReport, RecipientList, RecipientLoader};
