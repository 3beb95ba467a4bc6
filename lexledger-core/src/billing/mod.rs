//! Invoice lifecycle, numbering, calculation and reporting.

pub mod aggregator;
pub mod calculator;
pub mod ledger;
pub mod lifecycle;
pub mod sequence;
pub mod statistics;
pub mod status;


pub use aggregator::{BillableItemAggregator, BillableItems};
pub use calculator::InvoiceTotals;
pub use ledger::PaymentLedger;
pub use lifecycle::{BillingSettings, Clock, InvoiceService};
pub use sequence::{SequenceGenerator, SequenceScope};
pub use statistics::{BillingSummary, StatisticsReporter, TimeUtilization};
pub use status::derive_status;
