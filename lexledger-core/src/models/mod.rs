pub mod client;
pub mod expense;
pub mod invoice;
pub mod payment;
pub mod report;
pub mod time_entry;

pub use client::{Case, Client};
pub use expense::{Expense, ExpenseStatus};
pub use invoice::{
    CreateInvoice, GenerateInvoice, Invoice, InvoiceDetail, InvoiceFilter, InvoiceItem,
    InvoiceStatus, NewInvoiceItem, SourceLinks, UpdateInvoice,
};
pub use payment::{NewPayment, Payment, PaymentMethod};
pub use report::{MonthAmount, MonthlyBreakdown, ReportRange, StatusSummary, TimeTotals};
pub use time_entry::TimeEntry;
