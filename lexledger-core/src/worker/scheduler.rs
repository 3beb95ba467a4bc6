use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{error, info};

use crate::billing::InvoiceService;
use crate::error::BillingResult;

/// Periodic overdue sweep.
///
/// The billing engine derives `overdue` only when an invoice is touched.
/// This loop touches every open invoice past its due date so the stored
/// status catches up without waiting for the next payment or update.
pub struct OverdueSweeper {
    invoices: Arc<InvoiceService>,

    /// Polling interval in seconds
    poll_interval_seconds: u64,

    /// Whether the sweeper is running (wrapped in Arc for sharing)
    running: Arc<RwLock<bool>>,
}

impl OverdueSweeper {
    /// Creates a new sweeper; the interval defaults to 60 seconds.
    pub fn new(invoices: Arc<InvoiceService>, poll_interval_seconds: Option<u64>) -> Self {
        Self {
            invoices,
            poll_interval_seconds: poll_interval_seconds.unwrap_or(60),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Runs until [`stop`](Self::stop) is called.
    ///
    /// Errors in a single pass are logged and the loop keeps going.
    pub async fn start(&self) {
        *self.running.write().await = true;
        info!(
            "OverdueSweeper started with poll interval: {} seconds",
            self.poll_interval_seconds
        );

        while *self.running.read().await {
            match self.sweep().await {
                Ok(count) if count > 0 => info!("Marked {} invoice(s) overdue", count),
                Ok(_) => {}
                Err(e) => error!("Error in overdue sweep: {}", e),
            }

            sleep(Duration::from_secs(self.poll_interval_seconds)).await;
        }

        info!("OverdueSweeper stopped");
    }

    /// Sets the running flag to false; the loop exits after the current pass.
    pub async fn stop(&self) {
        info!("Stopping OverdueSweeper...");
        *self.running.write().await = false;
    }

    /// One pass: re-derives the status of every open past-due invoice.
    ///
    /// Returns how many invoices changed status.
    pub async fn sweep(&self) -> BillingResult<usize> {
        let today = self.invoices.today();
        let candidates = self.invoices.overdue(today).await?;

        let mut changed = 0;
        for invoice in candidates {
            match self.invoices.refresh_status(invoice.id, today).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "Failed to refresh invoice {}: {}",
                        invoice.invoice_number, e
                    );
                }
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::BillingSettings;
    use crate::models::{Client, CreateInvoice, InvoiceStatus, NewInvoiceItem};
    use crate::notifier::testing::RecordingNotifier;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_sweep_marks_sent_invoices_overdue() {
        let store = Arc::new(MemoryStore::new());
        let client_id = Uuid::new_v4();
        store
            .insert_client(Client {
                id: client_id,
                name: "Acme Corp".to_string(),
                email: None,
                is_deleted: false,
            })
            .await;
        let invoices = Arc::new(
            InvoiceService::new(
                store.clone(),
                Arc::new(RecordingNotifier::default()),
                BillingSettings::default(),
            )
            .with_clock(Arc::new(|| date(2024, 6, 1))),
        );

        let create = |due: NaiveDate| CreateInvoice {
            client: Some(client_id),
            items: vec![NewInvoiceItem {
                description: "Retainer".to_string(),
                amount: Some(dec!(500)),
                ..Default::default()
            }],
            issue_date: Some(date(2024, 4, 1)),
            due_date: Some(due),
            ..Default::default()
        };

        let late = invoices.create(create(date(2024, 5, 1)), Uuid::new_v4()).await.unwrap();
        let current = invoices.create(create(date(2024, 7, 1)), Uuid::new_v4()).await.unwrap();
        let draft = invoices.create(create(date(2024, 5, 1)), Uuid::new_v4()).await.unwrap();
        invoices.send(late.id).await.unwrap();
        invoices.send(current.id).await.unwrap();

        let sweeper = OverdueSweeper::new(invoices.clone(), Some(1));
        assert_eq!(sweeper.sweep().await.unwrap(), 1);
        assert_eq!(sweeper.sweep().await.unwrap(), 0);

        assert_eq!(invoices.get(late.id).await.unwrap().status, InvoiceStatus::Overdue);
        assert_eq!(invoices.get(current.id).await.unwrap().status, InvoiceStatus::Sent);
        assert_eq!(invoices.get(draft.id).await.unwrap().status, InvoiceStatus::Draft);
    }
}
