//! Outbound email seam.
//!
//! The billing engine only needs "send this template to this address";
//! delivery belongs to a separate service.

pub mod templates;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

pub use templates::{RenderedEmail, TemplateRenderer, INVOICE_NOTIFICATION};

#[async_trait]
pub trait EmailNotifier: Send + Sync {
    /// Sends a templated email. Returns `false` on any failure.
    async fn send_template_email(&self, template: &str, recipient: &str, variables: &Value) -> bool;
}

/// Renders the template and writes the email to the log instead of a mail server.
pub struct LogNotifier {
    renderer: TemplateRenderer,
}

impl LogNotifier {
    pub fn new() -> Result<Self, minijinja::Error> {
        Ok(Self {
            renderer: TemplateRenderer::new()?,
        })
    }
}

#[async_trait]
impl EmailNotifier for LogNotifier {
    async fn send_template_email(&self, template: &str, recipient: &str, variables: &Value) -> bool {
        let email = match self.renderer.render(template, variables) {
            Ok(email) => email,
            Err(e) => {
                warn!("Failed to render template {}: {}", template, e);
                return false;
            }
        };

        info!("Sending email to {}", recipient);
        info!("Subject: {}", email.subject);
        info!(
            "Body preview: {}...",
            email.body.chars().take(100).collect::<String>()
        );
        true
    }
}
