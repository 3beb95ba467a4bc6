use minijinja::Environment;
use serde_json::Value;

/// Template sent when an invoice goes out to a client.
pub const INVOICE_NOTIFICATION: &str = "invoiceNotification";

const INVOICE_NOTIFICATION_SUBJECT: &str =
    "Invoice {{ invoiceNumber }} from {{ companyName }}";

const INVOICE_NOTIFICATION_BODY: &str = r#"Dear {{ clientName }},

Please find below the details of invoice {{ invoiceNumber }}.

Subtotal: {{ subtotal }}
Tax ({{ taxRate }}%): {{ taxAmount }}
Total: {{ total }}

Amount due: {{ amount }}
Due date: {{ dueDate }}

Thank you for your business.

{{ companyName }}"#;

/// Rendered subject and body of an email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

/// Named email templates, each registered as `<name>.subject` and `<name>.body`.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(
            "invoiceNotification.subject",
            INVOICE_NOTIFICATION_SUBJECT,
        )?;
        env.add_template("invoiceNotification.body", INVOICE_NOTIFICATION_BODY)?;
        Ok(Self { env })
    }

    pub fn render(&self, template: &str, variables: &Value) -> Result<RenderedEmail, minijinja::Error> {
        let subject = self
            .env
            .get_template(&format!("{}.subject", template))?
            .render(variables)?;
        let body = self
            .env
            .get_template(&format!("{}.body", template))?
            .render(variables)?;
        Ok(RenderedEmail { subject, body })
    }
}
