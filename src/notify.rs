//! Outbound email, sent through the effects channel.

use crate::core::config::EmailConfig;
use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

fn transport(config: &EmailConfig) -> Result<SmtpTransport> {
    let creds = Credentials::new(config.username.clone(), config.password.clone());
    Ok(SmtpTransport::relay(&config.smtp_server)
        .context("invalid SMTP relay")?
        .port(config.smtp_port)
        .credentials(creds)
        .build())
}

pub fn send_quotation_email(
    config: &EmailConfig,
    to: &str,
    customer_name: &str,
    quote_number: &str,
    total: &str,
    pdf_url: Option<&str>,
) -> Result<()> {
    let link = match pdf_url {
        Some(url) => format!("\n\nYou can download the full quotation here: {url}"),
        None => String::new(),
    };
    let body = format!(
        "Hello {customer_name},\n\nYour travel quotation {quote_number} is ready. \
         The total comes to {total}.{link}\n\nReply to this email with any questions \
         and your advisor will get back to you.\n",
    );

    let email = Message::builder()
        .from(config.from.parse().context("invalid from address")?)
        .to(to.parse().context("invalid recipient address")?)
        .subject(format!("Your travel quotation {quote_number}"))
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .context("failed to build email")?;

    transport(config)?
        .send(&email)
        .context("failed to send quotation email")?;
    log::info!("sent quotation email {quote_number} to {to}");
    Ok(())
}

pub fn send_welcome_email(config: &EmailConfig, to: &str, customer_name: &str) -> Result<()> {
    let body = format!(
        "Hello {customer_name},\n\nThanks for getting in touch. One of our travel \
         advisors will contact you shortly to put together your trip.\n",
    );

    let email = Message::builder()
        .from(config.from.parse().context("invalid from address")?)
        .to(to.parse().context("invalid recipient address")?)
        .subject("We received your travel inquiry")
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .context("failed to build email")?;

    transport(config)?
        .send(&email)
        .context("failed to send welcome email")?;
    Ok(())
}

pub fn send_ticket_opened_email(
    config: &EmailConfig,
    to: &str,
    ticket_number: &str,
    subject: &str,
) -> Result<()> {
    let body = format!(
        "We opened support ticket {ticket_number} for you:\n\n  {subject}\n\n\
         Our team will follow up shortly. Keep this ticket number handy when \
         contacting us.\n",
    );

    let email = Message::builder()
        .from(config.from.parse().context("invalid from address")?)
        .to(to.parse().context("invalid recipient address")?)
        .subject(format!("Support ticket {ticket_number} opened"))
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .context("failed to build email")?;

    transport(config)?
        .send(&email)
        .context("failed to send ticket email")?;
    Ok(())
}
