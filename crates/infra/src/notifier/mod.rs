//! Confirmation-code delivery adapters.

mod webhook;

pub use webhook::WebhookNotifier;
