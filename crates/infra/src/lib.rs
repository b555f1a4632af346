//! Infrastructure layer: credential store and code delivery adapters.

pub mod credential_store;
pub mod notifier;


pub use credential_store::{InMemoryCredentialStore, PostgresCredentialStore};
pub use notifier::WebhookNotifier;
