use std::sync::Arc;

use crate::auth::IdentityVerifier;
use crate::billing::webhook::WebhookVerifier;
use crate::config::Config;
use crate::credits::CreditLedger;
use crate::llm_client::TextGenerator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Credit ledger. Postgres in production; swap for `MemoryLedger` in tests.
    pub ledger: Arc<dyn CreditLedger>,
    /// Document generator. Default: the Anthropic `LlmClient`.
    pub generator: Arc<dyn TextGenerator>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub webhook: WebhookVerifier,
    pub config: Config,
}
