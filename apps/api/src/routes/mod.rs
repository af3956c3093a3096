pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::billing::handlers::{handle_list_payments, handle_webhook};
use crate::credits::handlers as credits;
use crate::generation::handlers as generation;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Account & balance
        .route("/api/account", post(credits::handle_open_account))
        .route("/api/credits", get(credits::handle_get_credits))
        .route("/api/credits/history", get(credits::handle_credit_history))
        // Paid generation
        .route("/api/generate", post(generation::handle_generate_resume))
        .route(
            "/api/generate-cover-letter",
            post(generation::handle_generate_cover_letter),
        )
        .route("/api/refine-resume", post(generation::handle_refine_resume))
        // Billing (the webhook is authenticated by signature, not bearer token)
        .route("/api/billing/payments", get(handle_list_payments))
        .route("/api/billing/webhook", post(handle_webhook))
        .with_state(state)
}
