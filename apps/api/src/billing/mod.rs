// Billing: credit packs and the payment-provider webhook that grants them.
// Checkout-session creation lives with the frontend; this service only consumes
// completed payments.

pub mod handlers;
pub mod packs;
pub mod webhook;
