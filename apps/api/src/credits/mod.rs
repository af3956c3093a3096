// Credit ledger: balances, reservations, refunds and payment grants.
// Every paid LLM call goes through `operation::PaidOperation`; nothing mutates a
// balance except the `CreditLedger` methods.

pub mod amount;
pub mod costs;
pub mod handlers;
pub mod ledger;
pub mod memory;
pub mod operation;
pub mod postgres;

pub use amount::Credits;
pub use costs::OperationKind;
pub use ledger::CreditLedger;
pub use memory::MemoryLedger;
pub use postgres::PgLedger;
