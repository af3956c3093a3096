// Paid document generation: resume, cover letter and refinement.
// All LLM calls go through llm_client, and every call is billed through credits::operation.

pub mod handlers;
pub mod prompts;
pub mod validation;
