//! Axum route handlers for the paid document endpoints.
//!
//! Each handler validates its input, builds a prompt and hands the LLM call to
//! `PaidOperation`, which reserves the cost first and refunds it if the call fails.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::auth::VerifiedAccount;
use crate::credits::operation::PaidOperation;
use crate::credits::{Credits, OperationKind};
use crate::errors::AppError;
use crate::extract::AppJson;
use crate::generation::prompts::{
    COVER_LETTER_PROMPT_TEMPLATE, COVER_LETTER_SYSTEM_TEMPLATE, REFINE_PROMPT_TEMPLATE,
    REFINE_SYSTEM, RESUME_PROMPT_TEMPLATE, RESUME_SYSTEM,
};
use crate::generation::validation::{
    limit_text, require_text, MAX_COVER_LETTER_EXTRA_CHARS, MAX_HIRING_MANAGER_CHARS,
    MAX_JOB_DESCRIPTION_CHARS, MAX_REFINE_HTML_CHARS, MAX_REFINE_INSTRUCTION_CHARS,
    MAX_RESUME_TEXT_CHARS, MAX_STYLE_CHARS,
};
use crate::llm_client::prompts::{HTML_ONLY_SYSTEM, NO_INVENTION_INSTRUCTION};
use crate::state::AppState;

const DEFAULT_HIRING_MANAGER: &str = "Hiring Manager";
const NOT_PROVIDED: &str = "Not provided";

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateResumeRequest {
    pub resume_text: String,
    pub job_description: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateResumeResponse {
    pub html: String,
    pub credits_left: Credits,
}

#[derive(Debug, Deserialize)]
pub struct CoverLetterRequest {
    pub style: String,
    pub resume_text: String,
    pub job_description: String,
    pub hiring_manager: Option<String>,
    pub motivation: Option<String>,
    pub highlight: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CoverLetterResponse {
    pub cover_letter_html: String,
    pub credits_left: Credits,
}

#[derive(Debug, Deserialize)]
pub struct RefineRequest {
    pub html: String,
    pub instruction: String,
}

#[derive(Debug, Serialize)]
pub struct RefineResponse {
    pub updated_html: String,
    pub credits_left: Credits,
}

/// Prompt pair handed to the generator.
#[derive(Debug)]
struct Prompt {
    system: String,
    user: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/generate
///
/// Tailors the caller's resume to a job description. Costs 1 credit.
pub async fn handle_generate_resume(
    State(state): State<AppState>,
    VerifiedAccount(account_id): VerifiedAccount,
    AppJson(request): AppJson<GenerateResumeRequest>,
) -> Result<Json<GenerateResumeResponse>, AppError> {
    require_text("resume_text", &request.resume_text, MAX_RESUME_TEXT_CHARS)?;
    require_text(
        "job_description",
        &request.job_description,
        MAX_JOB_DESCRIPTION_CHARS,
    )?;

    let prompt = build_resume_prompt(&request);
    let (html, credits_left) =
        run_paid(&state, account_id, OperationKind::ResumeGeneration, prompt).await?;

    Ok(Json(GenerateResumeResponse { html, credits_left }))
}

/// POST /api/generate-cover-letter
///
/// Writes a cover letter in the requested visual style. Costs 1 credit.
pub async fn handle_generate_cover_letter(
    State(state): State<AppState>,
    VerifiedAccount(account_id): VerifiedAccount,
    AppJson(request): AppJson<CoverLetterRequest>,
) -> Result<Json<CoverLetterResponse>, AppError> {
    require_text("style", &request.style, MAX_STYLE_CHARS)?;
    require_text("resume_text", &request.resume_text, MAX_RESUME_TEXT_CHARS)?;
    require_text(
        "job_description",
        &request.job_description,
        MAX_JOB_DESCRIPTION_CHARS,
    )?;
    limit_text(
        "hiring_manager",
        request.hiring_manager.as_deref().unwrap_or_default(),
        MAX_HIRING_MANAGER_CHARS,
    )?;
    limit_text(
        "motivation",
        request.motivation.as_deref().unwrap_or_default(),
        MAX_COVER_LETTER_EXTRA_CHARS,
    )?;
    limit_text(
        "highlight",
        request.highlight.as_deref().unwrap_or_default(),
        MAX_COVER_LETTER_EXTRA_CHARS,
    )?;

    let prompt = build_cover_letter_prompt(&request);
    let (cover_letter_html, credits_left) =
        run_paid(&state, account_id, OperationKind::CoverLetter, prompt).await?;

    Ok(Json(CoverLetterResponse {
        cover_letter_html,
        credits_left,
    }))
}

/// POST /api/refine-resume
///
/// Applies one instruction to an existing HTML resume. Costs 0.5 credits.
pub async fn handle_refine_resume(
    State(state): State<AppState>,
    VerifiedAccount(account_id): VerifiedAccount,
    AppJson(request): AppJson<RefineRequest>,
) -> Result<Json<RefineResponse>, AppError> {
    require_text("html", &request.html, MAX_REFINE_HTML_CHARS)?;
    require_text(
        "instruction",
        &request.instruction,
        MAX_REFINE_INSTRUCTION_CHARS,
    )?;

    let prompt = build_refine_prompt(&request);
    let (updated_html, credits_left) =
        run_paid(&state, account_id, OperationKind::Refine, prompt).await?;

    Ok(Json(RefineResponse {
        updated_html,
        credits_left,
    }))
}

async fn run_paid(
    state: &AppState,
    account_id: String,
    kind: OperationKind,
    prompt: Prompt,
) -> Result<(String, Credits), AppError> {
    let generator = state.generator.clone();
    let outcome = PaidOperation::new(
        state.ledger.clone(),
        account_id,
        kind,
        state.config.operation_timeout(),
    )
    .run(async move { generator.generate(&prompt.user, &prompt.system).await })
    .await?;

    Ok((outcome.output, outcome.credits_left))
}

// ────────────────────────────────────────────────────────────────────────────
// Prompt builders
// ────────────────────────────────────────────────────────────────────────────

/// Fills `{key}` placeholders in one pass over the template. Substituted values are
/// never rescanned, so braces in caller text stay literal. Unknown keys are kept as is.
fn fill(template: &str, fields: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let field = after.find('}').and_then(|close| {
            let key = &after[..close];
            fields
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (close, *value))
        });
        match field {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn build_resume_prompt(request: &GenerateResumeRequest) -> Prompt {
    Prompt {
        system: RESUME_SYSTEM.to_string(),
        user: fill(
            RESUME_PROMPT_TEMPLATE,
            &[
                ("no_invention", NO_INVENTION_INSTRUCTION),
                ("html_only", HTML_ONLY_SYSTEM),
                ("job_description", request.job_description.trim()),
                ("resume_text", request.resume_text.trim()),
            ],
        ),
    }
}

fn build_cover_letter_prompt(request: &CoverLetterRequest) -> Prompt {
    let hiring_manager =
        non_blank(request.hiring_manager.as_deref()).unwrap_or(DEFAULT_HIRING_MANAGER);

    Prompt {
        system: fill(
            COVER_LETTER_SYSTEM_TEMPLATE,
            &[
                ("html_only", HTML_ONLY_SYSTEM),
                ("no_invention", NO_INVENTION_INSTRUCTION),
                ("style", request.style.trim()),
                ("hiring_manager", hiring_manager),
            ],
        ),
        user: fill(
            COVER_LETTER_PROMPT_TEMPLATE,
            &[
                ("job_description", request.job_description.trim()),
                ("resume_text", request.resume_text.trim()),
                (
                    "motivation",
                    non_blank(request.motivation.as_deref()).unwrap_or(NOT_PROVIDED),
                ),
                (
                    "highlight",
                    non_blank(request.highlight.as_deref()).unwrap_or(NOT_PROVIDED),
                ),
            ],
        ),
    }
}

fn build_refine_prompt(request: &RefineRequest) -> Prompt {
    Prompt {
        system: format!("{REFINE_SYSTEM} {HTML_ONLY_SYSTEM}"),
        user: fill(
            REFINE_PROMPT_TEMPLATE,
            &[
                ("instruction", request.instruction.trim()),
                ("html", &request.html),
            ],
        ),
    }
}
