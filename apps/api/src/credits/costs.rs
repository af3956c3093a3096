use std::fmt;

use serde::Serialize;

use crate::credits::Credits;

/// Cost of a full resume or cover-letter generation.
pub const GENERATE_COST: Credits = Credits::from_whole(1);
/// Cost of refining an already generated resume.
pub const REFINE_COST: Credits = Credits::from_millis(500);

/// Every paid operation the API performs. Each kind has a fixed cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ResumeGeneration,
    CoverLetter,
    Refine,
}

impl OperationKind {
    pub const fn cost(self) -> Credits {
        match self {
            OperationKind::ResumeGeneration | OperationKind::CoverLetter => GENERATE_COST,
            OperationKind::Refine => REFINE_COST,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OperationKind::ResumeGeneration => "resume_generation",
            OperationKind::CoverLetter => "cover_letter",
            OperationKind::Refine => "refine",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
