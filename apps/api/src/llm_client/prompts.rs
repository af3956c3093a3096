// Shared prompt fragments.
// Each feature that calls the LLM keeps its own prompts alongside it; this file holds
// cross-cutting pieces.

/// System prompt fragment that enforces raw HTML output.
pub const HTML_ONLY_SYSTEM: &str = "\
    Return ONLY the HTML content inside a single container element. \
    Do NOT include <html>, <head> or <body> tags. \
    Embed any CSS in a <style> tag inside the container. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction appended to every generation prompt.
pub const NO_INVENTION_INSTRUCTION: &str = "\
    CRITICAL: Do NOT invent experience, employers, dates, degrees or skills. \
    Every claim must be supported by the candidate material provided. \
    If the material does not support a claim, omit it.";
