//! The interception pipeline: request rewriting, response text extraction,
//! and tool-call marker detection.

pub mod detect;
pub mod extract;
pub mod rewrite;

pub use detect::{parse_tool_call, signature_of, Detection, TagDetector, DEFAULT_MARKER};
pub use extract::{extract, extract_by_paths, extract_text, ExtractState};
pub use rewrite::{
    write_prompt_paths, Injection, PathWrites, RequestRewriter, RequestTemplate, RewriteOutcome,
    RewriteStatus,
};
