//! Prompt text for patch and summary requests
use crate::provider::{CompletionRequest, Encoding, ResponseSchema};

/// Shared instructions for patch requests
pub const PATCH_INSTRUCTIONS: &str = r#"You are an expert Go programmer working in a test-driven loop.

You will be given:
1. The git log of the attempts made so far in this session (may be empty)
2. The test file, which is the specification and must not be changed
3. The current implementation file
4. The output of running the tests against it

Make the tests pass by rewriting the implementation file.

Rules:
- Return the COMPLETE contents of the implementation file, never a diff or a fragment
- Keep the package name used by the test file
- Do not repeat an approach the log shows has already failed
- Keep the commit message to one short imperative line"#;

const PATCH_JSON_FORMAT: &str = r#"Respond with a JSON object with these fields:
- "plan": a short explanation of what is wrong and how you will fix it
- "code": the full new implementation file
- "commit_message": a one-line summary of the change"#;

const PATCH_SECTIONS_FORMAT: &str = r#"Respond with exactly these sections, in this order:

<plan>
A short explanation of what is wrong and how you will fix it.
</plan>
<code>
The full new implementation file, without markdown fences.
</code>
<commit_message>
A one-line summary of the change.
</commit_message>"#;

/// Shared instructions for squash summaries
pub const SUMMARY_INSTRUCTIONS: &str = r#"You write git commit messages.

You will be given the log of several work-in-progress commits that together made a test suite pass. They are about to be squashed into one commit.

Write a single commit message for the combined change: a short imperative subject line, optionally followed by a blank line and a brief body. Describe the final result, not the individual attempts."#;

const SUMMARY_JSON_FORMAT: &str = r#"Respond with a JSON object with a single "commit_message" field."#;

const SUMMARY_SECTIONS_FORMAT: &str = r#"Respond with the message inside a single section:

<commit_message>
Subject line

Optional body.
</commit_message>"#;

/// Inputs of one patch request
#[derive(Debug, Clone, Copy)]
pub struct PatchContext<'a> {
    pub log: &'a str,
    pub test_file: &'a str,
    pub test_source: &'a str,
    pub implementation_file: &'a str,
    pub implementation_source: &'a str,
    pub test_output: &'a str,
}

fn system(instructions: &str, format: &str) -> String {
    format!("{}\n\n{}", instructions, format)
}

/// Build the request asking for a new implementation
pub fn patch_request(encoding: Encoding, ctx: &PatchContext<'_>) -> CompletionRequest {
    let (format, schema) = match encoding {
        Encoding::Json => (PATCH_JSON_FORMAT, Some(ResponseSchema::patch())),
        Encoding::Sections => (PATCH_SECTIONS_FORMAT, None),
    };

    let log = if ctx.log.trim().is_empty() {
        "(no attempts yet)"
    } else {
        ctx.log
    };

    CompletionRequest {
        system: system(PATCH_INSTRUCTIONS, format),
        messages: vec![
            format!("Git log of this session:\n\n{}", log),
            format!("Test file `{}`:\n\n{}", ctx.test_file, ctx.test_source),
            format!(
                "Current implementation `{}`:\n\n{}",
                ctx.implementation_file, ctx.implementation_source
            ),
            format!("Test output:\n\n{}", ctx.test_output),
        ],
        schema,
    }
}

/// Build the request asking for a squash commit message
pub fn summary_request(encoding: Encoding, log: &str) -> CompletionRequest {
    let (format, schema) = match encoding {
        Encoding::Json => (SUMMARY_JSON_FORMAT, Some(ResponseSchema::summary())),
        Encoding::Sections => (SUMMARY_SECTIONS_FORMAT, None),
    };

    CompletionRequest {
        system: system(SUMMARY_INSTRUCTIONS, format),
        messages: vec![format!("Commits to squash:\n\n{}", log)],
        schema,
    }
}
