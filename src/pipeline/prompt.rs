//! Prompt templates and `{{key}}` substitution.
//!
//! Templates live under `config/prompts/` and are compiled into the binary so
//! a run never depends on the working directory.

pub const CYPHER_GENERATION: &str = include_str!("../../config/prompts/cypher_generation.txt");
pub const CYPHER_REPAIR: &str = include_str!("../../config/prompts/cypher_repair.txt");
pub const ANSWER_SYNTHESIS: &str = include_str!("../../config/prompts/answer_synthesis.txt");

/// Substitute `{{key}}` placeholders in a single pass.
///
/// Substituted values are never re-scanned, so a question that happens to
/// contain `{{schema}}` stays literal. Unknown placeholders are kept as-is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}
