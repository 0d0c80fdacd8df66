//! Markdown to WhatsApp text conversion.

use std::sync::LazyLock;

use regex::Regex;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}###\s+").expect("valid heading regex"));

/// Adapt assistant markdown for WhatsApp.
///
/// `**bold**` becomes `*bold*` and `### ` headings (up to three leading
/// spaces) are stripped. Inline code and fenced code blocks are left as is.
pub fn whatsapp_text(input: &str) -> String {
    let converted = convert_bold(input);

    let mut in_block = false;
    let lines: Vec<String> = converted
        .lines()
        .map(|line| {
            let out = if in_block {
                line.to_string()
            } else {
                HEADING_RE.replace(line, "").into_owned()
            };
            if line.matches("```").count() % 2 == 1 {
                in_block = !in_block;
            }
            out
        })
        .collect();

    let mut result = lines.join("\n");
    if converted.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn convert_bold(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut in_block = false;
    let mut in_inline = false;

    while let Some(c) = rest.chars().next() {
        if !in_inline && rest.starts_with("```") {
            in_block = !in_block;
            out.push_str("```");
            rest = &rest[3..];
        } else if !in_block && c == '`' {
            in_inline = !in_inline;
            out.push('`');
            rest = &rest[1..];
        } else if !in_block && !in_inline && rest.starts_with("**") {
            out.push('*');
            rest = &rest[2..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}
