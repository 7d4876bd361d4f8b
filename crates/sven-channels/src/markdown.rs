// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Markdown-to-platform dialect translation (spec §4.9 step 8), run on each
//! chunk after code-block protection so fence contents are never rewritten.

use regex::Regex;
use std::sync::OnceLock;

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,6})\s+(.*)$").unwrap())
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(.+?)\*\*").unwrap())
}

fn strike_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"~~(.+?)~~").unwrap())
}

fn image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap())
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]*)\]\(([^)]+)\)").unwrap())
}

/// Translate common markdown constructs into the plainer dialect most chat
/// platforms render: headers become bold lines, `**bold**` collapses to
/// `*bold*`, `~~strike~~` to `~strike~`, links/images are rewritten inline,
/// and pipe tables become bullet lists. Fenced code blocks are left
/// untouched by the caller splitting them out first.
pub fn translate_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for block in protect_fences(text) {
        match block {
            Block::Fence(raw) => out.push_str(&raw),
            Block::Plain(raw) => out.push_str(&translate_plain(&raw)),
        }
    }
    out
}

enum Block {
    Fence(String),
    Plain(String),
}

fn protect_fences(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        let is_delim = line.trim_start().starts_with("```");
        if is_delim {
            if in_fence {
                current.push('\n');
                current.push_str(line);
                blocks.push(Block::Fence(std::mem::take(&mut current)));
                in_fence = false;
            } else {
                if !current.is_empty() {
                    blocks.push(Block::Plain(std::mem::take(&mut current)));
                }
                current.push_str(line);
                in_fence = true;
            }
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        blocks.push(if in_fence { Block::Fence(current) } else { Block::Plain(current) });
    }
    blocks
}

fn translate_plain(text: &str) -> String {
    let text = header_re().replace_all(text, |caps: &regex::Captures| format!("*{}*", &caps[2]));
    let text = bold_re().replace_all(&text, "*$1*");
    let text = strike_re().replace_all(&text, "~$1~");
    let text = image_re().replace_all(&text, |caps: &regex::Captures| {
        let alt = &caps[1];
        let url = &caps[2];
        if alt.is_empty() {
            url.to_string()
        } else {
            format!("{alt}: {url}")
        }
    });
    let text = link_re().replace_all(&text, "$1 ($2)");
    translate_tables(&text)
}

/// Turn pipe-delimited markdown tables into bullet lists: one bullet per
/// data row, `column: value` pairs joined by `, `. Separator rows
/// (`---|---`) are dropped.
fn translate_tables(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let looks_like_header = is_table_row(line);
        let next_is_separator = lines.get(i + 1).map(|l| is_separator_row(l)).unwrap_or(false);

        if looks_like_header && next_is_separator {
            let headers = split_row(line);
            i += 2;
            while i < lines.len() && is_table_row(lines[i]) {
                let values = split_row(lines[i]);
                let pairs: Vec<String> = headers
                    .iter()
                    .zip(values.iter())
                    .map(|(h, v)| format!("{h}: {v}"))
                    .collect();
                out.push(format!("- {}", pairs.join(", ")));
                i += 1;
            }
            continue;
        }

        out.push(line.to_string());
        i += 1;
    }

    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 1
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    is_table_row(trimmed) && trimmed.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn split_row(line: &str) -> Vec<String> {
    line.trim()
        .trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect()
}
