// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The 4-strategy splitter cascade (spec §4.9 step 8): headers, then
//! fenced code blocks, then paragraph breaks, then a hard split, each
//! level only engaged when the previous one leaves a piece still over the
//! limit.

const DEFAULT_MAX_LEN: usize = 3000;

/// Split `text` into chunks no longer than `max_len` (chars), preferring to
/// break at structural boundaries before falling back to a hard cut.
///
/// Header splitting (§4.9 step 8a) carries no "when over the limit"
/// qualifier, unlike the paragraph strategy (8c): whenever `text` contains
/// more than one h2/h3 section, each section becomes its own chunk even if
/// the whole text already fits under `max_len`. The single-chunk fast path
/// below only applies when there is nothing to split on in the first place.
pub fn split_for_posting(text: &str, max_len: usize) -> Vec<String> {
    let max_len = if max_len == 0 { DEFAULT_MAX_LEN } else { max_len };
    let sections = split_on_headers(text);
    if sections.len() <= 1 && char_len(text) <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    for section in sections {
        chunks.extend(split_section(&section, max_len));
    }
    chunks
}

/// Runs the fence/paragraph/hard-split cascade over one header section.
/// Pieces are packed together only within this section — never across a
/// header boundary, since each header section is its own chunk.
fn split_section(section: &str, max_len: usize) -> Vec<String> {
    if char_len(section) <= max_len {
        return vec![section.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    for block in split_on_fences(section) {
        let is_fenced_block = block.trim_start().starts_with("```");
        if char_len(&block) <= max_len || is_fenced_block {
            // A fenced block is never torn open even if it runs over
            // the limit; preserving the fence pair wins over packing.
            push_packed(&mut chunks, block, max_len);
            continue;
        }
        for para in split_on_paragraphs(&block) {
            if char_len(&para) <= max_len {
                push_packed(&mut chunks, para, max_len);
            } else {
                for hard in hard_split(&para, max_len) {
                    push_packed(&mut chunks, hard, max_len);
                }
            }
        }
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Append `piece` to the last chunk if it still fits under `max_len`,
/// otherwise start a new chunk. Keeps small adjacent pieces (e.g. short
/// paragraphs) from becoming one message each.
fn push_packed(chunks: &mut Vec<String>, piece: String, max_len: usize) {
    if piece.is_empty() {
        return;
    }
    if let Some(last) = chunks.last_mut() {
        let combined_len = char_len(last) + 2 + char_len(&piece);
        if combined_len <= max_len {
            last.push_str("\n\n");
            last.push_str(&piece);
            return;
        }
    }
    chunks.push(piece);
}

/// Split on h2/h3 markdown headers (`## ` / `### `), keeping each header
/// with the section it introduces. Text before the first header (if any)
/// is its own leading section.
fn split_on_headers(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        let is_header = trimmed.starts_with("## ") || trimmed.starts_with("### ");
        if is_header && !current.is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        sections.push(current);
    }
    if sections.is_empty() {
        sections.push(text.to_string());
    }
    sections
}

/// Split into alternating fenced-code and plain-text blocks, so later
/// splitting stages never cut inside a ``` ... ``` pair.
fn split_on_fences(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        let is_fence_delim = line.trim_start().starts_with("```");
        if is_fence_delim && !in_fence {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            in_fence = true;
            current.push_str(line);
            continue;
        }
        if is_fence_delim && in_fence {
            current.push('\n');
            current.push_str(line);
            blocks.push(std::mem::take(&mut current));
            in_fence = false;
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn split_on_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n").map(str::to_string).collect()
}

/// Cut at the last newline at or before `max_len` chars; if none exists,
/// cut exactly at `max_len`.
fn hard_split(text: &str, max_len: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= max_len {
            out.push(chars[start..].iter().collect());
            break;
        }

        let window = &chars[start..start + max_len];
        let cut = window
            .iter()
            .rposition(|&c| c == '\n')
            .map(|pos| pos + 1)
            .unwrap_or(max_len);
        let cut = if cut == 0 { max_len } else { cut };

        out.push(chars[start..start + cut].iter().collect());
        start += cut;
    }
    out
}
