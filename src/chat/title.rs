// ABOUTME: Conversation title helpers for provisional titles and model-generated titles
// ABOUTME: Builds the title prompt and cleans the model's answer into a stored title
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use crate::constants::limits::{MAX_TITLE_CHARS, TITLE_CONTEXT_CHARS};

/// Quote characters stripped from both ends of a generated title
const TITLE_QUOTES: &[char] = &['"', '\'', '`', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}'];

/// Title assigned to a new conversation before the model names it
pub fn provisional_title(user_content: &str) -> String {
    user_content.trim().chars().take(MAX_TITLE_CHARS).collect()
}

/// Single-message prompt asking the model to name the conversation
pub fn title_prompt(user_content: &str, assistant_content: &str) -> String {
    let user: String = user_content.chars().take(TITLE_CONTEXT_CHARS).collect();
    let assistant: String = assistant_content.chars().take(TITLE_CONTEXT_CHARS).collect();
    format!(
        "Write a short title for the following conversation. \
         Use at most eight words and no quotes or punctuation. \
         Reply with the title only.\n\nUser: {user}\nAssistant: {assistant}"
    )
}

/// Normalize the model's answer; `None` when nothing usable remains
pub fn clean_title(raw: &str) -> Option<String> {
    let title: String = raw
        .trim()
        .trim_matches(TITLE_QUOTES)
        .trim()
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    (!title.is_empty()).then_some(title)
}
