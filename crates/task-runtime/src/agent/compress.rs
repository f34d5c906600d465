//! Context window compression (see the turn protocol in [`super`]).
//!
//! Keeps the first system message and the most recent messages verbatim;
//! everything in between is collapsed into one synthetic assistant message
//! extracting tool names, "findings", and "decisions" out of the discarded
//! text. Oversize messages and oversize structured tool results are
//! truncated regardless of whether compression triggered.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use task_core::llm::{ChatMessage, ChatRole};

const MAX_MESSAGE_CHARS: usize = 8_000;
const MAX_STRUCTURED_ARRAY_ITEMS: usize = 5;
const MAX_STRUCTURED_STRING_CHARS: usize = 100;
const MAX_SUMMARIZED_TOOL_NAMES: usize = 10;
const MAX_FINDINGS: usize = 5;
const MAX_DECISIONS: usize = 5;

#[derive(Copy, Clone, Debug)]
pub struct CompressionConfig {
    pub max_tokens: i64,
    pub reserve_tokens: i64,
    pub summary_threshold: f64,
    pub keep_recent_messages: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_tokens: 128_000,
            reserve_tokens: 4_096,
            summary_threshold: 0.75,
            keep_recent_messages: 10,
        }
    }
}

pub fn estimated_tokens(messages: &[ChatMessage]) -> i64 {
    messages.iter().map(ChatMessage::estimated_tokens).sum()
}

/// Compress a transcript to fit the configured budget. Idempotent: once a
/// transcript has been summarized its token count falls well under the
/// threshold, so a second pass leaves it unchanged (modulo the always-applied
/// per-message truncation, which is itself idempotent).
pub fn compress(messages: &[ChatMessage], config: &CompressionConfig) -> Vec<ChatMessage> {
    let budget = (config.max_tokens - config.reserve_tokens).max(0) as f64;
    let total = estimated_tokens(messages) as f64;

    let mut out = if total > budget * config.summary_threshold {
        summarize(messages, config)
    } else {
        messages.to_vec()
    };

    for message in &mut out {
        message.content = truncate_content(&message.content);
    }

    out
}

fn summarize(messages: &[ChatMessage], config: &CompressionConfig) -> Vec<ChatMessage> {
    let (system, rest) = match messages.first() {
        Some(first) if matches!(first.role, ChatRole::System) => (Some(first.clone()), &messages[1..]),
        _ => (None, messages),
    };

    if rest.len() <= config.keep_recent_messages {
        let mut out = Vec::with_capacity(messages.len());
        out.extend(system);
        out.extend_from_slice(rest);
        return out;
    }

    let split = rest.len() - config.keep_recent_messages;
    let (old, recent) = rest.split_at(split);

    let mut out = Vec::with_capacity(2 + recent.len());
    out.extend(system);
    out.push(summary_message(old));
    out.extend_from_slice(recent);
    out
}

fn summary_message(old: &[ChatMessage]) -> ChatMessage {
    let tool_names = extract_tool_names(old);
    let findings = extract_findings(old);
    let decisions = extract_decisions(old);

    let mut summary = format!("[compressed {} earlier message(s)]", old.len());

    if !tool_names.is_empty() {
        summary.push_str("\nTools used: ");
        summary.push_str(&tool_names.join(", "));
    }
    if !findings.is_empty() {
        summary.push_str("\nFindings:\n");
        for finding in &findings {
            summary.push_str("- ");
            summary.push_str(finding);
            summary.push('\n');
        }
    }
    if !decisions.is_empty() {
        summary.push_str("Decisions:\n");
        for decision in &decisions {
            summary.push_str("- ");
            summary.push_str(decision);
            summary.push('\n');
        }
    }

    ChatMessage::assistant(summary)
}

fn extract_tool_names(messages: &[ChatMessage]) -> Vec<String> {
    let mut names = Vec::new();

    for message in messages {
        if !matches!(message.role, ChatRole::Tool) {
            continue;
        }

        let Some(name) = &message.name else { continue };
        if names.iter().any(|seen: &String| seen.trim_start_matches(['✓', '✗', ' ']) == name) {
            continue;
        }

        let failed = message.content.to_lowercase().contains("\"success\":false")
            || message.content.to_lowercase().starts_with("error");
        names.push(format!("{} {name}", if failed { "\u{2717}" } else { "\u{2713}" }));

        if names.len() >= MAX_SUMMARIZED_TOOL_NAMES {
            break;
        }
    }

    names
}

static FINDING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:Found|Discovered|Identified|Located):\s*(.+)").unwrap());

static DECISION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bI (?:will|should|must) (.+?)(?:\.|$))|(?:\b(?:Decision|Plan|Next step):\s*(.+))")
        .unwrap()
});

fn extract_findings(messages: &[ChatMessage]) -> Vec<String> {
    extract_matches(messages, &FINDING_RE, MAX_FINDINGS)
}

fn extract_decisions(messages: &[ChatMessage]) -> Vec<String> {
    extract_matches(messages, &DECISION_RE, MAX_DECISIONS)
}

fn extract_matches(messages: &[ChatMessage], re: &Regex, limit: usize) -> Vec<String> {
    let mut found = Vec::new();

    'outer: for message in messages {
        for line in message.content.lines() {
            let Some(caps) = re.captures(line) else { continue };
            let phrase = caps
                .iter()
                .skip(1)
                .find_map(|g| g.map(|m| m.as_str().trim().to_owned()));

            if let Some(phrase) = phrase {
                if !phrase.is_empty() {
                    found.push(phrase);
                }
            }

            if found.len() >= limit {
                break 'outer;
            }
        }
    }

    found
}

fn truncate_content(content: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<Value>(content) {
        if value.is_object() || value.is_array() {
            truncate_json(&mut value);
            return value.to_string();
        }
    }

    truncate_plain(content)
}

fn truncate_plain(content: &str) -> String {
    if content.chars().count() <= MAX_MESSAGE_CHARS {
        return content.to_owned();
    }

    let truncated: String = content.chars().take(MAX_MESSAGE_CHARS).collect();
    format!("{truncated}…")
}

/// Parses the `"…{n} more items"` sentinel [`truncate_json`] appends to a
/// truncated array, so a second compression pass folds the already-dropped
/// count into its own instead of re-truncating the sentinel as fresh data.
fn parse_more_items_sentinel(s: &str) -> Option<usize> {
    s.strip_prefix('…')?.strip_suffix(" more items")?.parse().ok()
}

fn truncate_json(value: &mut Value) {
    match value {
        Value::Array(items) => {
            let already_dropped = match items.last() {
                Some(Value::String(s)) => parse_more_items_sentinel(s),
                _ => None,
            };
            if already_dropped.is_some() {
                items.pop();
            }

            for item in items.iter_mut() {
                truncate_json(item);
            }

            if items.len() > MAX_STRUCTURED_ARRAY_ITEMS {
                let more = items.len() - MAX_STRUCTURED_ARRAY_ITEMS + already_dropped.unwrap_or(0);
                items.truncate(MAX_STRUCTURED_ARRAY_ITEMS);
                items.push(Value::String(format!("…{more} more items")));
            } else if let Some(more) = already_dropped {
                items.push(Value::String(format!("…{more} more items")));
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                truncate_json(v);
            }
        }
        Value::String(s) => {
            if s.chars().count() > MAX_STRUCTURED_STRING_CHARS {
                let truncated: String = s.chars().take(MAX_STRUCTURED_STRING_CHARS).collect();
                *s = format!("{truncated}…");
            }
        }
        _ => (),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: ChatRole, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.to_owned(),
            tool_call_id: None,
            name: None,
        }
    }

    #[test]
    fn leaves_small_transcripts_untouched() {
        let messages = vec![
            msg(ChatRole::System, "you are an agent"),
            msg(ChatRole::User, "do the thing"),
        ];
        let compressed = compress(&messages, &CompressionConfig::default());
        assert_eq!(compressed.len(), 2);
    }

    #[test]
    fn is_idempotent() {
        let config = CompressionConfig {
            max_tokens: 100,
            reserve_tokens: 0,
            summary_threshold: 0.5,
            keep_recent_messages: 2,
        };

        let mut messages = vec![msg(ChatRole::System, "system prompt")];
        for i in 0..40 {
            messages.push(msg(ChatRole::Assistant, &format!("message number {i} with some padding text")));
        }

        let once = compress(&messages, &config);
        let twice = compress(&once, &config);

        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.content, b.content);
        }
    }

    #[test]
    fn truncates_oversize_structured_results() {
        let content = serde_json::json!({
            "items": (0..20).map(|i| format!("item-{i}")).collect::<Vec<_>>(),
        })
        .to_string();

        let truncated = truncate_content(&content);
        let value: Value = serde_json::from_str(&truncated).unwrap();
        assert_eq!(value["items"].as_array().unwrap().len(), MAX_STRUCTURED_ARRAY_ITEMS + 1);
    }

    #[test]
    fn truncating_an_already_truncated_array_is_a_no_op() {
        let content = serde_json::json!({
            "items": (0..20).map(|i| format!("item-{i}")).collect::<Vec<_>>(),
        })
        .to_string();

        let once = truncate_content(&content);
        let twice = truncate_content(&once);
        assert_eq!(once, twice);

        let value: Value = serde_json::from_str(&twice).unwrap();
        let items = value["items"].as_array().unwrap();
        assert_eq!(items.len(), MAX_STRUCTURED_ARRAY_ITEMS + 1);
        assert_eq!(items.last().unwrap(), "…15 more items");
    }
}
