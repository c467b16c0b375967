//! Non-destructive trimming of large tool results.
//!
//! Flushing rewrites the content of `tool` messages in an outbound message
//! list only. Session history is never touched, so the full tool output is
//! always available to rebuild from.

use crate::llm::{Content, Message};
use crate::timestamp;
use crate::types::{ContextMode, FlushSeverity};

/// Marker inserted where tool output was cut.
pub const TRIM_TAG: &str = "[... trimmed to save tokens ...]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Limits {
    /// Results at or below this many chars are left alone.
    threshold: usize,
    /// Chars kept from the tail, and from the head when `keep_head` is set.
    keep: usize,
    keep_head: bool,
}

const fn limits(severity: FlushSeverity) -> Limits {
    match severity {
        FlushSeverity::Soft => Limits {
            threshold: 5000,
            keep: 2500,
            keep_head: true,
        },
        FlushSeverity::Hard => Limits {
            threshold: 2000,
            keep: 1000,
            keep_head: true,
        },
        FlushSeverity::ExtraHard => Limits {
            threshold: 2000,
            keep: 200,
            keep_head: false,
        },
    }
}

/// Trim large string-content tool results in place.
///
/// Mutates `messages`. With `before` set, only tool messages whose `_ts` is
/// at or before the cutoff are eligible; messages without `_ts` belong to
/// the current turn and are always skipped in that mode.
///
/// Returns the number of messages whose content changed. A result is only
/// rewritten when that strictly shortens it, so re-applying a severity to
/// already-trimmed content is a no-op while escalating keeps shrinking it.
pub fn flush_tool_results(
    messages: &mut [Message],
    severity: FlushSeverity,
    before: Option<&str>,
) -> usize {
    let limits = limits(severity);
    let mut count = 0;

    for message in messages.iter_mut() {
        let Message::Tool { content, ts, .. } = message else {
            continue;
        };
        if let Some(cutoff) = before {
            match ts.as_deref() {
                Some(stamp) if timestamp::is_at_or_before(stamp, cutoff) => {}
                _ => continue,
            }
        }
        let Content::Text(text) = content else {
            continue;
        };
        if let Some(trimmed) = trim(text, limits) {
            *text = trimmed;
            count += 1;
        }
    }

    count
}

/// Flush a disposable copy of the compactable range before summarization.
///
/// Ungated by timestamp. Eco trims extra hard, normal hard, full soft.
pub fn flush_for_compaction(messages: &mut [Message], mode: ContextMode) -> usize {
    let severity = match mode {
        ContextMode::Eco => FlushSeverity::ExtraHard,
        ContextMode::Normal => FlushSeverity::Hard,
        ContextMode::Full => FlushSeverity::Soft,
    };
    flush_tool_results(messages, severity, None)
}

fn trim(text: &str, limits: Limits) -> Option<String> {
    let len = text.chars().count();
    if len <= limits.threshold {
        return None;
    }

    let tail = tail_chars(text, len, limits.keep);
    let trimmed = if limits.keep_head {
        if len <= 2 * limits.keep + TRIM_TAG.len() + 2 {
            return None;
        }
        format!("{}\n{TRIM_TAG}\n{tail}", head_chars(text, limits.keep))
    } else {
        format!("{TRIM_TAG}\n{tail}")
    };

    (trimmed.chars().count() < len).then_some(trimmed)
}

fn head_chars(text: &str, n: usize) -> &str {
    text.char_indices().nth(n).map_or(text, |(idx, _)| &text[..idx])
}

fn tail_chars(text: &str, len: usize, n: usize) -> &str {
    if n >= len {
        return text;
    }
    text.char_indices()
        .nth(len - n)
        .map_or(text, |(idx, _)| &text[idx..])
}
