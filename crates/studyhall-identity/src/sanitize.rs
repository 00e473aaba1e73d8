//! Display-name and chat-message validation and sanitization.
//!
//! These are pure functions: no I/O, no suspension points, safe to call from
//! any context including inside a fixed-window rate-limit check. Every
//! `sanitize_*` function is idempotent — `sanitize(sanitize(x)) == sanitize(x)`
//! — which is relied on by [`crate::store::IdentityStore::upsert`] and the
//! message pipeline, both of which may sanitize content that was already
//! sanitized on a previous call.

use crate::error::IdentityError;

const MAX_DISPLAY_NAME_CHARS: usize = 50;
const MAX_MESSAGE_CHARS: usize = 1000;

/// Validates a raw display name before sanitization.
///
/// Trims surrounding whitespace first, then rejects an empty result or one
/// exceeding 50 Unicode code points.
pub fn validate_display_name(raw: &str) -> Result<(), IdentityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(IdentityError::InvalidDisplayName);
    }
    Ok(())
}

/// Sanitizes a display name for storage: strips tags and control characters,
/// collapses internal whitespace runs to a single space, and trims.
///
/// Rejects (rather than silently strips) input matching a recognized
/// SQL-injection probe, returning [`IdentityError::MaliciousInput`].
pub fn sanitize_display_name(raw: &str) -> Result<String, IdentityError> {
    if looks_like_sql_injection(raw) {
        return Err(IdentityError::MaliciousInput);
    }

    let stripped = strip_tags(raw);
    let no_control = strip_control_chars(&stripped, false);
    Ok(collapse_whitespace(&no_control))
}

/// Validates a raw chat message before sanitization: non-empty after
/// trimming, at most 1000 Unicode code points.
pub fn validate_message(raw: &str) -> Result<(), IdentityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(IdentityError::InvalidMessage);
    }
    Ok(())
}

/// Sanitizes chat content for storage and broadcast: removes script/style
/// payloads and any remaining tags, strips control characters (newlines are
/// kept), and HTML-escapes the characters that remain.
///
/// Rejects (rather than silently strips) input matching a recognized
/// SQL-injection probe, returning [`IdentityError::MaliciousInput`].
pub fn sanitize_message(raw: &str) -> Result<String, IdentityError> {
    if looks_like_sql_injection(raw) {
        return Err(IdentityError::MaliciousInput);
    }

    let stripped = strip_tags(raw);
    let no_control = strip_control_chars(&stripped, true);
    Ok(escape_html(no_control.trim()))
}

/// Removes `<script>...</script>` and `<style>...</style>` blocks (including
/// their content) case-insensitively, then strips any remaining `<...>` tags
/// verbatim (leaving the text between tags intact).
fn strip_tags(s: &str) -> String {
    let without_script = strip_tag_block(s, "script");
    let without_style = strip_tag_block(&without_script, "style");
    strip_remaining_tags(&without_style)
}

/// Removes every `<tag ...>...</tag>` block for the given tag name,
/// case-insensitively, content included.
fn strip_tag_block(s: &str, tag: &str) -> String {
    let lower = s.to_ascii_lowercase();
    let open_needle = format!("<{tag}");
    let close_needle = format!("</{tag}>");

    let mut out = String::with_capacity(s.len());
    let mut cursor = 0usize;

    while let Some(open_rel) = lower[cursor..].find(&open_needle) {
        let open_start = cursor + open_rel;
        out.push_str(&s[cursor..open_start]);

        match lower[open_start..].find('>') {
            Some(tag_end_rel) => {
                let after_open_tag = open_start + tag_end_rel + 1;
                match lower[after_open_tag..].find(&close_needle) {
                    Some(close_rel) => {
                        let close_start = after_open_tag + close_rel;
                        cursor = close_start + close_needle.len();
                    }
                    None => {
                        // Unterminated block: drop everything to the end.
                        cursor = s.len();
                    }
                }
            }
            None => {
                // Malformed opening tag with no closing '>': drop the rest.
                cursor = s.len();
            }
        }
    }

    out.push_str(&s[cursor..]);
    out
}

/// Strips any remaining `<...>` tag markup, keeping the text around it.
///
/// Only consumes a `<...>` span as a tag when it actually looks like one —
/// `<` immediately followed by a letter or `/`, with no space before the
/// first word and no nested `<` — so that plain text using `<`/`>` as
/// comparison operators (`5 < 10 && 10 > 5`) is left untouched rather than
/// being swallowed as a bogus tag spanning the whole expression.
fn strip_remaining_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(lt) = rest.find('<') {
        out.push_str(&rest[..lt]);
        let after_lt = &rest[lt + 1..];

        let looks_like_tag = after_lt
            .chars()
            .next()
            .is_some_and(|c| c == '/' || c.is_ascii_alphabetic());

        if looks_like_tag {
            if let Some(gt_rel) = after_lt.find('>') {
                let tag_body = &after_lt[..gt_rel];
                if !tag_body.contains('<') {
                    rest = &after_lt[gt_rel + 1..];
                    continue;
                }
            }
        }

        // Not a recognizable tag: keep the '<' literally and continue past it.
        out.push('<');
        rest = after_lt;
    }

    out.push_str(rest);
    out
}

/// Removes Unicode control characters. When `keep_newline` is set, `\n` is
/// preserved (chat messages may be multi-line); display names never are.
fn strip_control_chars(s: &str, keep_newline: bool) -> String {
    s.chars()
        .filter(|c| !c.is_control() || (keep_newline && *c == '\n'))
        .collect()
}

/// Collapses runs of whitespace (including the newlines stripped above,
/// since display names are single-line) into a single space and trims.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// HTML-escapes `&`, `<`, `>`, `"`, and `'`.
///
/// Decodes known entities first so that running this twice on already-escaped
/// text is a no-op rather than double-escaping it (`&amp;` would otherwise
/// become `&amp;amp;` on a second pass).
fn escape_html(s: &str) -> String {
    let decoded = s
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'");

    decoded
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Recognizes a small set of classic SQL-injection probe shapes. This is a
/// deny-list, not a parser — it exists to catch the obvious "tester poked at
/// the form" cases, not to substitute for parameterized queries (which every
/// persistence call in this workspace already uses).
fn looks_like_sql_injection(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    const PROBES: &[&str] = &[
        "' or '1'='1",
        "\" or \"1\"=\"1",
        "' or 1=1",
        "\" or 1=1",
        "union select",
        "drop table",
        "drop database",
        "; --",
        "';--",
        "xp_cmdshell",
        "/*!",
        "' ; drop",
    ];
    PROBES.iter().any(|probe| lower.contains(probe))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_display_name_rejects_empty() {
        assert!(matches!(
            validate_display_name("   "),
            Err(IdentityError::InvalidDisplayName)
        ));
    }

    #[test]
    fn validate_display_name_rejects_too_long() {
        let long = "a".repeat(51);
        assert!(matches!(
            validate_display_name(&long),
            Err(IdentityError::InvalidDisplayName)
        ));
    }

    #[test]
    fn validate_display_name_accepts_boundary() {
        let exact = "a".repeat(50);
        assert!(validate_display_name(&exact).is_ok());
    }

    #[test]
    fn sanitize_display_name_strips_script_tag() {
        let out = sanitize_display_name("<script>alert(1)</script>Al").unwrap();
        assert_eq!(out, "Al");
    }

    #[test]
    fn sanitize_display_name_collapses_whitespace() {
        let out = sanitize_display_name("  Alice   Wonder  ").unwrap();
        assert_eq!(out, "Alice Wonder");
    }

    #[test]
    fn sanitize_display_name_is_idempotent() {
        let once = sanitize_display_name("<b>Alice</b>  the  Great").unwrap();
        let twice = sanitize_display_name(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_display_name_rejects_sql_probe() {
        let err = sanitize_display_name("admin' OR '1'='1").unwrap_err();
        assert!(matches!(err, IdentityError::MaliciousInput));
    }

    #[test]
    fn validate_message_rejects_empty() {
        assert!(matches!(
            validate_message("   "),
            Err(IdentityError::InvalidMessage)
        ));
    }

    #[test]
    fn validate_message_rejects_too_long() {
        let long = "a".repeat(1001);
        assert!(matches!(
            validate_message(&long),
            Err(IdentityError::InvalidMessage)
        ));
    }

    #[test]
    fn sanitize_message_escapes_html() {
        let out = sanitize_message("5 < 10 && 10 > 5").unwrap();
        assert_eq!(out, "5 &lt; 10 &amp;&amp; 10 &gt; 5");
    }

    #[test]
    fn sanitize_message_strips_script_payload() {
        let out = sanitize_message("hi <script>steal()</script> there").unwrap();
        assert_eq!(out, "hi  there");
    }

    #[test]
    fn sanitize_message_preserves_newlines() {
        let out = sanitize_message("line one\nline two").unwrap();
        assert_eq!(out, "line one\nline two");
    }

    #[test]
    fn sanitize_message_is_idempotent() {
        let once = sanitize_message("<i>hi</i> & welcome").unwrap();
        let twice = sanitize_message(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_message_rejects_union_select() {
        let err = sanitize_message("1; UNION SELECT password FROM users").unwrap_err();
        assert!(matches!(err, IdentityError::MaliciousInput));
    }
}
