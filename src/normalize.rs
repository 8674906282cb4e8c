use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

static FRONT_MATTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\A---[ \t]*\r?\n(?:.*?\r?\n)?---[ \t]*(?:\r?\n|\z)").unwrap());
static FENCED_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]*`").unwrap());
static HEADING_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6} +").unwrap());
// Emphasis stays within one line on purpose: with the dot matching
// newlines, the `*` of two list bullets on separate lines would pair up as
// one italic span and swallow the text between them.
static BOLD_STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static BOLD_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.+?)__").unwrap());
static ITALIC_STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.+?)\*").unwrap());
static ITALIC_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_(.+?)_").unwrap());
static INLINE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]\(([^)]*)\)").unwrap());
static WIKI_LINK_LABELED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\]|]+)\|([^\]]+)\]\]").unwrap());
static WIKI_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());
static QUOTE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(?:>[ \t]?)+").unwrap());
static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*+]|\d+\.)[ \t]+").unwrap());

/// Turns raw note markup into text that reads naturally when spoken.
///
/// The rule order is load-bearing: front matter is only recognized at the
/// very start of the text, so it must go before anything that could edit the
/// opening lines; fenced blocks must go before inline spans so the backticks
/// of a fence are never paired up as inline code; bold must go before italic
/// so `**` is never left behind as two stray `*` markers.
///
/// Whitespace inside the text is preserved as-is (only the ends are
/// trimmed), so removing a span leaves the spaces around it untouched.
pub fn normalize(text: &str, skip_code_blocks: bool) -> String {
    let s = strip_front_matter(text);
    let s = if skip_code_blocks {
        remove_fenced_code(&s)
    } else {
        Cow::Borrowed(s.as_ref())
    };
    let s = if skip_code_blocks {
        remove_inline_code(&s)
    } else {
        Cow::Borrowed(s.as_ref())
    };
    let s = strip_heading_markers(&s);
    let s = strip_bold(&s);
    let s = strip_italic(&s);
    let s = rewrite_inline_links(&s);
    let s = rewrite_wiki_links(&s);
    let s = strip_quote_markers(&s);
    let s = strip_list_markers(&s);
    s.trim().to_string()
}

#[inline]
fn strip_front_matter(s: &str) -> Cow<'_, str> {
    FRONT_MATTER.replace(s, "")
}

/// Paired fences are removed in full; an unterminated trailing fence is
/// removed to the end of the text rather than spoken literally.
#[inline]
fn remove_fenced_code(s: &str) -> Cow<'_, str> {
    let replaced = FENCED_CODE.replace_all(s, "");
    match replaced.find("```") {
        None => replaced,
        Some(idx) => {
            let mut owned = replaced.into_owned();
            owned.truncate(idx);
            Cow::Owned(owned)
        }
    }
}

/// Inline spans vanish with their delimiters; an unpaired leftover backtick
/// is dropped as well, so no backtick ever reaches the speech request.
#[inline]
fn remove_inline_code(s: &str) -> Cow<'_, str> {
    let replaced = INLINE_CODE.replace_all(s, "");
    if replaced.contains('`') {
        Cow::Owned(replaced.replace('`', ""))
    } else {
        replaced
    }
}

#[inline]
fn strip_heading_markers(s: &str) -> Cow<'_, str> {
    HEADING_MARKER.replace_all(s, "")
}

#[inline]
fn strip_bold(s: &str) -> Cow<'_, str> {
    match BOLD_STARS.replace_all(s, "$1") {
        Cow::Borrowed(b) => BOLD_UNDERSCORES.replace_all(b, "$1"),
        Cow::Owned(o) => Cow::Owned(BOLD_UNDERSCORES.replace_all(&o, "$1").into_owned()),
    }
}

#[inline]
fn strip_italic(s: &str) -> Cow<'_, str> {
    match ITALIC_STARS.replace_all(s, "$1") {
        Cow::Borrowed(b) => ITALIC_UNDERSCORES.replace_all(b, "$1"),
        Cow::Owned(o) => Cow::Owned(ITALIC_UNDERSCORES.replace_all(&o, "$1").into_owned()),
    }
}

#[inline]
fn rewrite_inline_links(s: &str) -> Cow<'_, str> {
    INLINE_LINK.replace_all(s, "$1")
}

#[inline]
fn rewrite_wiki_links(s: &str) -> Cow<'_, str> {
    match WIKI_LINK_LABELED.replace_all(s, "$2") {
        Cow::Borrowed(b) => WIKI_LINK.replace_all(b, "$1"),
        Cow::Owned(o) => Cow::Owned(WIKI_LINK.replace_all(&o, "$1").into_owned()),
    }
}

#[inline]
fn strip_quote_markers(s: &str) -> Cow<'_, str> {
    QUOTE_MARKER.replace_all(s, "")
}

#[inline]
fn strip_list_markers(s: &str) -> Cow<'_, str> {
    LIST_MARKER.replace_all(s, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_and_bold() {
        assert_eq!(
            normalize("# Title\n\nSome **bold** text.", true),
            "Title\n\nSome bold text."
        );
    }

    #[test]
    fn inline_code_span_removed_with_delimiters() {
        assert_eq!(normalize("Use `x=1` inline.", true), "Use  inline.");
    }

    #[test]
    fn inline_code_kept_when_skipping_disabled() {
        assert_eq!(normalize("Use `x=1` inline.", false), "Use `x=1` inline.");
    }

    #[test]
    fn front_matter_removed_exactly() {
        let note = "---\ntitle: Walk notes\ntags: [daily]\n---\nFirst line.";
        assert_eq!(normalize(note, true), "First line.");

        // Only a block at the very start counts.
        let body = "First line.\n---\ntitle: nope\n---\nlast";
        assert_eq!(normalize(body, true), body);
    }

    #[test]
    fn empty_front_matter_block() {
        assert_eq!(normalize("---\n---\nBody.", true), "Body.");
    }

    #[test]
    fn front_matter_without_body() {
        assert_eq!(normalize("---\ntitle: x\n---", true), "");
    }

    #[test]
    fn fenced_block_removed_in_full() {
        assert_eq!(
            normalize("Before.\n```rust\nlet x = 1;\n```\nAfter.", true),
            "Before.\n\nAfter."
        );
    }

    #[test]
    fn code_only_note_yields_empty() {
        assert_eq!(normalize("```\nlet x = 1;\n```", true), "");
    }

    #[test]
    fn unterminated_fence_strips_to_end() {
        assert_eq!(normalize("Keep this.\n```\nnever closed", true), "Keep this.");
    }

    #[test]
    fn stray_backtick_never_survives() {
        let out = normalize("odd ` one `x` more ` here", true);
        assert!(!out.contains('`'), "got {out:?}");
    }

    #[test]
    fn fences_survive_when_skipping_disabled() {
        let note = "```\ncode\n```";
        assert_eq!(normalize(note, false), note);
    }

    #[test]
    fn bold_stripped_before_italic() {
        assert_eq!(normalize("**bold** and *slanted*", true), "bold and slanted");
        assert_eq!(normalize("__bold__ and _slanted_", true), "bold and slanted");
    }

    #[test]
    fn inline_link_keeps_label() {
        assert_eq!(
            normalize("See [the docs](https://example.com/a?b=c).", true),
            "See the docs."
        );
    }

    #[test]
    fn wiki_link_prefers_label() {
        assert_eq!(normalize("See [[Page Title]].", true), "See Page Title.");
        assert_eq!(normalize("See [[page-id|the page]].", true), "See the page.");
    }

    #[test]
    fn quote_and_list_markers_stripped() {
        assert_eq!(
            normalize("> quoted line\n- first\n* second\n+ third\n2. fourth", true),
            "quoted line\nfirst\nsecond\nthird\nfourth"
        );
    }

    #[test]
    fn nested_quote_and_indented_list() {
        assert_eq!(
            normalize("> > deep quote\n  - indented item", true),
            "deep quote\nindented item"
        );
    }

    #[test]
    fn plain_text_passes_through() {
        let plain = "Two plain sentences. Nothing to change here.";
        assert_eq!(normalize(plain, true), plain);
    }

    #[test]
    fn output_is_trimmed() {
        assert_eq!(normalize("  \n\nhello\n\n  ", true), "hello");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(normalize("", true), "");
    }
}
