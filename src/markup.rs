//! Rich-text to chat-style markup conversion.
//!
//! The control API sends message bodies as the HTML produced by its rich-text
//! editor. The chat network has no HTML; it styles plain text with inline
//! markers instead:
//!
//! | tag        | output                                   |
//! |------------|------------------------------------------|
//! | `em`       | `_` at open and close                    |
//! | `strong`   | `*` at open and close                    |
//! | `s`        | `~` at open and close                    |
//! | `/p`       | `\n`, unless it ends the input           |
//! | `br`       | `\n`                                     |
//! | other      | nothing (tag dropped, text kept)         |
//!
//! Conversion is a single left-to-right scan that substitutes markers at tag
//! boundaries. Nesting is never validated, so malformed input still yields
//! best-effort text.

/// Zero-width no-break space, left behind by editor widgets such as emoji blots.
const ZERO_WIDTH_NO_BREAK_SPACE: char = '\u{feff}';

/// Where the scanner is inside the current `<...>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagPart {
    /// Collecting the tag name.
    Name,
    /// Past the name; skipping attributes until `>`.
    Attributes,
    /// Just after an attribute's `=`, where a quote opens a quoted value.
    Value,
    /// Inside a quoted attribute value opened by the given quote character.
    Quoted(char),
}

/// Scanner state for the tag currently being read.
#[derive(Debug, Default)]
struct OpenTag {
    name: String,
    closing: bool,
    part: Option<TagPart>,
}

impl OpenTag {
    fn start() -> Self {
        Self {
            part: Some(TagPart::Name),
            ..Self::default()
        }
    }
}

/// Convert an HTML fragment into the chat network's inline styling syntax.
///
/// Never fails: unknown or unbalanced tags are stripped and plain text passes
/// through untouched.
///
/// # Example
///
/// ```
/// use message_relay::markup::translate;
///
/// assert_eq!(translate("<p><strong>hi</strong> there</p>"), "*hi* there");
/// ```
pub fn translate(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut tag = OpenTag::default();

    for (index, ch) in input.char_indices() {
        let Some(part) = tag.part else {
            match ch {
                '<' => tag = OpenTag::start(),
                ZERO_WIDTH_NO_BREAK_SPACE => {}
                _ => output.push(ch),
            }
            continue;
        };

        match (part, ch) {
            (TagPart::Quoted(quote), _) => {
                if ch == quote {
                    tag.part = Some(TagPart::Attributes);
                }
            }
            (_, '>') => {
                let at_end = index + ch.len_utf8() == input.len();
                emit_tag(&tag, at_end, &mut output);
                tag = OpenTag::default();
            }
            (_, '<') => tag = OpenTag::start(),
            (TagPart::Name, '/') if tag.name.is_empty() => tag.closing = true,
            (TagPart::Name, c) if c == '/' || c.is_whitespace() => {
                tag.part = Some(TagPart::Attributes);
            }
            (TagPart::Name, c) => tag.name.push(c.to_ascii_lowercase()),
            (TagPart::Attributes, '=') => tag.part = Some(TagPart::Value),
            (TagPart::Value, '"' | '\'') => tag.part = Some(TagPart::Quoted(ch)),
            (TagPart::Value, c) if c.is_whitespace() => {}
            // Unquoted value: quotes inside it are plain characters.
            (TagPart::Value | TagPart::Attributes, _) => tag.part = Some(TagPart::Attributes),
        }
    }

    // An unterminated trailing tag is dropped.
    output
}

/// Write the marker for a completed tag.
fn emit_tag(tag: &OpenTag, at_end: bool, output: &mut String) {
    match tag.name.as_str() {
        "em" => output.push('_'),
        "strong" => output.push('*'),
        "s" => output.push('~'),
        "p" if tag.closing && !at_end => output.push('\n'),
        "br" => output.push('\n'),
        _ => {}
    }
}
