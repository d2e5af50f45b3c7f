//! Width-aware helpers for strings that may contain escape sequences.

use unicode_width::UnicodeWidthChar;

/// Display width of `s`, ignoring CSI (`ESC [`) and OSC (`ESC ]`) sequences.
pub fn visible_width(s: &str) -> usize {
    let mut width = 0;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            width += c.width().unwrap_or(0);
            continue;
        }
        match chars.next() {
            Some('[') => {
                // parameters, then one final byte in @..~
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                // terminated by BEL or ST (ESC \)
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    width
}

/// Right-pad `s` with spaces to `width` visible columns.
pub fn pad(s: &str, width: usize) -> String {
    let visible = visible_width(s);
    let mut out = String::with_capacity(s.len() + width.saturating_sub(visible));
    out.push_str(s);
    out.extend(std::iter::repeat_n(' ', width.saturating_sub(visible)));
    out
}

/// Cut plain text to at most `width` columns, marking the cut with `…`.
pub fn truncate(s: &str, width: usize) -> String {
    if visible_width(s) <= width {
        return s.to_string();
    }
    if width == 0 {
        return String::new();
    }

    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width - 1 {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push('…');
    out
}

/// An OSC 8 terminal hyperlink.
pub fn hyperlink(target: &str, text: &str) -> String {
    format!("\x1b]8;;{target}\x1b\\{text}\x1b]8;;\x1b\\")
}
