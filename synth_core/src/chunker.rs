//! Split-point buffering for streamed text.
//!
//! Clients send text in arbitrary fragments ("Hel", "lo wor", "ld."). Speech
//! engines generate better prosody when they receive whole words or phrases,
//! so fragments are held back until a split point is seen. Every released
//! chunk ends with exactly one trailing space.

/// Characters after which buffered text may be released.
const SPLIT_POINTS: &[char] = &[
    '.', ',', '?', '!', ';', ':', '—', '-', '(', ')', '[', ']', '}', ' ',
];

fn is_split_point(c: char) -> bool {
    SPLIT_POINTS.contains(&c)
}

fn with_trailing_space(mut text: String) -> String {
    if !text.ends_with(' ') {
        text.push(' ');
    }
    text
}

/// Buffers text fragments and releases them at natural boundaries.
#[derive(Debug, Default)]
pub struct TextChunker {
    buffer: String,
}

impl TextChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fragment; returns a chunk when one becomes releasable.
    ///
    /// At most one chunk is released per fragment. Whatever remains stays
    /// buffered until the next call or [`TextChunker::finish`].
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        let ready = if self.buffer.ends_with(is_split_point) {
            std::mem::replace(&mut self.buffer, fragment.to_string())
        } else if let Some(first) = fragment.chars().next().filter(|c| is_split_point(*c)) {
            let mut ready = std::mem::take(&mut self.buffer);
            ready.push(first);
            self.buffer.push_str(&fragment[first.len_utf8()..]);
            ready
        } else {
            self.buffer.push_str(fragment);
            return None;
        };

        if ready.trim().is_empty() {
            return None;
        }
        Some(with_trailing_space(ready))
    }

    /// Release whatever is still buffered.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            return None;
        }
        Some(with_trailing_space(rest))
    }
}
