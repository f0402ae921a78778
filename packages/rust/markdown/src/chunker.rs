//! UTF-8 safe byte chunking.
//!
//! Remote calls cap payload size in bytes, so every splitter here measures
//! `str::len()` and only cuts on `char` boundaries.

/// Longest prefix of `text` within `max_bytes`, never splitting a char.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Split text into chunks of at most `max_bytes` UTF-8 bytes.
///
/// A single character wider than `max_bytes` is emitted alone. Empty input
/// yields one empty chunk. `max_bytes == 0` is treated as 1.
pub fn chunk_text_by_bytes(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    for (idx, ch) in text.char_indices() {
        let end = idx + ch.len_utf8();
        if idx > start && end - start > max_bytes {
            chunks.push(text[start..idx].to_string());
            start = idx;
        }
    }

    if start < text.len() || chunks.is_empty() {
        chunks.push(text[start..].to_string());
    }
    chunks
}

/// Split markdown into chunks of at most `max_bytes`, preferring line breaks.
///
/// Line endings are kept, so concatenating the chunks reproduces the input.
/// Lines longer than `max_bytes` are byte-chunked on their own.
pub fn split_markdown_by_lines(content: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(1);
    if content.len() <= max_bytes {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in content.split_inclusive('\n') {
        if line.len() > max_bytes {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(chunk_text_by_bytes(line, max_bytes));
            continue;
        }

        if !current.is_empty() && current.len() + line.len() > max_bytes {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(line);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn byte_chunks_respect_char_boundaries() {
        // "é" is 2 bytes, "飞" is 3 bytes.
        let chunks = chunk_text_by_bytes("aé飞書b", 4);
        assert_eq!(chunks, vec!["aé", "飞", "書b"]);
    }

    #[test]
    fn oversized_char_is_returned_alone() {
        let chunks = chunk_text_by_bytes("飞x", 2);
        assert_eq!(chunks, vec!["飞", "x"]);
    }

    #[test]
    fn truncation_backs_off_to_char_boundary() {
        assert_eq!(truncate_utf8("飞书文档", 7), "飞书");
        assert_eq!(truncate_utf8("飞书", 2), "");
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }

    #[test]
    fn empty_text_is_one_empty_chunk() {
        assert_eq!(chunk_text_by_bytes("", 10), vec![String::new()]);
    }

    #[test]
    fn small_content_is_untouched() {
        assert_eq!(split_markdown_by_lines("# a\nb\n", 100), vec!["# a\nb\n"]);
    }

    #[test]
    fn lines_are_packed_up_to_limit() {
        let chunks = split_markdown_by_lines("aaaa\nbbbb\ncccc\n", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc\n"]);
    }

    #[test]
    fn long_line_is_byte_chunked_between_neighbours() {
        let content = format!("short\n{}\ntail", "x".repeat(25));
        let chunks = split_markdown_by_lines(&content, 10);
        assert_eq!(chunks[0], "short\n");
        assert_eq!(chunks.last().map(String::as_str), Some("tail"));
        assert_eq!(chunks.concat(), content);
    }

    proptest! {
        #[test]
        fn byte_chunks_never_exceed_limit(text in "\\PC{0,200}", max in 4usize..64) {
            for chunk in chunk_text_by_bytes(&text, max) {
                prop_assert!(chunk.len() <= max);
            }
        }

        #[test]
        fn truncation_stays_within_limit(text in "\\PC{0,200}", max in 0usize..64) {
            let head = truncate_utf8(&text, max);
            prop_assert!(head.len() <= max);
            prop_assert!(text.starts_with(head));
        }

        #[test]
        fn line_chunks_never_exceed_limit_and_preserve_content(
            lines in proptest::collection::vec("[a-z飞书 ]{0,40}", 0..30),
            max in 4usize..96,
        ) {
            let content = lines.join("\n");
            let chunks = split_markdown_by_lines(&content, max);
            for chunk in &chunks {
                prop_assert!(chunk.len() <= max || content.len() <= max);
            }
            prop_assert_eq!(chunks.concat(), content);
        }
    }
}
