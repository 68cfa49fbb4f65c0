//! Line breaking for translated text.
//!
//! Text is cut after sentence terminators, then after clause separators, and
//! each resulting chunk is word-wrapped greedily. Chunks always start on a new
//! line. A word wider than the limit is kept whole on its own line.

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?'];
const CLAUSE_SEPARATORS: &[char] = &[',', ':', ';'];

/// Split after any `delims` char that is followed by whitespace.
///
/// The delimiter and the whitespace run stay attached to the left piece.
fn split_after<'a>(text: &'a str, delims: &[char]) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !delims.contains(&c) {
            continue;
        }
        let mut end = None;
        while let Some(&(j, next)) = chars.peek() {
            if next.is_whitespace() {
                end = Some(j + next.len_utf8());
                chars.next();
            } else {
                break;
            }
        }
        if let Some(end) = end {
            pieces.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

pub fn split_sentences(text: &str) -> Vec<&str> {
    split_after(text, SENTENCE_TERMINATORS)
}

pub fn split_clauses(sentence: &str) -> Vec<&str> {
    split_after(sentence, CLAUSE_SEPARATORS)
}

/// Greedy word wrap of one chunk against `max_width`
pub fn wrap_words<F>(chunk: &str, max_width: f32, measure: &F) -> Vec<String>
where
    F: Fn(&str) -> f32,
{
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in chunk.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };

        if measure(&candidate) <= max_width {
            current = candidate;
        } else {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Wrap `text` into display lines.
///
/// Explicit newlines start a new paragraph; paragraphs are separated by one
/// empty line. Returns an empty vector when there is nothing to draw.
pub fn wrap_text<F>(text: &str, max_width: f32, measure: F) -> Vec<String>
where
    F: Fn(&str) -> f32,
{
    let paragraphs: Vec<&str> = text.split('\n').collect();
    let mut lines = Vec::new();

    for (i, paragraph) in paragraphs.iter().enumerate() {
        for sentence in split_sentences(paragraph) {
            for clause in split_clauses(sentence) {
                lines.extend(wrap_words(clause, max_width, &measure));
            }
        }
        if i + 1 < paragraphs.len() {
            lines.push(String::new());
        }
    }

    if lines.iter().all(|l| l.is_empty()) {
        return Vec::new();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    // 10px per char
    fn mono(s: &str) -> f32 {
        s.chars().count() as f32 * 10.0
    }

    #[test]
    fn test_sentence_split_keeps_terminator() {
        assert_eq!(
            split_sentences("Hello there! How are you? Fine."),
            vec!["Hello there! ", "How are you? ", "Fine."]
        );
        // No whitespace after the dot, so no split
        assert_eq!(split_sentences("v1.2 is out"), vec!["v1.2 is out"]);
    }

    #[test]
    fn test_clause_split() {
        assert_eq!(
            split_clauses("Wait, listen: now; go"),
            vec!["Wait, ", "listen: ", "now; ", "go"]
        );
    }

    #[test]
    fn test_unbreakable_word_is_one_line() {
        let word = "Supercalifragilisticexpialidocious";
        let lines = wrap_text(word, 50.0, mono);
        assert_eq!(lines, vec![word.to_string()]);
    }

    #[test]
    fn test_greedy_wrap() {
        let lines = wrap_text("aa bb cc dd", 50.0, mono);
        assert_eq!(lines, vec!["aa bb", "cc dd"]);
    }

    #[test]
    fn test_sentences_start_new_lines() {
        let lines = wrap_text("Hi. Yo", 500.0, mono);
        assert_eq!(lines, vec!["Hi.", "Yo"]);
    }

    #[test]
    fn test_paragraphs_are_separated_by_blank_line() {
        let lines = wrap_text("one\ntwo", 500.0, mono);
        assert_eq!(lines, vec!["one", "", "two"]);
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        assert!(wrap_text("   ", 100.0, mono).is_empty());
        assert!(wrap_text("\n\n", 100.0, mono).is_empty());
        assert!(wrap_text("", 100.0, mono).is_empty());
    }
}
