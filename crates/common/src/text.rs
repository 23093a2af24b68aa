//! Shared text normalization
//!
//! One tokenizer feeds the hashing embedder, the lexical entailment check
//! and the query analyzer, so "content word" means the same thing at every
//! stage.

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being",
    "in", "on", "at", "to", "for", "of", "with", "by", "from", "into",
    "and", "or", "but", "not", "this", "that", "these", "those", "there",
    "it", "its", "as", "do", "does", "did", "has", "have", "had",
    "can", "could", "will", "would", "should", "may", "might", "must",
    "what", "which", "who", "whom", "how", "when", "where", "why",
    "i", "you", "we", "me", "my", "our", "your", "they", "them", "their",
    "if", "then", "than", "so", "any", "all", "about", "also", "only",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word.to_lowercase().as_str())
}

/// Crude plural folding, enough for "buffers" to meet "buffer"
fn fold(token: &str) -> String {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

/// Lowercased, plural-folded words with stop words removed, in order
pub fn content_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !is_stop_word(w))
        .map(|w| fold(&w))
        .collect()
}

const NEGATIONS: &[&str] = &["not", "no", "never", "none", "nor", "neither", "cannot", "without"];
const OBLIGATIONS: &[&str] = &["must", "shall", "should", "mustn't", "shouldn't"];
const PERMISSIONS: &[&str] = &["can", "could", "may", "might", "cannot", "can't", "couldn't"];

/// Modal force of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Obligation,
    Permission,
}

/// Negation and modal force, read from the words the tokenizer drops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Polarity {
    pub negated: bool,
    pub modality: Option<Modality>,
}

pub fn polarity(text: &str) -> Polarity {
    let mut result = Polarity::default();
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '’')
            .to_lowercase()
            .replace('’', "'");
        if NEGATIONS.contains(&word.as_str()) || word.ends_with("n't") {
            result.negated = true;
        }
        if OBLIGATIONS.contains(&word.as_str()) {
            result.modality = Some(Modality::Obligation);
        } else if result.modality.is_none() && PERMISSIONS.contains(&word.as_str()) {
            result.modality = Some(Modality::Permission);
        }
    }
    result
}

/// Split prose into sentences on `.`, `?`, `!` followed by whitespace (or
/// end of text) and on newlines. A fragment made only of citation markers
/// (`[2]`, `[1][3].`) is glued onto the sentence before it.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut raw = Vec::new();
    let mut current = String::new();

    for (i, &ch) in chars.iter().enumerate() {
        current.push(ch);
        let boundary = ch == '\n'
            || (matches!(ch, '.' | '?' | '!')
                && chars.get(i + 1).map_or(true, |c| c.is_whitespace()));
        if boundary {
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                raw.push(trimmed);
            }
            current.clear();
        }
    }

    let trimmed = current.trim().to_string();
    if !trimmed.is_empty() {
        raw.push(trimmed);
    }

    let mut sentences: Vec<String> = Vec::with_capacity(raw.len());
    for fragment in raw {
        let marker_only = fragment.contains('[')
            && fragment
                .chars()
                .all(|c| c.is_ascii_digit() || "[] ,.;".contains(c));
        match sentences.last_mut() {
            Some(last) if marker_only => {
                last.push(' ');
                last.push_str(&fragment);
            }
            _ => sentences.push(fragment),
        }
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_keeps_decimals() {
        let sentences = split_sentences("Firmware 2.1 adds CANopen [1]. Is it safe? Yes [2].");
        assert_eq!(
            sentences,
            vec!["Firmware 2.1 adds CANopen [1].", "Is it safe?", "Yes [2]."]
        );
    }

    #[test]
    fn test_trailing_markers_join_previous_sentence() {
        let sentences = split_sentences("Reset clears the FIFO Buffer. [1][2]\nDone.");
        assert_eq!(sentences, vec!["Reset clears the FIFO Buffer. [1][2]", "Done."]);
    }

    #[test]
    fn test_content_tokens() {
        assert_eq!(
            content_tokens("What does the Reset command do to the FIFO buffers?"),
            vec!["reset", "command", "fifo", "buffer"]
        );
    }

    #[test]
    fn test_polarity_reads_dropped_words() {
        let rule = polarity("Firmware Flashing must not be started while a Reset is in progress.");
        assert!(rule.negated);
        assert_eq!(rule.modality, Some(Modality::Obligation));

        let flipped = polarity("Firmware Flashing can be started while a Reset is in progress.");
        assert!(!flipped.negated);
        assert_eq!(flipped.modality, Some(Modality::Permission));

        assert!(polarity("Don't unplug the X200.").negated);
        assert_eq!(polarity("The Reset command clears the FIFO Buffer."), Polarity::default());
    }

    #[test]
    fn test_fold_keeps_short_and_double_s() {
        assert_eq!(content_tokens("bus pass gas"), vec!["bus", "pass", "gas"]);
    }
}
