#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_passages: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 600,
            overlap_passages: 1,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits normalized text after runs of `.`, `!`, `?` or the Devanagari
/// danda, keeping closing quotes and brackets with the sentence they end.
pub fn split_sentences(text: &str) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    let chars: Vec<char> = normalized.chars().collect();

    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        current.push(ch);
        index += 1;

        if !is_terminator(ch) {
            continue;
        }

        while index < chars.len() && is_terminator(chars[index]) {
            current.push(chars[index]);
            index += 1;
        }
        while index < chars.len() && matches!(chars[index], '"' | '\'' | ')' | ']' | '\u{201d}') {
            current.push(chars[index]);
            index += 1;
        }

        if index >= chars.len() || chars[index] == ' ' {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

fn is_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '\u{0964}' | '\u{0965}')
}

/// Groups sentences into passages of at most `max_chars`, unless a single
/// sentence is longer on its own.
pub fn base_passages(text: &str, config: ChunkingConfig) -> Vec<String> {
    let mut passages = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for sentence in split_sentences(text) {
        let sentence_chars = sentence.chars().count();
        if current.is_empty() {
            current.push_str(&sentence);
            current_chars = sentence_chars;
            continue;
        }

        if current_chars + 1 + sentence_chars <= config.max_chars {
            current.push(' ');
            current.push_str(&sentence);
            current_chars += 1 + sentence_chars;
        } else {
            passages.push(std::mem::take(&mut current));
            current.push_str(&sentence);
            current_chars = sentence_chars;
        }
    }

    if !current.is_empty() {
        passages.push(current);
    }

    passages
}

/// Base passages, each prefixed with the `overlap_passages` passages before it.
pub fn chunk(text: &str, config: ChunkingConfig) -> Vec<String> {
    let passages = base_passages(text, config);

    (0..passages.len())
        .map(|index| {
            let start = index.saturating_sub(config.overlap_passages);
            passages[start..=index].join(" ")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const JUDGMENT: &str = "The appellant filed a suit. The trial court dismissed it!  \
        Was the dismissal proper? The High Court said \"no.\" Appeal allowed.";

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof\u{a0}  spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        let sentences = split_sentences(JUDGMENT);
        assert_eq!(
            sentences,
            vec![
                "The appellant filed a suit.",
                "The trial court dismissed it!",
                "Was the dismissal proper?",
                "The High Court said \"no.\"",
                "Appeal allowed.",
            ]
        );
    }

    #[test]
    fn abbreviation_without_space_does_not_split() {
        let sentences = split_sentences("Refer to s.21 of the Act. Done");
        assert_eq!(sentences, vec!["Refer to s.21 of the Act.", "Done"]);
    }

    #[test]
    fn empty_input_yields_no_passages() {
        assert!(chunk("", ChunkingConfig::default()).is_empty());
        assert!(chunk("  \n\t ", ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn short_input_yields_one_passage() {
        let passages = chunk("No terminal punctuation here", ChunkingConfig::default());
        assert_eq!(passages, vec!["No terminal punctuation here"]);
    }

    #[test]
    fn base_passages_reconstruct_sentence_sequence() {
        let config = ChunkingConfig {
            max_chars: 40,
            overlap_passages: 1,
        };

        let passages = base_passages(JUDGMENT, config);
        assert!(passages.len() > 1);
        assert_eq!(passages.join(" "), split_sentences(JUDGMENT).join(" "));
    }

    #[test]
    fn passages_respect_max_chars_unless_sentence_is_longer() {
        let config = ChunkingConfig {
            max_chars: 30,
            overlap_passages: 1,
        };
        let long = "This single sentence is far longer than thirty characters. Short one.";

        let passages = base_passages(long, config);
        assert_eq!(passages.len(), 2);
        assert!(passages[0].len() > 30);
        assert_eq!(passages[1], "Short one.");
    }

    #[test]
    fn each_passage_carries_the_previous_one() {
        let config = ChunkingConfig {
            max_chars: 40,
            overlap_passages: 1,
        };

        let base = base_passages(JUDGMENT, config);
        let overlapped = chunk(JUDGMENT, config);

        assert_eq!(overlapped.len(), base.len());
        assert_eq!(overlapped[0], base[0]);
        for index in 1..base.len() {
            assert_eq!(overlapped[index], format!("{} {}", base[index - 1], base[index]));
        }
    }

    #[test]
    fn zero_overlap_returns_base_passages() {
        let config = ChunkingConfig {
            max_chars: 40,
            overlap_passages: 0,
        };
        assert_eq!(chunk(JUDGMENT, config), base_passages(JUDGMENT, config));
    }

    #[test]
    fn passage_limit_counts_characters_not_bytes() {
        let sentence = "न्यायालय ने अपील सुनी.";
        assert_eq!(sentence.chars().count(), 22);
        let text = format!("{sentence} {sentence} {sentence}");

        let config = ChunkingConfig {
            max_chars: 68,
            overlap_passages: 0,
        };
        assert_eq!(base_passages(&text, config), vec![text.clone()]);

        let tighter = ChunkingConfig {
            max_chars: 67,
            overlap_passages: 0,
        };
        assert_eq!(base_passages(&text, tighter).len(), 2);
    }

    #[test]
    fn danda_ends_a_sentence() {
        let sentences = split_sentences("अपील स्वीकार की जाती है। लागत नहीं॥ Appeal allowed.");
        assert_eq!(
            sentences,
            vec!["अपील स्वीकार की जाती है।", "लागत नहीं॥", "Appeal allowed."]
        );
    }
}
