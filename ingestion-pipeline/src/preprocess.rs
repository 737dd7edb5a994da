use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

/// Ranking algorithm for key-sentence selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingAlgorithm {
    TextRank,
    LexRank,
}

impl RankingAlgorithm {
    fn label(self) -> &'static str {
        match self {
            RankingAlgorithm::TextRank => "textrank",
            RankingAlgorithm::LexRank => "lexrank",
        }
    }
}

/// How aggressively the body is reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessMode {
    /// Only the selected paragraphs.
    Strict,
    /// Selected paragraphs plus their context window.
    Balanced,
    /// All paragraphs retained up to `preserve_ratio`, original order.
    Preserve,
}

impl PreprocessMode {
    fn label(self) -> &'static str {
        match self {
            PreprocessMode::Strict => "strict",
            PreprocessMode::Balanced => "balanced",
            PreprocessMode::Preserve => "preserve",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    pub key_sentences: usize,
    pub top_paragraphs: usize,
    pub context_window: usize,
    pub mode: PreprocessMode,
    pub algorithm: RankingAlgorithm,
    pub preserve_ratio: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            key_sentences: 8,
            top_paragraphs: 4,
            context_window: 1,
            mode: PreprocessMode::Balanced,
            algorithm: RankingAlgorithm::TextRank,
            preserve_ratio: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedText {
    pub processed_text: String,
    pub method: String,
    pub algorithm: String,
    pub compression_ratio: f64,
    pub paragraph_count: usize,
}

/// Reduces a body to its most information-bearing portion before the LLM
/// summary call, bounding input tokens without losing the core semantics.
pub fn preprocess(body: &str, config: &PreprocessConfig) -> ProcessedText {
    let body: String = body.nfc().collect();
    let paragraphs: Vec<String> = body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if paragraphs.is_empty() {
        return ProcessedText {
            processed_text: String::new(),
            method: config.mode.label().to_string(),
            algorithm: config.algorithm.label().to_string(),
            compression_ratio: 1.0,
            paragraph_count: 0,
        };
    }

    let sentences = split_sentences(&body);
    let key_sentences = rank_sentences(&sentences, config.algorithm, config.key_sentences);

    let scores: Vec<f64> = paragraphs
        .iter()
        .map(|p| score_paragraph(p, &key_sentences))
        .collect();

    let selected = match config.mode {
        PreprocessMode::Strict => select_top(&scores, config.top_paragraphs, 0),
        PreprocessMode::Balanced => {
            select_top(&scores, config.top_paragraphs, config.context_window)
        }
        PreprocessMode::Preserve => select_preserve(&scores, config.preserve_ratio),
    };

    let mut kept: Vec<&str> = Vec::new();
    for (i, paragraph) in paragraphs.iter().enumerate() {
        if selected.contains(&i) {
            kept.push(paragraph);
        }
    }

    let processed_text = kept.join("\n\n");
    let original_chars = body.chars().count().max(1);
    let processed_chars = processed_text.chars().count();

    ProcessedText {
        processed_text,
        method: config.mode.label().to_string(),
        algorithm: config.algorithm.label().to_string(),
        #[allow(clippy::cast_precision_loss)]
        compression_ratio: processed_chars as f64 / original_chars as f64,
        paragraph_count: paragraphs.len(),
    }
}

/// Rough CJK detection: a fifth of the characters in the Han/Kana/Hangul
/// ranges flips the splitter into character-aware mode.
fn is_cjk_text(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let cjk = text.chars().filter(|c| is_cjk_char(*c)).count();
    cjk * 5 >= total
}

fn is_cjk_char(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF      // CJK Unified Ideographs
        | 0x3040..=0x30FF    // Hiragana + Katakana
        | 0xAC00..=0xD7AF    // Hangul syllables
        | 0x3400..=0x4DBF)
}

/// Abbreviations that must not terminate a Latin sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "fig", "al",
    "inc", "ltd", "co", "no", "vol", "approx",
];

/// Splits text into sentences, CJK-aware.
pub fn split_sentences(text: &str) -> Vec<String> {
    if is_cjk_text(text) {
        return split_cjk_sentences(text);
    }
    split_latin_sentences(text)
}

fn split_cjk_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if matches!(c, '。' | '！' | '？' | '；' | '\n') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

fn split_latin_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        let terminal = matches!(c, '.' | '!' | '?');
        if !terminal && c != '\n' {
            continue;
        }

        if c == '.' {
            // A dot after a known abbreviation does not end the sentence
            let last_word = current
                .trim_end_matches('.')
                .rsplit(|ch: char| ch.is_whitespace())
                .next()
                .unwrap_or_default()
                .to_lowercase();
            if ABBREVIATIONS.contains(&last_word.as_str()) {
                continue;
            }
            // Decimal numbers keep their dot
            if chars.peek().is_some_and(char::is_ascii_digit) {
                continue;
            }
        }

        // Sentence ends only when followed by whitespace or end of input
        if terminal && !chars.peek().is_none_or(|next| next.is_whitespace()) {
            continue;
        }

        let trimmed = current.trim();
        if !trimmed.is_empty() {
            sentences.push(trimmed.to_string());
        }
        current.clear();
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

fn tokenize(sentence: &str) -> Vec<String> {
    if is_cjk_text(sentence) {
        return sentence
            .chars()
            .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
            .map(|c| c.to_string())
            .collect();
    }

    sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Word-overlap similarity normalized by sentence lengths (TextRank) or
/// a cosine over term frequencies (LexRank).
fn similarity(a: &[String], b: &[String], algorithm: RankingAlgorithm) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    match algorithm {
        RankingAlgorithm::TextRank => {
            let set_a: HashSet<&String> = a.iter().collect();
            let set_b: HashSet<&String> = b.iter().collect();
            let overlap = set_a.intersection(&set_b).count();
            if overlap == 0 {
                return 0.0;
            }
            #[allow(clippy::cast_precision_loss)]
            let denominator = (a.len() as f64).ln() + (b.len() as f64).ln();
            if denominator <= 0.0 {
                return 0.0;
            }
            #[allow(clippy::cast_precision_loss)]
            let overlap = overlap as f64;
            overlap / denominator
        }
        RankingAlgorithm::LexRank => {
            let mut dot = 0.0_f64;
            let unique: HashSet<&String> = a.iter().chain(b.iter()).collect();
            for term in unique {
                #[allow(clippy::cast_precision_loss)]
                let tf_a = a.iter().filter(|w| *w == term).count() as f64;
                #[allow(clippy::cast_precision_loss)]
                let tf_b = b.iter().filter(|w| *w == term).count() as f64;
                dot += tf_a * tf_b;
            }
            #[allow(clippy::cast_precision_loss)]
            let norm = (a.len() as f64).sqrt() * (b.len() as f64).sqrt();
            if norm == 0.0 {
                0.0
            } else {
                dot / norm
            }
        }
    }
}

/// Power-iteration PageRank over the sentence similarity graph; returns the
/// top-N sentences in original text order.
pub fn rank_sentences(
    sentences: &[String],
    algorithm: RankingAlgorithm,
    top_n: usize,
) -> Vec<String> {
    if sentences.len() <= top_n {
        return sentences.to_vec();
    }

    let tokens: Vec<Vec<String>> = sentences.iter().map(|s| tokenize(s)).collect();
    let n = sentences.len();

    let mut weights = vec![vec![0.0_f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let w = similarity(&tokens[i], &tokens[j], algorithm);
            weights[i][j] = w;
            weights[j][i] = w;
        }
    }

    let out_sums: Vec<f64> = weights.iter().map(|row| row.iter().sum()).collect();

    const DAMPING: f64 = 0.85;
    const ITERATIONS: usize = 30;
    const EPSILON: f64 = 1e-6;

    #[allow(clippy::cast_precision_loss)]
    let mut rank = vec![1.0 / n as f64; n];

    for _ in 0..ITERATIONS {
        let mut next = vec![(1.0 - DAMPING) / n as f64; n];
        #[allow(clippy::needless_range_loop)]
        for i in 0..n {
            for j in 0..n {
                if weights[j][i] > 0.0 && out_sums[j] > 0.0 {
                    next[i] += DAMPING * rank[j] * weights[j][i] / out_sums[j];
                }
            }
        }

        let delta: f64 = rank
            .iter()
            .zip(next.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        rank = next;
        if delta < EPSILON {
            break;
        }
    }

    let mut indexed: Vec<(usize, f64)> = rank.into_iter().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut selected: Vec<usize> = indexed.into_iter().take(top_n).map(|(i, _)| i).collect();
    selected.sort_unstable();

    selected
        .into_iter()
        .filter_map(|i| sentences.get(i).cloned())
        .collect()
}

/// Paragraph score: 1.0 for each key sentence contained verbatim, 0.5 for
/// each key sentence whose word overlap with the paragraph reaches 0.6.
fn score_paragraph(paragraph: &str, key_sentences: &[String]) -> f64 {
    let paragraph_tokens: HashSet<String> = tokenize(paragraph).into_iter().collect();
    let mut score = 0.0;

    for sentence in key_sentences {
        if paragraph.contains(sentence.as_str()) {
            score += 1.0;
            continue;
        }

        let sentence_tokens = tokenize(sentence);
        if sentence_tokens.is_empty() {
            continue;
        }
        let overlapping = sentence_tokens
            .iter()
            .filter(|t| paragraph_tokens.contains(*t))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = overlapping as f64 / sentence_tokens.len() as f64;
        if ratio >= 0.6 {
            score += 0.5;
        }
    }

    score
}

/// Top-K paragraph indices expanded by the context window.
fn select_top(scores: &[f64], top_k: usize, window: usize) -> HashSet<usize> {
    let mut indexed: Vec<(usize, f64)> = scores.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let mut selected = HashSet::new();
    for (index, _) in indexed.into_iter().take(top_k.max(1)) {
        let low = index.saturating_sub(window);
        let high = (index + window).min(scores.len().saturating_sub(1));
        for i in low..=high {
            selected.insert(i);
        }
    }

    selected
}

/// Preserve mode: keeps up to ratio * count paragraphs ordered by score,
/// emitted in original order.
fn select_preserve(scores: &[f64], preserve_ratio: f64) -> HashSet<usize> {
    let ratio = preserve_ratio.clamp(0.1, 1.0);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let keep = ((scores.len() as f64 * ratio).ceil() as usize).max(1);

    select_top(scores, keep, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "Rust guarantees memory safety without a garbage collector. \
The borrow checker enforces ownership rules at compile time.\n\n\
Ownership means every value has a single owner. When the owner goes out of scope the value is dropped.\n\n\
The weather in spring can be unpredictable. Some days bring rain and others sunshine.\n\n\
Borrowing lets code use a value without taking ownership. Mutable borrows are exclusive, shared borrows are not.\n\n\
Lifetimes describe how long references remain valid. The compiler infers most lifetimes automatically.";

    #[test]
    fn empty_input_yields_empty_output() {
        let result = preprocess("", &PreprocessConfig::default());
        assert!(result.processed_text.is_empty());
        assert_eq!(result.paragraph_count, 0);
        assert!((result.compression_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn latin_sentence_split_respects_abbreviations() {
        let sentences = split_sentences("Dr. Smith wrote the paper. It was published in 2020.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].starts_with("Dr. Smith"));
    }

    #[test]
    fn latin_sentence_split_keeps_decimals() {
        let sentences = split_sentences("The value rose by 3.5 percent. Analysts were surprised.");
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].contains("3.5"));
    }

    #[test]
    fn cjk_sentence_split_uses_fullwidth_terminators() {
        let sentences = split_sentences("今日は天気がいいです。明日は雨が降るでしょう。散歩に行きますか？");
        assert_eq!(sentences.len(), 3);
    }

    #[test]
    fn rank_sentences_returns_all_when_few() {
        let sentences = vec!["One sentence.".to_string(), "Two sentences.".to_string()];
        let ranked = rank_sentences(&sentences, RankingAlgorithm::TextRank, 8);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn rank_sentences_selects_central_ones() {
        let sentences = split_sentences(ARTICLE);
        let ranked = rank_sentences(&sentences, RankingAlgorithm::TextRank, 3);
        assert_eq!(ranked.len(), 3);
        // The off-topic weather sentences share almost no vocabulary with the
        // rest of the graph and must not dominate the selection
        let weather_hits = ranked.iter().filter(|s| s.contains("weather")).count();
        assert_eq!(weather_hits, 0);
    }

    #[test]
    fn lexrank_also_produces_ranking() {
        let sentences = split_sentences(ARTICLE);
        let ranked = rank_sentences(&sentences, RankingAlgorithm::LexRank, 3);
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn strict_mode_keeps_fewer_paragraphs_than_balanced() {
        let strict = preprocess(
            ARTICLE,
            &PreprocessConfig {
                mode: PreprocessMode::Strict,
                top_paragraphs: 2,
                ..PreprocessConfig::default()
            },
        );
        let balanced = preprocess(
            ARTICLE,
            &PreprocessConfig {
                mode: PreprocessMode::Balanced,
                top_paragraphs: 2,
                ..PreprocessConfig::default()
            },
        );

        assert!(strict.processed_text.len() <= balanced.processed_text.len());
        assert_eq!(strict.method, "strict");
        assert_eq!(balanced.method, "balanced");
    }

    #[test]
    fn preserve_mode_honors_ratio_bounds() {
        let tiny_ratio = preprocess(
            ARTICLE,
            &PreprocessConfig {
                mode: PreprocessMode::Preserve,
                preserve_ratio: 0.0, // clamps to 0.1
                ..PreprocessConfig::default()
            },
        );
        assert!(!tiny_ratio.processed_text.is_empty());

        let full_ratio = preprocess(
            ARTICLE,
            &PreprocessConfig {
                mode: PreprocessMode::Preserve,
                preserve_ratio: 1.0,
                ..PreprocessConfig::default()
            },
        );
        assert_eq!(
            full_ratio.processed_text.split("\n\n").count(),
            5,
            "ratio 1.0 keeps every paragraph"
        );
    }

    #[test]
    fn compression_ratio_reflects_reduction() {
        let result = preprocess(
            ARTICLE,
            &PreprocessConfig {
                mode: PreprocessMode::Strict,
                top_paragraphs: 1,
                ..PreprocessConfig::default()
            },
        );
        assert!(result.compression_ratio < 1.0);
        assert!(result.compression_ratio > 0.0);
        assert_eq!(result.paragraph_count, 5);
    }

    #[test]
    fn paragraph_scoring_prefers_verbatim_hits() {
        let key = vec!["The borrow checker enforces ownership rules at compile time.".to_string()];
        let containing = "Rust guarantees memory safety without a garbage collector. The borrow checker enforces ownership rules at compile time.";
        let unrelated = "The weather in spring can be unpredictable.";

        assert!(score_paragraph(containing, &key) >= 1.0);
        assert!(score_paragraph(unrelated, &key) < 0.5);
    }
}
