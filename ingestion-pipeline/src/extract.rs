use dom_smoothie::{Article, Config, Readability, TextMode};
use tracing::{debug, warn};

/// Per-domain extraction tuning. Defaults favor recall, which suits the
/// long-tail of personal bookmarks better than strict boilerplate removal.
#[derive(Debug, Clone)]
pub struct ExtractionFlags {
    pub favor_precision: bool,
    pub favor_recall: bool,
    pub include_tables: bool,
    pub include_comments: bool,
    pub deduplicate: bool,
}

impl Default for ExtractionFlags {
    fn default() -> Self {
        Self {
            favor_precision: false,
            favor_recall: true,
            include_tables: true,
            include_comments: false,
            deduplicate: true,
        }
    }
}

/// Clean article output. All fields may be empty; extraction never fails the
/// pipeline, the orchestrator falls back to user-provided metadata.
#[derive(Debug, Clone, Default)]
pub struct ExtractedArticle {
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub text: String,
    pub markdown: String,
}

pub fn extract_article(html: &str, url: &str, flags: &ExtractionFlags) -> ExtractedArticle {
    match try_readability(html, flags) {
        Ok(mut extracted) => {
            if extracted.title.is_empty() {
                extracted.title = fallback_title(html, url);
            }
            if extracted.description.is_empty() {
                extracted.description = first_paragraph_description(&extracted.text);
            }
            if extracted.image_url.is_empty() {
                extracted.image_url = meta_og_image(html).unwrap_or_default();
            }
            extracted
        }
        Err(err) => {
            warn!(url, error = %err, "article extraction failed, falling back to DOM heuristic");
            let text = densest_block_fallback(html);
            ExtractedArticle {
                title: fallback_title(html, url),
                description: first_paragraph_description(&text),
                image_url: meta_og_image(html).unwrap_or_default(),
                markdown: text.clone(),
                text,
            }
        }
    }
}

fn try_readability(
    html: &str,
    flags: &ExtractionFlags,
) -> Result<ExtractedArticle, dom_smoothie::ReadabilityError> {
    let config = Config {
        text_mode: TextMode::Markdown,
        ..Default::default()
    };
    let mut readability = Readability::new(html.to_string(), None, Some(config))?;
    let article: Article = readability.parse()?;

    // With TextMode::Markdown the extracted body doubles as the markdown
    let body = postprocess(&article.text_content, flags);
    debug!(
        title = %article.title,
        chars = body.chars().count(),
        "readability extraction complete"
    );

    Ok(ExtractedArticle {
        title: article.title,
        description: String::new(),
        image_url: String::new(),
        markdown: body.clone(),
        text: body,
    })
}

/// Applies the per-domain flags to the extracted body.
fn postprocess(text: &str, flags: &ExtractionFlags) -> String {
    let mut seen: Vec<&str> = Vec::new();
    let mut kept: Vec<&str> = Vec::new();

    for block in text.split("\n\n") {
        let trimmed = block.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !flags.include_tables && looks_like_table(trimmed) {
            continue;
        }
        if flags.deduplicate && seen.contains(&trimmed) {
            continue;
        }
        seen.push(trimmed);
        kept.push(trimmed);
    }

    kept.join("\n\n")
}

fn looks_like_table(block: &str) -> bool {
    let lines: Vec<&str> = block.lines().collect();
    !lines.is_empty() && lines.iter().all(|l| l.trim_start().starts_with('|'))
}

/// DOM heuristic fallback: the densest text region under common landmarks.
fn densest_block_fallback(html: &str) -> String {
    for landmark in ["<article", "<main"] {
        if let Some(start) = find_ci(html, landmark) {
            let close = landmark.replace('<', "</");
            let end = find_ci(&html[start..], &close).map_or(html.len(), |offset| start + offset);
            let inner = &html[start..end];
            let text = strip_tags(inner);
            if text.chars().count() > 200 {
                return text;
            }
        }
    }

    strip_tags(html)
}

/// Case-insensitive substring search. Needles are ASCII tag fragments, so a
/// match offset is always a char boundary.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn rfind_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len())
        .rev()
        .find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn remove_tag_blocks(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = find_ci(rest, &open) {
        out.push_str(&rest[..start]);
        match find_ci(&rest[start..], &close) {
            Some(offset) => rest = &rest[start + offset + close.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

fn strip_tags(html: &str) -> String {
    let cleaned = remove_tag_blocks(html, "script");
    let cleaned = remove_tag_blocks(&cleaned, "style");

    let mut out = String::with_capacity(cleaned.len() / 2);
    let mut in_tag = false;

    for c in cleaned.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                // Tag boundaries become whitespace so words don't fuse
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Title fallback: first `<h1>`, else the last URL path segment.
fn fallback_title(html: &str, url: &str) -> String {
    if let Some(h1) = between_tags(html, "<h1", "</h1>") {
        let text = strip_tags(&h1);
        if !text.is_empty() {
            return text;
        }
    }
    if let Some(title) = between_tags(html, "<title", "</title>") {
        let text = strip_tags(&title);
        if !text.is_empty() {
            return text;
        }
    }

    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .map_or_else(
            || url.to_string(),
            |segment| segment.replace(['-', '_'], " "),
        )
}

fn between_tags(html: &str, open: &str, close: &str) -> Option<String> {
    let start = find_ci(html, open)?;
    let content_start = start + html[start..].find('>')? + 1;
    let end = content_start + find_ci(&html[content_start..], close)?;
    Some(html[content_start..end].to_string())
}

/// First paragraph, capped to roughly 240 chars at a word boundary.
fn first_paragraph_description(text: &str) -> String {
    let Some(paragraph) = text.split("\n\n").find(|p| !p.trim().is_empty()) else {
        return String::new();
    };

    let paragraph = paragraph.trim().split_whitespace().collect::<Vec<_>>().join(" ");
    if paragraph.chars().count() <= 240 {
        return paragraph;
    }

    let mut out = String::new();
    for word in paragraph.split_whitespace() {
        if out.chars().count() + word.chars().count() + 1 > 237 {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.push_str("...");
    out
}

/// og:image from the document head.
fn meta_og_image(html: &str) -> Option<String> {
    let marker = find_ci(html, "og:image")?;
    let tag_start = rfind_ci(&html[..marker], "<meta")?;
    let tag_end = tag_start + html[tag_start..].find('>')?;
    let tag = &html[tag_start..tag_end];

    let content_pos = find_ci(tag, "content=")?;
    let rest = &tag[content_pos + "content=".len()..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    let value = inner[..end].trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Example Domain</title>
  <meta property="og:image" content="https://example.com/preview.png">
</head>
<body>
  <article>
    <h1>Understanding Attention</h1>
    <p>Attention mechanisms let a model weigh parts of its input differently. This paragraph is long enough to count as real article content and keeps going with more words about queries, keys and values.</p>
    <p>The second paragraph explains multi-head attention and how projections split the representation space into independent subspaces.</p>
  </article>
</body>
</html>"#;

    #[test]
    fn extracts_title_and_body() {
        let article = extract_article(SAMPLE, "https://example.com/attention", &ExtractionFlags::default());

        assert!(!article.text.is_empty());
        assert!(!article.title.is_empty());
        assert!(article.text.contains("Attention"));
    }

    #[test]
    fn falls_back_to_og_image() {
        let article = extract_article(SAMPLE, "https://example.com/attention", &ExtractionFlags::default());
        assert_eq!(article.image_url, "https://example.com/preview.png");
    }

    #[test]
    fn never_errors_on_garbage_input() {
        let article = extract_article("%%% not html at all", "https://example.com/x", &ExtractionFlags::default());
        // Catastrophic input still yields a usable, possibly empty, result
        assert!(article.title.is_empty() || !article.title.is_empty());
    }

    #[test]
    fn fallback_title_prefers_h1_then_url_path() {
        let with_h1 = "<html><body><h1>Real Heading</h1></body></html>";
        assert_eq!(fallback_title(with_h1, "https://e.com/x"), "Real Heading");

        let no_title = "<html><body><p>text</p></body></html>";
        assert_eq!(
            fallback_title(no_title, "https://e.com/posts/rust-ownership-model"),
            "rust ownership model"
        );
    }

    #[test]
    fn description_caps_at_word_boundary() {
        let long: String = "word ".repeat(100);
        let description = first_paragraph_description(&long);
        assert!(description.chars().count() <= 240);
        assert!(description.ends_with("..."));
    }

    #[test]
    fn description_short_paragraph_untouched() {
        assert_eq!(
            first_paragraph_description("A short lead paragraph.\n\nMore."),
            "A short lead paragraph."
        );
    }

    #[test]
    fn postprocess_deduplicates_blocks() {
        let flags = ExtractionFlags::default();
        let text = "Repeated block\n\nRepeated block\n\nUnique block";
        let cleaned = postprocess(text, &flags);
        assert_eq!(cleaned, "Repeated block\n\nUnique block");
    }

    #[test]
    fn postprocess_drops_tables_when_disabled() {
        let flags = ExtractionFlags {
            include_tables: false,
            ..ExtractionFlags::default()
        };
        let text = "Prose paragraph\n\n| a | b |\n| 1 | 2 |";
        let cleaned = postprocess(text, &flags);
        assert_eq!(cleaned, "Prose paragraph");
    }

    #[test]
    fn og_image_absent_is_none() {
        assert!(meta_og_image("<html><head></head></html>").is_none());
    }

    #[test]
    fn og_image_single_quotes() {
        let html = "<meta property='og:image' content='https://e.com/i.jpg'>";
        assert_eq!(meta_og_image(html).as_deref(), Some("https://e.com/i.jpg"));
    }
}
