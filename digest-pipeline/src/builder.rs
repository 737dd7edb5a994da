use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{insight::Insight, insight_tag::InsightTag, profile::Profile},
    },
    utils::llm::{build_chat_request, create_completion, OpenAIClientType},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

const HIGHLIGHT_COUNT: usize = 5;
const MORE_CONTENT_CAP: usize = 10;

const NARRATIVE_SYSTEM_PROMPT: &str = "You write a short, warm weekly recap for a personal \
knowledge base user. Given the titles and summaries of what they saved this week, write two \
or three sentences connecting the themes. No bullet points, no greetings.";

/// Fallback narrative for a week without activity.
pub const NO_ACTIVITY_SUMMARY: &str = "本周没有新的收藏。No new saves this week.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigestItem {
    pub insight_id: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagSection {
    pub name: String,
    pub articles: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSections {
    pub highlights: Vec<DigestItem>,
    pub more_content: Vec<DigestItem>,
    pub stacks: Vec<TagSection>,
    pub suggestions: String,
    pub tags: Vec<TagSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestPayload {
    pub user: DigestUser,
    pub activity_summary: ActivitySummary,
    pub sections: DigestSections,
    pub ai_summary: String,
    pub metadata: DigestMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestUser {
    pub nickname: String,
    pub email: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub insights_count: usize,
    pub tagged_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestMetadata {
    pub generated_at: DateTime<Utc>,
    pub week_start: String,
}

/// Assembles the digest payload for one user and window, narrative included.
#[allow(clippy::too_many_arguments)]
pub async fn build_payload(
    db: &SurrealDbClient,
    openai_client: &OpenAIClientType,
    chat_model: &str,
    profile: &Profile,
    timezone: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    week_start: &str,
) -> Result<DigestPayload, AppError> {
    let insights = Insight::list_in_window(&profile.id, window_start, window_end, db).await?;

    let mut items = Vec::with_capacity(insights.len());
    let mut tagged_count = 0_usize;
    for insight in &insights {
        let tags = InsightTag::tags_for_insight(&insight.id, db).await?;
        if !tags.is_empty() {
            tagged_count += 1;
        }
        items.push(DigestItem {
            insight_id: insight.id.clone(),
            title: insight
                .title
                .clone()
                .unwrap_or_else(|| insight.url.clone()),
            url: insight.url.clone(),
            description: insight.description.clone().unwrap_or_default(),
            tags: tags.into_iter().map(|t| t.name).collect(),
        });
    }

    let sections = assemble_sections(&items);

    let ai_summary = if items.is_empty() {
        NO_ACTIVITY_SUMMARY.to_string()
    } else {
        match generate_narrative(openai_client, chat_model, &items).await {
            Ok(narrative) => narrative,
            Err(err) => {
                // The digest still ships with the fallback text
                warn!(user_id = %profile.id, error = %err, "digest narrative degraded");
                NO_ACTIVITY_SUMMARY.to_string()
            }
        }
    };

    Ok(DigestPayload {
        user: DigestUser {
            nickname: profile
                .nickname
                .clone()
                .or_else(|| profile.username.clone())
                .unwrap_or_else(|| "there".to_string()),
            email: profile.email.clone(),
            timezone: timezone.to_string(),
        },
        activity_summary: ActivitySummary {
            insights_count: items.len(),
            tagged_count,
        },
        sections,
        ai_summary,
        metadata: DigestMetadata {
            generated_at: Utc::now(),
            week_start: week_start.to_string(),
        },
    })
}

/// Sections from the week's items: recency highlights, capped remainder,
/// per-tag groupings and a small heuristic suggestion.
pub fn assemble_sections(items: &[DigestItem]) -> DigestSections {
    let highlights: Vec<DigestItem> = items.iter().take(HIGHLIGHT_COUNT).cloned().collect();
    let more_content: Vec<DigestItem> = items
        .iter()
        .skip(HIGHLIGHT_COUNT)
        .take(MORE_CONTENT_CAP)
        .cloned()
        .collect();

    let mut by_tag: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for item in items {
        for tag in &item.tags {
            by_tag.entry(tag.clone()).or_default().push(&item.title);
        }
    }

    let tags: Vec<TagSection> = by_tag
        .into_iter()
        .map(|(name, titles)| TagSection {
            name,
            articles: titles.join(", "),
        })
        .collect();

    let stacks = tags
        .iter()
        .filter(|section| section.articles.contains(", "))
        .cloned()
        .collect();

    let untagged = items.iter().filter(|i| i.tags.is_empty()).count();
    let suggestions = if untagged > 0 {
        format!("{untagged} saves have no tag yet; tagging them makes next week's digest sharper.")
    } else if items.is_empty() {
        "Save a few pages this week to see them recapped here.".to_string()
    } else {
        "Nicely organized week. Keep it up.".to_string()
    };

    DigestSections {
        highlights,
        more_content,
        stacks,
        suggestions,
        tags,
    }
}

async fn generate_narrative(
    openai_client: &OpenAIClientType,
    chat_model: &str,
    items: &[DigestItem],
) -> Result<String, AppError> {
    let listing: String = items
        .iter()
        .map(|item| {
            if item.description.is_empty() {
                format!("- {}", item.title)
            } else {
                format!("- {}: {}", item.title, item.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let request = build_chat_request(chat_model, NARRATIVE_SYSTEM_PROMPT, listing, Some(200))?;
    let (narrative, _usage) = create_completion(openai_client, request).await?;

    Ok(narrative.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, title: &str, tags: &[&str]) -> DigestItem {
        DigestItem {
            insight_id: id.to_string(),
            title: title.to_string(),
            url: format!("https://example.com/{id}"),
            description: String::new(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
        }
    }

    #[test]
    fn sections_split_highlights_and_remainder() {
        let items: Vec<DigestItem> = (0..8)
            .map(|i| item(&format!("i{i}"), &format!("Title {i}"), &[]))
            .collect();

        let sections = assemble_sections(&items);
        assert_eq!(sections.highlights.len(), 5);
        assert_eq!(sections.more_content.len(), 3);
    }

    #[test]
    fn tag_sections_join_titles() {
        let items = vec![
            item("i1", "Rust ownership", &["rust"]),
            item("i2", "Rust lifetimes", &["rust"]),
            item("i3", "Sourdough basics", &["cooking"]),
        ];

        let sections = assemble_sections(&items);
        assert_eq!(sections.tags.len(), 2);

        let rust = sections
            .tags
            .iter()
            .find(|t| t.name == "rust")
            .expect("rust tag");
        assert_eq!(rust.articles, "Rust ownership, Rust lifetimes");

        // Only multi-article tags become stacks
        assert_eq!(sections.stacks.len(), 1);
        assert_eq!(sections.stacks[0].name, "rust");
    }

    #[test]
    fn suggestions_mention_untagged_items() {
        let items = vec![item("i1", "Untagged page", &[])];
        let sections = assemble_sections(&items);
        assert!(sections.suggestions.contains("no tag"));
    }

    #[test]
    fn empty_week_suggestion() {
        let sections = assemble_sections(&[]);
        assert!(sections.highlights.is_empty());
        assert!(sections.suggestions.contains("Save a few pages"));
    }
}
