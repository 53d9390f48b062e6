//! Lexical relevance scoring.
//!
//! Every item gets the sum of three independent signals:
//!
//! | signal                                              | weight |
//! |-----------------------------------------------------|--------|
//! | species filter is a substring of `species`          | 3      |
//! | query text is a substring of `text`                 | 2      |
//! | `category` is a substring of the query text         | 1      |
//!
//! All comparisons are case-insensitive. Items scoring zero are dropped and
//! ties keep corpus order.

use crate::models::{KnowledgeItem, ScoredItem, StoreQuery};

pub const SPECIES_WEIGHT: u32 = 3;
pub const TEXT_WEIGHT: u32 = 2;
pub const CATEGORY_WEIGHT: u32 = 1;

/// Lower-cased query terms, computed once per search.
#[derive(Debug, Clone)]
pub struct LexicalQuery {
    text: String,
    species: Option<String>,
}

impl LexicalQuery {
    pub fn new(text: &str, species: Option<&str>) -> Self {
        Self {
            text: text.to_lowercase(),
            species: species
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_lowercase),
        }
    }

    pub fn from_store_query(query: &StoreQuery) -> Self {
        Self::new(&query.text, query.species.as_deref())
    }

    /// Score a single item. The query text is matched as given, surrounding
    /// whitespace included; a blank one contributes neither the text nor
    /// the category signal.
    pub fn score(&self, item: &KnowledgeItem) -> u32 {
        let mut score = 0;

        let species_match = self
            .species
            .as_deref()
            .is_some_and(|species| item.species.to_lowercase().contains(species));
        if species_match {
            score += SPECIES_WEIGHT;
        }

        if !self.text.trim().is_empty() {
            if item.text.to_lowercase().contains(self.text.as_str()) {
                score += TEXT_WEIGHT;
            }

            let category = item.category.trim().to_lowercase();
            if !category.is_empty() && self.text.contains(category.as_str()) {
                score += CATEGORY_WEIGHT;
            }
        }

        score
    }
}

/// Rank `items` against `query`, keeping at most `limit` non-zero hits.
pub fn rank_items<'a, I>(items: I, query: &LexicalQuery, limit: usize) -> Vec<ScoredItem>
where
    I: IntoIterator<Item = &'a KnowledgeItem>,
{
    let mut hits: Vec<(u32, &KnowledgeItem)> = items
        .into_iter()
        .filter_map(|item| {
            let score = query.score(item);
            (score > 0).then_some((score, item))
        })
        .collect();

    // sort_by is stable: equal scores keep insertion order
    hits.sort_by(|a, b| b.0.cmp(&a.0));
    hits.truncate(limit);

    hits.into_iter()
        .map(|(score, item)| ScoredItem {
            item: item.clone(),
            score: score as f32,
        })
        .collect()
}
