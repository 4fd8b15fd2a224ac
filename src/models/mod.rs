use serde::{Deserialize, Serialize};

/// Catalog product as stored in Postgres.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub description: String,
    pub merchant_id: String,
    pub category_id: String,
    pub popularity: f64,
}

/// Compact product record cached under `product:meta`.
///
/// Serialized deterministically (fixed field order); unknown fields on read
/// are ignored so older writers stay compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductMeta {
    pub title: String,
    pub merchant_id: String,
    pub category_id: String,
    pub popularity: f64,
}

impl From<&Product> for ProductMeta {
    fn from(p: &Product) -> Self {
        Self {
            title: p.title.clone(),
            merchant_id: p.merchant_id.clone(),
            category_id: p.category_id.clone(),
            popularity: p.popularity,
        }
    }
}

/// Interaction event types with their aggregation weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InteractionType {
    View,
    Click,
    Cart,
    Purchase,
}

impl InteractionType {
    /// Weight used by the popularity aggregator and CF trainer.
    pub fn weight(&self) -> f64 {
        match self {
            InteractionType::View => 0.5,
            InteractionType::Click => 1.0,
            InteractionType::Cart => 3.0,
            InteractionType::Purchase => 8.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::View => "VIEW",
            InteractionType::Click => "CLICK",
            InteractionType::Cart => "CART",
            InteractionType::Purchase => "PURCHASE",
        }
    }
}

/// Raw interaction event as drained from the `events` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEvent {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub product_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
}

/// Interaction row appended to the store (append-only).
#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub user_id: Option<String>,
    pub product_id: String,
    pub kind: InteractionType,
    pub value: f64,
}

/// A grouped training row: summed interaction weight per (user, product).
/// Anonymous traffic is grouped under the "anon" user key.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrainingRow {
    pub user_key: String,
    pub product_id: String,
    pub weight: f64,
}

/// Where a candidate entered the ranking pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Personalized,
    Textual,
    Popularity,
    Category,
}

impl CandidateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateSource::Personalized => "personalized",
            CandidateSource::Textual => "textual",
            CandidateSource::Popularity => "popularity",
            CandidateSource::Category => "category",
        }
    }
}

/// Candidate prior to meta hydration and score fusion.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub product_id: String,
    pub base_score: f64,
    pub text_score: f64,
    pub source: CandidateSource,
}

/// Feed request as handed over by the surrounding HTTP layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedRequest {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub search_text: Option<String>,
    pub category_id: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

/// Product as returned in a feed page. Items hydrated from the meta cache
/// carry an empty description; store-hydrated items carry the full one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedProduct {
    pub id: String,
    pub title: String,
    pub description: String,
    pub merchant_id: String,
    pub category_id: String,
    pub popularity: f64,
}

impl FeedProduct {
    pub fn from_meta(id: &str, meta: &ProductMeta) -> Self {
        Self {
            id: id.to_string(),
            title: meta.title.clone(),
            description: String::new(),
            merchant_id: meta.merchant_id.clone(),
            category_id: meta.category_id.clone(),
            popularity: meta.popularity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub score: f64,
    pub product: FeedProduct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResponse {
    pub items: Vec<FeedItem>,
    pub cursor: Option<String>,
}

/// Fuzzy text match from the trigram search, score normalized to [0,1].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TextMatch {
    pub product_id: String,
    pub score: f64,
}
