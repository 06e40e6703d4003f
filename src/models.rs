use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::{collections::BTreeMap, fmt, str::FromStr};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Instagram,
    Facebook,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Instagram, Platform::Facebook];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "instagram" | "ig" => Ok(Platform::Instagram),
            "facebook" | "fb" => Ok(Platform::Facebook),
            _ => Err(format!("unsupported platform `{}`", input.trim())),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    ImageSet,
}

/// Media carried by a post. Exactly one variant decides the conversion path.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostMedia {
    Video { video_url: String },
    ImageSet { image_urls: Vec<String> },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SocialPost {
    pub post_link: String,
    pub platform: Platform,
    pub media: PostMedia,
    pub description: String,
}

impl SocialPost {
    pub fn video(
        platform: Platform,
        post_link: impl Into<String>,
        video_url: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            post_link: post_link.into(),
            platform,
            media: PostMedia::Video {
                video_url: video_url.into(),
            },
            description: description.into(),
        }
    }

    pub fn images(
        platform: Platform,
        post_link: impl Into<String>,
        image_urls: Vec<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            post_link: post_link.into(),
            platform,
            media: PostMedia::ImageSet { image_urls },
            description: description.into(),
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self.media {
            PostMedia::Video { .. } => MediaKind::Video,
            PostMedia::ImageSet { .. } => MediaKind::ImageSet,
        }
    }

    /// Builds a post from the backend's loose shape. A non-empty `video_url`
    /// wins over images; a post with neither is unconvertible and yields `None`.
    pub fn from_raw(platform: Platform, raw: RawPost) -> Option<Self> {
        let post_link = raw.post_link.trim().to_string();
        if post_link.is_empty() {
            return None;
        }
        let description = raw.description.unwrap_or_default();
        if let Some(video_url) = raw
            .video_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
        {
            return Some(Self::video(platform, post_link, video_url, description));
        }
        let image_urls = raw
            .image_urls
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect::<Vec<_>>();
        if image_urls.is_empty() {
            return None;
        }
        Some(Self::images(platform, post_link, image_urls, description))
    }
}

/// Post as returned by `fetch_latest_{platform}_post`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPost {
    pub post_link: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default, alias = "image_url", deserialize_with = "null_as_empty")]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NormalizedPost {
    pub images: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub product_id: String,
    #[serde(rename = "product_title")]
    pub title: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub price: String,
    #[serde(rename = "product_description", default)]
    pub description: String,
    #[serde(rename = "about_this_item", default)]
    pub about_item: String,
    #[serde(rename = "images_list", default, deserialize_with = "null_as_empty")]
    pub images: Vec<String>,
    #[serde(
        rename = "product_details",
        default,
        deserialize_with = "string_map"
    )]
    pub details: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub approved: bool,
}

impl ListingEntry {
    pub fn validate(&self) -> Result<(), String> {
        if self.product_id.trim().is_empty() {
            return Err("product_id must not be empty".into());
        }
        if self.title.trim().is_empty() {
            return Err("title must not be empty".into());
        }
        if self.images.iter().all(|image| image.trim().is_empty()) {
            return Err("a listing needs at least one image".into());
        }
        Ok(())
    }
}

/// Partial edit of a listing's editable fields.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingFields {
    pub title: Option<String>,
    pub price: Option<String>,
    pub description: Option<String>,
    pub about_item: Option<String>,
    pub images: Option<Vec<String>>,
    pub details: Option<BTreeMap<String, String>>,
}

impl ListingFields {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.price.is_none()
            && self.description.is_none()
            && self.about_item.is_none()
            && self.images.is_none()
            && self.details.is_none()
    }

    pub fn apply_to(&self, entry: &ListingEntry) -> ListingEntry {
        let mut updated = entry.clone();
        if let Some(title) = &self.title {
            updated.title = title.trim().to_string();
        }
        if let Some(price) = &self.price {
            updated.price = price.trim().to_string();
        }
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(about_item) = &self.about_item {
            updated.about_item = about_item.clone();
        }
        if let Some(images) = &self.images {
            updated.images = images.clone();
        }
        if let Some(details) = &self.details {
            updated.details = details.clone();
        }
        updated
    }
}

/// Body of the listing-creation call.
#[derive(Debug, Clone, Serialize)]
pub struct CreateListingRequest {
    pub post_link: String,
    #[serde(rename = "image_url")]
    pub images: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DashboardStats {
    pub total_listings: usize,
    pub approved_listings: usize,
    pub disapproved_listings: usize,
}

impl DashboardStats {
    pub fn from_listings(listings: &[ListingEntry]) -> Self {
        let approved = listings.iter().filter(|entry| entry.approved).count();
        Self {
            total_listings: listings.len(),
            approved_listings: approved,
            disapproved_listings: listings.len() - approved,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_to_string(Value::deserialize(deserializer)?))
}

// product_details is free-form JSON on the backend; scalars are kept as text.
fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|(key, value)| (key, scalar_to_string(value)))
        .collect())
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}
