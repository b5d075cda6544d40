use serde::Deserialize;

/// Generic Reddit listing envelope: `{"data": {"children": [{"data": ...}]}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct Listing<T> {
    pub data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListingData<T> {
    #[serde(default = "Vec::new")]
    pub children: Vec<Thing<T>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Thing<T> {
    pub data: T,
}

/// A submission as returned by `search.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditPost {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: u32,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub created_utc: f64,
}

/// A comment as returned by `comments/{id}.json`. "more" stubs in the
/// listing carry no body and deserialize to an empty one.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditComment {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub score: i64,
}
