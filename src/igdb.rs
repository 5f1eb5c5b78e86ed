//! IGDB metadata client.
//!
//! Authenticates with the Twitch client-credentials flow, sends Apicalypse
//! queries to the IGDB v4 API and maps the responses into [`GameMetadata`].
//! Search results are kept in a small LRU so repeated scans of the same
//! library do not hammer the API.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::IgdbConfig;

/// Errors returned by a [`MetadataSource`].
#[derive(Debug, Error)]
pub enum IgdbError {
    #[error("IGDB credentials are not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the token endpoint or the API.
    #[error("IGDB API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("IGDB game {0} not found")]
    NotFound(i64),

    #[error("failed to parse IGDB response: {0}")]
    Parse(String),
}

/// Normalized game metadata, independent of the IGDB wire format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameMetadata {
    pub igdb_id: i64,
    pub name: String,
    pub summary: Option<String>,
    pub storyline: Option<String>,
    pub url: Option<String>,
    pub rating: Option<f64>,
    /// `YYYY-MM-DD`
    pub first_release_date: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub cover_url: Option<String>,
    pub screenshot_urls: Vec<String>,
    pub genres: Vec<String>,
    pub themes: Vec<String>,
    pub game_modes: Vec<String>,
    pub platforms: Vec<String>,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
}

/// Something that can look games up by name or id.
///
/// The scanner and the HTTP handlers only see this trait, which keeps them
/// testable without network access.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn search_by_name(&self, name: &str, limit: usize) -> Result<Vec<GameMetadata>, IgdbError>;
    async fn fetch_by_id(&self, igdb_id: i64) -> Result<GameMetadata, IgdbError>;
}

/// Picks the result whose name equals `cleaned` (ignoring case and punctuation),
/// falling back to IGDB's own ranking.
pub fn best_match<'a>(cleaned: &str, results: &'a [GameMetadata]) -> Option<&'a GameMetadata> {
    let wanted = comparable(cleaned);
    results.iter().find(|m| comparable(&m.name) == wanted).or_else(|| results.first())
}

fn comparable(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).flat_map(|c| c.to_lowercase()).collect()
}

const GAME_FIELDS: &str = "id,name,summary,storyline,url,total_rating,first_release_date,category,status,\
cover.url,screenshots.url,genres.name,themes.name,game_modes.name,platforms.name,\
involved_companies.company.name,involved_companies.developer,involved_companies.publisher";

pub(crate) fn build_search_query(name: &str, limit: usize) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("search \"{}\"; fields {}; limit {};", escaped, GAME_FIELDS, limit.clamp(1, 50))
}

pub(crate) fn build_id_query(igdb_id: i64) -> String {
    format!("fields {}; where id = {};", GAME_FIELDS, igdb_id)
}

/// Rewrites an IGDB image URL to the requested size variant, e.g.
/// `//images.igdb.com/igdb/image/upload/t_thumb/abc.jpg` with `t_cover_big`.
pub fn normalize_image_url(url: &str, size: &str) -> String {
    let mut out = if let Some(rest) = url.strip_prefix("//") {
        format!("https://{}", rest)
    } else if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url.trim_start_matches('/'))
    };
    if let Some(start) = out.find("/t_") {
        let tail = &out[start + 1..];
        let end = tail.find('/').map(|i| start + 1 + i).unwrap_or(out.len());
        out.replace_range(start + 1..end, size);
    }
    out
}

fn category_name(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "main_game",
        1 => "dlc_addon",
        2 => "expansion",
        3 => "bundle",
        4 => "standalone_expansion",
        5 => "mod",
        6 => "episode",
        7 => "season",
        8 => "remake",
        9 => "remaster",
        10 => "expanded_game",
        11 => "port",
        12 => "fork",
        13 => "pack",
        14 => "update",
        _ => return None,
    })
}

fn status_name(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "released",
        2 => "alpha",
        3 => "beta",
        4 => "early_access",
        5 => "offline",
        6 => "cancelled",
        7 => "rumored",
        8 => "delisted",
        _ => return None,
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawGame {
    id: i64,
    name: Option<String>,
    summary: Option<String>,
    storyline: Option<String>,
    url: Option<String>,
    total_rating: Option<f64>,
    first_release_date: Option<i64>,
    category: Option<i64>,
    status: Option<i64>,
    cover: Option<RawImage>,
    #[serde(default)]
    screenshots: Vec<RawImage>,
    #[serde(default)]
    genres: Vec<RawNamed>,
    #[serde(default)]
    themes: Vec<RawNamed>,
    #[serde(default)]
    game_modes: Vec<RawNamed>,
    #[serde(default)]
    platforms: Vec<RawNamed>,
    #[serde(default)]
    involved_companies: Vec<RawInvolvedCompany>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNamed {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInvolvedCompany {
    company: Option<RawNamed>,
    #[serde(default)]
    developer: bool,
    #[serde(default)]
    publisher: bool,
}

fn names(items: Vec<RawNamed>) -> Vec<String> {
    items.into_iter().filter_map(|n| n.name).filter(|n| !n.trim().is_empty()).collect()
}

impl From<RawGame> for GameMetadata {
    fn from(raw: RawGame) -> Self {
        let mut developers = Vec::new();
        let mut publishers = Vec::new();
        for ic in raw.involved_companies {
            let Some(name) = ic.company.and_then(|c| c.name) else { continue };
            if ic.developer {
                developers.push(name.clone());
            }
            if ic.publisher {
                publishers.push(name);
            }
        }

        GameMetadata {
            igdb_id: raw.id,
            name: raw.name.unwrap_or_default(),
            summary: raw.summary,
            storyline: raw.storyline,
            url: raw.url,
            rating: raw.total_rating,
            first_release_date: raw
                .first_release_date
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.format("%Y-%m-%d").to_string()),
            category: raw.category.and_then(category_name).map(str::to_string),
            status: raw.status.and_then(status_name).map(str::to_string),
            cover_url: raw.cover.and_then(|c| c.url).map(|u| normalize_image_url(&u, "t_cover_big")),
            screenshot_urls: raw
                .screenshots
                .into_iter()
                .filter_map(|s| s.url)
                .map(|u| normalize_image_url(&u, "t_screenshot_big"))
                .collect(),
            genres: names(raw.genres),
            themes: names(raw.themes),
            game_modes: names(raw.game_modes),
            platforms: names(raw.platforms),
            developers,
            publishers,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// [`MetadataSource`] backed by the real IGDB API.
pub struct IgdbClient {
    http: reqwest::Client,
    cfg: IgdbConfig,
    token: tokio::sync::Mutex<Option<CachedToken>>,
    cache: Mutex<LruCache<String, Vec<GameMetadata>>>,
}

impl IgdbClient {
    pub fn new(cfg: IgdbConfig) -> Result<Self, IgdbError> {
        if !cfg.is_configured() {
            return Err(IgdbError::NotConfigured);
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("sharewarez/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        let cap = NonZeroUsize::new(cfg.cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self { http, cfg, token: tokio::sync::Mutex::new(None), cache: Mutex::new(LruCache::new(cap)) })
    }

    async fn access_token(&self) -> Result<String, IgdbError> {
        let mut guard = self.token.lock().await;
        if let Some(t) = guard.as_ref() {
            if Instant::now() < t.expires_at {
                return Ok(t.value.clone());
            }
        }

        let resp = self
            .http
            .post(&self.cfg.token_url)
            .query(&[
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let token: TokenResponse = resp.json().await.map_err(|e| IgdbError::Parse(e.to_string()))?;
        tracing::debug!("Obtained IGDB access token, expires in {}s", token.expires_in);

        // Refresh a minute early
        let ttl = Duration::from_secs(token.expires_in.saturating_sub(60));
        *guard = Some(CachedToken { value: token.access_token.clone(), expires_at: Instant::now() + ttl });
        Ok(token.access_token)
    }

    async fn query_games(&self, body: String) -> Result<Vec<GameMetadata>, IgdbError> {
        let token = self.access_token().await?;
        let url = format!("{}/games", self.cfg.api_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .header("Client-ID", &self.cfg.client_id)
            .bearer_auth(&token)
            .header(reqwest::header::ACCEPT, "application/json")
            .body(body)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked early; next call fetches a fresh one
            *self.token.lock().await = None;
        }
        let resp = check_response(resp).await?;
        let raw: Vec<RawGame> = resp.json().await.map_err(|e| IgdbError::Parse(e.to_string()))?;
        Ok(raw.into_iter().map(GameMetadata::from).collect())
    }
}

#[async_trait]
impl MetadataSource for IgdbClient {
    async fn search_by_name(&self, name: &str, limit: usize) -> Result<Vec<GameMetadata>, IgdbError> {
        let key = format!("{}|{}", name.to_lowercase(), limit);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }

        let results = self.query_games(build_search_query(name, limit)).await?;
        tracing::debug!("IGDB search '{}' returned {} results", name, results.len());

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, results.clone());
        }
        Ok(results)
    }

    async fn fetch_by_id(&self, igdb_id: i64) -> Result<GameMetadata, IgdbError> {
        self.query_games(build_id_query(igdb_id)).await?.into_iter().next().ok_or(IgdbError::NotFound(igdb_id))
    }
}

async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, IgdbError> {
    if !resp.status().is_success() {
        return Err(IgdbError::Api {
            status: resp.status().as_u16(),
            message: resp.text().await.unwrap_or_default(),
        });
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_url_gets_scheme_and_size() {
        assert_eq!(
            normalize_image_url("//images.igdb.com/igdb/image/upload/t_thumb/co1wyy.jpg", "t_cover_big"),
            "https://images.igdb.com/igdb/image/upload/t_cover_big/co1wyy.jpg"
        );
        assert_eq!(
            normalize_image_url("https://images.igdb.com/igdb/image/upload/t_thumb/sc6.jpg", "t_screenshot_big"),
            "https://images.igdb.com/igdb/image/upload/t_screenshot_big/sc6.jpg"
        );
    }

    #[test]
    fn search_query_escapes_quotes() {
        let q = build_search_query("Say \"Hi\"", 5);
        assert!(q.starts_with("search \"Say \\\"Hi\\\"\";"));
        assert!(q.ends_with("limit 5;"));
        assert!(build_search_query("x", 500).ends_with("limit 50;"));
    }

    #[test]
    fn raw_game_maps_to_metadata() {
        let json = r#"[{
            "id": 1942,
            "name": "The Witcher 3: Wild Hunt",
            "summary": "RPG",
            "total_rating": 92.5,
            "first_release_date": 1431993600,
            "category": 0,
            "status": 0,
            "cover": {"url": "//images.igdb.com/igdb/image/upload/t_thumb/co1wyy.jpg"},
            "screenshots": [{"url": "//images.igdb.com/igdb/image/upload/t_thumb/s1.jpg"}],
            "genres": [{"name": "Role-playing (RPG)"}],
            "involved_companies": [
                {"company": {"name": "CD Projekt RED"}, "developer": true, "publisher": false},
                {"company": {"name": "CD Projekt"}, "developer": false, "publisher": true}
            ]
        }]"#;
        let raw: Vec<RawGame> = serde_json::from_str(json).unwrap();
        let meta: GameMetadata = raw.into_iter().next().unwrap().into();

        assert_eq!(meta.igdb_id, 1942);
        assert_eq!(meta.first_release_date.as_deref(), Some("2015-05-19"));
        assert_eq!(meta.category.as_deref(), Some("main_game"));
        assert_eq!(meta.status.as_deref(), Some("released"));
        assert_eq!(meta.developers, vec!["CD Projekt RED".to_string()]);
        assert_eq!(meta.publishers, vec!["CD Projekt".to_string()]);
        assert_eq!(meta.genres, vec!["Role-playing (RPG)".to_string()]);
        assert!(meta.cover_url.unwrap().contains("t_cover_big"));
        assert_eq!(meta.screenshot_urls.len(), 1);
        assert!(meta.themes.is_empty());
    }

    #[test]
    fn best_match_prefers_exact_name() {
        let results = vec![
            GameMetadata { igdb_id: 1, name: "Doom II".into(), ..Default::default() },
            GameMetadata { igdb_id: 2, name: "DOOM".into(), ..Default::default() },
        ];
        assert_eq!(best_match("Doom", &results).map(|m| m.igdb_id), Some(2));
        assert_eq!(best_match("Quake", &results).map(|m| m.igdb_id), Some(1));
        assert!(best_match("Doom", &[]).is_none());
    }

    #[test]
    fn client_requires_credentials() {
        let cfg = crate::config::AppConfig::default().igdb;
        assert!(matches!(IgdbClient::new(cfg), Err(IgdbError::NotConfigured)));
    }
}
