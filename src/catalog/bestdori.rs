use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::CatalogClient;
use crate::config::ApiConfig;
use crate::error::{AppError, Result};
use crate::models::{Chart, DifficultyLabel, Post, PostOrder, PostPage, SongDetail, SongSummary};

const CHART_CATEGORY_NAME: &str = "SELF_POST";
const CHART_CATEGORY_ID: &str = "chart";

#[derive(Debug, Deserialize)]
struct PostEnvelope {
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    post: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PostListEnvelope {
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(flatten)]
    page: PostPage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostListRequest<'a> {
    following: bool,
    category_name: &'a str,
    category_id: &'a str,
    order: &'a str,
    limit: u32,
    offset: u32,
}

/// What a 404 (or an HTML fallback page) means for a given endpoint.
#[derive(Clone, Copy)]
enum Missing {
    NotFound,
    NotExist,
}

pub struct BestdoriClient {
    client: Client,
    base: Url,
}

impl BestdoriClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .user_agent(config.user_agent.as_str());

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|e| AppError::Config(format!("invalid api.base_url {:?}: {}", base, e)))?;

        Ok(Self {
            client: builder.build()?,
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| anyhow::anyhow!("invalid endpoint {}: {}", path, e).into())
    }

    async fn get(&self, url: Url, missing: Missing) -> Result<Response> {
        let response = self.client.get(url.clone()).send().await?;
        check_response(response, url.as_str(), missing)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str, missing: Missing) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self.get(url, missing).await?;
        let body = response.bytes().await?;
        parse_document(&body, what)
    }

    async fn get_asset(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(path)?;
        let response = self.get(url, Missing::NotFound).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl CatalogClient for BestdoriClient {
    async fn fetch_catalog_summary(&self) -> Result<BTreeMap<String, SongSummary>> {
        self.get_json("api/songs/all.8.json", "song catalog", Missing::NotFound)
            .await
    }

    async fn fetch_song_detail(&self, id: u32) -> Result<SongDetail> {
        self.get_json(
            &format!("api/songs/{}.json", id),
            &format!("song {}", id),
            Missing::NotFound,
        )
        .await
    }

    async fn fetch_chart(&self, id: u32, difficulty: DifficultyLabel) -> Result<Chart> {
        self.get_json(
            &format!("api/charts/{}/{}.json", id, difficulty),
            &format!("chart {}-{}", id, difficulty),
            Missing::NotExist,
        )
        .await
    }

    async fn fetch_post(&self, id: u32) -> Result<Post> {
        let mut url = self.endpoint("api/post/details")?;
        url.query_pairs_mut().append_pair("id", &id.to_string());
        let what = format!("post {}", id);

        let response = self.get(url, Missing::NotFound).await?;
        let body = response.bytes().await?;
        let envelope: PostEnvelope = parse_document(&body, &what)?;
        match envelope.post {
            Some(post) if envelope.result => serde_json::from_value(post.clone()).map_err(|source| {
                AppError::MalformedDocument {
                    what,
                    source,
                    body: post.to_string(),
                }
            }),
            _ => Err(AppError::NotFound(format!(
                "{} ({})",
                what,
                envelope.code.as_deref().unwrap_or("no post")
            ))),
        }
    }

    async fn fetch_post_page(&self, offset: u32, limit: u32, order: PostOrder) -> Result<PostPage> {
        let url = self.endpoint("api/post/list")?;
        let request = PostListRequest {
            following: false,
            category_name: CHART_CATEGORY_NAME,
            category_id: CHART_CATEGORY_ID,
            order: order.as_str(),
            limit,
            offset,
        };

        let response = self.client.post(url.clone()).json(&request).send().await?;
        let response = check_response(response, url.as_str(), Missing::NotFound)?;
        let body = response.bytes().await?;
        let envelope: PostListEnvelope = parse_document(&body, "post list")?;
        if !envelope.result {
            return Err(AppError::PermanentRequest {
                status: StatusCode::OK.as_u16(),
                url: format!("{} ({})", url, envelope.code.unwrap_or_default()),
            });
        }
        Ok(envelope.page)
    }

    async fn fetch_jacket(&self, song_id: u32, song: &SongDetail, image: &str) -> Result<Vec<u8>> {
        let server = song.summary.preferred_server().as_str();
        // Jackets are bundled in groups of ten song ids.
        let bundle = song_id.div_ceil(10) * 10;
        let path = format!(
            "assets/{server}/musicjacket/musicjacket{bundle}_rip/assets-star-forassetbundle-startapp-musicjacket-musicjacket{bundle}-{image}-jacket.png",
            image = image.to_lowercase(),
        );
        self.get_asset(&path).await
    }

    async fn fetch_bgm(&self, song_id: u32, song: &SongDetail) -> Result<Vec<u8>> {
        let server = song.summary.preferred_server().as_str();
        let path = format!("assets/{server}/sound/bgm{song_id:03}_rip/bgm{song_id:03}.mp3");
        self.get_asset(&path).await
    }
}

/// Map an upstream status onto the error taxonomy. `None` means success.
fn classify_status(status: StatusCode, url: &str, missing: Missing) -> Option<AppError> {
    if status.is_success() {
        return None;
    }
    let status_code = status.as_u16();
    let err = match status {
        StatusCode::NOT_FOUND => missing_error(url, missing),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => AppError::TransientUpstream {
            status: status_code,
            url: url.to_string(),
        },
        s if s.is_server_error() => AppError::TransientUpstream {
            status: status_code,
            url: url.to_string(),
        },
        _ => AppError::PermanentRequest {
            status: status_code,
            url: url.to_string(),
        },
    };
    Some(err)
}

fn missing_error(url: &str, missing: Missing) -> AppError {
    match missing {
        Missing::NotFound => AppError::NotFound(url.to_string()),
        Missing::NotExist => AppError::NotExist(url.to_string()),
    }
}

fn check_response(response: Response, url: &str, missing: Missing) -> Result<Response> {
    if let Some(err) = classify_status(response.status(), url, missing) {
        return Err(err);
    }
    // Unknown paths are answered with the site's HTML shell instead of a 404.
    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/html"));
    if is_html {
        return Err(missing_error(url, missing));
    }
    Ok(response)
}

fn parse_document<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| AppError::MalformedDocument {
        what: what.to_string(),
        source,
        body: String::from_utf8_lossy(body).into_owned(),
    })
}
