use chrono::Utc;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::cache::{CachedDownloadUrl, DownloadUrlCache};
use crate::error::ApiError;

const UPSTREAM_CDN_DOMAIN: &str = "googlevideo.com";
const MAX_TITLE_LENGTH: usize = 50;
const TOKEN_LENGTH: usize = 16;
pub const MEDIA_ROUTE_PREFIX: &str = "/api/media";

pub fn needs_rewrite(platform: &str, original_url: &str) -> bool {
    platform.eq_ignore_ascii_case("youtube")
        || original_url.contains("youtube.com")
        || original_url.contains("youtu.be")
}

pub async fn rewrite_response(
    cache: &DownloadUrlCache,
    response: Value,
    original_video_url: &str,
) -> Value {
    match try_rewrite(cache, response.clone(), original_video_url).await {
        Ok(rewritten) => rewritten,
        Err(error) => {
            warn!("Download url rewrite failed, returning original response: {}", error.message);
            response
        }
    }
}

async fn try_rewrite(
    cache: &DownloadUrlCache,
    mut response: Value,
    original_video_url: &str,
) -> Result<Value, ApiError> {
    let title = response
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("video")
        .to_string();

    if let Some(medias) = response.get_mut("medias").and_then(Value::as_array_mut) {
        for media in medias {
            if let Value::Object(entry) = media {
                rewrite_entry(cache, entry, &title, None, None, original_video_url).await?;
            }
        }
    }

    if let Some(formats) = response.get_mut("formats").and_then(Value::as_object_mut) {
        for (format, qualities) in formats {
            let Value::Object(qualities) = qualities else {
                continue;
            };
            for (quality, entry) in qualities {
                if let Value::Object(entry) = entry {
                    rewrite_entry(
                        cache,
                        entry,
                        &title,
                        Some(quality.as_str()),
                        Some(format.as_str()),
                        original_video_url,
                    )
                    .await?;
                }
            }
        }
    }

    Ok(response)
}

async fn rewrite_entry(
    cache: &DownloadUrlCache,
    entry: &mut Map<String, Value>,
    title: &str,
    quality_key: Option<&str>,
    format_key: Option<&str>,
    original_video_url: &str,
) -> Result<(), ApiError> {
    let Some(media_url) = entry.get("url").and_then(Value::as_str).map(ToString::to_string) else {
        return Ok(());
    };
    if !is_cdn_url(&media_url) {
        return Ok(());
    }

    let quality = entry
        .get("label")
        .or_else(|| entry.get("quality"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| {
            entry
                .get("height")
                .and_then(Value::as_u64)
                .map(|height| format!("{height}p"))
        })
        .or_else(|| quality_key.map(ToString::to_string))
        .unwrap_or_else(|| "default".to_string());

    let format = entry
        .get("ext")
        .or_else(|| entry.get("extension"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| format_key.map(ToString::to_string))
        .unwrap_or_else(|| "mp4".to_string());

    let filename = format!("{}_{quality}.{format}", sanitize_title(title));
    let token = media_token(&media_url);
    let proxied_path = format!("{MEDIA_ROUTE_PREFIX}/{token}");

    cache
        .insert(CachedDownloadUrl {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            token,
            proxied_path: proxied_path.clone(),
            filename,
            quality,
            format,
            title: title.to_string(),
            original_video_url: original_video_url.to_string(),
            original_media_url: media_url.clone(),
        })
        .await?;

    entry.insert("originalUrl".to_string(), json!(media_url));
    entry.insert("url".to_string(), json!(proxied_path));
    Ok(())
}

fn is_cdn_url(media_url: &str) -> bool {
    Url::parse(media_url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(ToString::to_string))
        .map(|host| {
            let host = host.to_ascii_lowercase();
            host == UPSTREAM_CDN_DOMAIN || host.ends_with(&format!(".{UPSTREAM_CDN_DOMAIN}"))
        })
        .unwrap_or(false)
}

fn media_token(media_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(media_url.as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")[..TOKEN_LENGTH].to_string()
}

fn sanitize_title(title: &str) -> String {
    let mut sanitized = String::with_capacity(title.len());
    for character in title.chars().flat_map(char::to_lowercase) {
        if character.is_ascii_lowercase() || character.is_ascii_digit() {
            sanitized.push(character);
        } else {
            sanitized.push('_');
        }
    }

    let mut sanitized: String = sanitized.chars().take(MAX_TITLE_LENGTH).collect();
    if sanitized.trim_matches('_').is_empty() {
        sanitized = "video".to_string();
    }
    sanitized
}
