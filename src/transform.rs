use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::ApiError;

const BYTES_PER_MEGABYTE: f64 = 1_048_576.0;

#[derive(Debug)]
pub enum UpstreamShape {
    Medias(Value),
    Formats(Value),
    DownloadOptions(Vec<DownloadOption>),
    Streaming(StreamingData),
    Links(Map<String, Value>),
    Unrecognized,
}

#[derive(Debug, Deserialize)]
pub struct DownloadOption {
    format: Option<String>,
    quality: Option<String>,
    label: Option<String>,
    url: Option<String>,
    size: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingData {
    #[serde(default)]
    formats: Vec<StreamEntry>,
    #[serde(default)]
    adaptive_formats: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEntry {
    url: Option<String>,
    mime_type: Option<String>,
    quality_label: Option<String>,
    quality: Option<String>,
    audio_quality: Option<String>,
    content_length: Option<Value>,
}

pub fn detect_shape(data: &Value) -> UpstreamShape {
    if let Some(medias) = data.get("medias") {
        let populated = match medias {
            Value::Array(entries) => !entries.is_empty(),
            Value::Object(entries) => !entries.is_empty(),
            _ => false,
        };
        if populated {
            return UpstreamShape::Medias(data.clone());
        }
    }

    if data.get("formats").is_some_and(Value::is_object) {
        return UpstreamShape::Formats(data.clone());
    }

    if let Some(options) = data.get("downloadOptions").and_then(Value::as_array)
        && !options.is_empty()
        && let Ok(options) =
            serde_json::from_value::<Vec<DownloadOption>>(Value::Array(options.clone()))
    {
        return UpstreamShape::DownloadOptions(options);
    }

    if let Some(streaming) = data.get("streamingData")
        && streaming.is_object()
        && let Ok(streaming) = serde_json::from_value::<StreamingData>(streaming.clone())
    {
        return UpstreamShape::Streaming(streaming);
    }

    for key in ["links", "urls"] {
        if let Some(links) = data.get(key).and_then(Value::as_object)
            && !links.is_empty()
        {
            return UpstreamShape::Links(links.clone());
        }
    }

    UpstreamShape::Unrecognized
}

pub fn transform_response(data: Value, platform: &str) -> Result<Value, ApiError> {
    let title = data.get("title").cloned();

    match detect_shape(&data) {
        UpstreamShape::Medias(payload) | UpstreamShape::Formats(payload) => {
            Ok(with_success_status(payload))
        }
        UpstreamShape::DownloadOptions(options) => {
            finish_formats(transform_download_options(options), title)
        }
        UpstreamShape::Streaming(streaming) => {
            finish_formats(transform_streaming_data(streaming), title)
        }
        UpstreamShape::Links(links) => finish_formats(transform_links(links, platform), title),
        UpstreamShape::Unrecognized => Err(ApiError::invalid_shape()),
    }
}

fn with_success_status(payload: Value) -> Value {
    let mut response = Map::new();
    response.insert("status".to_string(), json!("success"));
    if let Value::Object(fields) = payload {
        for (key, value) in fields {
            if key != "status" {
                response.insert(key, value);
            }
        }
    }
    Value::Object(response)
}

fn finish_formats(formats: Map<String, Value>, title: Option<Value>) -> Result<Value, ApiError> {
    if formats.values().all(|qualities| {
        qualities
            .as_object()
            .is_none_or(|qualities| qualities.is_empty())
    }) {
        return Err(ApiError::invalid_shape());
    }

    let mut response = Map::new();
    response.insert("status".to_string(), json!("success"));
    if let Some(title) = title {
        response.insert("title".to_string(), title);
    }
    response.insert("formats".to_string(), Value::Object(formats));
    Ok(Value::Object(response))
}

fn transform_download_options(options: Vec<DownloadOption>) -> Map<String, Value> {
    let mut formats = Map::new();

    for option in options {
        let Some(url) = option.url.filter(|url| !url.is_empty()) else {
            continue;
        };
        let format = option
            .format
            .filter(|format| !format.is_empty())
            .unwrap_or_else(|| "mp4".to_string())
            .to_ascii_lowercase();
        let quality = option
            .quality
            .or(option.label)
            .filter(|quality| !quality.is_empty())
            .unwrap_or_else(|| "default".to_string());

        insert_format_entry(&mut formats, &format, &quality, &url, size_label(option.size));
    }

    formats
}

fn transform_streaming_data(streaming: StreamingData) -> Map<String, Value> {
    let mut formats = Map::new();

    for entry in streaming.formats.into_iter().chain(streaming.adaptive_formats) {
        let Some(url) = entry.url.filter(|url| !url.is_empty()) else {
            continue;
        };

        let is_audio = entry.audio_quality.is_some()
            || entry
                .mime_type
                .as_deref()
                .is_some_and(|mime| mime.contains("audio"));
        let bucket = if is_audio { "mp3" } else { "mp4" };

        let quality = entry
            .quality_label
            .or(entry.quality)
            .or(entry.audio_quality)
            .filter(|quality| !quality.is_empty())
            .unwrap_or_else(|| "default".to_string());

        insert_format_entry(
            &mut formats,
            bucket,
            &quality,
            &url,
            content_length_label(entry.content_length),
        );
    }

    formats
}

fn transform_links(links: Map<String, Value>, platform: &str) -> Map<String, Value> {
    let is_youtube = platform.eq_ignore_ascii_case("youtube");
    let mut formats = Map::new();

    for (quality, value) in links {
        let url = match &value {
            Value::String(url) => Some(url.clone()),
            Value::Object(entry) => entry
                .get("url")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            _ => None,
        };
        let Some(url) = url.filter(|url| !url.is_empty()) else {
            continue;
        };

        let bucket = if is_youtube && quality.to_ascii_lowercase().contains("audio") {
            "mp3"
        } else {
            "mp4"
        };

        let size = value
            .get("size")
            .map(|size| size_label(Some(size.clone())))
            .unwrap_or_else(|| "Unknown".to_string());

        insert_format_entry(&mut formats, bucket, &quality, &url, size);
    }

    formats
}

fn insert_format_entry(
    formats: &mut Map<String, Value>,
    format: &str,
    quality: &str,
    url: &str,
    size: String,
) {
    let qualities = formats
        .entry(format.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(qualities) = qualities {
        qualities.insert(quality.to_string(), json!({ "url": url, "size": size }));
    }
}

fn size_label(size: Option<Value>) -> String {
    match size {
        Some(Value::String(text)) if !text.trim().is_empty() => text,
        Some(Value::Number(bytes)) => bytes
            .as_f64()
            .map(megabytes_label)
            .unwrap_or_else(|| "Unknown".to_string()),
        _ => "Unknown".to_string(),
    }
}

fn content_length_label(content_length: Option<Value>) -> String {
    let bytes = match content_length {
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(Value::Number(number)) => number.as_f64(),
        _ => None,
    };

    bytes
        .map(megabytes_label)
        .unwrap_or_else(|| "Unknown".to_string())
}

fn megabytes_label(bytes: f64) -> String {
    let megabytes = (bytes / BYTES_PER_MEGABYTE).round() as u64;
    if megabytes == 0 {
        "Unknown".to_string()
    } else {
        format!("{megabytes} MB")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_medias_pass_through_with_success_status() {
        let payload = json!({
            "medias": [
                {"url": "https://cdn.example.com/v.mp4", "quality": "720p"}
            ],
            "title": "Some Video"
        });

        let response = transform_response(payload, "tiktok").unwrap();
        assert_eq!(response["status"], "success");
        assert_eq!(response["medias"][0]["quality"], "720p");
        assert_eq!(response["title"], "Some Video");
    }

    #[test]
    fn native_formats_pass_through_with_success_status() {
        let payload = json!({
            "formats": {
                "mp4": {"720p": {"url": "https://cdn.example.com/v.mp4", "size": "12 MB"}}
            }
        });

        let response = transform_response(payload, "youtube").unwrap();
        assert_eq!(response["status"], "success");
        assert_eq!(
            response["formats"]["mp4"]["720p"]["url"],
            "https://cdn.example.com/v.mp4"
        );
    }

    #[test]
    fn download_options_group_by_format_then_quality() {
        let payload = json!({
            "downloadOptions": [
                {"format": "mp4", "quality": "1080p", "url": "https://c.example.com/hd.mp4", "size": "40 MB"},
                {"format": "mp4", "quality": "360p", "url": "https://c.example.com/sd.mp4"},
                {"format": "mp3", "quality": "128kbps", "url": "https://c.example.com/a.mp3"}
            ],
            "title": "Legacy Video"
        });

        let response = transform_response(payload, "facebook").unwrap();
        assert_eq!(response["status"], "success");
        assert_eq!(response["formats"]["mp4"]["1080p"]["size"], "40 MB");
        assert_eq!(response["formats"]["mp4"]["360p"]["size"], "Unknown");
        assert_eq!(
            response["formats"]["mp3"]["128kbps"]["url"],
            "https://c.example.com/a.mp3"
        );
    }

    #[test]
    fn streaming_data_buckets_video_and_audio() {
        let payload = json!({
            "streamingData": {
                "formats": [
                    {
                        "url": "https://rr1.googlevideo.com/videoplayback?v=1",
                        "qualityLabel": "720p",
                        "mimeType": "video/mp4",
                        "contentLength": "31457280"
                    }
                ],
                "adaptiveFormats": [
                    {
                        "url": "https://rr1.googlevideo.com/videoplayback?a=1",
                        "quality": "tiny",
                        "audioQuality": "AUDIO_QUALITY_MEDIUM",
                        "mimeType": "audio/webm",
                        "contentLength": 3145728
                    }
                ]
            }
        });

        let response = transform_response(payload, "youtube").unwrap();
        assert_eq!(response["status"], "success");
        assert_eq!(response["formats"]["mp4"]["720p"]["size"], "30 MB");
        // Audio entries key by their quality label and land in the mp3 bucket.
        assert_eq!(response["formats"]["mp3"]["tiny"]["size"], "3 MB");
    }

    #[test]
    fn zero_content_length_reports_unknown() {
        let payload = json!({
            "streamingData": {
                "formats": [
                    {
                        "url": "https://rr1.googlevideo.com/videoplayback?v=1",
                        "qualityLabel": "144p",
                        "mimeType": "video/mp4",
                        "contentLength": "0"
                    }
                ]
            }
        });

        let response = transform_response(payload, "youtube").unwrap();
        assert_eq!(response["formats"]["mp4"]["144p"]["size"], "Unknown");
    }

    #[test]
    fn missing_content_length_reports_unknown() {
        let payload = json!({
            "streamingData": {
                "formats": [
                    {"url": "https://rr1.googlevideo.com/videoplayback?v=1", "qualityLabel": "360p"}
                ]
            }
        });

        let response = transform_response(payload, "youtube").unwrap();
        assert_eq!(response["formats"]["mp4"]["360p"]["size"], "Unknown");
    }

    #[test]
    fn youtube_links_split_audio_from_video() {
        let payload = json!({
            "links": {
                "720p": "https://c.example.com/720.mp4",
                "audio_128": {"url": "https://c.example.com/a.mp3", "size": "4 MB"}
            }
        });

        let response = transform_response(payload, "youtube").unwrap();
        assert_eq!(
            response["formats"]["mp4"]["720p"]["url"],
            "https://c.example.com/720.mp4"
        );
        assert_eq!(response["formats"]["mp3"]["audio_128"]["size"], "4 MB");
    }

    #[test]
    fn non_youtube_links_bucket_everything_under_mp4() {
        let payload = json!({
            "urls": {
                "hd": "https://c.example.com/hd.mp4",
                "audio": "https://c.example.com/a.mp3"
            }
        });

        let response = transform_response(payload, "twitter").unwrap();
        assert_eq!(
            response["formats"]["mp4"]["audio"]["url"],
            "https://c.example.com/a.mp3"
        );
        assert!(response["formats"].get("mp3").is_none());
    }

    #[test]
    fn empty_medias_fall_through_to_legacy_shapes() {
        let payload = json!({
            "medias": [],
            "downloadOptions": [
                {"format": "mp4", "quality": "480p", "url": "https://c.example.com/v.mp4"}
            ]
        });

        let response = transform_response(payload, "facebook").unwrap();
        assert_eq!(response["formats"]["mp4"]["480p"]["url"], "https://c.example.com/v.mp4");
    }

    #[test]
    fn unrecognized_payloads_are_rejected() {
        let payload = json!({"unexpected": true});
        let error = transform_response(payload, "youtube").unwrap_err();
        assert_eq!(error.message, "Invalid API response format");
    }

    #[test]
    fn all_known_shapes_produce_canonical_output() {
        let fixtures = [
            json!({"medias": [{"url": "https://cdn.example.com/v.mp4"}]}),
            json!({"formats": {"mp4": {"720p": {"url": "https://cdn.example.com/v.mp4", "size": "1 MB"}}}}),
            json!({"downloadOptions": [{"format": "mp4", "quality": "720p", "url": "https://cdn.example.com/v.mp4"}]}),
            json!({"streamingData": {"formats": [{"url": "https://cdn.example.com/v.mp4", "qualityLabel": "720p", "mimeType": "video/mp4"}]}}),
        ];

        for fixture in fixtures {
            let response = transform_response(fixture.clone(), "youtube").unwrap();
            assert_eq!(response["status"], "success", "fixture {fixture}");
            let has_media = response
                .get("formats")
                .and_then(Value::as_object)
                .is_some_and(|formats| !formats.is_empty())
                || response
                    .get("medias")
                    .and_then(Value::as_array)
                    .is_some_and(|medias| !medias.is_empty());
            assert!(has_media, "fixture {fixture} should produce media output");
        }
    }
}
