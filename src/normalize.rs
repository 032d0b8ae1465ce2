use url::Url;

pub fn normalize_url(url: &str, platform: &str) -> String {
    let trimmed = url.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    match platform.trim().to_ascii_lowercase().as_str() {
        "youtube" => normalize_youtube(trimmed, &parsed),
        "dailymotion" => normalize_dailymotion(trimmed, &parsed),
        "tumblr" => normalize_tumblr(trimmed, &parsed),
        "snapchat" => strip_query_and_fragment(&parsed),
        "reddit" => normalize_reddit(trimmed, &parsed),
        _ => trimmed.to_string(),
    }
}

fn normalize_youtube(original: &str, parsed: &Url) -> String {
    if parsed.path().starts_with("/shorts/") {
        if let Some(id) = clean_id(parsed.path().trim_start_matches("/shorts/")) {
            return format!("https://www.youtube.com/watch?v={id}");
        }
        return original.to_string();
    }

    if host_matches(parsed, "youtu.be") {
        if let Some(id) = clean_id(parsed.path().trim_start_matches('/')) {
            return format!("https://www.youtube.com/watch?v={id}");
        }
    }

    original.to_string()
}

fn normalize_dailymotion(original: &str, parsed: &Url) -> String {
    if host_matches(parsed, "dai.ly") {
        if let Some(id) = clean_id(parsed.path().trim_start_matches('/')) {
            return format!("https://www.dailymotion.com/video/{id}");
        }
    }

    original.to_string()
}

fn normalize_tumblr(original: &str, parsed: &Url) -> String {
    if parsed.path().contains("/post/") {
        return strip_query_and_fragment(parsed);
    }

    original.to_string()
}

fn normalize_reddit(original: &str, parsed: &Url) -> String {
    if host_matches(parsed, "redd.it") {
        if let Some(id) = clean_id(parsed.path().trim_start_matches('/')) {
            return format!("https://www.reddit.com/comments/{id}");
        }
        return original.to_string();
    }

    if host_matches(parsed, "reddit.com") {
        let segments: Vec<&str> = parsed
            .path()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        if segments.len() >= 4
            && segments[0] == "r"
            && segments[2] == "comments"
            && let Some(id) = clean_id(segments[3])
        {
            return format!("https://www.reddit.com/comments/{id}");
        }
    }

    original.to_string()
}

fn strip_query_and_fragment(parsed: &Url) -> String {
    let mut stripped = parsed.clone();
    stripped.set_query(None);
    stripped.set_fragment(None);
    stripped.to_string()
}

fn host_matches(parsed: &Url, domain: &str) -> bool {
    parsed
        .host_str()
        .map(|host| {
            let host = host.to_ascii_lowercase();
            host == domain || host.ends_with(&format!(".{domain}"))
        })
        .unwrap_or(false)
}

fn clean_id(raw: &str) -> Option<String> {
    let id: String = raw
        .chars()
        .take_while(|character| !matches!(character, '?' | '&' | '#' | '/'))
        .collect();

    if id.is_empty() { None } else { Some(id) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_shorts_become_watch_urls() {
        assert_eq!(
            normalize_url("https://www.youtube.com/shorts/dQw4w9WgXcQ", "youtube"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(
            normalize_url("https://youtube.com/shorts/dQw4w9WgXcQ?feature=share", "youtube"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }

    #[test]
    fn youtube_short_links_become_watch_urls() {
        assert_eq!(
            normalize_url("https://youtu.be/abc123?t=5", "youtube"),
            "https://www.youtube.com/watch?v=abc123"
        );
    }

    #[test]
    fn youtube_watch_urls_pass_through() {
        let url = "https://www.youtube.com/watch?v=abc123";
        assert_eq!(normalize_url(url, "youtube"), url);
    }

    #[test]
    fn dailymotion_short_links_expand() {
        assert_eq!(
            normalize_url("https://dai.ly/x8abcd", "dailymotion"),
            "https://www.dailymotion.com/video/x8abcd"
        );
    }

    #[test]
    fn tumblr_posts_drop_query_and_fragment() {
        assert_eq!(
            normalize_url(
                "https://blog.tumblr.com/post/12345/slug?utm_source=share#notes",
                "tumblr"
            ),
            "https://blog.tumblr.com/post/12345/slug"
        );
        let non_post = "https://blog.tumblr.com/archive?page=2";
        assert_eq!(normalize_url(non_post, "tumblr"), non_post);
    }

    #[test]
    fn snapchat_always_drops_query_and_fragment() {
        assert_eq!(
            normalize_url(
                "https://www.snapchat.com/spotlight/W7_EDlXWTBiXAEEniNoMPwAA?share_id=xyz#top",
                "snapchat"
            ),
            "https://www.snapchat.com/spotlight/W7_EDlXWTBiXAEEniNoMPwAA"
        );
    }

    #[test]
    fn reddit_short_links_expand() {
        assert_eq!(
            normalize_url("https://redd.it/1abcde", "reddit"),
            "https://www.reddit.com/comments/1abcde"
        );
    }

    #[test]
    fn reddit_subreddit_links_drop_subreddit_segment() {
        assert_eq!(
            normalize_url(
                "https://www.reddit.com/r/videos/comments/1abcde/some_title/",
                "reddit"
            ),
            "https://www.reddit.com/comments/1abcde"
        );
    }

    #[test]
    fn unknown_platforms_pass_through() {
        let url = "https://www.tiktok.com/@user/video/7123456789?lang=en";
        assert_eq!(normalize_url(url, "tiktok"), url);
    }

    #[test]
    fn unparseable_urls_pass_through() {
        assert_eq!(normalize_url("not a url", "youtube"), "not a url");
    }

    #[test]
    fn normalization_is_idempotent() {
        let cases = [
            ("https://youtu.be/abc123?t=5", "youtube"),
            ("https://www.youtube.com/shorts/xyz789", "youtube"),
            ("https://dai.ly/x8abcd", "dailymotion"),
            ("https://blog.tumblr.com/post/12345?ref=a", "tumblr"),
            ("https://story.snapchat.com/p/abc?x=1#y", "snapchat"),
            ("https://redd.it/1abcde", "reddit"),
            ("https://www.reddit.com/r/videos/comments/1abcde/title", "reddit"),
            ("https://vimeo.com/12345", "vimeo"),
        ];

        for (url, platform) in cases {
            let once = normalize_url(url, platform);
            let twice = normalize_url(&once, platform);
            assert_eq!(once, twice, "{url} should normalize idempotently");
        }
    }
}
