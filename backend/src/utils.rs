use crate::error::{CacheError, CacheResult};
use url::Url;

/// Trimmed, lowercased keyword; blank input is rejected.
pub fn normalize_keyword(raw: &str) -> CacheResult<String> {
    let keyword = raw.trim().to_lowercase();
    if keyword.is_empty() {
        return Err(CacheError::InvalidKeyword);
    }
    Ok(keyword)
}

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == 11
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Accepts a bare video id or any of the usual YouTube watch URLs.
pub fn parse_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    if is_video_id(input) {
        return Some(input.to_string());
    }

    let parsed_url = Url::parse(input).ok()?;
    let host = parsed_url.host_str()?;

    let id = match host {
        "www.youtube.com" | "youtube.com" | "m.youtube.com" => match parsed_url.path() {
            "/watch" => parsed_url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.to_string()),
            path => path
                .strip_prefix("/embed/")
                .or_else(|| path.strip_prefix("/shorts/"))
                .map(|id| id.to_string()),
        },
        "youtu.be" => parsed_url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .map(|id| id.to_string()),
        _ => None,
    }?;

    is_video_id(&id).then_some(id)
}
