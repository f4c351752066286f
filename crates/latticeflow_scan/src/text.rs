//! Caption normalization and external-link detection (spec.md §4.11).

use regex::Regex;
use std::sync::OnceLock;

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").unwrap())
}

fn non_alphanumeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\p{Alphabetic}\p{Number}\s]").unwrap())
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// NFKC → lowercase → strip URLs → strip non-alphanumeric → collapse
/// whitespace, used as the search-normalized form of a caption.
pub fn normalize_caption(raw: &str) -> String {
    use unicode_normalization::UnicodeNormalization;
    let nfkc: String = raw.nfkc().collect();
    let lower = nfkc.to_lowercase();
    let no_urls = url_pattern().replace_all(&lower, "");
    let alnum_only = non_alphanumeric().replace_all(&no_urls, " ");
    whitespace().replace_all(alnum_only.trim(), " ").trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalPlatform {
    Thangs,
    Printables,
    Thingiverse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalUrlHit {
    pub platform: ExternalPlatform,
    pub external_id: String,
    pub canonical_url: String,
}

fn thangs_patterns() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            Regex::new(r"thangs\.com/m/(?P<id>[\w-]+)").unwrap(),
            Regex::new(r"thangs\.com/designer/[\w-]+/model/(?P<id>[\w-]+)").unwrap(),
            Regex::new(r"thangs\.com/3d-model/[\w-]+-(?P<id>\d+)").unwrap(),
        ]
    })
}

fn printables_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"printables\.com/model/(?P<id>\d+)").unwrap())
}

fn thingiverse_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"thingiverse\.com/thing:(?P<id>\d+)").unwrap())
}

/// Scans raw (pre-normalization) text for known external-platform links,
/// canonicalizing Thangs' three URL shapes into one form.
pub fn detect_external_urls(raw: &str) -> Vec<ExternalUrlHit> {
    let mut hits = Vec::new();
    for pattern in thangs_patterns() {
        for caps in pattern.captures_iter(raw) {
            let id = caps["id"].to_string();
            hits.push(ExternalUrlHit {
                platform: ExternalPlatform::Thangs,
                canonical_url: format!("thangs.com/m/{id}"),
                external_id: id,
            });
        }
    }
    for caps in printables_pattern().captures_iter(raw) {
        let id = caps["id"].to_string();
        hits.push(ExternalUrlHit {
            platform: ExternalPlatform::Printables,
            canonical_url: format!("printables.com/model/{id}"),
            external_id: id,
        });
    }
    for caps in thingiverse_pattern().captures_iter(raw) {
        let id = caps["id"].to_string();
        hits.push(ExternalUrlHit {
            platform: ExternalPlatform::Thingiverse,
            canonical_url: format!("thingiverse.com/thing:{id}"),
            external_id: id,
        });
    }
    hits
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoverySourceType {
    Forward,
    CaptionLink,
    Mention,
    TextLink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryHit {
    pub source_type: DiscoverySourceType,
    pub handle: String,
}

fn telegram_link_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"t\.me/(?:joinchat/|\+)?(?P<handle>[\w-]+)").unwrap()
    })
}

fn mention_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(?P<handle>\w{4,})\b").unwrap())
}

/// Finds `t.me/...` links and `@username` mentions in caption text,
/// skipping bot-suffixed usernames (spec.md §4.11).
pub fn detect_discovery_hits(raw: &str) -> Vec<DiscoveryHit> {
    let mut hits = Vec::new();
    for caps in telegram_link_pattern().captures_iter(raw) {
        hits.push(DiscoveryHit {
            source_type: DiscoverySourceType::CaptionLink,
            handle: caps["handle"].to_string(),
        });
    }
    for caps in mention_pattern().captures_iter(raw) {
        let handle = caps["handle"].to_string();
        if handle.to_lowercase().ends_with("bot") {
            continue;
        }
        hits.push(DiscoveryHit {
            source_type: DiscoverySourceType::Mention,
            handle,
        });
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_caption_strips_urls_and_punctuation() {
        let out = normalize_caption("Cool Goblin!! #free https://example.com/x");
        assert_eq!(out, "cool goblin free");
    }

    #[test]
    fn detects_multiple_thangs_url_shapes() {
        let hits = detect_external_urls(
            "see https://thangs.com/m/abc123 and thangs.com/designer/jane/model/xyz789",
        );
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].canonical_url, "thangs.com/m/abc123");
        assert_eq!(hits[1].canonical_url, "thangs.com/m/xyz789");
    }

    #[test]
    fn bot_mentions_are_skipped() {
        let hits = detect_discovery_hits("cc @gobot and @realuser check this out");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].handle, "realuser");
    }

    #[test]
    fn telegram_join_links_are_detected() {
        let hits = detect_discovery_hits("join t.me/+AbCdEf1234");
        assert_eq!(hits[0].source_type, DiscoverySourceType::CaptionLink);
        assert_eq!(hits[0].handle, "AbCdEf1234");
    }
}
