use rand::Rng;
use serde::{Deserialize, Serialize};

/// Political leaning bucket for a collected article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leaning {
    Left,
    Center,
    Right,
}

impl Leaning {
    /// Fixed bucket order used everywhere selection or iteration happens.
    pub const ALL: [Leaning; 3] = [Leaning::Left, Leaning::Center, Leaning::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Leaning::Left => "left",
            Leaning::Center => "center",
            Leaning::Right => "right",
        }
    }

    pub fn parse(s: &str) -> Option<Leaning> {
        match s {
            "left" => Some(Leaning::Left),
            "center" => Some(Leaning::Center),
            "right" => Some(Leaning::Right),
            _ => None,
        }
    }

    /// Half-open score band [lo, hi) for this leaning. Bands are contiguous
    /// and non-overlapping across [1, 10].
    pub fn score_band(&self) -> (f64, f64) {
        match self {
            Leaning::Left => (1.0, 4.0),
            Leaning::Center => (4.0, 7.0),
            Leaning::Right => (7.0, 10.0),
        }
    }
}

impl std::fmt::Display for Leaning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Draw a score for an article of the given leaning, uniformly within the
/// leaning's band. This is a placeholder signal derived from bucket membership
/// only; a content-based scoring model would slot in here, as long as it keeps
/// the band contract.
pub fn draw_score(leaning: Leaning) -> f64 {
    let (lo, hi) = leaning.score_band();
    rand::thread_rng().gen_range(lo..hi)
}

/// Candidate article extracted from one search response, before any leaning
/// tag or score is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArticle {
    pub url: String,
    pub title: String,
    pub source_name: String,
    pub snippet: String,
    pub domain: String,
    pub favicon_url: String,
    /// Unvalidated free-text date; empty when none was found.
    pub published_date: String,
}

/// A deduplicated, leaning-tagged, scored article ready for enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub source_name: String,
    pub snippet: String,
    pub domain: String,
    pub favicon_url: String,
    pub published_date: String,
    pub og_image: Option<String>,
    pub political_leaning: Leaning,
    pub political_score: f64,
}

impl Article {
    /// Tag a parsed candidate with its bucket and assign its score. Called
    /// once per unique URL at dedupe time.
    pub fn from_parsed(parsed: ParsedArticle, leaning: Leaning) -> Self {
        Article {
            url: parsed.url,
            title: parsed.title,
            source_name: parsed.source_name,
            snippet: parsed.snippet,
            domain: parsed.domain,
            favicon_url: parsed.favicon_url,
            published_date: parsed.published_date,
            og_image: None,
            political_leaning: leaning,
            political_score: draw_score(leaning),
        }
    }
}

/// Persisted result record: the article plus scraped body and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedSource {
    pub id: String,
    pub url: String,
    pub title: String,
    pub source_name: String,
    pub political_leaning: Leaning,
    pub political_score: f64,
    pub snippet: String,
    pub domain: String,
    pub favicon_url: String,
    pub og_image: Option<String>,
    pub published_date: String,
    /// Full scraped body text; None when the scrape failed.
    pub text: Option<String>,
    /// Free-form map: description, site_name, processed_date, optional LLM
    /// summary/keywords/questions, or error diagnostics for degraded records.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Per-leaning counts over the returned set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub total: usize,
    pub left_count: usize,
    pub center_count: usize,
    pub right_count: usize,
}

impl Statistics {
    pub fn from_sources(sources: &[EnrichedSource]) -> Self {
        let count =
            |l: Leaning| sources.iter().filter(|s| s.political_leaning == l).count();
        Statistics {
            total: sources.len(),
            left_count: count(Leaning::Left),
            center_count: count(Leaning::Center),
            right_count: count(Leaning::Right),
        }
    }
}

/// Score extremes over the returned set, used by clients to scale their
/// timeline axis. Defaults to the full [1, 10] range when the set is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelinePositioning {
    pub min_score: f64,
    pub max_score: f64,
}

impl TimelinePositioning {
    pub fn from_sources(sources: &[EnrichedSource]) -> Self {
        let mut scores = sources.iter().map(|s| s.political_score);
        match scores.next() {
            None => TimelinePositioning { min_score: 1.0, max_score: 10.0 },
            Some(first) => {
                let (mut min, mut max) = (first, first);
                for s in scores {
                    if s < min {
                        min = s;
                    }
                    if s > max {
                        max = s;
                    }
                }
                TimelinePositioning { min_score: min, max_score: max }
            }
        }
    }
}

/// API response aggregate for one query run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub sources: Vec<EnrichedSource>,
    pub statistics: Statistics,
    pub timeline_positioning: TimelinePositioning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_stay_inside_their_band() {
        for leaning in Leaning::ALL {
            let (lo, hi) = leaning.score_band();
            for _ in 0..200 {
                let score = draw_score(leaning);
                assert!(score >= lo && score < hi, "{} score {} outside [{}, {})", leaning, score, lo, hi);
            }
        }
    }

    #[test]
    fn bands_cover_one_to_ten_without_overlap() {
        assert_eq!(Leaning::Left.score_band(), (1.0, 4.0));
        assert_eq!(Leaning::Center.score_band(), (4.0, 7.0));
        assert_eq!(Leaning::Right.score_band(), (7.0, 10.0));
    }

    #[test]
    fn leaning_round_trips_through_strings() {
        for leaning in Leaning::ALL {
            assert_eq!(Leaning::parse(leaning.as_str()), Some(leaning));
        }
        assert_eq!(Leaning::parse("centrist"), None);
    }

    fn dummy_source(leaning: Leaning, score: f64) -> EnrichedSource {
        EnrichedSource {
            id: "1".to_string(),
            url: "https://example.com/a".to_string(),
            title: "A".to_string(),
            source_name: "Example".to_string(),
            political_leaning: leaning,
            political_score: score,
            snippet: String::new(),
            domain: "example.com".to_string(),
            favicon_url: String::new(),
            og_image: None,
            published_date: String::new(),
            text: None,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn statistics_count_per_leaning() {
        let sources = vec![
            dummy_source(Leaning::Left, 2.0),
            dummy_source(Leaning::Left, 3.0),
            dummy_source(Leaning::Right, 8.0),
        ];
        let stats = Statistics::from_sources(&sources);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.left_count, 2);
        assert_eq!(stats.center_count, 0);
        assert_eq!(stats.right_count, 1);
    }

    #[test]
    fn timeline_defaults_on_empty_set() {
        let timeline = TimelinePositioning::from_sources(&[]);
        assert_eq!(timeline.min_score, 1.0);
        assert_eq!(timeline.max_score, 10.0);
    }

    #[test]
    fn timeline_tracks_extremes() {
        let sources = vec![
            dummy_source(Leaning::Left, 2.5),
            dummy_source(Leaning::Center, 5.0),
            dummy_source(Leaning::Right, 9.1),
        ];
        let timeline = TimelinePositioning::from_sources(&sources);
        assert_eq!(timeline.min_score, 2.5);
        assert_eq!(timeline.max_score, 9.1);
    }
}
