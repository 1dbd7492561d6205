//! Quota-based selection across the three leanings.
//!
//! Everything here is pure bookkeeping over in-memory lists: candidates come
//! in per leaning, get deduplicated and scored once, and leave as a balanced
//! selection plus a leftover pool the enrichment pass can draw replacements
//! from. Discovery order is preserved throughout.

use std::collections::HashSet;

use crate::models::{Article, Leaning, ParsedArticle};

/// Per-leaning candidate pools in discovery order.
#[derive(Debug, Default)]
pub struct Buckets {
    pub left: Vec<Article>,
    pub center: Vec<Article>,
    pub right: Vec<Article>,
}

impl Buckets {
    pub fn bucket(&self, leaning: Leaning) -> &Vec<Article> {
        match leaning {
            Leaning::Left => &self.left,
            Leaning::Center => &self.center,
            Leaning::Right => &self.right,
        }
    }

    pub fn bucket_mut(&mut self, leaning: Leaning) -> &mut Vec<Article> {
        match leaning {
            Leaning::Left => &mut self.left,
            Leaning::Center => &mut self.center,
            Leaning::Right => &mut self.right,
        }
    }
}

/// Fold newly parsed candidates into a bucket, skipping any URL already seen
/// in any bucket. The political score is assigned here, at first sight.
pub fn absorb(
    buckets: &mut Buckets,
    seen: &mut HashSet<String>,
    leaning: Leaning,
    parsed: Vec<ParsedArticle>,
) {
    for candidate in parsed {
        if seen.insert(candidate.url.clone()) {
            buckets.bucket_mut(leaning).push(Article::from_parsed(candidate, leaning));
        }
    }
}

/// Below this count a bucket triggers the one-shot requery.
pub fn min_per_category(limit: usize) -> usize {
    std::cmp::max(1, limit / 6)
}

/// Target take per bucket before backfill.
pub fn per_category(limit: usize) -> usize {
    std::cmp::max(1, limit / 3)
}

/// Leanings whose buckets fall below the requery threshold.
pub fn under_quota(buckets: &Buckets, limit: usize) -> Vec<Leaning> {
    let min = min_per_category(limit);
    Leaning::ALL
        .iter()
        .copied()
        .filter(|leaning| buckets.bucket(*leaning).len() < min)
        .collect()
}

/// The balanced selection plus whatever was left over, still partitioned by
/// leaning for same-leaning replacement draws.
#[derive(Debug)]
pub struct BalancedSet {
    pub selected: Vec<Article>,
    pub remainder: Buckets,
}

/// Take up to `per_category` from each bucket in left, center, right order,
/// then backfill any shortfall from the remainders concatenated in the same
/// order. The result can be shorter than `limit` when candidates run out.
pub fn select_balanced(buckets: Buckets, limit: usize) -> BalancedSet {
    let per = per_category(limit);
    let Buckets { mut left, mut center, mut right } = buckets;

    let mut selected = Vec::new();
    selected.extend(take_front(&mut left, per));
    selected.extend(take_front(&mut center, per));
    selected.extend(take_front(&mut right, per));

    let mut slots = limit.saturating_sub(selected.len());
    for bucket in [&mut left, &mut center, &mut right] {
        while slots > 0 && !bucket.is_empty() {
            selected.push(bucket.remove(0));
            slots -= 1;
        }
    }

    BalancedSet { selected, remainder: Buckets { left, center, right } }
}

fn take_front(bucket: &mut Vec<Article>, n: usize) -> Vec<Article> {
    let n = n.min(bucket.len());
    bucket.drain(..n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str) -> ParsedArticle {
        ParsedArticle {
            url: url.to_string(),
            title: format!("Title for {}", url),
            source_name: "Test Source".to_string(),
            snippet: "A snippet.".to_string(),
            domain: "example.com".to_string(),
            favicon_url: String::new(),
            published_date: String::new(),
        }
    }

    fn filled_buckets(left: usize, center: usize, right: usize) -> (Buckets, HashSet<String>) {
        let mut buckets = Buckets::default();
        let mut seen = HashSet::new();
        let make = |leaning: &str, n: usize| {
            (0..n).map(|i| candidate(&format!("https://{}.example.com/{}", leaning, i))).collect()
        };
        absorb(&mut buckets, &mut seen, Leaning::Left, make("left", left));
        absorb(&mut buckets, &mut seen, Leaning::Center, make("center", center));
        absorb(&mut buckets, &mut seen, Leaning::Right, make("right", right));
        (buckets, seen)
    }

    #[test]
    fn limit_nine_takes_three_per_leaning() {
        let (buckets, _) = filled_buckets(5, 5, 5);
        let set = select_balanced(buckets, 9);
        assert_eq!(set.selected.len(), 9);
        let leanings: Vec<Leaning> = set.selected.iter().map(|a| a.political_leaning).collect();
        assert_eq!(&leanings[..3], &[Leaning::Left; 3]);
        assert_eq!(&leanings[3..6], &[Leaning::Center; 3]);
        assert_eq!(&leanings[6..], &[Leaning::Right; 3]);
        assert_eq!(set.remainder.left.len(), 2);
        assert_eq!(set.remainder.right.len(), 2);
    }

    #[test]
    fn duplicate_urls_stay_in_their_first_bucket() {
        let mut buckets = Buckets::default();
        let mut seen = HashSet::new();
        absorb(&mut buckets, &mut seen, Leaning::Left, vec![candidate("https://a.com/1")]);
        absorb(
            &mut buckets,
            &mut seen,
            Leaning::Right,
            vec![candidate("https://a.com/1"), candidate("https://b.com/2")],
        );
        assert_eq!(buckets.left.len(), 1);
        assert_eq!(buckets.right.len(), 1);
        assert_eq!(buckets.right[0].url, "https://b.com/2");
    }

    #[test]
    fn absorbing_the_same_batch_twice_changes_nothing() {
        let batch: Vec<ParsedArticle> =
            (0..4).map(|i| candidate(&format!("https://dup.com/{}", i))).collect();
        let mut buckets = Buckets::default();
        let mut seen = HashSet::new();
        absorb(&mut buckets, &mut seen, Leaning::Center, batch.clone());
        let urls: Vec<String> = buckets.center.iter().map(|a| a.url.clone()).collect();
        absorb(&mut buckets, &mut seen, Leaning::Center, batch);
        let urls_after: Vec<String> = buckets.center.iter().map(|a| a.url.clone()).collect();
        assert_eq!(urls, urls_after);
    }

    #[test]
    fn under_quota_flags_only_thin_buckets() {
        // limit 18 -> minimum 3 per bucket
        let (buckets, _) = filled_buckets(1, 6, 6);
        assert_eq!(under_quota(&buckets, 18), vec![Leaning::Left]);

        let (buckets, _) = filled_buckets(3, 3, 3);
        assert!(under_quota(&buckets, 18).is_empty());
    }

    #[test]
    fn backfill_draws_left_then_center_when_right_is_empty() {
        let (buckets, _) = filled_buckets(5, 5, 0);
        let set = select_balanced(buckets, 10);
        assert_eq!(set.selected.len(), 10);
        let leanings: Vec<Leaning> = set.selected.iter().map(|a| a.political_leaning).collect();
        // 3 left, 3 center, then backfill: remaining 2 left before remaining 2 center
        assert_eq!(
            leanings,
            vec![
                Leaning::Left,
                Leaning::Left,
                Leaning::Left,
                Leaning::Center,
                Leaning::Center,
                Leaning::Center,
                Leaning::Left,
                Leaning::Left,
                Leaning::Center,
                Leaning::Center,
            ]
        );
        assert!(set.remainder.left.is_empty());
        assert!(set.remainder.center.is_empty());
    }

    #[test]
    fn result_may_fall_short_of_limit() {
        let (buckets, _) = filled_buckets(1, 1, 0);
        let set = select_balanced(buckets, 9);
        assert_eq!(set.selected.len(), 2);
    }

    #[test]
    fn tiny_limits_still_give_each_leaning_a_slot() {
        let (buckets, _) = filled_buckets(2, 2, 2);
        let set = select_balanced(buckets, 2);
        // per-category floor is 1, so all three leanings contribute
        assert_eq!(set.selected.len(), 3);
    }
}
