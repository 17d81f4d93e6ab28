//! Title similarity scoring
//!
//! Release names are messy: reordered words, dropped subtitles, year and
//! quality tags glued on. Matching combines token-sort similarity (same
//! words, any order) and token-set similarity (subset titles still match)
//! over a normalized form, then adjusts for year agreement and sequel
//! numbers. Scores live in [0, 1]; the orchestrator drops candidates
//! below its threshold.

/// Lowercase, fold punctuation to spaces, collapse runs
pub fn normalize(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn ratio(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Similarity after sorting tokens, so word order is irrelevant
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let sort = |s: &str| {
        let mut tokens: Vec<&str> = s.split_whitespace().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    };
    ratio(&sort(&normalize(a)), &sort(&normalize(b)))
}

/// Set-based similarity: shared tokens vs. each side's remainder. A title
/// embedded in a longer release name still scores high.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    use std::collections::BTreeSet;
    let norm_a = normalize(a);
    let norm_b = normalize(b);
    let tokens_a: BTreeSet<&str> = norm_a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = norm_b.split_whitespace().collect();

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let base = intersection.join(" ");
    let combined_a = join_nonempty(&base, &only_a.join(" "));
    let combined_b = join_nonempty(&base, &only_b.join(" "));

    ratio(&base, &combined_a)
        .max(ratio(&base, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{a} {b}"),
    }
}

/// Best of both similarity views
pub fn similarity(a: &str, b: &str) -> f64 {
    token_sort_ratio(a, b).max(token_set_ratio(a, b))
}

/// Trailing sequel number of a title ("Movie 2", "Movie II")
pub fn sequel_number(title: &str) -> Option<u32> {
    let normalized = normalize(title);
    let last = normalized.split_whitespace().last()?;
    if let Ok(n) = last.parse::<u32>() {
        // Years are not sequel numbers.
        if (1900..=2100).contains(&n) {
            return None;
        }
        return Some(n);
    }
    match last {
        "ii" => Some(2),
        "iii" => Some(3),
        "iv" => Some(4),
        "v" => Some(5),
        "vi" => Some(6),
        "vii" => Some(7),
        "viii" => Some(8),
        "ix" => Some(9),
        _ => None,
    }
}

/// First plausible year in a string
pub fn extract_year(raw: &str) -> Option<i32> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i + 4 <= bytes.len() {
        let window = &raw[i..i + 4];
        if window.chars().all(|c| c.is_ascii_digit()) {
            let boundary_before = i == 0 || !bytes[i - 1].is_ascii_digit();
            let boundary_after = i + 4 == bytes.len() || !bytes[i + 4].is_ascii_digit();
            if boundary_before && boundary_after {
                let year: i32 = window.parse().unwrap_or(0);
                if (1900..=2100).contains(&year) {
                    return Some(year);
                }
            }
        }
        i += 1;
    }
    None
}

const YEAR_BONUS: f64 = 0.10;
const YEAR_MISMATCH_PENALTY: f64 = 0.15;
const SEQUEL_MISMATCH_PENALTY: f64 = 0.25;

/// Matcher for one canonical title against many candidates
#[derive(Debug, Clone)]
pub struct TitleMatcher {
    titles: Vec<String>,
    year: Option<i32>,
    /// ±1 for movies, ±3 for series (yearly release naming drifts)
    year_tolerance: i32,
    expected_sequel: Option<u32>,
}

impl TitleMatcher {
    pub fn new(title: &str, alt_titles: &[String], year: Option<i32>, series: bool) -> Self {
        let mut titles = vec![title.to_string()];
        titles.extend(alt_titles.iter().cloned());
        Self {
            expected_sequel: sequel_number(title),
            titles,
            year,
            year_tolerance: if series { 3 } else { 1 },
        }
    }

    /// Score a candidate release/title string in [0, 1].
    pub fn score(&self, candidate: &str) -> f64 {
        let base = self
            .titles
            .iter()
            .map(|t| similarity(t, candidate))
            .fold(0.0f64, f64::max);

        let mut score = base;

        if let (Some(expected), Some(found)) = (self.year, extract_year(candidate)) {
            if (expected - found).abs() <= self.year_tolerance {
                score += YEAR_BONUS;
            } else {
                score -= YEAR_MISMATCH_PENALTY;
            }
        }

        // Bidirectional: a missing number on either side of "Movie 2"
        // counts as a mismatch, as does "2" against "3".
        let candidate_sequel = sequel_number(strip_year(candidate).as_str());
        if self.expected_sequel != candidate_sequel {
            score -= SEQUEL_MISMATCH_PENALTY;
        }

        score.clamp(0.0, 1.0)
    }
}

/// Remove a year so "Movie 2019" does not read as sequel territory
fn strip_year(raw: &str) -> String {
    match extract_year(raw) {
        Some(year) => normalize(raw).replace(&year.to_string(), " "),
        None => normalize(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization() {
        assert_eq!(normalize("The.Matrix:  Reloaded!"), "the matrix reloaded");
    }

    #[test]
    fn identical_titles_score_one() {
        assert!((similarity("The Matrix", "the matrix") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn token_sort_ignores_word_order() {
        assert!(token_sort_ratio("Matrix The", "The Matrix") > 0.99);
    }

    #[test]
    fn token_set_matches_embedded_title() {
        let score = token_set_ratio("Dark Waters", "Dark.Waters.2019.German.DL.1080p.WEB.x264");
        assert!(score > 0.9, "score = {score}");
    }

    #[test]
    fn unrelated_titles_score_low() {
        assert!(similarity("The Matrix", "Finding Nemo") < 0.5);
    }

    #[test]
    fn sequel_numbers() {
        assert_eq!(sequel_number("Movie 2"), Some(2));
        assert_eq!(sequel_number("Rocky III"), Some(3));
        assert_eq!(sequel_number("Movie"), None);
        assert_eq!(sequel_number("Blade Runner 2049"), None);
    }

    #[test]
    fn year_extraction() {
        assert_eq!(extract_year("Movie.2019.1080p"), Some(2019));
        assert_eq!(extract_year("Movie 1080p"), None);
        assert_eq!(extract_year("Blade Runner 2049 2017"), Some(2049));
    }

    #[test]
    fn year_match_bonus_and_penalty() {
        let matcher = TitleMatcher::new("Dark Waters", &[], Some(2019), false);
        let matching = matcher.score("Dark.Waters.2019.German.1080p");
        let mismatched = matcher.score("Dark.Waters.2005.German.1080p");
        assert!(matching > mismatched);
        assert!(matching >= 0.9);
    }

    #[test]
    fn sequel_mismatch_is_bidirectional() {
        let matcher = TitleMatcher::new("Movie", &[], None, false);
        assert!(matcher.score("Movie 2 German 1080p") < matcher.score("Movie German 1080p"));

        let sequel_matcher = TitleMatcher::new("Movie 2", &[], None, false);
        assert!(
            sequel_matcher.score("Movie German 1080p") < sequel_matcher.score("Movie 2 German 1080p")
        );
    }

    #[test]
    fn series_year_tolerance_is_wider() {
        let movie = TitleMatcher::new("Show", &[], Some(2020), false);
        let series = TitleMatcher::new("Show", &[], Some(2020), true);
        let candidate = "Show 2022 German 1080p";
        assert!(series.score(candidate) > movie.score(candidate));
    }

    #[test]
    fn alt_titles_extend_the_match() {
        let matcher = TitleMatcher::new(
            "The Shawshank Redemption",
            &["Die Verurteilten".to_string()],
            None,
            false,
        );
        assert!(matcher.score("Die.Verurteilten.German.1080p.BluRay") > 0.7);
    }
}
