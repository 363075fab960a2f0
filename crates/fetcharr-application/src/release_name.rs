// SPDX-License-Identifier: GPL-3.0-or-later
use fetcharr_domain::Resolution;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structured view of a scene-style release name. Parsing is best effort:
/// fields the name does not carry stay `None`/empty and the selector decides
/// what that means for acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTitle {
    pub raw: String,
    pub title: String,
    pub year: Option<i32>,
    pub resolution: Resolution,
    pub source: Option<String>,
    pub codec: Option<String>,
    pub audio: Option<String>,
    pub hdr: bool,
    pub dolby_vision: bool,
    pub group: Option<String>,
    pub seasons: Vec<i32>,
    pub episodes: Vec<i32>,
    pub absolute_episode: Option<u32>,
    pub complete_marker: bool,
    pub trash: bool,
    pub languages: Vec<String>,
}

impl ParsedTitle {
    /// A pack is anything answering for more than one episode: a season with
    /// no episode marker, an episode range, or an explicit complete/batch tag.
    pub fn is_pack(&self) -> bool {
        self.complete_marker
            || self.episodes.len() > 1
            || self.seasons.len() > 1
            || (!self.seasons.is_empty() && self.episodes.is_empty())
    }

    pub fn has_season_marker(&self) -> bool {
        !self.seasons.is_empty()
    }
}

lazy_static! {
    static ref RESOLUTION_RE: Regex =
        Regex::new(r"(?i)\b(2160p|1080p|720p|480p|4k|uhd)\b").expect("valid resolution regex");
    static ref SOURCE_RE: Regex = Regex::new(
        r"(?i)\b(remux|blu-?ray|bdrip|web-?dl|webrip|hdtv|dvdrip|hdrip)\b"
    )
    .expect("valid source regex");
    static ref CODEC_RE: Regex =
        Regex::new(r"(?i)\b(x264|x265|h\.?264|h\.?265|hevc|av1|xvid)\b").expect("valid codec regex");
    static ref AUDIO_RE: Regex = Regex::new(
        r"(?i)\b(atmos|truehd|dts-?hd|dts|ddp?[\s.]?[2457]\.[01]|eac3|ac3|aac|flac|opus)\b"
    )
    .expect("valid audio regex");
    static ref HDR_RE: Regex =
        Regex::new(r"(?i)\b(hdr10\+?|hdr)\b").expect("valid hdr regex");
    static ref DV_RE: Regex =
        Regex::new(r"(?i)\b(dolby[\s._-]?vision|dovi|dv)\b").expect("valid dv regex");
    static ref TRASH_RE: Regex = Regex::new(
        r"(?i)\b(cam(rip)?|hdcam|telesync|\bts\b|telecine|screener|scr|workprint)\b"
    )
    .expect("valid trash regex");
    static ref GROUP_RE: Regex =
        Regex::new(r"-(?P<group>[A-Za-z0-9][A-Za-z0-9_.]{1,31})$").expect("valid group regex");
    static ref YEAR_RE: Regex =
        Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("valid year regex");
    static ref SEASON_EP_RE: Regex = Regex::new(
        r"(?i)\bs(?P<season>\d{1,2})[\s._-]?e(?P<ep>\d{1,4})(?:[-e]+(?P<ep_end>\d{1,4}))?"
    )
    .expect("valid season episode regex");
    static ref SEASON_RANGE_RE: Regex =
        Regex::new(r"(?i)\bs(?P<start>\d{1,2})-s?(?P<end>\d{1,2})\b").expect("valid season range regex");
    static ref SEASON_ONLY_RE: Regex =
        Regex::new(r"(?i)\b(?:s(?P<num>\d{1,2})|season[\s._-]?(?P<word>\d{1,2}))\b")
            .expect("valid season regex");
    static ref COMPLETE_RE: Regex = Regex::new(
        r"(?i)\b(complete|batch|collection|full[\s._-]?season|integrale)\b"
    )
    .expect("valid complete regex");
    static ref ABSOLUTE_RE: Regex =
        Regex::new(r"(?:^|[\s._(\[-])(?P<num>\d{2,4})(?:[\s._)\]-]|$)").expect("valid absolute regex");
    static ref DASH_ABSOLUTE_RE: Regex =
        Regex::new(r"\s-\s(?P<num>\d{1,4})(?:v\d)?\b").expect("valid dash absolute regex");
    static ref SEPARATORS_RE: Regex = Regex::new(r"[._]+").expect("valid separator regex");
}

const LANGUAGE_TAGS: &[(&str, &str)] = &[
    ("french", "fr"),
    ("vostfr", "fr"),
    ("truefrench", "fr"),
    ("german", "de"),
    ("italian", "it"),
    ("ita", "it"),
    ("spanish", "es"),
    ("castellano", "es"),
    ("latino", "es"),
    ("korean", "ko"),
    ("japanese", "ja"),
    ("jpn", "ja"),
    ("hindi", "hi"),
    ("russian", "ru"),
    ("rus", "ru"),
    ("multi", "multi"),
    ("dual audio", "dual"),
    ("dual-audio", "dual"),
];

/// Parse a raw release name into its tokens.
pub fn parse_title(raw: &str) -> ParsedTitle {
    let normalized = normalize(raw);
    let lowercase = normalized.to_lowercase();

    let resolution = RESOLUTION_RE
        .find(&normalized)
        .map(|m| Resolution::parse(m.as_str()))
        .unwrap_or(Resolution::Unknown);
    let source = SOURCE_RE.find(&normalized).map(|m| m.as_str().to_string());
    let codec = CODEC_RE.find(&normalized).map(|m| m.as_str().to_string());
    let audio = AUDIO_RE.find(&normalized).map(|m| m.as_str().to_string());
    let hdr = HDR_RE.is_match(&normalized);
    let dolby_vision = DV_RE.is_match(&normalized);
    let trash = TRASH_RE.is_match(&normalized);
    let complete_marker = COMPLETE_RE.is_match(&normalized);
    let group = GROUP_RE
        .captures(normalized.trim())
        .and_then(|c| c.name("group").map(|m| m.as_str().to_string()))
        // A trailing resolution or codec is not a release group.
        .filter(|g| !RESOLUTION_RE.is_match(g) && !CODEC_RE.is_match(g));

    let (seasons, episodes) = parse_seasons_episodes(&normalized);
    let year_match = parse_year(&normalized, &seasons);
    let year = year_match.map(|(value, _)| value);
    let absolute_match = if seasons.is_empty() && episodes.is_empty() {
        parse_absolute(&normalized, year)
    } else {
        None
    };
    let absolute_episode = absolute_match.map(|(value, _)| value);

    let languages = LANGUAGE_TAGS
        .iter()
        .filter(|(tag, _)| contains_token(&lowercase, tag))
        .map(|(_, code)| code.to_string())
        .collect::<Vec<_>>();

    let title = extract_title(&normalized, year_match, &seasons, absolute_match, resolution);

    ParsedTitle {
        raw: raw.to_string(),
        title,
        year,
        resolution,
        source,
        codec,
        audio,
        hdr,
        dolby_vision,
        group,
        seasons,
        episodes,
        absolute_episode,
        complete_marker,
        trash,
        languages,
    }
}

fn normalize(raw: &str) -> String {
    let replaced = SEPARATORS_RE.replace_all(raw.trim(), " ");
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn contains_token(haystack: &str, token: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == token)
        || (token.contains(' ') && haystack.contains(token))
        || (token.contains('-') && haystack.contains(token))
}

fn parse_seasons_episodes(normalized: &str) -> (Vec<i32>, Vec<i32>) {
    let mut seasons = Vec::new();
    let mut episodes = Vec::new();

    if let Some(caps) = SEASON_RANGE_RE.captures(normalized) {
        let start: i32 = caps["start"].parse().unwrap_or(0);
        let end: i32 = caps["end"].parse().unwrap_or(start);
        if start >= 1 && end >= start && end - start <= 50 {
            seasons.extend(start..=end);
            return (seasons, episodes);
        }
    }

    for caps in SEASON_EP_RE.captures_iter(normalized) {
        if let Ok(season) = caps["season"].parse::<i32>() {
            if !seasons.contains(&season) {
                seasons.push(season);
            }
        }
        if let Ok(ep) = caps["ep"].parse::<i32>() {
            let end = caps
                .name("ep_end")
                .and_then(|m| m.as_str().parse::<i32>().ok())
                .unwrap_or(ep);
            if end >= ep && end - ep <= 200 {
                for e in ep..=end {
                    if !episodes.contains(&e) {
                        episodes.push(e);
                    }
                }
            }
        }
    }

    if seasons.is_empty() {
        if let Some(caps) = SEASON_ONLY_RE.captures(normalized) {
            let num = caps
                .name("num")
                .or_else(|| caps.name("word"))
                .and_then(|m| m.as_str().parse::<i32>().ok());
            if let Some(season) = num {
                if season >= 1 {
                    seasons.push(season);
                }
            }
        }
    }

    (seasons, episodes)
}

fn parse_year(normalized: &str, seasons: &[i32]) -> Option<(i32, usize)> {
    for m in YEAR_RE.find_iter(normalized) {
        let value: i32 = m.as_str().parse().ok()?;
        // "1984" as the very first token is a title, not a year.
        if m.start() == 0 {
            continue;
        }
        // Never mistake a season marker's digits for a year.
        if seasons.contains(&value) {
            continue;
        }
        return Some((value, m.start()));
    }
    None
}

/// Find the absolute episode number and where its marker starts.
///
/// The fansub convention "Title - 17" wins over any earlier number so
/// digits inside the title itself are not mistaken for an episode.
fn parse_absolute(normalized: &str, year: Option<i32>) -> Option<(u32, usize)> {
    if let Some(caps) = DASH_ABSOLUTE_RE.captures(normalized) {
        if let Some(m) = caps.name("num") {
            if let Ok(value) = m.as_str().parse::<u32>() {
                if !reserved_number(value, year) {
                    return caps.get(0).map(|whole| (value, whole.start()));
                }
            }
        }
    }

    for caps in ABSOLUTE_RE.captures_iter(normalized) {
        let m = caps.name("num")?;
        if m.start() == 0 {
            continue;
        }
        let value: u32 = m.as_str().parse().ok()?;
        if reserved_number(value, year) {
            continue;
        }
        return Some((value, m.start()));
    }
    None
}

fn reserved_number(value: u32, year: Option<i32>) -> bool {
    matches!(value, 480 | 720 | 1080 | 2160)
        || (1900..=2099).contains(&value)
        || year == Some(value as i32)
}

/// Take everything before the first structural marker as the title.
fn extract_title(
    normalized: &str,
    year_match: Option<(i32, usize)>,
    seasons: &[i32],
    absolute: Option<(u32, usize)>,
    resolution: Resolution,
) -> String {
    let mut cut = normalized.len();

    if let Some((_, pos)) = year_match {
        cut = cut.min(pos);
    }
    if !seasons.is_empty() {
        if let Some(m) = SEASON_ONLY_RE.find(normalized) {
            cut = cut.min(m.start());
        }
        if let Some(m) = SEASON_EP_RE.find(normalized) {
            cut = cut.min(m.start());
        }
    }
    if let Some((_, pos)) = absolute {
        cut = cut.min(pos);
    }
    if resolution != Resolution::Unknown {
        if let Some(m) = RESOLUTION_RE.find(normalized) {
            cut = cut.min(m.start());
        }
    }

    normalized[..cut]
        .trim()
        .trim_end_matches(['-', '(', '['])
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_typical_movie_name() {
        let parsed = parse_title("The.Shawshank.Redemption.1994.1080p.BluRay.x264-GROUP");
        assert_eq!(parsed.title, "The Shawshank Redemption");
        assert_eq!(parsed.year, Some(1994));
        assert_eq!(parsed.resolution, Resolution::R1080p);
        assert_eq!(parsed.source.as_deref(), Some("BluRay"));
        assert_eq!(parsed.codec.as_deref(), Some("x264"));
        assert_eq!(parsed.group.as_deref(), Some("GROUP"));
        assert!(!parsed.is_pack());
        assert!(!parsed.trash);
    }

    #[test]
    fn parses_season_and_episode() {
        let parsed = parse_title("Test.Show.S02E05.720p.WEB-DL.H264-ABC");
        assert_eq!(parsed.seasons, vec![2]);
        assert_eq!(parsed.episodes, vec![5]);
        assert!(!parsed.is_pack());
    }

    #[test]
    fn season_only_is_a_pack() {
        let parsed = parse_title("Test.Anime.S02.Complete.1080p");
        assert_eq!(parsed.seasons, vec![2]);
        assert!(parsed.episodes.is_empty());
        assert!(parsed.complete_marker);
        assert!(parsed.is_pack());
    }

    #[test]
    fn episode_range_is_a_pack() {
        let parsed = parse_title("Test.Show.S01E01-E12.1080p.WEBRip");
        assert_eq!(parsed.seasons, vec![1]);
        assert_eq!(parsed.episodes.len(), 12);
        assert!(parsed.is_pack());
    }

    #[test]
    fn season_range_is_a_pack() {
        let parsed = parse_title("Test.Show.S01-S03.1080p.BluRay");
        assert_eq!(parsed.seasons, vec![1, 2, 3]);
        assert!(parsed.is_pack());
    }

    #[test]
    fn absolute_episode_without_season_marker() {
        let parsed = parse_title("Test.Anime.17.1080p.WEB-DL-GROUP");
        assert!(parsed.seasons.is_empty());
        assert_eq!(parsed.absolute_episode, Some(17));
        assert!(!parsed.is_pack());
    }

    #[test]
    fn dash_episode_wins_over_number_in_title() {
        let parsed = parse_title("Mob Psycho 100 - 17 [1080p]");
        assert_eq!(parsed.title, "Mob Psycho 100");
        assert_eq!(parsed.absolute_episode, Some(17));

        let padded = parse_title("Frieren - 07 [1080p][HEVC]");
        assert_eq!(padded.title, "Frieren");
        assert_eq!(padded.absolute_episode, Some(7));
    }

    #[test]
    fn combined_absolute_in_se_form() {
        let parsed = parse_title("Test.Anime.S15E520.1080p.WEB");
        assert_eq!(parsed.seasons, vec![15]);
        assert_eq!(parsed.episodes, vec![520]);
    }

    #[test]
    fn resolution_is_not_an_absolute_episode() {
        let parsed = parse_title("Some.Movie.1080p.WEB-DL");
        assert_eq!(parsed.absolute_episode, None);
    }

    #[test]
    fn year_is_not_an_absolute_episode() {
        let parsed = parse_title("Some.Movie.2019.1080p.WEB-DL");
        assert_eq!(parsed.year, Some(2019));
        assert_eq!(parsed.absolute_episode, None);
    }

    #[test]
    fn leading_year_title_is_kept() {
        let parsed = parse_title("1984.1984.1080p.BluRay.x264");
        assert_eq!(parsed.title, "1984");
        assert_eq!(parsed.year, Some(1984));
    }

    #[test]
    fn detects_hdr_and_dolby_vision() {
        let parsed = parse_title("Movie.2023.2160p.WEB-DL.HDR10+.DV.HEVC-XYZ");
        assert!(parsed.hdr);
        assert!(parsed.dolby_vision);
        assert_eq!(parsed.resolution, Resolution::R2160p);
    }

    #[test]
    fn detects_trash_releases() {
        let parsed = parse_title("New.Movie.2024.HDCAM.x264");
        assert!(parsed.trash);
    }

    #[test]
    fn detects_language_tags() {
        let parsed = parse_title("Film.2022.FRENCH.1080p.WEB-DL");
        assert_eq!(parsed.languages, vec!["fr".to_string()]);

        let multi = parse_title("Film.2022.MULTi.1080p.WEB-DL");
        assert!(multi.languages.contains(&"multi".to_string()));
    }

    #[test]
    fn group_suffix_is_not_a_codec() {
        let parsed = parse_title("Movie.2020.1080p.WEB-DL.x265-x265");
        // Trailing token that is itself a codec tag is rejected as a group.
        assert_eq!(parsed.group, None);
    }

    #[test]
    fn title_cut_before_season_word() {
        let parsed = parse_title("Some Show Season 3 1080p WEBRip");
        assert_eq!(parsed.title, "Some Show");
        assert_eq!(parsed.seasons, vec![3]);
    }
}
