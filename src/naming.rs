//! Release-name cleaning.
//!
//! Turns scene/repack style names such as `setupNethack.v1.2.3-REPACK-GOG-Build.456+5DLCs`
//! into a readable title (`Nethack`). The rewrite is a fixed sequence of regex
//! substitutions; the order matters because later rules rely on separators that
//! earlier rules leave in place (dots are only turned into spaces at the end).

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref SETUP_PREFIX: Regex = Regex::new(r"(?i)^(?:\s*setup[\s._-]*)+").unwrap();
    static ref BRACKETED: Regex = Regex::new(r"\[[^\]]*\]|\{[^}]*\}").unwrap();
    static ref DOTTED_LETTERS: Regex = Regex::new(r"\b(?:[A-Za-z]\.)+[A-Za-z]\b").unwrap();
    static ref VERSION: Regex =
        Regex::new(r"(?i)\b(?:v|ver|version)[\s._]?\d+(?:[._]\d+)*[a-z]?\b|\b\d+(?:\.\d+){2,}\b").unwrap();
    static ref BUILD: Regex = Regex::new(r"(?i)\bbuild[\s._-]?\d+\b").unwrap();
    static ref GOTY: Regex = Regex::new(
        r"(?i)\b(?:GOTY|Game[\s._-]*of[\s._-]*the[\s._-]*Year)(?:[\s._-]*Edition)?\b"
    )
    .unwrap();
    static ref DLC_INCLUDED: Regex =
        Regex::new(r"(?i)(?:\b(?:incl(?:uding)?|with)\b|\+)[\s._-]*(?:all[\s._-]*)?\d*[\s._-]*DLCs?\b").unwrap();
    static ref DLC_COUNT: Regex = Regex::new(r"(?i)\b\d+(?:[\s._-]?DLCs|DLC)\b").unwrap();
    static ref DLC_WORD: Regex = Regex::new(r"(?i)\bDLCs?\b").unwrap();
    static ref NAMED_EDITION: Regex = Regex::new(
        r"(?i)\b(?:Digital[\s._-]+)?(?:Deluxe|Ultimate|Complete|Definitive|Collector'?s|Premium|Gold|Special|Enhanced|Anniversary|Standard|Legendary|Platinum)[\s._-]+Edition\b"
    )
    .unwrap();
    static ref DIGITAL_DELUXE: Regex = Regex::new(r"(?i)\bDigital[\s._-]+Deluxe\b").unwrap();
    static ref EDITION_WORD: Regex = Regex::new(r"(?i)\bEdition\b").unwrap();
    static ref REMASTERED: Regex = Regex::new(r"(?i)\bRemaster(?:ed)?\b").unwrap();
    static ref SEPARATORS: Regex = Regex::new(r"\.+").unwrap();
    static ref EMPTY_BRACKETS: Regex = Regex::new(r"\(\s*\)|\[\s*\]").unwrap();
    static ref REPEATED_JOINERS: Regex = Regex::new(r"(?:\s*[-+&,]\s*){2,}").unwrap();
    // A joiner glued to one word only, left behind when its other side was stripped
    static ref DANGLING_BEFORE: Regex = Regex::new(r"(\s)[-+]+(\S)").unwrap();
    static ref DANGLING_AFTER: Regex = Regex::new(r"(\S)[-+]+(\s)").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Release-group patterns as stored in the `release_groups` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseGroups {
    pub insensitive: Vec<String>,
    pub sensitive: Vec<String>,
}

/// Compiled form of [`ReleaseGroups`], reusable across many names.
#[derive(Debug, Clone)]
pub struct NameCleaner {
    insensitive: Option<Regex>,
    sensitive: Option<Regex>,
}

impl NameCleaner {
    pub fn new(groups: &ReleaseGroups) -> Self {
        Self {
            insensitive: alternation(&groups.insensitive, true),
            sensitive: alternation(&groups.sensitive, false),
        }
    }

    /// Produces the canonical title for a raw file or folder name.
    ///
    /// Falls back to the trimmed input when every token was stripped.
    pub fn clean(&self, raw: &str) -> String {
        let mut name = SETUP_PREFIX.replace(raw, "").into_owned();
        // '_' is a word character for \b, so it has to become a space up front
        name = name.replace('_', " ");
        name = BRACKETED.replace_all(&name, " ").into_owned();
        name = DOTTED_LETTERS
            .replace_all(&name, |caps: &Captures| caps[0].replace('.', ""))
            .into_owned();
        name = VERSION.replace_all(&name, "").into_owned();
        name = BUILD.replace_all(&name, "").into_owned();

        if let Some(re) = &self.insensitive {
            name = re.replace_all(&name, "").into_owned();
        }
        if let Some(re) = &self.sensitive {
            name = re.replace_all(&name, "").into_owned();
        }

        // "Game of the Year Edition" must go before the generic edition rules
        name = GOTY.replace_all(&name, "").into_owned();
        name = DLC_INCLUDED.replace_all(&name, "").into_owned();
        name = DLC_COUNT.replace_all(&name, "").into_owned();
        name = DLC_WORD.replace_all(&name, "").into_owned();
        name = NAMED_EDITION.replace_all(&name, "").into_owned();
        name = DIGITAL_DELUXE.replace_all(&name, "").into_owned();
        name = EDITION_WORD.replace_all(&name, "").into_owned();
        name = REMASTERED.replace_all(&name, "").into_owned();

        name = SEPARATORS.replace_all(&name, " ").into_owned();
        name = EMPTY_BRACKETS.replace_all(&name, " ").into_owned();
        name = REPEATED_JOINERS.replace_all(&name, " ").into_owned();
        name = WHITESPACE.replace_all(&name, " ").into_owned();
        name = DANGLING_BEFORE.replace_all(&name, "${1}${2}").into_owned();
        name = DANGLING_AFTER.replace_all(&name, "${1}${2}").into_owned();

        // A setup token can only become leading once the tags before it are gone
        let stripped = SETUP_PREFIX.replace(trim_joiners(&name), "").into_owned();
        let trimmed = trim_joiners(&stripped);
        let titled = title_case(trimmed);
        if titled.is_empty() {
            raw.trim().to_string()
        } else {
            titled
        }
    }
}

fn trim_joiners(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '+' | ',' | '&' | ':'))
}

fn alternation(patterns: &[String], case_insensitive: bool) -> Option<Regex> {
    let mut parts: Vec<&str> = patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return None;
    }
    // Longest first so "-GOG-Rip" wins over "-GOG"
    parts.sort_by_key(|p| std::cmp::Reverse(p.len()));
    let body = parts.iter().map(|p| regex::escape(p)).collect::<Vec<_>>().join("|");
    let pattern = if case_insensitive { format!("(?i)(?:{})", body) } else { format!("(?:{})", body) };
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!("Ignoring release group patterns, failed to compile: {}", e);
            None
        }
    }
}

/// Upper-cases the first letter of every word and leaves the rest untouched,
/// so acronyms such as `FEAR` or `GTA` survive.
pub fn title_case(s: &str) -> String {
    s.split(' ')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One-shot convenience over [`NameCleaner`].
pub fn clean_game_name(raw: &str, groups: &ReleaseGroups) -> String {
    NameCleaner::new(groups).clean(raw)
}

/// Strips the extension when it is one of `allowed` (compared case-insensitively).
pub fn strip_extension<'a>(file_name: &'a str, allowed: &[String]) -> &'a str {
    if let Some((stem, ext)) = file_name.rsplit_once('.') {
        if !stem.is_empty() && allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)) {
            return stem;
        }
    }
    file_name
}
