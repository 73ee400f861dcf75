use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase and strip diacritics ("Difamación" -> "difamacion").
pub fn fold(text: &str) -> String {
    text.to_lowercase()
        .nfkd()
        .filter(|character| !is_combining_mark(*character))
        .collect()
}

/// Folded term with one trailing "s" removed, so singular and plural share a stem.
pub fn stem(term: &str) -> String {
    let folded = fold(term.trim());
    let folded = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    match folded.strip_suffix('s') {
        Some(stripped) if !stripped.trim().is_empty() => stripped.trim_end().to_string(),
        _ => folded,
    }
}

/// Literal gate a chunk must pass before its embedding distance is trusted:
/// the chunk must contain a word starting with the term's stem.
#[derive(Debug, Clone)]
pub struct LexicalGate {
    stem: String,
    pattern: Regex,
}

impl LexicalGate {
    /// Returns `None` when the term has no usable stem.
    pub fn new(term: &str) -> Option<Self> {
        let stem = stem(term);
        if stem.is_empty() {
            return None;
        }

        let body = stem
            .split(' ')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(r"\s+");
        let leading = if stem.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
            r"\b"
        } else {
            ""
        };
        let pattern = Regex::new(&format!("{leading}{body}")).ok()?;
        Some(Self { stem, pattern })
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(&fold(text))
    }
}
