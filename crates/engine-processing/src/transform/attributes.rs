use crate::transform::text::normalize_text;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LINE_BREAK: Regex =
        Regex::new(r"(?i)<br\s*/?>|\r\n|\r|\n").expect("line break pattern");
}

/// An ordered `Key: Value` block, as stored in the free-form attribute field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeBlock {
    entries: Vec<(String, String)>,
}

impl AttributeBlock {
    pub fn parse(text: &str) -> Self {
        let mut block = AttributeBlock::default();
        for line in LINE_BREAK.split(text) {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = normalize_text(key);
            if key.is_empty() {
                continue;
            }
            block.set(&key, &normalize_text(value));
        }
        block
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut block = AttributeBlock::default();
        for (key, value) in pairs {
            block.set(key, value);
        }
        block
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|i| self.entries[i].1.as_str())
    }

    /// Inserts or replaces `key`, keeping its original position and spelling.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.position(key) {
            Some(i) => self.entries[i].1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Overlays `candidate` onto `self`. Empty candidate values never erase
    /// existing ones.
    pub fn merged_with(&self, candidate: &AttributeBlock) -> AttributeBlock {
        let mut merged = self.clone();
        for (key, value) in &candidate.entries {
            if !value.trim().is_empty() {
                merged.set(key, value);
            }
        }
        merged
    }

    /// Order-insensitive comparison on normalized keys and values.
    pub fn same_content(&self, other: &AttributeBlock) -> bool {
        let canon = |b: &AttributeBlock| {
            let mut pairs: Vec<(String, String)> = b
                .entries
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), normalize_text(v)))
                .filter(|(_, v)| !v.is_empty())
                .collect();
            pairs.sort();
            pairs
        };
        canon(self) == canon(other)
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lines_and_html_breaks() {
        let block = AttributeBlock::parse("Color: Red<br/>Voltage : 12 V\nnot a pair\n: orphan");
        assert_eq!(block.len(), 2);
        assert_eq!(block.get("color"), Some("Red"));
        assert_eq!(block.get("VOLTAGE"), Some("12 V"));
    }

    #[test]
    fn merge_keeps_existing_when_candidate_blank() {
        let current = AttributeBlock::parse("Color: Red\nWeight: 2 kg");
        let candidate = AttributeBlock::from_pairs([("color", ""), ("Material", "Steel")]);

        let merged = current.merged_with(&candidate);
        assert_eq!(merged.render(), "Color: Red\nWeight: 2 kg\nMaterial: Steel");
    }

    #[test]
    fn same_content_ignores_order_and_formatting() {
        let a = AttributeBlock::parse("Color: Red<br>Weight:  2 kg");
        let b = AttributeBlock::parse("weight: 2 kg\ncolor: Red");
        assert!(a.same_content(&b));
        assert!(!a.same_content(&AttributeBlock::parse("Color: Blue")));
    }
}
