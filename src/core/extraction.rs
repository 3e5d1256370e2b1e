use crate::domain::model::ExtractedPrice;
use crate::utils::error::{EtlError, Result};
use regex::{Regex, RegexBuilder};

pub const DEFAULT_CURRENCIES: &[&str] = &["KSh", "FCFA", "XOF", "CFA"];

/// Pulls `<commodity> price ... <location> is <currency> <amount>` statements out of free text.
#[derive(Debug, Clone)]
pub struct PriceExtractor {
    pattern: Regex,
}

impl Default for PriceExtractor {
    fn default() -> Self {
        // 預設幣別清單固定，編譯不會失敗
        Self::new(DEFAULT_CURRENCIES).expect("default currency pattern is valid")
    }
}

impl PriceExtractor {
    pub fn new<S: AsRef<str>>(currencies: &[S]) -> Result<Self> {
        if currencies.is_empty() {
            return Err(EtlError::validation("at least one currency token is required"));
        }

        let alternation = currencies
            .iter()
            .map(|c| regex::escape(c.as_ref().trim()))
            .collect::<Vec<_>>()
            .join("|");
        let source = format!(
            r"(\w+)\s+price.*?([A-Za-z]+)\s+is\s+({})\s+(\d+(?:\.\d+)?)",
            alternation
        );

        let pattern = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| EtlError::validation(format!("invalid currency pattern: {}", e)))?;

        Ok(Self { pattern })
    }

    /// One price per sentence at most; sentences without a match are skipped.
    pub fn extract(&self, text: &str) -> Vec<ExtractedPrice> {
        split_sentences(text)
            .into_iter()
            .filter_map(|sentence| {
                let caps = self.pattern.captures(sentence)?;
                let price = caps[4].parse::<f64>().ok()?;
                Some(ExtractedPrice {
                    commodity: caps[1].to_lowercase(),
                    location: caps[2].to_string(),
                    price,
                    currency: caps[3].to_string(),
                })
            })
            .collect()
    }
}

/// Splits on `.`, `!` or `?` followed by whitespace or end of text, so decimals stay intact.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?') {
            let at_boundary = chars.peek().map(|(_, next)| next.is_whitespace()).unwrap_or(true);
            if at_boundary {
                let end = idx + ch.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_one_price_per_sentence() {
        let text = "Retail maize price in Kisumu is KSh 63 per kg. Wholesale rice price in Nairobi is KSh 95.";
        let prices = PriceExtractor::default().extract(text);

        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].commodity, "maize");
        assert_eq!(prices[0].location, "Kisumu");
        assert_eq!(prices[0].price, 63.0);
        assert_eq!(prices[1].commodity, "rice");
        assert_eq!(prices[1].location, "Nairobi");
        assert_eq!(prices[1].price, 95.0);
    }

    #[test]
    fn test_matches_case_insensitively_with_decimals() {
        let text = "Le MILLET PRICE at the market in Kaolack IS fcfa 212.5 today";
        let prices = PriceExtractor::default().extract(text);

        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].commodity, "millet");
        assert_eq!(prices[0].location, "Kaolack");
        assert_eq!(prices[0].currency, "fcfa");
        assert_eq!(prices[0].price, 212.5);
    }

    #[test]
    fn test_sentences_without_prices_are_ignored() {
        let text = "Roads were flooded. Onion price in Touba is XOF 400! Nothing else?";
        let prices = PriceExtractor::default().extract(text);
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].commodity, "onion");
    }

    #[test]
    fn test_custom_currency_list() {
        let extractor = PriceExtractor::new(&["GMD"]).unwrap();
        assert!(extractor.extract("Rice price in Banjul is KSh 90.").is_empty());
        assert_eq!(extractor.extract("Rice price in Banjul is GMD 90.").len(), 1);
        assert!(PriceExtractor::new::<&str>(&[]).is_err());
    }

    #[test]
    fn test_split_sentences_keeps_decimals() {
        assert_eq!(
            split_sentences("Price is 12.5 today. Next one"),
            vec!["Price is 12.5 today.", "Next one"]
        );
        assert!(split_sentences("   ").is_empty());
    }
}
