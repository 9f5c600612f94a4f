use std::fmt::{Debug, Display};

use crate::statistics::StatisticsError;
use crate::types::{DataType, Value};

/*
    The histogram core is generic over a small closed set of value domains.
    A domain knows how to order its values, how to step to the immediate
    successor, and how to express "how far into a range does this value sit"
    as a share. Strings additionally carry the prefix arithmetic: a string
    is embedded into u64 space as its rank among all strings of length up
    to prefix_len over the supported alphabet, so that repr(a) < repr(b)
    whenever a < b and repr differences count the strings in between
    (within the prefix domain).
*/

pub type BinId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum LikePatternBounds<V> {
    /// Pattern has no wildcard and reduces to an equality match.
    Exact(V),
    /// Pattern is exactly "%".
    MatchAll,
    /// Leading "%" or a wildcard shape the prefix arithmetic does not model.
    Unprunable,
    /// Prefix search: matches live in [lower, upper). `at_domain_max` marks
    /// a prefix that has no successor within its own length.
    Prefix { lower: V, upper: V, at_domain_max: bool },
}

pub trait HistogramDomain: Clone + Send + Sync + 'static {
    type Value: Clone + PartialOrd + Display + Debug + Send + Sync + 'static;

    fn data_type(&self) -> DataType;

    /// Validate and narrow an engine value to this domain. Text domains
    /// reject values containing unsupported characters.
    fn value_from(&self, value: &Value) -> Result<Self::Value, StatisticsError>;

    fn to_value(&self, value: &Self::Value) -> Value;

    /// The immediate successor in the domain's discrete order. The maximum
    /// value of a bounded domain is its own successor.
    fn next_value(&self, value: &Self::Value) -> Self::Value;

    /// Share of the inclusive range [low, high] that lies strictly below
    /// `value`. Callers guarantee low <= value.
    fn share_below(&self, low: &Self::Value, high: &Self::Value, value: &Self::Value) -> f32;

    /// Split [min, max] into at most `target_bins` touching ranges of equal
    /// width. Returns fewer ranges when the domain has fewer representable
    /// values than requested bins.
    fn split_equal_width(
        &self,
        min: &Self::Value,
        max: &Self::Value,
        target_bins: usize,
    ) -> Vec<(Self::Value, Self::Value)>;

    /// Index of the equal-width bin that `value` falls into, using the same
    /// width arithmetic as `split_equal_width`. Callers guarantee
    /// min <= value <= max and that `bin_count` ranges were produced.
    fn equal_width_bin_index(
        &self,
        min: &Self::Value,
        max: &Self::Value,
        bin_count: usize,
        value: &Self::Value,
    ) -> BinId;

    fn like_pattern_bounds(
        &self,
        _pattern: &str,
    ) -> Result<LikePatternBounds<Self::Value>, StatisticsError> {
        Err(StatisticsError::UnsupportedPredicate(
            "LIKE is only supported on text columns",
        ))
    }

    fn value_has_prefix(&self, _value: &Self::Value, _prefix: &str) -> bool {
        false
    }

    /// Uniform-distribution divisor assumed for `fixed_characters` literal
    /// pattern characters that the prefix arithmetic cannot place.
    fn fixed_character_divisor(&self, _fixed_characters: usize) -> f32 {
        1.0
    }
}

pub fn contains_wildcard(pattern: &str) -> bool {
    pattern.contains('%') || pattern.contains('_')
}

/// Saturating integer power, enough for divisor calculations where the
/// exponent has already been capped against overflow.
pub fn ipow(base: u64, exponent: u32) -> u64 {
    base.saturating_pow(exponent)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntDomain;

impl HistogramDomain for IntDomain {
    type Value = i64;

    fn data_type(&self) -> DataType {
        DataType::Int
    }

    fn value_from(&self, value: &Value) -> Result<i64, StatisticsError> {
        match value {
            Value::Int(v) => Ok(*v),
            other => Err(StatisticsError::TypeMismatch {
                expected: DataType::Int,
                found: other.data_type(),
            }),
        }
    }

    fn to_value(&self, value: &i64) -> Value {
        Value::Int(*value)
    }

    fn next_value(&self, value: &i64) -> i64 {
        value.saturating_add(1)
    }

    fn share_below(&self, low: &i64, high: &i64, value: &i64) -> f32 {
        let width = (*high as i128 - *low as i128 + 1) as f32;
        (*value as i128 - *low as i128) as f32 / width
    }

    fn split_equal_width(&self, min: &i64, max: &i64, target_bins: usize) -> Vec<(i64, i64)> {
        let width = (*max as i128 - *min as i128 + 1) as u128;
        let bin_count = (target_bins as u128).min(width) as usize;
        let base = width / bin_count as u128;
        let remainder = (width % bin_count as u128) as usize;
        let mut ranges = Vec::with_capacity(bin_count);
        let mut low = *min as i128;
        for bin in 0..bin_count {
            let bin_width = base + u128::from(bin < remainder);
            let high = low + bin_width as i128 - 1;
            ranges.push((low as i64, high as i64));
            low = high + 1;
        }
        ranges
    }

    fn equal_width_bin_index(&self, min: &i64, max: &i64, bin_count: usize, value: &i64) -> BinId {
        let width = (*max as i128 - *min as i128 + 1) as u128;
        let offset = (*value as i128 - *min as i128) as u128;
        width_bin_index(width, bin_count, offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatDomain;

impl HistogramDomain for FloatDomain {
    type Value = f64;

    fn data_type(&self) -> DataType {
        DataType::Float
    }

    fn value_from(&self, value: &Value) -> Result<f64, StatisticsError> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(StatisticsError::TypeMismatch {
                expected: DataType::Float,
                found: other.data_type(),
            }),
        }
    }

    fn to_value(&self, value: &f64) -> Value {
        Value::Float(*value)
    }

    fn next_value(&self, value: &f64) -> f64 {
        value.next_up()
    }

    fn share_below(&self, low: &f64, high: &f64, value: &f64) -> f32 {
        if high <= low {
            return if value > low { 1.0 } else { 0.0 };
        }
        ((value - low) / (high - low)) as f32
    }

    fn split_equal_width(&self, min: &f64, max: &f64, target_bins: usize) -> Vec<(f64, f64)> {
        if max <= min {
            return vec![(*min, *max)];
        }
        let step = (max - min) / target_bins as f64;
        let mut ranges = Vec::with_capacity(target_bins);
        let mut low = *min;
        for bin in 0..target_bins {
            let high = if bin == target_bins - 1 { *max } else { min + step * (bin + 1) as f64 };
            ranges.push((low, high));
            low = high.next_up();
        }
        ranges
    }

    fn equal_width_bin_index(&self, min: &f64, max: &f64, bin_count: usize, value: &f64) -> BinId {
        if max <= min {
            return 0;
        }
        let index = ((value - min) / (max - min) * bin_count as f64) as usize;
        index.min(bin_count - 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDomain {
    first_char: u8,
    last_char: u8,
    prefix_len: usize,
}

impl TextDomain {
    /// The characters must form a contiguous ascending ASCII range and the
    /// prefix length must keep `alphabet_size ^ prefix_len` inside u64.
    pub fn new(supported_characters: &str, prefix_len: usize) -> Result<TextDomain, StatisticsError> {
        let bytes = supported_characters.as_bytes();
        if bytes.is_empty() || prefix_len == 0 {
            return Err(StatisticsError::InvalidDomain(
                "supported characters and prefix length must be non-empty".to_string(),
            ));
        }
        if !supported_characters.is_ascii() {
            return Err(StatisticsError::InvalidDomain(
                "supported characters must be ASCII".to_string(),
            ));
        }
        for window in bytes.windows(2) {
            if window[1] != window[0] + 1 {
                return Err(StatisticsError::InvalidDomain(format!(
                    "supported characters must be sorted and consecutive: {}",
                    supported_characters
                )));
            }
        }
        let domain = TextDomain {
            first_char: bytes[0],
            last_char: bytes[bytes.len() - 1],
            prefix_len,
        };
        // The embedding counts strings of length up to prefix_len; that
        // count must fit into u64.
        let mut check = 1u64;
        for _ in 0..prefix_len {
            check = match check
                .checked_mul(domain.alphabet_size())
                .and_then(|value| value.checked_add(1))
            {
                Some(value) => value,
                None => {
                    return Err(StatisticsError::InvalidDomain(format!(
                        "prefix length {} overflows the numeric representation",
                        prefix_len
                    )))
                }
            };
        }
        Ok(domain)
    }

    /// Lowercase latin letters with the longest non-overflowing prefix.
    pub fn lowercase() -> TextDomain {
        TextDomain::new("abcdefghijklmnopqrstuvwxyz", 13).unwrap()
    }

    pub fn alphabet_size(&self) -> u64 {
        (self.last_char - self.first_char + 1) as u64
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Number of strings over the alphabet with length at most `len`.
    fn strings_up_to(&self, len: usize) -> u64 {
        let mut count = 1u64;
        for _ in 0..len {
            count = count * self.alphabet_size() + 1;
        }
        count
    }

    pub fn validate(&self, value: &str, allow_wildcards: bool) -> Result<(), StatisticsError> {
        let ok = value.bytes().all(|b| {
            (self.first_char..=self.last_char).contains(&b)
                || (allow_wildcards && (b == b'%' || b == b'_'))
        });
        if ok {
            Ok(())
        } else {
            Err(StatisticsError::UnsupportedCharacters { value: value.to_string() })
        }
    }

    /// Embed the first `prefix_len` characters into u64: a string maps to
    /// its rank among all strings of length up to `prefix_len`, so "" maps
    /// to 0, adjacent strings differ by 1, and repr differences count the
    /// strings in between.
    pub fn string_to_number(&self, value: &str) -> u64 {
        let trimmed = &value.as_bytes()[..value.len().min(self.prefix_len)];
        let mut result = 0u64;
        for (index, byte) in trimmed.iter().enumerate() {
            let char_index = (byte - self.first_char) as u64;
            result += char_index * self.strings_up_to(self.prefix_len - index - 1) + 1;
        }
        result
    }

    pub fn number_to_string(&self, value: u64) -> String {
        let mut result = String::new();
        let mut remainder = value;
        let mut len = self.prefix_len;
        while remainder > 0 {
            let below = self.strings_up_to(len - 1);
            let char_index = (remainder - 1) / below;
            result.push((self.first_char + char_index as u8) as char);
            remainder = (remainder - 1) % below;
            len -= 1;
        }
        result
    }

    pub fn common_prefix_length(a: &str, b: &str) -> usize {
        a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
    }

    /// Successor within the domain of strings over the supported characters
    /// with length at most `max_len`. The overall maximum is returned
    /// unchanged.
    pub fn next_string(&self, value: &str, max_len: usize) -> String {
        if value.is_empty() {
            return (self.first_char as char).to_string();
        }
        let bytes = value.as_bytes();
        if bytes.len() >= max_len && bytes[..max_len].iter().all(|b| *b == self.last_char) {
            return value[..max_len].to_string();
        }
        if bytes.len() < max_len {
            let mut next = value.to_string();
            next.push(self.first_char as char);
            return next;
        }
        // Trim to max_len, strip trailing maximum characters, bump the last
        // remaining one.
        let trimmed = &bytes[..max_len];
        let keep = trimmed.iter().rposition(|b| *b != self.last_char).unwrap();
        let mut next: Vec<u8> = trimmed[..=keep].to_vec();
        next[keep] += 1;
        String::from_utf8(next).unwrap()
    }

    fn residual_repr(&self, value: &str, common_prefix: usize) -> u64 {
        self.string_to_number(&value[value.len().min(common_prefix)..])
    }
}

impl HistogramDomain for TextDomain {
    type Value = String;

    fn data_type(&self) -> DataType {
        DataType::Text
    }

    fn value_from(&self, value: &Value) -> Result<String, StatisticsError> {
        match value {
            Value::Text(v) => {
                self.validate(v, false)?;
                Ok(v.clone())
            }
            other => Err(StatisticsError::TypeMismatch {
                expected: DataType::Text,
                found: other.data_type(),
            }),
        }
    }

    fn to_value(&self, value: &String) -> Value {
        Value::Text(value.clone())
    }

    fn next_value(&self, value: &String) -> String {
        self.next_string(value, self.prefix_len)
    }

    fn share_below(&self, low: &String, high: &String, value: &String) -> f32 {
        /*
            Strip the common prefix of the bin edges before embedding, so a
            bin like ["intelligence", "intellij"] is measured on the residual
            range ["gence", "j"] instead of collapsing to a single prefix
            number. Residuals longer than prefix_len are still trimmed, which
            can push the share slightly above 1; estimators cap downstream.
        */
        let common = TextDomain::common_prefix_length(low, high);
        debug_assert!(
            value.as_bytes().starts_with(&low.as_bytes()[..common.min(value.len())]),
            "value {} does not belong to bin [{}, {}]",
            value,
            low,
            high
        );
        let value_repr = self.residual_repr(value, common);
        let low_repr = self.residual_repr(low, common);
        let high_repr = self.residual_repr(high, common);
        (value_repr.saturating_sub(low_repr)) as f32 / (high_repr - low_repr + 1) as f32
    }

    fn split_equal_width(&self, min: &String, max: &String, target_bins: usize) -> Vec<(String, String)> {
        let common = TextDomain::common_prefix_length(min, max);
        let prefix = &min[..common.min(min.len())];
        let min_repr = self.residual_repr(min, common);
        let max_repr = self.residual_repr(max, common);
        let width = (max_repr - min_repr + 1) as u128;
        let bin_count = (target_bins as u128).min(width) as usize;
        let base = width / bin_count as u128;
        let remainder = (width % bin_count as u128) as usize;

        let mut ranges = Vec::with_capacity(bin_count);
        let mut low_repr = min_repr;
        for bin in 0..bin_count {
            let bin_width = (base + u128::from(bin < remainder)) as u64;
            let high_repr = low_repr + bin_width - 1;
            // Keep the untrimmed column extrema exact at the outer edges.
            let low = if bin == 0 {
                min.clone()
            } else {
                format!("{}{}", prefix, self.number_to_string(low_repr))
            };
            let high = if bin == bin_count - 1 {
                max.clone()
            } else {
                format!("{}{}", prefix, self.number_to_string(high_repr))
            };
            ranges.push((low, high));
            low_repr = high_repr + 1;
        }
        ranges
    }

    fn equal_width_bin_index(
        &self,
        min: &String,
        max: &String,
        bin_count: usize,
        value: &String,
    ) -> BinId {
        let common = TextDomain::common_prefix_length(min, max);
        let min_repr = self.residual_repr(min, common);
        let max_repr = self.residual_repr(max, common);
        let value_repr = self.residual_repr(value, common);
        let width = (max_repr - min_repr + 1) as u128;
        let offset = value_repr.saturating_sub(min_repr) as u128;
        width_bin_index(width, bin_count, offset.min(width - 1))
    }

    fn like_pattern_bounds(&self, pattern: &str) -> Result<LikePatternBounds<String>, StatisticsError> {
        self.validate(pattern, true)?;
        if !contains_wildcard(pattern) {
            return Ok(LikePatternBounds::Exact(pattern.to_string()));
        }
        if pattern == "%" {
            return Ok(LikePatternBounds::MatchAll);
        }
        if pattern.starts_with('%') {
            return Ok(LikePatternBounds::Unprunable);
        }
        let prefix = match pattern.find('%') {
            Some(index) => &pattern[..index],
            // Only "_" wildcards, nothing the prefix arithmetic can place.
            None => return Ok(LikePatternBounds::Unprunable),
        };
        if prefix.contains('_') {
            return Ok(LikePatternBounds::Unprunable);
        }
        let upper = self.next_string(prefix, prefix.len());
        Ok(LikePatternBounds::Prefix {
            lower: prefix.to_string(),
            at_domain_max: upper == prefix,
            upper,
        })
    }

    fn value_has_prefix(&self, value: &String, prefix: &str) -> bool {
        value.as_bytes().starts_with(prefix.as_bytes())
    }

    fn fixed_character_divisor(&self, fixed_characters: usize) -> f32 {
        // Cap the exponent so the power stays inside u64.
        let maximum_exponent =
            ((u64::MAX as f64).ln() / (self.alphabet_size() as f64).ln()) as usize;
        ipow(self.alphabet_size(), fixed_characters.min(maximum_exponent) as u32) as f32
    }
}

fn width_bin_index(width: u128, bin_count: usize, offset: u128) -> BinId {
    // First `remainder` bins are one wider, mirroring split_equal_width.
    let base = width / bin_count as u128;
    let remainder = width % bin_count as u128;
    let wide_span = (base + 1) * remainder;
    let index = if offset < wide_span {
        offset / (base + 1)
    } else {
        remainder + (offset - wide_span) / base
    };
    (index as usize).min(bin_count - 1)
}

#[cfg(test)]
mod test {
    use super::*;

    fn lowercase(prefix_len: usize) -> TextDomain {
        TextDomain::new("abcdefghijklmnopqrstuvwxyz", prefix_len).unwrap()
    }

    #[test]
    fn domain_validation() {
        assert!(TextDomain::new("abcdefghijklmnopqrstuvwxyz", 13).is_ok());
        assert!(TextDomain::new("abcdefghijklmnopqrstuvwxyz", 14).is_err());
        assert!(TextDomain::new("zyxwvutsrqponmlkjihgfedcba", 13).is_err());
        assert!(TextDomain::new("ac", 10).is_err());
        assert!(TextDomain::new("", 4).is_err());
    }

    #[test]
    fn rejects_unsupported_characters() {
        let domain = lowercase(4);
        assert!(domain.validate("abcd", false).is_ok());
        assert!(domain.validate("abc%", true).is_ok());
        assert!(domain.validate("abc%", false).is_err());
        assert!(domain.validate("abc1", true).is_err());
        assert!(domain.validate("aBcd", false).is_err());
    }

    #[test]
    fn string_number_round_trip() {
        let domain = lowercase(4);
        assert_eq!(domain.string_to_number(""), 0);
        for value in ["a", "ab", "abcd", "zzzz", "azz", "yyzz"] {
            let repr = domain.string_to_number(value);
            assert_eq!(domain.number_to_string(repr), value, "round trip of {}", value);
        }
        // Order preserving within the prefix domain.
        assert!(domain.string_to_number("a") < domain.string_to_number("aa"));
        assert!(domain.string_to_number("az") < domain.string_to_number("b"));
        // Adjacent strings differ by one.
        assert_eq!(
            domain.string_to_number("aa"),
            domain.string_to_number("a") + 1
        );
    }

    #[test]
    fn next_string_steps_through_the_domain() {
        let domain = lowercase(4);
        assert_eq!(domain.next_string("", 4), "a");
        assert_eq!(domain.next_string("abc", 4), "abca");
        assert_eq!(domain.next_string("abcz", 4), "abd");
        assert_eq!(domain.next_string("azzz", 4), "b");
        assert_eq!(domain.next_string("zzzz", 4), "zzzz");
        // Length-limited stepping used for LIKE prefixes.
        assert_eq!(domain.next_string("ab", 2), "ac");
        assert_eq!(domain.next_string("az", 2), "b");
        assert_eq!(domain.next_string("zz", 2), "zz");
        // Values longer than the cap get trimmed first.
        assert_eq!(domain.next_string("bbbbz", 4), "bbbc");
    }

    #[test]
    fn share_below_strips_common_prefix() {
        let domain = lowercase(4);
        // Residual range after "intelli" would exceed 4 chars in the real
        // example, use a short one: bin [abca, abcz], value abcm.
        let share = domain.share_below(&"abca".to_string(), &"abcz".to_string(), &"abcm".to_string());
        let expect = (domain.string_to_number("m") - domain.string_to_number("a")) as f32
            / (domain.string_to_number("z") - domain.string_to_number("a") + 1) as f32;
        assert_eq!(share, expect);
        assert_eq!(
            domain.share_below(&"abca".to_string(), &"abcz".to_string(), &"abca".to_string()),
            0.0
        );
    }

    #[test]
    fn int_share_and_split() {
        let domain = IntDomain;
        assert_eq!(domain.share_below(&0, &9, &5), 0.5);
        let ranges = domain.split_equal_width(&0, &9, 4);
        assert_eq!(ranges, vec![(0, 2), (3, 5), (6, 7), (8, 9)]);
        for (bin, (low, high)) in ranges.iter().enumerate() {
            for value in *low..=*high {
                assert_eq!(domain.equal_width_bin_index(&0, &9, 4, &value), bin);
            }
        }
        // More bins than representable values.
        assert_eq!(domain.split_equal_width(&1, &3, 10).len(), 3);
    }

    #[test]
    fn float_split_covers_range() {
        let domain = FloatDomain;
        let ranges = domain.split_equal_width(&0.0, &1.0, 4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].0, 0.0);
        assert_eq!(ranges[3].1, 1.0);
        for window in ranges.windows(2) {
            assert!(window[0].1 < window[1].0);
        }
        assert_eq!(domain.equal_width_bin_index(&0.0, &1.0, 4, &0.1), 0);
        assert_eq!(domain.equal_width_bin_index(&0.0, &1.0, 4, &1.0), 3);
    }

    #[test]
    fn text_split_equal_width() {
        let domain = lowercase(4);
        let ranges = domain.split_equal_width(&"aaaa".to_string(), &"zzzz".to_string(), 3);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].0, "aaaa");
        assert_eq!(ranges[2].1, "zzzz");
        for window in ranges.windows(2) {
            assert!(window[0].1 < window[1].0);
        }
        // Assignment is consistent with the produced edges.
        for (bin, (low, high)) in ranges.iter().enumerate() {
            assert_eq!(
                domain.equal_width_bin_index(&"aaaa".to_string(), &"zzzz".to_string(), 3, low),
                bin
            );
            assert_eq!(
                domain.equal_width_bin_index(&"aaaa".to_string(), &"zzzz".to_string(), 3, high),
                bin
            );
        }
    }

    #[test]
    fn like_pattern_bounds() {
        let domain = lowercase(4);
        assert_eq!(
            domain.like_pattern_bounds("abcd").unwrap(),
            LikePatternBounds::Exact("abcd".to_string())
        );
        assert_eq!(domain.like_pattern_bounds("%").unwrap(), LikePatternBounds::MatchAll);
        assert_eq!(domain.like_pattern_bounds("%foo").unwrap(), LikePatternBounds::Unprunable);
        assert_eq!(domain.like_pattern_bounds("ab_c").unwrap(), LikePatternBounds::Unprunable);
        assert_eq!(
            domain.like_pattern_bounds("foo%").unwrap(),
            LikePatternBounds::Prefix {
                lower: "foo".to_string(),
                upper: "fop".to_string(),
                at_domain_max: false
            }
        );
        assert_eq!(
            domain.like_pattern_bounds("zz%").unwrap(),
            LikePatternBounds::Prefix {
                lower: "zz".to_string(),
                upper: "zz".to_string(),
                at_domain_max: true
            }
        );
        assert!(domain.like_pattern_bounds("ab1%").is_err());
        assert!(IntDomain.like_pattern_bounds("a%").is_err());
    }

    #[test]
    fn fixed_character_divisor_caps_exponent() {
        let domain = lowercase(4);
        assert_eq!(domain.fixed_character_divisor(1), 26.0);
        assert_eq!(domain.fixed_character_divisor(2), 26.0 * 26.0);
        // 26^14 overflows u64, the cap keeps it at 26^13.
        assert_eq!(domain.fixed_character_divisor(20), ipow(26, 13) as f32);
    }
}
