/// Measures text in model tokens. Must be pure.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Byte-length heuristic: one token per four bytes, rounded up.
///
/// # Examples
///
/// ```
/// use atlas_repomap::tokens::{EstimatingTokenizer, Tokenizer};
///
/// let tokenizer = EstimatingTokenizer;
/// assert_eq!(tokenizer.count_tokens(""), 0);
/// assert_eq!(tokenizer.count_tokens("fn main"), 2);
/// assert_eq!(tokenizer.count_tokens("abcd"), 1);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct EstimatingTokenizer;

impl Tokenizer for EstimatingTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count_tokens(&self, text: &str) -> usize {
        self(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(EstimatingTokenizer.count_tokens("a"), 1);
        assert_eq!(EstimatingTokenizer.count_tokens("abcde"), 2);
        assert_eq!(EstimatingTokenizer.count_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn closures_are_tokenizers() {
        let words = |text: &str| text.split_whitespace().count();
        assert_eq!(words.count_tokens("one two three"), 3);
    }
}
