//! Three-letter driver codes for the live map.

/// Build the short code for `name`.
///
/// The code is the first character of the first word followed by the first
/// two characters of the last word, upper-cased. A single word contributes
/// its first three characters. Words shorter than required contribute what
/// they have, so `"Jo X"` becomes `"JX"` and an empty name becomes `""`.
/// Characters are Unicode scalar values, never bytes.
pub fn short_code(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    let code: String = match words.as_slice() {
        [] => String::new(),
        [only] => only.chars().take(3).collect(),
        [first, .., last] => first.chars().take(1).chain(last.chars().take(2)).collect(),
    };
    code.to_uppercase()
}
