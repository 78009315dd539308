// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identifier splitting into lowercase search tokens.
//!
//! A name is split on camelCase boundaries, on underscores, hyphens and any
//! other non-alphanumeric character, and on letter/digit transitions. A run
//! of capitals followed by a capitalized word splits before the last capital,
//! so `HTTPServer` becomes `http`, `server`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Upper,
    Lower,
    Digit,
    Other,
}

fn classify(ch: char) -> CharClass {
    if ch.is_ascii_digit() || (ch.is_numeric() && !ch.is_alphabetic()) {
        CharClass::Digit
    } else if ch.is_uppercase() {
        CharClass::Upper
    } else if ch.is_alphabetic() {
        CharClass::Lower
    } else {
        CharClass::Other
    }
}

/// Split `name` into lowercase tokens, in order of appearance.
pub fn tokenize(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for (idx, &ch) in chars.iter().enumerate() {
        let class = classify(ch);
        if class == CharClass::Other {
            flush(&mut current, &mut tokens);
            continue;
        }

        if let Some(&prev) = idx.checked_sub(1).and_then(|i| chars.get(i)) {
            let prev_class = classify(prev);
            let next_class = chars.get(idx + 1).map(|&c| classify(c));
            let boundary = match (prev_class, class) {
                (CharClass::Lower, CharClass::Upper) => true,
                (CharClass::Digit, CharClass::Upper | CharClass::Lower) => true,
                (CharClass::Upper | CharClass::Lower, CharClass::Digit) => true,
                (CharClass::Upper, CharClass::Upper) => next_class == Some(CharClass::Lower),
                _ => false,
            };
            if boundary {
                flush(&mut current, &mut tokens);
            }
        }

        current.extend(ch.to_lowercase());
    }
    flush(&mut current, &mut tokens);
    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(name: &str) -> Vec<String> {
        tokenize(name)
    }

    #[test]
    fn splits_camel_and_pascal_case() {
        assert_eq!(toks("CalculateTax"), vec!["calculate", "tax"]);
        assert_eq!(toks("calculateTax"), vec!["calculate", "tax"]);
    }

    #[test]
    fn splits_snake_and_kebab_case() {
        assert_eq!(toks("calculate_tax"), vec!["calculate", "tax"]);
        assert_eq!(toks("calculate-tax"), vec!["calculate", "tax"]);
        assert_eq!(toks("__private__name"), vec!["private", "name"]);
    }

    #[test]
    fn acronym_run_splits_before_last_capital() {
        assert_eq!(toks("HTTPServer"), vec!["http", "server"]);
        assert_eq!(toks("parseJSONBody"), vec!["parse", "json", "body"]);
        assert_eq!(toks("ID"), vec!["id"]);
    }

    #[test]
    fn splits_letter_digit_transitions() {
        assert_eq!(toks("Function12"), vec!["function", "12"]);
        assert_eq!(toks("Validate3x4"), vec!["validate", "3", "x", "4"]);
        assert_eq!(toks("v2Beta"), vec!["v", "2", "beta"]);
    }

    #[test]
    fn keeps_repeated_fragments_in_order() {
        assert_eq!(toks("TaxTax"), vec!["tax", "tax"]);
    }

    #[test]
    fn empty_and_separator_only_names_yield_nothing() {
        assert!(toks("").is_empty());
        assert!(toks("__").is_empty());
    }

    #[test]
    fn comment_tags_lowercase() {
        assert_eq!(toks("TODO"), vec!["todo"]);
        assert_eq!(toks("FIXME"), vec!["fixme"]);
    }
}
