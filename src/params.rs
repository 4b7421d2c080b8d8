use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static NAMESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ns=(\w+)").expect("namespace regex"));

/// Parses the query part of `url` into a key/value map.
///
/// Only `+` is turned back into a space; values are otherwise returned raw
/// (no percent-decoding). Pairs without `=` are skipped and the last
/// occurrence of a key wins.
pub fn parse_params(url: &str) -> HashMap<String, String> {
    let mut args = HashMap::new();
    let Some((_, query)) = url.split_once('?') else {
        return args;
    };
    for pair in query.split('&') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        args.insert(name.to_string(), value.replace('+', " "));
    }
    args
}

/// Extracts the admin namespace from a `?ns=<word>` style search string.
pub fn namespace_from_search(search: &str) -> Option<String> {
    NAMESPACE_RE
        .captures(search)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_drops_bare_keys() {
        let params = parse_params("http://x/y?a=1&b=2+3&c");
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("a").map(String::as_str), Some("1"));
        assert_eq!(params.get("b").map(String::as_str), Some("2 3"));
        assert!(!params.contains_key("c"));
    }

    #[test]
    fn empty_without_query() {
        assert!(parse_params("http://x/y").is_empty());
        assert!(parse_params("http://x/y?").is_empty());
    }

    #[test]
    fn last_duplicate_wins() {
        let params = parse_params("/page?id=1&id=2");
        assert_eq!(params.get("id").map(String::as_str), Some("2"));
    }

    #[test]
    fn splits_on_first_equals_only() {
        let params = parse_params("/page?next=/a?b=c");
        assert_eq!(params.get("next").map(String::as_str), Some("/a?b=c"));
    }

    #[test]
    fn leaves_percent_escapes_alone() {
        let params = parse_params("/page?q=a%20b+c");
        assert_eq!(params.get("q").map(String::as_str), Some("a%20b c"));
    }

    #[test]
    fn finds_namespace() {
        assert_eq!(namespace_from_search("?NS=staging&x=1").as_deref(), Some("staging"));
        assert_eq!(namespace_from_search("?x=1"), None);
    }
}
