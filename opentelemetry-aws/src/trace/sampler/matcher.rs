use regex::Regex;

/// Compiled form of one rule match field.
///
/// `"*"` is the default for every field and short-circuits without looking
/// at the value, so unconfigured fields cost nothing per span. A pattern
/// without wildcards compares case-insensitively. Anything else compiles to
/// an anchored regex (`*` matching any run of characters, `?` a single
/// character) and stays case-sensitive; services match against this
/// behavior today, so the asymmetry is part of the contract.
#[derive(Clone, Debug)]
pub(crate) enum Matcher {
    Any,
    Exact(String),
    Wildcard(Regex),
}

impl Matcher {
    pub(crate) fn new(glob: &str) -> Result<Matcher, regex::Error> {
        if glob == "*" {
            return Ok(Matcher::Any);
        }
        if !glob.contains(['*', '?']) {
            return Ok(Matcher::Exact(glob.to_owned()));
        }
        Ok(Matcher::Wildcard(Regex::new(&to_regex(glob))?))
    }

    /// A missing value only matches the wildcard-everything pattern.
    pub(crate) fn matches(&self, value: Option<&str>) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Exact(target) => value.is_some_and(|v| target.eq_ignore_ascii_case(v)),
            Matcher::Wildcard(pattern) => value.is_some_and(|v| pattern.is_match(v)),
        }
    }
}

fn to_regex(glob: &str) -> String {
    let mut pattern = String::with_capacity(glob.len() + 8);
    let mut literal = String::new();
    pattern.push('^');
    for c in glob.chars() {
        match c {
            '*' | '?' => {
                if !literal.is_empty() {
                    pattern.push_str(&regex::escape(&literal));
                    literal.clear();
                }
                pattern.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        pattern.push_str(&regex::escape(&literal));
    }
    pattern.push('$');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_everything() {
        let matcher = Matcher::new("*").unwrap();
        assert!(matcher.matches(Some("anything")));
        assert!(matcher.matches(Some("")));
        assert!(matcher.matches(None));
        assert!(matches!(matcher, Matcher::Any));
    }

    #[test]
    fn exact_is_case_insensitive() {
        let matcher = Matcher::new("GET").unwrap();
        assert!(matcher.matches(Some("GET")));
        assert!(matcher.matches(Some("get")));
        assert!(!matcher.matches(Some("POST")));
        assert!(!matcher.matches(None));
    }

    #[test]
    fn glob_runs() {
        let matcher = Matcher::new("a*b").unwrap();
        assert!(matcher.matches(Some("ab")));
        assert!(matcher.matches(Some("axxb")));
        assert!(!matcher.matches(Some("ba")));
        assert!(!matcher.matches(Some("abc")));
        assert!(!matcher.matches(None));
    }

    #[test]
    fn glob_single_character() {
        let matcher = Matcher::new("/users/?").unwrap();
        assert!(matcher.matches(Some("/users/1")));
        assert!(!matcher.matches(Some("/users/12")));
        assert!(!matcher.matches(Some("/users/")));
    }

    #[test]
    fn glob_is_case_sensitive() {
        let matcher = Matcher::new("/Api/*").unwrap();
        assert!(matcher.matches(Some("/Api/health")));
        assert!(!matcher.matches(Some("/api/health")));
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let matcher = Matcher::new("/v1.0/*").unwrap();
        assert!(matcher.matches(Some("/v1.0/status")));
        assert!(!matcher.matches(Some("/v1x0/status")));
    }
}
