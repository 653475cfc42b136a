//! Compiles `/segment/{name}/{name:regex}` path templates into full-path
//! matchers with named, percent-decoded captures.

use std::collections::HashMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;

/// Characters a literal path segment may keep unescaped; everything else is
/// percent-encoded before being folded into the compiled regex, so a literal
/// matches an already-encoded incoming path byte-for-byte.
const PATH_LITERAL: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b':')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=');

/// Default capture pattern for a bare `{name}`: anything but a path separator
/// or brace.
const GREEDY_SEGMENT: &str = "[^{}/]+";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TemplateError {
    #[error("route template must begin with '/': {0:?}")]
    MustStartWithSlash(String),
    #[error("unmatched '{{' in template {0:?}")]
    UnmatchedOpenBrace(String),
    #[error("unmatched '}}' in template {0:?}")]
    UnmatchedCloseBrace(String),
    #[error("empty variable name in template {0:?}")]
    EmptyName(String),
    #[error("invalid variable name {name:?} in template {template:?}")]
    InvalidName { template: String, name: String },
    #[error("invalid regex {regex:?} for variable {name:?}: {source}")]
    InvalidRegex {
        name: String,
        regex: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to compile template {template:?}: {source}")]
    CompileFailed {
        template: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Var { name: String, pattern: String },
}

/// A compiled path template. Cheap to clone; the expensive regex compile
/// happens once, in `CompiledMatcher::compile`.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    template: String,
    regex: Regex,
}

impl CompiledMatcher {
    pub fn compile(template: &str) -> Result<Self, TemplateError> {
        if !template.starts_with('/') {
            return Err(TemplateError::MustStartWithSlash(template.to_string()));
        }

        let segments = split_template(template)?;

        let mut pattern = String::from("^");
        for segment in &segments {
            match segment {
                Segment::Literal(lit) => {
                    let encoded = utf8_percent_encode(lit, PATH_LITERAL).to_string();
                    pattern.push_str(&regex::escape(&encoded));
                }
                Segment::Var { name, pattern: p } => {
                    pattern.push_str("(?P<");
                    pattern.push_str(name);
                    pattern.push('>');
                    pattern.push_str(p);
                    pattern.push(')');
                }
            }
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|source| TemplateError::CompileFailed {
            template: template.to_string(),
            source,
        })?;

        Ok(Self {
            template: template.to_string(),
            regex,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Match a concrete, possibly percent-encoded, path against this
    /// template. Returns the captured variables, percent-decoded, or `None`
    /// on no match. Matching is always full-path (start-to-end anchored).
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(path)?;
        let mut out = HashMap::new();
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                let decoded = percent_encoding::percent_decode_str(m.as_str())
                    .decode_utf8_lossy()
                    .into_owned();
                out.insert(name.to_string(), decoded);
            }
        }
        Some(out)
    }
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_name_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if is_name_start(c) => {}
        _ => return false,
    }
    chars.all(is_name_char)
}

/// Split a template into literal and variable segments. A `{name}` or
/// `{name:regex}` group may itself contain one extra level of `{...}`
/// nesting (so a regex using `{1,9}`-style quantifiers still parses), but
/// any other brace outside a recognized group is a template error.
fn split_template(template: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            return Err(TemplateError::UnmatchedCloseBrace(template.to_string()));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        // find the matching close brace, honoring one level of nesting
        let start = i + 1;
        let mut depth = 1usize;
        let mut j = start;
        while j < chars.len() && depth > 0 {
            match chars[j] {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth == 0 {
                break;
            }
            j += 1;
        }
        if depth != 0 {
            return Err(TemplateError::UnmatchedOpenBrace(template.to_string()));
        }

        let body: String = chars[start..j].iter().collect();
        if body.is_empty() {
            return Err(TemplateError::EmptyName(template.to_string()));
        }

        let (name, pattern) = match body.split_once(':') {
            Some((name, regex)) => (name.to_string(), regex.to_string()),
            None => (body.clone(), GREEDY_SEGMENT.to_string()),
        };

        if !valid_name(&name) {
            return Err(TemplateError::InvalidName {
                template: template.to_string(),
                name,
            });
        }

        if pattern != GREEDY_SEGMENT {
            Regex::new(&pattern).map_err(|source| TemplateError::InvalidRegex {
                name: name.clone(),
                regex: pattern.clone(),
                source,
            })?;
        }

        segments.push(Segment::Var { name, pattern });
        i = j + 1;
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_route_match() {
        let m = CompiledMatcher::compile("/v1/test").unwrap();
        assert_eq!(m.matches("/v1/test"), Some(HashMap::new()));
        assert_eq!(m.matches("/v1/tes"), None);
        assert_eq!(m.matches("/v1/test/kkk"), None);
    }

    #[test]
    fn dynamic_route_capture() {
        let m = CompiledMatcher::compile("/v1/{test}/test").unwrap();
        assert_eq!(m.matches("/v1/test"), None);
        let caps = m.matches("/v1/aaa/test").unwrap();
        assert_eq!(caps.get("test").map(String::as_str), Some("aaa"));
    }

    #[test]
    fn regex_constrained_capture() {
        let m = CompiledMatcher::compile("/v1/{value:[1-9]+}/test").unwrap();
        let caps = m.matches("/v1/1234/test").unwrap();
        assert_eq!(caps.get("value").map(String::as_str), Some("1234"));
        assert_eq!(m.matches("/v1/12a4/test"), None);
    }

    #[test]
    fn regex_with_quantifier_braces() {
        let m = CompiledMatcher::compile("/v1/{value:[0-9]{2,4}}/test").unwrap();
        assert!(m.matches("/v1/12/test").is_some());
        assert!(m.matches("/v1/1/test").is_none());
    }

    #[test]
    fn must_start_with_slash() {
        assert!(matches!(
            CompiledMatcher::compile("v1/test"),
            Err(TemplateError::MustStartWithSlash(_))
        ));
    }

    #[test]
    fn unmatched_brace_is_template_error() {
        assert!(CompiledMatcher::compile("/v1/{oops").is_err());
        assert!(CompiledMatcher::compile("/v1/oops}").is_err());
    }

    #[test]
    fn invalid_variable_name_rejected() {
        assert!(CompiledMatcher::compile("/v1/{1bad}").is_err());
    }

    #[test]
    fn percent_encoding_round_trips_literals_and_decodes_captures() {
        let m = CompiledMatcher::compile("/v1/a b/{name}").unwrap();
        let caps = m.matches("/v1/a%20b/hello%20world").unwrap();
        assert_eq!(caps.get("name").map(String::as_str), Some("hello world"));
    }
}
