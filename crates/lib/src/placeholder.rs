//! `{{ KEY }}` placeholders for values not known at build time.
//!
//! A site's environment may reference values that only exist after the rest of
//! the application is deployed (an API url, for instance). The build sees a
//! placeholder token in place of such a value, and the deployed text files get
//! the token replaced with the resolved value.
//!
//! # Format
//!
//! `{{ KEY }}` where `KEY` is `[A-Za-z_][A-Za-z0-9_]*`. Whitespace inside the
//! braces is optional. Anything else between `{{` and `}}` is left alone, so
//! template syntax in bundled files passes through unchanged.
//!
//! # Example
//!
//! ```
//! use sitestack_lib::placeholder::{parse, Segment};
//!
//! let segments = parse("const api = \"{{ API_URL }}/v1\";");
//! assert_eq!(segments, vec![
//!     Segment::Literal("const api = \"".to_string()),
//!     Segment::Placeholder("API_URL".to_string()),
//!     Segment::Literal("/v1\";".to_string()),
//! ]);
//! ```

use std::collections::BTreeMap;

use crate::bind::ValueDescriptor;

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  /// The key of a `{{ KEY }}` token.
  Placeholder(String),
}

/// Looks up placeholder values by key.
pub trait Resolver {
  fn resolve(&self, key: &str) -> Option<&str>;
}

impl Resolver for BTreeMap<String, String> {
  fn resolve(&self, key: &str) -> Option<&str> {
    self.get(key).map(String::as_str)
  }
}

/// The token written in place of an unresolved value.
pub fn token(key: &str) -> String {
  format!("{{{{ {key} }}}}")
}

fn is_key(candidate: &str) -> bool {
  let mut chars = candidate.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
    _ => false,
  }
}

/// Split text into literals and placeholder keys.
pub fn parse(input: &str) -> Vec<Segment> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut rest = input;

  while let Some(open) = rest.find("{{") {
    literal.push_str(&rest[..open]);
    let after_open = &rest[open + 2..];

    let key = after_open
      .find("}}")
      .map(|close| (close, after_open[..close].trim()))
      .filter(|(_, key)| is_key(key));

    match key {
      Some((close, key)) => {
        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Placeholder(key.to_string()));
        rest = &after_open[close + 2..];
      }
      None => {
        // Not a token; keep the braces and scan past them
        literal.push_str("{{");
        rest = after_open;
      }
    }
  }

  literal.push_str(rest);
  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }
  segments
}

/// Replace the tokens the resolver knows; leave the rest untouched.
pub fn substitute_known(input: &str, resolver: &impl Resolver) -> String {
  let mut result = String::with_capacity(input.len());
  for segment in parse(input) {
    match segment {
      Segment::Literal(s) => result.push_str(&s),
      Segment::Placeholder(key) => match resolver.resolve(&key) {
        Some(value) => result.push_str(value),
        None => result.push_str(&token(&key)),
      },
    }
  }
  result
}

/// Environment for a build command: literal values as they are, deferred
/// values as `{{ KEY }}` tokens.
pub fn build_environment(env: &BTreeMap<String, ValueDescriptor>) -> BTreeMap<String, String> {
  env
    .iter()
    .map(|(key, value)| {
      let value = match value {
        ValueDescriptor::Plain(v) => v.clone(),
        ValueDescriptor::Deferred(_) => token(key),
      };
      (key.clone(), value)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resource::Token;

  fn resolver() -> BTreeMap<String, String> {
    BTreeMap::from([
      ("API_URL".to_string(), "https://api.example.com".to_string()),
      ("STAGE".to_string(), "prod".to_string()),
    ])
  }

  #[test]
  fn token_format() {
    assert_eq!(token("API_URL"), "{{ API_URL }}");
  }

  #[test]
  fn parse_accepts_tight_and_spaced_tokens() {
    assert_eq!(
      parse("{{A}}-{{  B_2 }}"),
      vec![
        Segment::Placeholder("A".into()),
        Segment::Literal("-".into()),
        Segment::Placeholder("B_2".into()),
      ]
    );
  }

  #[test]
  fn parse_leaves_template_syntax_alone() {
    let input = "{{#each items}}{{ this.name }}{{/each}} {{ 1abc }} {{ open";
    assert_eq!(parse(input), vec![Segment::Literal(input.to_string())]);
  }

  #[test]
  fn parse_recovers_after_non_token_braces() {
    assert_eq!(
      parse("{{ x.y }}{{ STAGE }}"),
      vec![Segment::Literal("{{ x.y }}".into()), Segment::Placeholder("STAGE".into())]
    );
  }

  #[test]
  fn substitute_known_replaces_known_and_keeps_unknown_tokens() {
    assert_eq!(
      substitute_known("<a href=\"{{ API_URL }}/{{STAGE}}\">{{MISSING}}", &resolver()),
      "<a href=\"https://api.example.com/prod\">{{ MISSING }}"
    );
  }

  #[test]
  fn build_environment_tokenizes_deferred_values() {
    let env = BTreeMap::from([
      ("STAGE".to_string(), ValueDescriptor::plain("dev")),
      ("API_URL".to_string(), ValueDescriptor::Deferred(Token::new("Api", "Url"))),
    ]);
    let out = build_environment(&env);
    assert_eq!(out["STAGE"], "dev");
    assert_eq!(out["API_URL"], "{{ API_URL }}");
  }
}
