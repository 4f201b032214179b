//! Annotation tag grammar
//!
//! A tag is a whitespace-separated list of `key:value` entries:
//! - `key:token` -> bare value, runs until the next whitespace
//! - `key:'scoped value'` -> quoted scope, may contain whitespace
//!
//! Inside a scope, `:'` opens a nested scope and the matching `'` closes
//! it, so values can themselves be tags: `a:'b:'c:'d'''` has `a` =
//! `b:'c:'d''`. A backslash escapes the next character (`\'` is a literal
//! quote). Values are returned exactly as written between the outer
//! delimiters; nested scopes and escapes are kept so the value can be
//! scanned again one level down. Use [`unescape`] on leaf values.

use std::borrow::Cow;

use indexmap::IndexMap;

use crate::error::{PaveError, Result};

/// Default scope delimiter
pub const DEFAULT_DELIMITER: char = '\'';

const ESCAPE: char = '\\';
const KEY_VALUE_SEPARATOR: char = ':';

/// Scan state inside a quoted scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeState {
    Normal,
    Escaped,
}

/// Single `key:value` entry borrowed from the scanned tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagEntry<'a> {
    pub key: &'a str,
    pub value: &'a str,
    /// True when the value was written inside a delimiter scope
    pub quoted: bool,
}

/// Left-to-right scanner over the top-level entries of a tag
///
/// Yields entries in declaration order. After the first error the
/// scanner is exhausted.
#[derive(Debug, Clone)]
pub struct TagScanner<'a> {
    tag: &'a str,
    pos: usize,
    delimiter: char,
    failed: bool,
}

impl<'a> TagScanner<'a> {
    pub fn new(tag: &'a str) -> Self {
        Self {
            tag,
            pos: 0,
            delimiter: DEFAULT_DELIMITER,
            failed: false,
        }
    }

    /// Use a different scope delimiter
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.tag[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    /// Read `key:` starting at the current position
    fn read_key(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let rest = &self.tag[start..];

        for (i, ch) in rest.char_indices() {
            if ch == KEY_VALUE_SEPARATOR {
                if i == 0 {
                    return Err(PaveError::ExpectedKey {
                        offset: start,
                        found: token_at(rest).to_string(),
                    });
                }
                self.pos = start + i + ch.len_utf8();
                return Ok(&rest[..i]);
            }
            if ch.is_whitespace() {
                return Err(PaveError::ExpectedKey {
                    offset: start,
                    found: rest[..i].to_string(),
                });
            }
        }

        Err(PaveError::ExpectedKey {
            offset: start,
            found: rest.to_string(),
        })
    }

    /// Find the delimiter closing the scope whose content starts at `start`
    ///
    /// Returns the byte offset of the closing delimiter.
    fn find_scope_end(&self, key: &str, start: usize) -> Result<usize> {
        let mut state = ScopeState::Normal;
        let mut depth = 0usize;
        let mut chars = self.tag[start..].char_indices().peekable();

        while let Some((i, ch)) = chars.next() {
            match state {
                ScopeState::Escaped => state = ScopeState::Normal,
                ScopeState::Normal => {
                    if ch == ESCAPE {
                        state = ScopeState::Escaped;
                    } else if ch == KEY_VALUE_SEPARATOR
                        && chars.peek().map(|&(_, next)| next) == Some(self.delimiter)
                    {
                        chars.next();
                        depth += 1;
                    } else if ch == self.delimiter {
                        if depth == 0 {
                            return Ok(start + i);
                        }
                        depth -= 1;
                    }
                }
            }
        }

        Err(PaveError::UnterminatedScope {
            key: key.to_string(),
            offset: start.saturating_sub(self.delimiter.len_utf8()),
        })
    }

    fn read_entry(&mut self) -> Result<TagEntry<'a>> {
        let key = self.read_key()?;
        let rest = &self.tag[self.pos..];

        match rest.chars().next() {
            None => Err(PaveError::MissingValue {
                key: key.to_string(),
            }),
            Some(ch) if ch.is_whitespace() => Err(PaveError::MissingValue {
                key: key.to_string(),
            }),
            Some(ch) if ch == self.delimiter => {
                let content_start = self.pos + ch.len_utf8();
                let end = self.find_scope_end(key, content_start)?;
                self.pos = end + self.delimiter.len_utf8();
                Ok(TagEntry {
                    key,
                    value: &self.tag[content_start..end],
                    quoted: true,
                })
            }
            Some(_) => {
                let value = token_at(rest);
                self.pos += value.len();
                Ok(TagEntry {
                    key,
                    value,
                    quoted: false,
                })
            }
        }
    }
}

impl<'a> Iterator for TagScanner<'a> {
    type Item = Result<TagEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.skip_whitespace();
        if self.pos >= self.tag.len() {
            return None;
        }

        let entry = self.read_entry();
        if entry.is_err() {
            self.failed = true;
        }
        Some(entry)
    }
}

/// Leading run of non-whitespace characters
fn token_at(s: &str) -> &str {
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    &s[..end]
}
/// Value of the `key` entry in `tag`
/// Value of the first `key` entry in `tag`
///
/// Returns `Ok(None)` when the key is absent, which callers treat as
/// "not configured" rather than a failure.
///
/// ```
/// assert_eq!(pave::tag::sub_value("a:'b:'c:'d'''", "a").unwrap(), Some("b:'c:'d''"));
/// ```
pub fn sub_value<'a>(tag: &'a str, key: &str) -> Result<Option<&'a str>> {
    sub_value_with(tag, key, DEFAULT_DELIMITER)
}

/// [`sub_value`] with an explicit scope delimiter
///
/// The whole tag is validated, so a repeated key or a malformed later
/// entry fails exactly as in [`all_sub_values`].
pub fn sub_value_with<'a>(tag: &'a str, key: &str, delimiter: char) -> Result<Option<&'a str>> {
    Ok(all_sub_values_with(tag, &[], delimiter)?.get(key).copied())
}

/// All top-level entries of `tag` except `excludes`, in declaration order
///
/// Excluded entries are still scanned so the position stays consistent,
/// and a malformed excluded value still fails the whole tag.
pub fn all_sub_values<'a>(tag: &'a str, excludes: &[&str]) -> Result<IndexMap<&'a str, &'a str>> {
    all_sub_values_with(tag, excludes, DEFAULT_DELIMITER)
}

/// [`all_sub_values`] with an explicit scope delimiter
pub fn all_sub_values_with<'a>(
    tag: &'a str,
    excludes: &[&str],
    delimiter: char,
) -> Result<IndexMap<&'a str, &'a str>> {
    let mut values = IndexMap::new();

    for entry in TagScanner::new(tag).with_delimiter(delimiter) {
        let entry = entry?;
        if excludes.contains(&entry.key) {
            continue;
        }
        if values.insert(entry.key, entry.value).is_some() {
            return Err(PaveError::DuplicateKey {
                key: entry.key.to_string(),
            });
        }
    }

    Ok(values)
}

/// Strip one level of escaping from a leaf value (`\'` -> `'`, `\\` -> `\`)
pub fn unescape(value: &str, delimiter: char) -> Cow<'_, str> {
    if !value.contains(ESCAPE) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == ESCAPE {
            if let Some(&next) = chars.peek() {
                if next == delimiter || next == ESCAPE {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    Cow::Owned(out)
}
