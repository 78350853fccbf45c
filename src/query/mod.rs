//! Structured parsing of `application/x-www-form-urlencoded` input
//!
//! Flat `key=value` pairs are materialised into a tree of
//! [`QueryValue`](enum.QueryValue.html)s: `a[b]=1` nests a dictionary,
//! `a[]=1&a[]=2` builds an ordered array, and the two compose to any
//! depth (`a[b][]=1`).

mod value;

pub use self::value::QueryValue;

use std::ops::Index;

use indexmap::IndexMap;
use percent_encoding::percent_decode_str;

/// Parser for query strings and form-encoded bodies
pub struct QueryParser;

/// The result of one bracket-grammar step on a key
///
/// For `b[d][]` this is head `b`, subscript `d` and continuation `[]`.
struct KeyMatch<'a> {
    head: &'a str,
    subscript: &'a str,
    continuation: &'a str,
}

fn plain(c: char) -> bool {
    !matches!(c, '[' | ']' | ',' | '.') && !c.is_whitespace()
}

/// Leftmost match of `head[subscript]` where both parts contain no
/// brackets, commas, dots or whitespace
fn match_brackets(key: &str) -> Option<KeyMatch> {
    let mut search = 0;
    while let Some(rel) = key[search..].find('[') {
        let open = search + rel;
        let close = match key[open + 1..].find(']') {
            Some(rel2) => open + 1 + rel2,
            // no closing bracket after this one means no later
            // candidate can close either
            None => return None,
        };
        let subscript = &key[open + 1..close];
        if subscript.chars().all(plain) {
            let head_start = key[..open].char_indices().rev()
                .take_while(|&(_, c)| plain(c))
                .last()
                .map(|(idx, _)| idx)
                .unwrap_or(open);
            return Some(KeyMatch {
                head: &key[head_start..open],
                subscript: subscript,
                continuation: &key[close + 1..],
            });
        }
        search = open + 1;
    }
    None
}

fn decode(raw: &str) -> Option<String> {
    percent_decode_str(raw).decode_utf8().ok()
        .map(|cow| {
            cow.trim_matches(|c| c == ' ' || c == '"' || c == '\n')
                .to_string()
        })
}

/// Make the slot a dictionary, preserving it when it already is one
fn ensure_dict(slot: &mut QueryValue)
    -> &mut IndexMap<String, QueryValue>
{
    if !matches!(*slot, QueryValue::Dict(..)) {
        *slot = QueryValue::Dict(IndexMap::new());
    }
    match *slot {
        QueryValue::Dict(ref mut map) => map,
        _ => unreachable!(),
    }
}

/// The slot at `root[name]`, creating a `Null` placeholder on first use
fn dict_entry<'x>(root: &'x mut QueryValue, name: &str)
    -> &'x mut QueryValue
{
    ensure_dict(root)
        .entry(name.to_string())
        .or_insert(QueryValue::Null)
}

/// Append to the array at `root[name]`, replacing non-array occupants
fn array_append(root: &mut QueryValue, name: &str, value: QueryValue) {
    let slot = dict_entry(root, name);
    if !matches!(*slot, QueryValue::Array(..)) {
        *slot = QueryValue::Array(Vec::new());
    }
    if let QueryValue::Array(ref mut items) = *slot {
        items.push(value);
    }
}

fn insert(root: &mut QueryValue, key: &str, value: QueryValue) {
    match match_brackets(key) {
        Some(ref m) if !m.continuation.is_empty() => {
            // descend one level; the subscript becomes the head of the
            // remaining key
            let child = dict_entry(root, m.head);
            let rest = format!("{}{}", m.subscript, m.continuation);
            insert(child, &rest, value);
        }
        Some(ref m) if m.subscript.is_empty() => {
            array_append(root, m.head, value);
        }
        Some(ref m) => {
            let child = dict_entry(root, m.head);
            ensure_dict(child).insert(m.subscript.to_string(), value);
        }
        None if !key.is_empty() => {
            ensure_dict(root).insert(key.to_string(), value);
        }
        None => {
            match *root {
                QueryValue::Array(ref mut items) => items.push(value),
                ref mut other => *other = value,
            }
        }
    }
}

impl QueryParser {
    /// Parse a query string (without the leading `?`)
    ///
    /// Pairs that are not exactly `key=value`, or whose halves do not
    /// percent-decode, are silently dropped. Decoded halves are trimmed
    /// of spaces, double quotes and newlines, and values go through
    /// [`QueryValue::coerce`](enum.QueryValue.html#method.coerce).
    pub fn parse(query: &str) -> QueryValue {
        let mut root = QueryValue::Dict(IndexMap::new());
        for pair in query.split('&') {
            let mut halves = pair.split('=');
            let raw_key = match halves.next() {
                Some(k) => k,
                None => continue,
            };
            let raw_value = match halves.next() {
                Some(v) => v,
                None => continue,
            };
            if halves.next().is_some() {
                continue;
            }
            let key = match decode(raw_key) {
                Some(k) => k,
                None => continue,
            };
            let value = match decode(raw_value) {
                Some(v) => v,
                None => continue,
            };
            insert(&mut root, &key, QueryValue::coerce(&value));
        }
        root
    }
}

/// Parsed query parameters with never-failing subscript access
///
/// A thin owner around the root [`QueryValue`](enum.QueryValue.html),
/// which is always a dictionary for non-degenerate input.
#[derive(Debug)]
pub struct QueryParameters {
    root: QueryValue,
}

impl QueryParameters {
    pub fn from(query: &str) -> QueryParameters {
        QueryParameters {
            root: QueryParser::parse(query),
        }
    }

    pub fn root(&self) -> &QueryValue {
        &self.root
    }
}

impl<'a> Index<&'a str> for QueryParameters {
    type Output = QueryValue;
    fn index(&self, key: &'a str) -> &QueryValue {
        self.root.get(key)
    }
}

impl Index<usize> for QueryParameters {
    type Output = QueryValue;
    fn index(&self, index: usize) -> &QueryValue {
        self.root.at(index)
    }
}
