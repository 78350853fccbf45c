use std::fmt;
use std::ops::Index;

use indexmap::IndexMap;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

static NULL: QueryValue = QueryValue::Null;

/// A decoded query-string value
///
/// The container cases own their children by value; the grammar cannot
/// produce cycles. Missing subscripts yield [`QueryValue::Null`] instead
/// of failing, so deep lookups chain without intermediate checks:
///
/// ```rust,ignore
/// let q = QueryParser::parse("user[name]=alice");
/// assert_eq!(q["user"]["name"].as_str(), Some("alice"));
/// assert!(q["user"]["missing"]["deeper"].is_null());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    /// Ordered sequence, produced by `name[]=...` keys
    Array(Vec<QueryValue>),
    /// String-keyed mapping preserving first-insertion order
    Dict(IndexMap<String, QueryValue>),
}

impl QueryValue {
    /// Coerce a decoded string into the most specific scalar
    ///
    /// Priority is integer, then float, then boolean (exactly `true` or
    /// `false`), then string.
    pub fn coerce(s: &str) -> QueryValue {
        if let Ok(i) = s.parse::<i64>() {
            return QueryValue::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return QueryValue::Double(f);
        }
        match s {
            "true" => QueryValue::Bool(true),
            "false" => QueryValue::Bool(false),
            _ => QueryValue::Str(s.to_string()),
        }
    }

    /// Keyed access; `Null` on any miss or when self is not a dictionary
    pub fn get(&self, key: &str) -> &QueryValue {
        match *self {
            QueryValue::Dict(ref map) => map.get(key).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    /// Indexed access; `Null` out of range or when self is not an array
    pub fn at(&self, index: usize) -> &QueryValue {
        match *self {
            QueryValue::Array(ref items) => items.get(index).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(*self, QueryValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            QueryValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            QueryValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match *self {
            QueryValue::Double(v) => Some(v),
            QueryValue::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            QueryValue::Str(ref v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[QueryValue]> {
        match *self {
            QueryValue::Array(ref items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&IndexMap<String, QueryValue>> {
        match *self {
            QueryValue::Dict(ref map) => Some(map),
            _ => None,
        }
    }

    /// Serialise back to `application/x-www-form-urlencoded`
    ///
    /// Inverse of parsing for structures whose arrays hold only scalars;
    /// `Null` leaves produce no pair.
    pub fn as_query_string(&self) -> String {
        let mut pairs = Vec::new();
        match *self {
            QueryValue::Dict(ref map) => {
                for (key, value) in map.iter() {
                    value.collect_pairs(&mut pairs, encode(key));
                }
            }
            ref other => other.collect_pairs(&mut pairs, String::new()),
        }
        pairs.join("&")
    }

    fn collect_pairs(&self, pairs: &mut Vec<String>, prefix: String) {
        match *self {
            QueryValue::Null => {}
            QueryValue::Array(ref items) => {
                for item in items.iter() {
                    item.collect_pairs(pairs, format!("{}[]", prefix));
                }
            }
            QueryValue::Dict(ref map) => {
                for (key, value) in map.iter() {
                    value.collect_pairs(pairs,
                        format!("{}[{}]", prefix, encode(key)));
                }
            }
            ref scalar => {
                pairs.push(format!("{}={}", prefix, scalar));
            }
        }
    }
}

fn encode(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            QueryValue::Null => Ok(()),
            QueryValue::Bool(v) => write!(f, "{}", v),
            QueryValue::Int(v) => write!(f, "{}", v),
            // {:?} keeps a trailing `.0` so the value re-parses as a float
            QueryValue::Double(v) => write!(f, "{:?}", v),
            QueryValue::Str(ref v) => write!(f, "{}", encode(v)),
            QueryValue::Array(..) | QueryValue::Dict(..) => {
                write!(f, "{}", self.as_query_string())
            }
        }
    }
}

impl<'a> Index<&'a str> for QueryValue {
    type Output = QueryValue;
    fn index(&self, key: &'a str) -> &QueryValue {
        self.get(key)
    }
}

impl Index<usize> for QueryValue {
    type Output = QueryValue;
    fn index(&self, index: usize) -> &QueryValue {
        self.at(index)
    }
}
