use arcstr::ArcStr;
use fxhash::FxHashMap;
use std::fmt;

/// a property value in a service or configuration dictionary
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    String(ArcStr),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::String(ArcStr::from(v))
    }
}

impl From<ArcStr> for PropValue {
    fn from(v: ArcStr) -> Self {
        PropValue::String(v)
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::String(ArcStr::from(v))
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        PropValue::Int(v as i64)
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        PropValue::Float(v)
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::String(s) => write!(f, "{s}"),
            PropValue::Int(i) => write!(f, "{i}"),
            PropValue::Float(x) => write!(f, "{x}"),
            PropValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// a dictionary of named properties attached to a service registration
/// or delivered as a configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props(FxHashMap<ArcStr, PropValue>);

impl Props {
    pub fn new() -> Self {
        Self(FxHashMap::default())
    }

    /// fluent insert, for building literal dictionaries
    pub fn with(mut self, key: impl Into<ArcStr>, value: impl Into<PropValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<ArcStr>, value: impl Into<PropValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, &PropValue)> {
        self.0.iter()
    }
}
