//! Argument values passed to task invocations

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Stable name identifying the type of an argument value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeTag(&'static str);

impl TypeTag {
    pub const NULL: TypeTag = TypeTag("null");
    pub const BOOL: TypeTag = TypeTag("bool");
    pub const INT: TypeTag = TypeTag("int");
    pub const FLOAT: TypeTag = TypeTag("float");
    pub const STR: TypeTag = TypeTag("str");
    pub const BYTES: TypeTag = TypeTag("bytes");
    pub const LIST: TypeTag = TypeTag("list");
    pub const MAP: TypeTag = TypeTag("map");
    pub const SET: TypeTag = TypeTag("set");

    /// Create a tag from a stable name
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The tag's name
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A user-defined argument type.
///
/// Its identity comes from a canonicalizer registered for [`ArgObject::type_tag`]
/// or, failing that, from [`ArgObject::structural`].
pub trait ArgObject: Any + Send + Sync + fmt::Debug {
    /// Tag the hash registry dispatches on
    fn type_tag(&self) -> TypeTag;

    /// Structural form used when no canonicalizer is registered.
    ///
    /// `None` means the type has no deterministic representation.
    fn structural(&self) -> Option<Value> {
        None
    }

    /// Text substituted into command templates
    fn render(&self) -> String {
        format!("{:?}", self)
    }

    fn as_any(&self) -> &dyn Any;
}

/// A dynamically typed argument
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Ordered sequence
    List(Vec<Value>),
    /// Unordered key/value pairs; identity does not depend on their order
    Map(Vec<(Value, Value)>),
    /// Unordered collection; identity does not depend on element order
    Set(Vec<Value>),
    Object(Arc<dyn ArgObject>),
}

impl Value {
    /// Wrap a user-defined argument
    pub fn object<T: ArgObject>(value: T) -> Self {
        Self::Object(Arc::new(value))
    }

    /// Tag of this value's runtime type
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Null => TypeTag::NULL,
            Self::Bool(_) => TypeTag::BOOL,
            Self::Int(_) => TypeTag::INT,
            Self::Float(_) => TypeTag::FLOAT,
            Self::Str(_) => TypeTag::STR,
            Self::Bytes(_) => TypeTag::BYTES,
            Self::List(_) => TypeTag::LIST,
            Self::Map(_) => TypeTag::MAP,
            Self::Set(_) => TypeTag::SET,
            Self::Object(obj) => obj.type_tag(),
        }
    }

    /// Downcast an object value to a concrete type
    pub fn downcast_ref<T: ArgObject>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Text substituted into command templates
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Self::List(items) | Self::Set(items) => items
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(" "),
            Self::Map(pairs) => pairs
                .iter()
                .map(|(k, v)| format!("{}={}", k.render(), v.render()))
                .collect::<Vec<_>>()
                .join(" "),
            Self::Object(obj) => obj.render(),
        }
    }

    /// Parse a command-line argument: JSON when it parses, a plain string otherwise
    pub fn parse_cli(raw: &str) -> Self {
        serde_json::from_str::<serde_json::Value>(raw)
            .map(Self::from)
            .unwrap_or_else(|_| Self::Str(raw.to_string()))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(v: BTreeMap<String, V>) -> Self {
        Self::Map(
            v.into_iter()
                .map(|(k, v)| (Value::Str(k), v.into()))
                .collect(),
        )
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (Self::Str(k), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Handle(u32);

    impl ArgObject for Handle {
        fn type_tag(&self) -> TypeTag {
            TypeTag::new("test.handle")
        }

        fn render(&self) -> String {
            format!("handle-{}", self.0)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(Value::from(1).type_tag(), TypeTag::INT);
        assert_eq!(Value::from("x").type_tag(), TypeTag::STR);
        assert_eq!(Value::from(vec![1, 2]).type_tag(), TypeTag::LIST);
        assert_eq!(Value::object(Handle(1)).type_tag().as_str(), "test.handle");
    }

    #[test]
    fn test_downcast() {
        let value = Value::object(Handle(7));
        assert_eq!(value.downcast_ref::<Handle>().map(|h| h.0), Some(7));
        assert!(Value::Int(7).downcast_ref::<Handle>().is_none());
    }

    #[test]
    fn test_render() {
        assert_eq!(Value::from(vec!["a", "b"]).render(), "a b");
        assert_eq!(Value::Null.render(), "");
        assert_eq!(Value::object(Handle(3)).render(), "handle-3");
    }

    #[test]
    fn test_parse_cli() {
        assert!(matches!(Value::parse_cli("42"), Value::Int(42)));
        assert!(matches!(Value::parse_cli("hello"), Value::Str(ref s) if s == "hello"));
        assert!(matches!(Value::parse_cli("[1, 2]"), Value::List(ref v) if v.len() == 2));
        assert!(matches!(Value::parse_cli("{\"a\": 1}"), Value::Map(ref m) if m.len() == 1));
        assert!(matches!(Value::parse_cli("1.5"), Value::Float(f) if f == 1.5));
    }
}
