//! Hash registry - canonical byte representations of argument values
//!
//! Every value canonicalizes to a self-delimiting byte string: a one-byte
//! marker followed by a length-prefixed payload. Containers canonicalize their
//! children through the registry, so a custom canonicalizer applies wherever its
//! type appears. Unordered containers ([`Value::Map`], [`Value::Set`]) sort
//! their canonicalized entries.
//!
//! Registrations may happen at any time and concurrently with lookups. The last
//! registration for a tag wins.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::debug;

use crate::error::HashError;
use crate::file::File;
use crate::value::{TypeTag, Value};

/// A canonicalizer for one type tag
pub type Canonicalizer = Arc<dyn Fn(&Value) -> Result<Vec<u8>, HashError> + Send + Sync>;

const NULL: u8 = 0x00;
const BOOL: u8 = 0x01;
const INT: u8 = 0x02;
const FLOAT: u8 = 0x03;
const STR: u8 = 0x04;
const BYTES: u8 = 0x05;
const LIST: u8 = 0x06;
const MAP: u8 = 0x07;
const SET: u8 = 0x08;
const CUSTOM: u8 = 0x09;
const STRUCTURAL: u8 = 0x0a;

static GLOBAL: OnceLock<Arc<HashRegistry>> = OnceLock::new();

/// Registry of per-type canonicalizers
pub struct HashRegistry {
    canonicalizers: RwLock<HashMap<TypeTag, Canonicalizer>>,
}

impl HashRegistry {
    /// Create a registry with the built-in canonicalizers ([`File`] by URL)
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_object::<File, _>(File::TYPE_TAG, |file| {
            file.url().as_bytes().to_vec()
        });
        registry
    }

    /// Create a registry with no custom canonicalizers
    pub fn empty() -> Self {
        Self {
            canonicalizers: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry
    pub fn global() -> Arc<HashRegistry> {
        GLOBAL.get_or_init(|| Arc::new(HashRegistry::new())).clone()
    }

    /// Install `canonicalizer` for `tag`, replacing any earlier registration
    pub fn register<F>(&self, tag: TypeTag, canonicalizer: F)
    where
        F: Fn(&Value) -> Result<Vec<u8>, HashError> + Send + Sync + 'static,
    {
        let previous = self
            .canonicalizers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag, Arc::new(canonicalizer));
        debug!(type_tag = %tag, replaced = previous.is_some(), "registered canonicalizer");
    }

    /// Install a canonicalizer for a concrete [`crate::ArgObject`] type
    pub fn register_object<T, F>(&self, tag: TypeTag, canonicalizer: F)
    where
        T: crate::value::ArgObject,
        F: Fn(&T) -> Vec<u8> + Send + Sync + 'static,
    {
        self.register(tag, move |value| {
            value
                .downcast_ref::<T>()
                .map(&canonicalizer)
                .ok_or_else(|| HashError::Canonicalizer {
                    type_tag: tag,
                    message: format!("value is not a {}", std::any::type_name::<T>()),
                })
        });
    }

    /// Whether a custom canonicalizer is registered for `tag`
    pub fn contains(&self, tag: TypeTag) -> bool {
        self.lookup(tag).is_some()
    }

    /// Canonical bytes for `value`
    pub fn canonicalize(&self, value: &Value) -> Result<Vec<u8>, HashError> {
        let tag = value.type_tag();
        if let Some(canonicalizer) = self.lookup(tag) {
            let bytes = canonicalizer(value)?;
            let mut out = vec![CUSTOM];
            push_framed(&mut out, tag.as_str().as_bytes());
            push_framed(&mut out, &bytes);
            return Ok(out);
        }
        self.structural(value)
    }

    fn lookup(&self, tag: TypeTag) -> Option<Canonicalizer> {
        self.canonicalizers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tag)
            .cloned()
    }

    fn structural(&self, value: &Value) -> Result<Vec<u8>, HashError> {
        let mut out = Vec::new();
        match value {
            Value::Null => out.push(NULL),
            Value::Bool(b) => {
                out.push(BOOL);
                out.push(u8::from(*b));
            }
            Value::Int(i) => {
                out.push(INT);
                out.extend_from_slice(&i.to_be_bytes());
            }
            Value::Float(f) => {
                out.push(FLOAT);
                out.extend_from_slice(&canonical_float_bits(*f).to_be_bytes());
            }
            Value::Str(s) => {
                out.push(STR);
                push_framed(&mut out, s.as_bytes());
            }
            Value::Bytes(b) => {
                out.push(BYTES);
                push_framed(&mut out, b);
            }
            Value::List(items) => {
                out.push(LIST);
                push_len(&mut out, items.len());
                for item in items {
                    push_framed(&mut out, &self.canonicalize(item)?);
                }
            }
            Value::Map(pairs) => {
                let mut entries = pairs
                    .iter()
                    .map(|(k, v)| Ok((self.canonicalize(k)?, self.canonicalize(v)?)))
                    .collect::<Result<Vec<_>, HashError>>()?;
                // Duplicate keys: the last pair wins, as in an insert-ordered map
                entries.reverse();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                entries.dedup_by(|a, b| a.0 == b.0);
                out.push(MAP);
                push_len(&mut out, entries.len());
                for (k, v) in entries {
                    push_framed(&mut out, &k);
                    push_framed(&mut out, &v);
                }
            }
            Value::Set(items) => {
                let mut entries = items
                    .iter()
                    .map(|item| self.canonicalize(item))
                    .collect::<Result<Vec<_>, HashError>>()?;
                entries.sort();
                entries.dedup();
                out.push(SET);
                push_len(&mut out, entries.len());
                for entry in entries {
                    push_framed(&mut out, &entry);
                }
            }
            Value::Object(obj) => {
                let inner = obj.structural().ok_or(HashError::UnsupportedType {
                    type_tag: obj.type_tag(),
                })?;
                out.push(STRUCTURAL);
                push_framed(&mut out, obj.type_tag().as_str().as_bytes());
                push_framed(&mut out, &self.canonicalize(&inner)?);
            }
        }
        Ok(out)
    }
}

impl Default for HashRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HashRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self
            .canonicalizers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut tags: Vec<_> = map.keys().map(TypeTag::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("HashRegistry").field("tags", &tags).finish()
    }
}

/// -0.0 equals 0.0 and every NaN is the same value
fn canonical_float_bits(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else if f == 0.0 {
        0
    } else {
        f.to_bits()
    }
}

pub(crate) fn push_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_be_bytes());
}

pub(crate) fn push_framed(out: &mut Vec<u8>, bytes: &[u8]) {
    push_len(out, bytes.len());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ArgObject;
    use std::any::Any;

    #[derive(Debug)]
    struct Socket;

    impl ArgObject for Socket {
        fn type_tag(&self) -> TypeTag {
            TypeTag::new("test.socket")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct Point(i64, i64);

    impl ArgObject for Point {
        fn type_tag(&self) -> TypeTag {
            TypeTag::new("test.point")
        }

        fn structural(&self) -> Option<Value> {
            Some(Value::List(vec![Value::Int(self.0), Value::Int(self.1)]))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_primitives_are_distinct() {
        let registry = HashRegistry::empty();
        let int = registry.canonicalize(&Value::Int(1)).unwrap();
        let float = registry.canonicalize(&Value::Float(1.0)).unwrap();
        let string = registry.canonicalize(&Value::from("1")).unwrap();
        let boolean = registry.canonicalize(&Value::Bool(true)).unwrap();
        assert_ne!(int, float);
        assert_ne!(int, string);
        assert_ne!(int, boolean);
    }

    #[test]
    fn test_list_framing_is_unambiguous() {
        let registry = HashRegistry::empty();
        let a = registry
            .canonicalize(&Value::from(vec!["ab", "c"]))
            .unwrap();
        let b = registry
            .canonicalize(&Value::from(vec!["a", "bc"]))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_list_order_matters() {
        let registry = HashRegistry::empty();
        let a = registry.canonicalize(&Value::from(vec![1, 2])).unwrap();
        let b = registry.canonicalize(&Value::from(vec![2, 1])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_map_order_does_not_matter() {
        let registry = HashRegistry::empty();
        let a = Value::Map(vec![
            (Value::from("a"), Value::Int(1)),
            (Value::from("b"), Value::Int(2)),
        ]);
        let b = Value::Map(vec![
            (Value::from("b"), Value::Int(2)),
            (Value::from("a"), Value::Int(1)),
        ]);
        assert_eq!(
            registry.canonicalize(&a).unwrap(),
            registry.canonicalize(&b).unwrap()
        );
    }

    #[test]
    fn test_map_duplicate_key_last_wins() {
        let registry = HashRegistry::empty();
        let map = |pairs: &[i64]| {
            Value::Map(
                pairs
                    .iter()
                    .map(|v| (Value::from("a"), Value::Int(*v)))
                    .collect(),
            )
        };
        let canon = |v: Value| registry.canonicalize(&v).unwrap();

        assert_eq!(canon(map(&[2, 1])), canon(map(&[1])));
        assert_eq!(canon(map(&[1, 2])), canon(map(&[2])));
        assert_ne!(canon(map(&[2, 1])), canon(map(&[1, 2])));
    }

    #[test]
    fn test_set_order_does_not_matter() {
        let registry = HashRegistry::empty();
        let a = Value::Set(vec![Value::Int(3), Value::from("x"), Value::Int(1)]);
        let b = Value::Set(vec![Value::Int(1), Value::Int(3), Value::from("x")]);
        assert_eq!(
            registry.canonicalize(&a).unwrap(),
            registry.canonicalize(&b).unwrap()
        );
    }

    #[test]
    fn test_float_normalization() {
        let registry = HashRegistry::empty();
        assert_eq!(
            registry.canonicalize(&Value::Float(0.0)).unwrap(),
            registry.canonicalize(&Value::Float(-0.0)).unwrap()
        );
        assert_eq!(
            registry.canonicalize(&Value::Float(f64::NAN)).unwrap(),
            registry.canonicalize(&Value::Float(-f64::NAN)).unwrap()
        );
    }

    #[test]
    fn test_unsupported_object() {
        let registry = HashRegistry::empty();
        let err = registry.canonicalize(&Value::object(Socket)).unwrap_err();
        assert_eq!(
            err,
            HashError::UnsupportedType {
                type_tag: TypeTag::new("test.socket")
            }
        );

        // Nested inside a container it still fails rather than being skipped
        let nested = Value::List(vec![Value::Int(1), Value::object(Socket)]);
        assert!(registry.canonicalize(&nested).is_err());
    }

    #[test]
    fn test_structural_object() {
        let registry = HashRegistry::empty();
        let a = registry.canonicalize(&Value::object(Point(1, 2))).unwrap();
        let b = registry.canonicalize(&Value::object(Point(1, 2))).unwrap();
        let c = registry.canonicalize(&Value::object(Point(2, 1))).unwrap();
        let list = registry.canonicalize(&Value::from(vec![1, 2])).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, list);
    }

    #[test]
    fn test_register_makes_unsupported_type_hashable() {
        let registry = HashRegistry::empty();
        registry.register(TypeTag::new("test.socket"), |_| Ok(b"socket".to_vec()));
        assert!(registry.contains(TypeTag::new("test.socket")));
        assert!(registry.canonicalize(&Value::object(Socket)).is_ok());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = HashRegistry::empty();
        registry.register_object::<Point, _>(TypeTag::new("test.point"), |p| {
            p.0.to_be_bytes().to_vec()
        });
        let first = registry.canonicalize(&Value::object(Point(1, 2))).unwrap();
        assert_eq!(
            first,
            registry.canonicalize(&Value::object(Point(1, 99))).unwrap()
        );

        registry.register_object::<Point, _>(TypeTag::new("test.point"), |p| {
            p.1.to_be_bytes().to_vec()
        });
        let second = registry.canonicalize(&Value::object(Point(1, 2))).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            second,
            registry.canonicalize(&Value::object(Point(77, 2))).unwrap()
        );
    }

    #[test]
    fn test_override_primitive_tag() {
        let registry = HashRegistry::empty();
        registry.register(TypeTag::STR, |v| Ok(v.render().to_lowercase().into_bytes()));
        assert_eq!(
            registry.canonicalize(&Value::from("ABC")).unwrap(),
            registry.canonicalize(&Value::from("abc")).unwrap()
        );
    }

    #[test]
    fn test_file_identity_is_url() {
        let registry = HashRegistry::new();
        let a = File::parse("file:///tmp/out.txt");
        let b = File::parse("file:///tmp/out.txt").with_local_path("/elsewhere/out.txt");
        let c = File::parse("file:///tmp/other.txt");
        assert_eq!(
            registry.canonicalize(&a.into()).unwrap(),
            registry.canonicalize(&b.into()).unwrap()
        );
        assert_ne!(
            registry.canonicalize(&File::parse("file:///tmp/out.txt").into()).unwrap(),
            registry.canonicalize(&c.into()).unwrap()
        );
    }

    #[test]
    fn test_custom_canonicalizer_applies_inside_containers() {
        let registry = HashRegistry::new();
        let a = Value::List(vec![File::parse("/tmp/a").into()]);
        let b = Value::List(vec![File::parse("/tmp/a").with_local_path("/x").into()]);
        assert_eq!(
            registry.canonicalize(&a).unwrap(),
            registry.canonicalize(&b).unwrap()
        );
    }

    #[test]
    fn test_concurrent_register_and_lookup() {
        let registry = Arc::new(HashRegistry::empty());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if i % 2 == 0 {
                            registry.register(TypeTag::new("test.socket"), |_| Ok(vec![1]));
                        } else {
                            let _ = registry.canonicalize(&Value::object(Socket));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.canonicalize(&Value::object(Socket)).is_ok());
    }

    #[test]
    fn test_global_is_shared() {
        let a = HashRegistry::global();
        let b = HashRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.contains(File::TYPE_TAG));
    }
}
