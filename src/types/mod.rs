mod consts;
pub use consts::*;

mod error;
pub use error::*;

use rustc_hash::FxHashMap;

/// Hash map keyed with a fast non-cryptographic hasher, used wherever lookup
/// speed matters more than iteration order (e.g. domain-size lookups).
pub type FxMap<K, V> = FxHashMap<K, V>;

/// Ordered, fast-hashed set, used wherever both membership and a stable
/// iteration order are required (e.g. a clique's variable scope).
pub type FxIndexSet<T> = indexmap::IndexSet<T, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

/// Ordered, fast-hashed map, used wherever both lookup and a stable
/// iteration order are required.
pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;
