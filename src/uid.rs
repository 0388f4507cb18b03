//! serialVersionUID lookup (JOSS 6.4.2 serialVersionUID).
//!
//! There is no class to reflect on, so UIDs either come from the caller or
//! from this registry. `with_known()` preloads JDK classes that show up in
//! hand-crafted streams all the time.

use crate::FastHashMap;

/// Maps `Class.getName()`-form class names to their serialVersionUID.
#[derive(Debug, Default)]
pub struct UidRegistry {
    uids: FastHashMap<String, i64>,
}

impl UidRegistry {
    /// An empty registry; every descriptor must then carry an explicit uid.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preloaded with well-known JDK serialVersionUIDs.
    pub fn with_known() -> Self {
        let mut registry = Self::new();
        for (name, uid) in KNOWN_UIDS {
            registry.register(name, *uid);
        }
        registry
    }

    pub fn register(&mut self, name: &str, uid: i64) {
        self.uids.insert(name.to_string(), uid);
    }

    pub fn lookup(&self, name: &str) -> Option<i64> {
        self.uids.get(name).copied()
    }
}

/// Stable since their first serializable release; values as published by
/// `serialver`.
const KNOWN_UIDS: &[(&str, i64)] = &[
    ("java.util.HashMap", 362498820763181265),
    ("java.util.Hashtable", 1421746759512286392),
    ("java.util.LinkedHashMap", 3801124242820219131),
    ("java.util.ArrayList", 8683452581122892189),
    ("java.util.LinkedList", 876323262645176354),
    ("java.util.HashSet", -5024744406713321676),
    ("java.net.URL", -7627629688361524110),
    ("java.lang.reflect.Proxy", -2222568056686623797),
    ("java.lang.Number", -8742448824652078965),
    ("java.lang.Integer", 1360826667806852920),
    ("java.lang.Long", 4290774380558885855),
    ("java.lang.Short", 7515723908773894738),
    ("java.lang.Byte", -7183698231559129828),
    ("java.lang.Boolean", -3665804199014368530),
    ("java.lang.Character", 3786198910865385080),
    ("java.lang.Float", -2671257302660747028),
    ("java.lang.Double", -9172774392245257468),
];
