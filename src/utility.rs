//! Small cross-cutting helpers shared by the lifecycle modules.
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

fn counts() -> &'static Mutex<HashMap<&'static str, (u64, u64)>> {
    static COUNTS: OnceLock<Mutex<HashMap<&'static str, (u64, u64)>>> = OnceLock::new();
    COUNTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Tracks created/freed counts for a named object kind. Held as a field (conventionally named
/// `_counter`) on any type whose refcount-conservation we want to assert in tests, replacing the
/// original's manual `referenceCount` + magic-sentinel idiom.
pub struct ObjectCounter {
    kind: &'static str,
}

impl ObjectCounter {
    pub fn new(kind: &'static str) -> Self {
        let mut map = counts().lock().unwrap();
        map.entry(kind).or_insert((0, 0)).0 += 1;
        Self { kind }
    }
}

impl Drop for ObjectCounter {
    fn drop(&mut self) {
        let mut map = counts().lock().unwrap();
        map.entry(self.kind).or_insert((0, 0)).1 += 1;
    }
}

/// Returns `(created, freed)` for a given object kind. Intended for test assertions.
pub fn object_counts(kind: &'static str) -> (u64, u64) {
    counts().lock().unwrap().get(kind).copied().unwrap_or((0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_and_freed_are_conserved() {
        let kind = "ObjectCounter::tests::created_and_freed_are_conserved";
        let (c0, f0) = object_counts(kind);
        {
            let _a = ObjectCounter::new(kind);
            let _b = ObjectCounter::new(kind);
            let (c1, f1) = object_counts(kind);
            assert_eq!(c1, c0 + 2);
            assert_eq!(f1, f0);
        }
        let (c2, f2) = object_counts(kind);
        assert_eq!(c2, c0 + 2);
        assert_eq!(f2, f0 + 2);
    }
}
