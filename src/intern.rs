use std::{collections::HashSet, sync::RwLock};

use rustc_hash::FxBuildHasher;

static MAP: RwLock<HashSet<&'static str, FxBuildHasher>> =
    RwLock::new(HashSet::with_hasher(FxBuildHasher));

/// Returns the canonical copy of `str`. Spellings live for the rest of the
/// process, which lets every pass hold identifiers as `&'static str`.
pub fn intern(str: &str) -> &'static str {
    if let Some(istr) = MAP.read().unwrap_or_else(|poison| poison.into_inner()).get(str) {
        return istr;
    }
    insert(str)
}

#[cold]
fn insert(str: &str) -> &'static str {
    let mut cache = MAP.write().unwrap_or_else(|poison| poison.into_inner());
    if let Some(istr) = cache.get(str) {
        return istr;
    }
    let istr = str.to_owned().leak();
    cache.insert(istr);
    istr
}
