//! Name-conflict helpers for the overwrite / rename / skip choice
//!
//! The queue itself only obeys the per-batch `overwrite` flag. These helpers let the
//! caller find which names collide and propose free alternatives before enqueueing.

use crate::Result;
use crate::command::CommandClient;

/// Names from `names` that already exist in `dir` on the device.
///
/// FAT names are case-insensitive, so `song.xml` conflicts with `SONG.XML`.
pub async fn find_conflicts(client: &CommandClient, dir: &str, names: &[String]) -> Result<Vec<String>> {
    let existing: Vec<String> = client.list_dir(dir).await?.into_iter().map(|e| e.name).collect();
    Ok(names.iter().filter(|name| contains_name(&existing, name)).cloned().collect())
}

/// A variant of `name` not present in `existing`: `SONG.XML`, then `SONG 2.XML`, `SONG 3.XML`, ...
pub fn unique_name(existing: &[String], name: &str) -> String {
    if !contains_name(existing, name) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    (2u32..)
        .map(|n| format!("{stem} {n}{ext}"))
        .find(|candidate| !contains_name(existing, candidate))
        .unwrap_or_else(|| name.to_string())
}

fn contains_name(existing: &[String], name: &str) -> bool {
    existing.iter().any(|e| e.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unique_name_skips_taken_suffixes() {
        let existing = names(&["SONG.XML", "song 2.xml", "KIT.XML"]);
        assert_eq!(unique_name(&existing, "SONG.XML"), "SONG 3.XML");
        assert_eq!(unique_name(&existing, "NEW.XML"), "NEW.XML");
        assert_eq!(unique_name(&names(&["README"]), "README"), "README 2");
        assert_eq!(unique_name(&names(&[".hidden"]), ".hidden"), ".hidden 2");
    }
}
