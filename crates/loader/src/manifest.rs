// Copyright 2018-2026 the Zipline authors. MIT license.
//! The application manifest: a content-addressed, dependency-ordered graph
//! of modules (spec §4.6). Grounded on the shape of Deno's module graph
//! (`cli/module_loader.rs`) and its content hashing (`cli/checksum.rs`),
//! adapted here to `sha2`/`hex` per the ambient stack.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LoaderError;

/// One module's entry in the manifest, keyed by id in [`Manifest::modules`]
/// — the id is the map key, not a duplicated field, matching the literal
/// wire shape `{ "modules": { "<id>": { "url", "sha256", "dependsOnIds" } } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
  pub url: String,
  pub sha256: String,
  #[serde(rename = "dependsOnIds", default)]
  pub depends_on_ids: Vec<String>,
}

/// The manifest for one version of an application: a module map plus the
/// dependency edges used to compute load order. Manifests compare equal
/// only when their module maps are identical, which is what "continuous
/// mode" (spec §4.6) uses to decide whether a re-fetched manifest is
/// actually new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
  pub modules: HashMap<String, ModuleDescriptor>,
}

impl Manifest {
  pub fn parse(url: &str, bytes: &[u8]) -> Result<Self, LoaderError> {
    serde_json::from_slice(bytes).map_err(|source| LoaderError::ManifestParse {
      url: url.to_string(),
      source,
    })
  }

  /// A topological order over `modules` honoring `dependsOnIds`, so a
  /// module is never received before everything it depends on. Returns
  /// `InvalidGraph` for an unknown dependency id or a cycle.
  pub fn load_order(&self) -> Result<Vec<(&str, &ModuleDescriptor)>, LoaderError> {
    for (id, module) in &self.modules {
      for dep in &module.depends_on_ids {
        if !self.modules.contains_key(dep) {
          return Err(LoaderError::InvalidGraph(format!(
            "module {id:?} depends on unknown module {dep:?}"
          )));
        }
      }
    }

    let mut order = Vec::with_capacity(self.modules.len());
    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_progress: HashSet<&str> = HashSet::new();

    fn visit<'a>(
      id: &'a str,
      modules: &'a HashMap<String, ModuleDescriptor>,
      visited: &mut HashSet<&'a str>,
      in_progress: &mut HashSet<&'a str>,
      order: &mut Vec<(&'a str, &'a ModuleDescriptor)>,
    ) -> Result<(), LoaderError> {
      if visited.contains(id) {
        return Ok(());
      }
      if !in_progress.insert(id) {
        return Err(LoaderError::InvalidGraph(format!("dependency cycle through module {id:?}")));
      }
      let module = &modules[id];
      for dep in &module.depends_on_ids {
        visit(dep, modules, visited, in_progress, order)?;
      }
      in_progress.remove(id);
      visited.insert(id);
      order.push((id, module));
      Ok(())
    }

    // Iterate in a stable order so load order is deterministic across runs
    // for a fixed manifest, even though `modules` is a `HashMap`.
    let mut ids: Vec<&str> = self.modules.keys().map(String::as_str).collect();
    ids.sort_unstable();
    for id in ids {
      visit(id, &self.modules, &mut visited, &mut in_progress, &mut order)?;
    }
    Ok(order)
  }
}

/// Lowercase hex sha256 of `bytes`, the digest compared against a module's
/// declared `sha256` after download (spec §4.6 "content addressing").
pub fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn module(deps: &[&str]) -> ModuleDescriptor {
    ModuleDescriptor {
      url: "https://example.com/m.js".to_string(),
      sha256: "deadbeef".to_string(),
      depends_on_ids: deps.iter().map(|s| s.to_string()).collect(),
    }
  }

  fn manifest(entries: Vec<(&str, &[&str])>) -> Manifest {
    Manifest {
      modules: entries.into_iter().map(|(id, deps)| (id.to_string(), module(deps))).collect(),
    }
  }

  #[test]
  fn parses_the_literal_wire_format() {
    let json = br#"{
      "modules": {
        "bravo": {"url": "https://example.com/bravo.js", "sha256": "aa", "dependsOnIds": ["alpha"]},
        "alpha": {"url": "https://example.com/alpha.js", "sha256": "bb"}
      }
    }"#;
    let manifest = Manifest::parse("https://example.com/app.manifest.zipline.json", json).unwrap();
    assert_eq!(manifest.modules.len(), 2);
    assert_eq!(manifest.modules["bravo"].depends_on_ids, vec!["alpha".to_string()]);
    assert!(manifest.modules["alpha"].depends_on_ids.is_empty());
  }

  #[test]
  fn load_order_respects_dependencies() {
    let manifest = manifest(vec![
      ("app", &["kotlin-stdlib", "shared"]),
      ("shared", &["kotlin-stdlib"]),
      ("kotlin-stdlib", &[]),
    ]);
    let order: Vec<&str> = manifest.load_order().unwrap().into_iter().map(|(id, _)| id).collect();
    assert_eq!(order, vec!["kotlin-stdlib", "shared", "app"]);
  }

  #[test]
  fn load_order_detects_cycles() {
    let manifest = manifest(vec![("a", &["b"]), ("b", &["a"])]);
    assert!(matches!(manifest.load_order(), Err(LoaderError::InvalidGraph(_))));
  }

  #[test]
  fn load_order_detects_unknown_dependency() {
    let manifest = manifest(vec![("a", &["missing"])]);
    assert!(matches!(manifest.load_order(), Err(LoaderError::InvalidGraph(_))));
  }

  #[test]
  fn manifests_with_the_same_modules_compare_structurally_equal() {
    let a = manifest(vec![("app", &[])]);
    let b = manifest(vec![("app", &[])]);
    assert_eq!(a, b);
  }

  #[test]
  fn sha256_hex_is_stable() {
    assert_eq!(
      sha256_hex(b"hello world"),
      "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde"
    );
  }
}
