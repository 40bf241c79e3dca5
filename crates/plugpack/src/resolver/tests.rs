//! Tests for module resolution

use std::fs;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use super::*;

fn write(root: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
    path
}

fn canonical(path: PathBuf) -> PathBuf {
    path.canonicalize().unwrap()
}

#[test]
fn test_specifier_kinds() {
    assert_eq!(SpecifierKind::of("./util"), SpecifierKind::Relative);
    assert_eq!(SpecifierKind::of("../shared/util"), SpecifierKind::Relative);
    assert_eq!(SpecifierKind::of(".."), SpecifierKind::Relative);
    assert_eq!(SpecifierKind::of("/opt/lib.js"), SpecifierKind::Absolute);
    assert_eq!(SpecifierKind::of("lodash"), SpecifierKind::Bare);
    assert_eq!(SpecifierKind::of("@scope/pkg/sub"), SpecifierKind::Bare);
}

#[test]
fn test_package_specifier_parsing() {
    assert_eq!(
        PackageSpecifier::parse("lodash/fp/map"),
        Some(PackageSpecifier {
            name: "lodash",
            subpath: Some("fp/map"),
        })
    );
    assert_eq!(
        PackageSpecifier::parse("@scope/pkg"),
        Some(PackageSpecifier {
            name: "@scope/pkg",
            subpath: None,
        })
    );
    assert_eq!(
        PackageSpecifier::parse("@scope/pkg/deep/file"),
        Some(PackageSpecifier {
            name: "@scope/pkg",
            subpath: Some("deep/file"),
        })
    );
    assert_eq!(PackageSpecifier::parse("@scope"), None);
}

#[test]
fn test_relative_import_infers_extension() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "src/index.ts", "");
    let util = write(temp.path(), "src/util.ts", "");

    let mut resolver = ModuleResolver::default();
    assert_eq!(resolver.resolve("./util", &entry), Some(canonical(util.clone())));
    assert_eq!(resolver.resolve("./util.ts", &entry), Some(canonical(util)));
}

#[test]
fn test_extension_order_prefers_typescript() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "index.js", "");
    let ts = write(temp.path(), "shared.ts", "");
    write(temp.path(), "shared.js", "");

    let mut resolver = ModuleResolver::default();
    assert_eq!(resolver.resolve("./shared", &entry), Some(canonical(ts)));
}

#[test]
fn test_directory_import_uses_index() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "index.js", "");
    let index = write(temp.path(), "components/index.tsx", "");

    let mut resolver = ModuleResolver::default();
    assert_eq!(resolver.resolve("./components", &entry), Some(canonical(index)));
}

#[test]
fn test_bare_import_uses_package_main() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "plugin/src/index.js", "");
    write(
        temp.path(),
        "plugin/node_modules/left-pad/package.json",
        &json!({ "name": "left-pad", "main": "lib/pad.js" }).to_string(),
    );
    let main = write(temp.path(), "plugin/node_modules/left-pad/lib/pad.js", "");

    let mut resolver = ModuleResolver::default();
    assert_eq!(resolver.resolve("left-pad", &entry), Some(canonical(main)));
}

#[test]
fn test_module_field_wins_over_main() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "index.js", "");
    write(
        temp.path(),
        "node_modules/dual/package.json",
        &json!({ "main": "cjs.js", "module": "esm.js" }).to_string(),
    );
    write(temp.path(), "node_modules/dual/cjs.js", "");
    let esm = write(temp.path(), "node_modules/dual/esm.js", "");

    let mut resolver = ModuleResolver::default();
    assert_eq!(resolver.resolve("dual", &entry), Some(canonical(esm)));
}

#[test]
fn test_exports_map_with_conditions_and_subpaths() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "index.js", "");
    write(
        temp.path(),
        "node_modules/@scope/kit/package.json",
        &json!({
            "main": "ignored.js",
            "exports": {
                ".": { "require": "./dist/index.cjs", "import": "./dist/index.mjs" },
                "./helpers": "./dist/helpers.js"
            }
        })
        .to_string(),
    );
    let root = write(temp.path(), "node_modules/@scope/kit/dist/index.mjs", "");
    let helpers = write(temp.path(), "node_modules/@scope/kit/dist/helpers.js", "");

    let mut resolver = ModuleResolver::default();
    assert_eq!(resolver.resolve("@scope/kit", &entry), Some(canonical(root)));
    assert_eq!(
        resolver.resolve("@scope/kit/helpers", &entry),
        Some(canonical(helpers))
    );
}

#[test]
fn test_nearest_node_modules_wins() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "plugin/src/index.js", "");
    write(temp.path(), "node_modules/util/index.js", "");
    let nearer = write(temp.path(), "plugin/node_modules/util/index.js", "");

    let mut resolver = ModuleResolver::default();
    assert_eq!(resolver.resolve("util", &entry), Some(canonical(nearer)));
}

#[test]
fn test_missing_module_is_none() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "index.js", "");

    let mut resolver = ModuleResolver::default();
    assert_eq!(resolver.resolve("./missing", &entry), None);
    assert_eq!(resolver.resolve("not-installed-anywhere-xyz", &entry), None);
}

#[test]
fn test_entry_resolution_accepts_exact_paths() {
    let temp = TempDir::new().unwrap();
    let entry = write(temp.path(), "src/index.ts", "");

    let mut resolver = ModuleResolver::default();
    assert_eq!(
        resolver.resolve_entry(&temp.path().join("src/index.ts")),
        Some(canonical(entry))
    );
    assert_eq!(resolver.resolve_entry(&temp.path().join("src/nope.ts")), None);
}
