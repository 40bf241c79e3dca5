//! Load built artifacts in node and check what they export
//!
//! The evaluation test requires `node` on `$PATH` and is skipped otherwise.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use plugpack::{BundleOptions, bundle};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;

const HARNESS: &str = r#"const fs = require("fs");
globalThis.vendetta = { metro: { findByProps: function (name) { return "found:" + name; } } };
const plugin = (0, eval)(fs.readFileSync(process.argv[2], "utf8"));
process.stdout.write(JSON.stringify({
  esModule: plugin.__esModule === true,
  run: plugin.run(),
  onLoad: plugin.default(),
  loud: plugin.loud("hi"),
  add: plugin.add(2, 3),
  pi: plugin.PI,
  report: plugin.report(),
}));
"#;

fn write(root: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
    path
}

/// A plugin touching every export form, a CommonJS dependency, an import
/// cycle, class lowering and loop closures
fn write_plugin(root: &Path) -> PathBuf {
    write(
        root,
        "greeting.js",
        "export default function greet(name) { return \"hello \" + name; }\nexport const shout = (s) => s.toUpperCase() + \"!\";\n",
    );
    write(root, "math.js", "export const add = (x, y) => x + y;\nexport const PI = 3;\n");
    write(
        root,
        "legacy.js",
        "module.exports = { name: \"legacy\", pad: function (s) { return \"[\" + s + \"]\"; } };\n",
    );
    write(
        root,
        "b.js",
        "import { a } from \"./index\";\nexport function b() { return a; }\n",
    );
    write(
        root,
        "counter.js",
        r#"class Base {
  speak() { return "base"; }
}
export class Counter {
  count = 0;
  static created = 0;
  constructor(step) { this.step = step; Counter.created++; }
  increment() { this.count += this.step; }
}
export class Loud extends Base {
  speak() { return super.speak().toUpperCase(); }
}
"#,
    );
    write(
        root,
        "loops.js",
        "export function makeClosures() {\n  const fns = [];\n  for (let i = 0; i < 3; i++) {\n    fns.push(() => i);\n  }\n  return fns;\n}\n",
    );
    write(
        root,
        "index.js",
        r#"import { b } from "./b";
import greet from "./greeting";
import * as math from "./math";
import legacy from "./legacy";
import { pad } from "./legacy";
import { Counter, Loud } from "./counter";
import { makeClosures } from "./loops";
import { findByProps } from "@vendetta/metro";

export const a = "A";
export function run() { return b(); }
export { shout as loud } from "./greeting";
export * from "./math";
export default function onLoad() { return greet("world"); }
export function report() {
  const counter = new Counter(2);
  counter.increment();
  return {
    sum: math.add(1, 2),
    legacy: legacy.name,
    pad: pad("x"),
    counter: counter.count,
    created: Counter.created,
    loud: new Loud().speak(),
    closures: makeClosures().map((f) => f()),
    metro: findByProps("ping"),
  };
}
"#,
    )
}

fn node_available() -> bool {
    which::which("node").is_ok()
}

fn evaluate(root: &Path, code: &str) -> Value {
    let artifact = write(root, "out/artifact.js", code);
    let harness = write(root, "out/harness.js", HARNESS);
    let output = Command::new("node").arg(&harness).arg(&artifact).output().unwrap();
    assert!(
        output.status.success(),
        "artifact failed to load: {}\n{code}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_artifact_is_plain_es5_module_closure() {
    let temp = TempDir::new().unwrap();
    let entry = write_plugin(temp.path());
    let options = BundleOptions {
        minify: false,
        ..BundleOptions::default()
    };

    let output = bundle(&entry, &options).unwrap();
    for construct in [
        "class Base",
        "class Counter",
        "class Loud",
        "let ",
        "const ",
        "=>",
        "import ",
        "@oxc-project",
    ] {
        assert!(!output.code.contains(construct), "found {construct:?} in {}", output.code);
    }
    assert!(!output.code.contains("var b = __import"), "got: {}", output.code);
    assert_eq!(output.modules.len(), 7);
}

#[test]
fn test_artifact_exports_evaluate() {
    if !node_available() {
        eprintln!("SKIP: node not found on $PATH");
        return;
    }
    let temp = TempDir::new().unwrap();
    let entry = write_plugin(temp.path());

    for minify in [false, true] {
        let options = BundleOptions {
            minify,
            ..BundleOptions::default()
        };
        let output = bundle(&entry, &options).unwrap();
        let result = evaluate(temp.path(), &output.code);
        assert_eq!(
            result,
            json!({
                "esModule": true,
                "run": "A",
                "onLoad": "hello world",
                "loud": "HI!",
                "add": 5,
                "pi": 3,
                "report": {
                    "sum": 3,
                    "legacy": "legacy",
                    "pad": "[x]",
                    "counter": 2,
                    "created": 1,
                    "loud": "BASE",
                    "closures": [0, 1, 2],
                    "metro": "found:ping",
                },
            }),
            "minify: {minify}"
        );
    }
}
