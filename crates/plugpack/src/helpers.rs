//! Runtime helpers referenced as `babelHelpers.<name>` by lowered code
//!
//! A bundle carries the helpers its modules reference, plus the helpers
//! those call, as one `babelHelpers` object declared ahead of the module
//! factories. Helper bodies are plain ES5 and call each other through the
//! object at run time.

use indexmap::IndexSet;

#[derive(Debug)]
pub struct Helper {
    pub name: &'static str,
    /// Other helpers this one calls
    pub requires: &'static [&'static str],
    pub source: &'static str,
}

/// Every helper a bundle can carry, in output order
pub const HELPERS: &[Helper] = &[
    Helper {
        name: "toPrimitive",
        requires: &[],
        source: r#"function (input, hint) {
		if (typeof input !== "object" || input === null) return input;
		var convert = typeof Symbol === "function" ? input[Symbol.toPrimitive] : void 0;
		if (convert !== void 0) {
			var result = convert.call(input, hint || "default");
			if (typeof result !== "object") return result;
			throw new TypeError("@@toPrimitive must return a primitive value.");
		}
		return (hint === "string" ? String : Number)(input);
	}"#,
    },
    Helper {
        name: "toPropertyKey",
        requires: &["toPrimitive"],
        source: r#"function (argument) {
		var key = babelHelpers.toPrimitive(argument, "string");
		return typeof key === "symbol" ? key : String(key);
	}"#,
    },
    Helper {
        name: "defineProperty",
        requires: &["toPropertyKey"],
        source: r#"function (target, key, value) {
		key = babelHelpers.toPropertyKey(key);
		if (key in target) {
			Object.defineProperty(target, key, { value: value, enumerable: true, configurable: true, writable: true });
		} else {
			target[key] = value;
		}
		return target;
	}"#,
    },
    Helper {
        name: "classCallCheck",
        requires: &[],
        source: r#"function (instance, Constructor) {
		if (!(instance instanceof Constructor)) throw new TypeError("Cannot call a class as a function");
	}"#,
    },
    Helper {
        name: "defineProperties",
        requires: &["toPropertyKey"],
        source: r#"function (target, descriptors) {
		for (var i = 0; i < descriptors.length; i++) {
			var descriptor = descriptors[i];
			descriptor.enumerable = false;
			descriptor.configurable = true;
			if ("value" in descriptor) descriptor.writable = true;
			Object.defineProperty(target, babelHelpers.toPropertyKey(descriptor.key), descriptor);
		}
	}"#,
    },
    Helper {
        name: "createClass",
        requires: &["defineProperties"],
        source: r#"function (Constructor, protoProps, staticProps) {
		if (protoProps) babelHelpers.defineProperties(Constructor.prototype, protoProps);
		if (staticProps) babelHelpers.defineProperties(Constructor, staticProps);
		Object.defineProperty(Constructor, "prototype", { writable: false });
		return Constructor;
	}"#,
    },
    Helper {
        name: "setPrototypeOf",
        requires: &[],
        source: r#"function (target, proto) {
		if (Object.setPrototypeOf) return Object.setPrototypeOf(target, proto);
		target.__proto__ = proto;
		return target;
	}"#,
    },
    Helper {
        name: "getPrototypeOf",
        requires: &[],
        source: r#"function (target) {
		return Object.getPrototypeOf ? Object.getPrototypeOf(target) : target.__proto__;
	}"#,
    },
    Helper {
        name: "inherits",
        requires: &["setPrototypeOf"],
        source: r#"function (subClass, superClass) {
		if (typeof superClass !== "function" && superClass !== null) {
			throw new TypeError("Super expression must either be null or a function");
		}
		subClass.prototype = Object.create(superClass && superClass.prototype, {
			constructor: { value: subClass, writable: true, configurable: true }
		});
		Object.defineProperty(subClass, "prototype", { writable: false });
		if (superClass) babelHelpers.setPrototypeOf(subClass, superClass);
	}"#,
    },
    Helper {
        name: "assertThisInitialized",
        requires: &[],
        source: r#"function (self) {
		if (self === void 0) throw new ReferenceError("this hasn't been initialised - super() hasn't been called");
		return self;
	}"#,
    },
    Helper {
        name: "possibleConstructorReturn",
        requires: &["assertThisInitialized"],
        source: r#"function (self, result) {
		if (result && (typeof result === "object" || typeof result === "function")) return result;
		if (result !== void 0) throw new TypeError("Derived constructors may only return object or undefined");
		return babelHelpers.assertThisInitialized(self);
	}"#,
    },
    Helper {
        name: "callSuper",
        requires: &["getPrototypeOf", "possibleConstructorReturn"],
        source: r#"function (self, Derived, args) {
		var Parent = babelHelpers.getPrototypeOf(Derived);
		var result = typeof Reflect !== "undefined" && Reflect.construct
			? Reflect.construct(Parent, args || [], babelHelpers.getPrototypeOf(self).constructor)
			: Parent.apply(self, args);
		return babelHelpers.possibleConstructorReturn(self, result);
	}"#,
    },
    Helper {
        name: "superGet",
        requires: &["getPrototypeOf"],
        source: r#"function (home, property, receiver) {
		var base = babelHelpers.getPrototypeOf(home);
		while (base !== null && !Object.prototype.hasOwnProperty.call(base, property)) {
			base = babelHelpers.getPrototypeOf(base);
		}
		if (base === null) return void 0;
		var descriptor = Object.getOwnPropertyDescriptor(base, property);
		return descriptor.get ? descriptor.get.call(receiver) : descriptor.value;
	}"#,
    },
    Helper {
        name: "superPropGet",
        requires: &["superGet"],
        source: r#"function (classArg, property, receiver, flags) {
		var value = babelHelpers.superGet(flags & 1 ? classArg.prototype : classArg, property, receiver);
		return flags & 2 && typeof value === "function" ? function (args) { return value.apply(receiver, args); } : value;
	}"#,
    },
    Helper {
        name: "checkPrivateRedeclaration",
        requires: &[],
        source: r#"function (object, privateCollection) {
		if (privateCollection.has(object)) throw new TypeError("Cannot initialize the same private elements twice on an object");
	}"#,
    },
    Helper {
        name: "classPrivateFieldInitSpec",
        requires: &["checkPrivateRedeclaration"],
        source: r#"function (object, privateMap, value) {
		babelHelpers.checkPrivateRedeclaration(object, privateMap);
		privateMap.set(object, value);
	}"#,
    },
    Helper {
        name: "classPrivateMethodInitSpec",
        requires: &["checkPrivateRedeclaration"],
        source: r#"function (object, privateSet) {
		babelHelpers.checkPrivateRedeclaration(object, privateSet);
		privateSet.add(object);
	}"#,
    },
    Helper {
        name: "assertClassBrand",
        requires: &[],
        source: r#"function (brand, receiver, value) {
		if (typeof brand === "function" ? brand === receiver : brand.has(receiver)) {
			return arguments.length < 3 ? receiver : value;
		}
		throw new TypeError("Private element is not present on this object");
	}"#,
    },
    Helper {
        name: "classPrivateFieldGet2",
        requires: &["assertClassBrand"],
        source: r#"function (privateMap, receiver) {
		return privateMap.get(babelHelpers.assertClassBrand(privateMap, receiver));
	}"#,
    },
    Helper {
        name: "classPrivateFieldSet2",
        requires: &["assertClassBrand"],
        source: r#"function (privateMap, receiver, value) {
		privateMap.set(babelHelpers.assertClassBrand(privateMap, receiver), value);
		return value;
	}"#,
    },
    Helper {
        name: "classPrivateGetter",
        requires: &["assertClassBrand"],
        source: r#"function (brand, receiver, getter) {
		return getter(babelHelpers.assertClassBrand(brand, receiver));
	}"#,
    },
    Helper {
        name: "classPrivateSetter",
        requires: &["assertClassBrand"],
        source: r#"function (brand, setter, receiver, value) {
		setter(babelHelpers.assertClassBrand(brand, receiver), value);
		return value;
	}"#,
    },
    Helper {
        name: "toSetter",
        requires: &[],
        source: r#"function (fn, args, thisArg) {
		if (!args) args = [];
		var index = args.length++;
		return Object.defineProperty({}, "_", {
			set: function (value) {
				args[index] = value;
				fn.apply(thisArg, args);
			}
		});
	}"#,
    },
    Helper {
        name: "checkInRHS",
        requires: &[],
        source: r#"function (value) {
		if (Object(value) !== value) {
			throw new TypeError("right-hand side of 'in' should be an object, got " + (value !== null ? typeof value : "null"));
		}
		return value;
	}"#,
    },
    Helper {
        name: "readOnlyError",
        requires: &[],
        source: r#"function (name) {
		throw new TypeError("\"" + name + "\" is read-only");
	}"#,
    },
    Helper {
        name: "writeOnlyError",
        requires: &[],
        source: r#"function (name) {
		throw new TypeError("\"" + name + "\" is write-only");
	}"#,
    },
];

fn find(name: &str) -> Option<&'static Helper> {
    HELPERS.iter().find(|helper| helper.name == name)
}

/// Whether a bundle can provide `babelHelpers.<name>`
pub fn is_known(name: &str) -> bool {
    find(name).is_some()
}

/// Render the `babelHelpers` declaration for `used` and everything it
/// calls, or `None` when nothing is used. Unknown names are skipped.
pub fn render(used: &IndexSet<String>) -> Option<String> {
    let mut needed: IndexSet<&'static str> = IndexSet::new();
    let mut pending: Vec<&'static Helper> = used.iter().filter_map(|name| find(name)).collect();
    while let Some(helper) = pending.pop() {
        if needed.insert(helper.name) {
            pending.extend(helper.requires.iter().filter_map(|name| find(name)));
        }
    }
    if needed.is_empty() {
        return None;
    }

    let mut rendered = String::from("var babelHelpers = {\n");
    for helper in HELPERS.iter().filter(|helper| needed.contains(helper.name)) {
        rendered.push('\t');
        rendered.push_str(helper.name);
        rendered.push_str(": ");
        rendered.push_str(helper.source);
        rendered.push_str(",\n");
    }
    rendered.push_str("};\n");
    Some(rendered)
}
