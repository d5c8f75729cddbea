//! Property-based tests for document parsing, template rendering and
//! checkpoint id handling

use proptest::prelude::*;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

// =============================================================================
// Template rendering
// =============================================================================

mod template_fuzzing {
    use super::*;
    use lumen::binding::{value_to_string, Template};

    prop_compose! {
        fn arb_name()(name in r"v_[a-z0-9_]{0,15}") -> String {
            name
        }
    }

    prop_compose! {
        fn arb_scalar()(choice in 0..4u8, n in any::<i64>(), s in "[ -~]{0,30}", b in any::<bool>()) -> Value {
            match choice {
                0 => json!(n),
                1 => json!(s),
                2 => json!(b),
                _ => Value::Null,
            }
        }
    }

    prop_compose! {
        fn arb_template()(
            prefix in "[^{}]{0,20}",
            name in arb_name(),
            suffix in "[^{}]{0,20}"
        ) -> (String, String, String, String) {
            let text = format!("{}{{{{{}}}}}{}", prefix, name, suffix);
            (text, prefix, name, suffix)
        }
    }

    proptest! {
        /// Parsing arbitrary text never panics
        #[test]
        fn test_parse_never_panics(text in ".*") {
            let _ = Template::parse(&text);
        }

        /// A bound substitution renders to surrounding text plus the value text
        #[test]
        fn test_substitution_renders_value(
            (text, prefix, name, suffix) in arb_template(),
            value in arb_scalar()
        ) {
            let template = Template::parse(&text).unwrap();
            let mut vars = FxHashMap::default();
            vars.insert(name, value.clone());
            let rendered = template.render(&vars).unwrap();
            prop_assert_eq!(rendered, format!("{}{}{}", prefix, value_to_string(&value), suffix));
        }

        /// An unbound substitution is always reported, never rendered empty
        #[test]
        fn test_unbound_is_missing((text, _prefix, name, _suffix) in arb_template()) {
            let template = Template::parse(&text).unwrap();
            let err = template.render(&FxHashMap::default()).unwrap_err();
            prop_assert_eq!(err.code(), "LUMEN-020");
            prop_assert!(template.free_variables().contains(&name));
        }

        /// Text without braces is static and renders to itself
        #[test]
        fn test_plain_text_is_static(text in "[^{}]*") {
            let template = Template::parse(&text).unwrap();
            prop_assert!(template.is_static());
            prop_assert_eq!(template.render(&FxHashMap::default()).unwrap(), text);
        }
    }
}

// =============================================================================
// Document parsing
// =============================================================================

mod document_fuzzing {
    use super::*;
    use lumen::ast::{compute_hash, parse_document};

    prop_compose! {
        fn arb_header()(
            name in r"wf-[a-z0-9-]{0,20}",
            model in r"m-[a-z0-9.-]{0,20}",
            params in prop::collection::btree_set(r"p_[a-z_]{0,10}", 0..4)
        ) -> (String, Vec<String>) {
            let mut header = format!("---\nname: {}\nmodel: {}\n", name, model);
            if !params.is_empty() {
                header.push_str("input:\n  schema:\n");
                for p in &params {
                    header.push_str(&format!("    {}: string\n", p));
                }
            }
            header.push_str("---\n");
            (header, params.into_iter().collect())
        }
    }

    proptest! {
        /// Arbitrary text never panics the parser
        #[test]
        fn test_parse_document_never_panics(text in "(?s).{0,400}") {
            let _ = parse_document(&text, None);
        }

        /// Arbitrary text after a `---` fence never panics either
        #[test]
        fn test_parse_fenced_never_panics(inner in "(?s).{0,200}", body in "(?s).{0,100}") {
            let text = format!("---\n{}\n---\n{}", inner, body);
            let _ = parse_document(&text, None);
        }

        /// Generated headers parse and declare exactly their parameters
        #[test]
        fn test_generated_headers_parse(
            (header, params) in arb_header(),
            body in "[^{}`-]{0,80}"
        ) {
            let doc = parse_document(&format!("{}{}", header, body), None).unwrap();
            prop_assert!(doc.has_header);
            let declared: Vec<String> = doc.declared_parameters().into_iter().map(String::from).collect();
            prop_assert_eq!(declared, params);
        }

        /// Hashes are deterministic and fixed-width
        #[test]
        fn test_hash_is_stable(text in "(?s).{0,200}") {
            let a = compute_hash(&text);
            prop_assert_eq!(&a, &compute_hash(&text));
            prop_assert!(a.starts_with("xxh3:"));
            prop_assert_eq!(a.len(), 21);
        }
    }
}

// =============================================================================
// Checkpoint ids
// =============================================================================

mod id_fuzzing {
    use super::*;
    use lumen::checkpoint::{sanitize_id, validate_id};

    proptest! {
        /// Any workflow name sanitizes to a storable id
        #[test]
        fn test_sanitized_ids_validate(name in ".*") {
            let id = sanitize_id(&name);
            prop_assert!(validate_id(&id).is_ok(), "{:?} -> {:?}", name, id);
        }

        /// Ids with separators or parent segments are always rejected
        #[test]
        fn test_path_like_ids_rejected(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            let slash = format!("{}/{}", a, b);
            let backslash = format!("{}\\{}", a, b);
            let parent = format!("{}..{}", a, b);
            prop_assert!(validate_id(&slash).is_err());
            prop_assert!(validate_id(&backslash).is_err());
            prop_assert!(validate_id(&parent).is_err());
        }
    }
}
