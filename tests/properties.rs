//! Property-based tests for the tokenizer, parser and spinner.

use proptest::prelude::*;
use rand::{SeedableRng, rngs::StdRng};
use spintax::{Spintax, tokenize};

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '{' | '}' | '[' | ']' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inputs dense in template syntax.
fn template_like() -> impl Strategy<Value = String> {
    "[ab{}|:\\[\\]0-2\\\\]{0,24}"
}

proptest! {
    #[test]
    fn lexer_never_panics(input in ".*") {
        let _ = tokenize(&input);
    }

    #[test]
    fn token_spans_cover_input(input in template_like()) {
        if let Ok(tokens) = tokenize(&input) {
            let mut offset = 0;
            for token in &tokens {
                prop_assert_eq!(token.offset, offset);
                prop_assert_eq!(&input[token.offset..token.offset + token.literal.len()], token.literal);
                offset += token.literal.len();
            }
            prop_assert_eq!(offset, input.len());
        }
    }

    #[test]
    fn escaped_text_spins_to_itself(text in ".*") {
        let spintax = Spintax::compile(&escape(&text)).expect("escaped text compiles");
        prop_assert_eq!(spintax.spin().expect("no variables to resolve"), text);
    }

    #[test]
    fn plain_text_spins_to_itself(text in "[^{}\\[|\\\\]*") {
        let spintax = Spintax::compile(&text).expect("plain text compiles");
        prop_assert_eq!(spintax.spin().expect("no variables to resolve"), text);
    }

    #[test]
    fn canonical_form_reparses_to_same_tree(input in template_like()) {
        if let Ok(spintax) = Spintax::compile(&input) {
            let rendered = spintax.root().to_string();
            let reparsed = Spintax::compile(&rendered).expect("canonical form compiles");
            prop_assert_eq!(reparsed.root(), spintax.root());
        }
    }

    #[test]
    fn picker_output_is_one_alternative(
        alternatives in prop::collection::vec("[a-z]{0,5}", 1..6),
        seed in any::<u64>(),
    ) {
        let template = format!("{{{}}}", alternatives.join("|"));
        let spintax = Spintax::compile(&template).expect("picker compiles");
        let mut rng = StdRng::seed_from_u64(seed);
        let out = spintax.spin_with(&mut rng).expect("no variables to resolve");
        prop_assert!(alternatives.contains(&out));
    }
}
