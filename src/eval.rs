use std::collections::HashMap;

use miette::{Diagnostic, Error, WrapErr};
use rand::{Rng, seq::index};
use thiserror::Error;

use crate::{
    Parser,
    parse::{Element, Expression, Node},
};

/// Nesting allowed within one spin, counting both pickers and variable
/// expansions. The limit is checked when a variable is expanded.
pub const MAX_DEPTH: usize = 256;

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum SpinError {
    #[error("undefined symbol `{symbol}`")]
    #[diagnostic(
        code(spintax::undefined_symbol),
        help("define `{symbol}` before spinning a template that refers to it")
    )]
    UndefinedSymbol { symbol: String },

    #[error("symbol `{symbol}` expands more than {depth} levels deep")]
    #[diagnostic(
        code(spintax::recursion_limit),
        help("give the definition of `{symbol}` an alternative that does not refer back to it")
    )]
    RecursionLimit { symbol: String, depth: usize },
}

/// Named expressions that `[name]` references resolve against.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Expression>,
}

impl SymbolTable {
    pub fn get(&self, name: &str) -> Option<&Expression> {
        self.symbols.get(name)
    }

    /// Insert or replace a definition, handing back the one it replaced.
    pub fn define(&mut self, name: impl Into<String>, value: Expression) -> Option<Expression> {
        self.symbols.insert(name.into(), value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    /// Parse `template` and store it under `symbol`, replacing any earlier
    /// definition. On error the table is left as it was.
    pub fn define_template(&mut self, symbol: &str, template: &str) -> Result<(), Error> {
        let value = Parser::new(Some(symbol), template)
            .parse()
            .wrap_err_with(|| format!("failed to define `{symbol}`"))?;
        if self.define(symbol, value).is_some() {
            tracing::debug!(symbol, "redefined symbol");
        } else {
            tracing::debug!(symbol, "defined symbol");
        }
        Ok(())
    }
}

/// A compiled template together with the symbols its variables refer to.
///
/// Variables are bound late: compiling `[name]` succeeds whether or not
/// `name` is defined yet, and the lookup happens on every spin. Defining a
/// symbol after compiling is therefore fine, and an undefined symbol only
/// shows up as [`SpinError::UndefinedSymbol`] from [`Spintax::spin`].
///
/// Symbol names are unescaped before lookup, so `[a\]b]` refers to the
/// symbol defined as `a]b`.
#[derive(Debug, Clone)]
pub struct Spintax {
    root: Expression,
    symbols: SymbolTable,
}

impl Spintax {
    pub fn compile(template: &str) -> Result<Self, Error> {
        Self::build(None, template, SymbolTable::default())
    }

    /// Like [`Spintax::compile`], with `filename` shown in diagnostics.
    pub fn compile_named(filename: Option<&str>, template: &str) -> Result<Self, Error> {
        Self::build(filename, template, SymbolTable::default())
    }

    /// Compile against symbols defined ahead of the template.
    pub fn compile_with(template: &str, symbols: SymbolTable) -> Result<Self, Error> {
        Self::build(None, template, symbols)
    }

    fn build(filename: Option<&str>, template: &str, symbols: SymbolTable) -> Result<Self, Error> {
        let root = Parser::new(filename, template)
            .parse()
            .wrap_err("failed to compile template")?;
        tracing::debug!(
            len = template.len(),
            symbols = symbols.len(),
            "compiled template"
        );
        Ok(Spintax { root, symbols })
    }

    /// See [`SymbolTable::define_template`].
    pub fn define(&mut self, symbol: &str, template: &str) -> Result<(), Error> {
        self.symbols.define_template(symbol, template)
    }

    pub fn spin(&self) -> Result<String, SpinError> {
        self.spin_with(&mut rand::thread_rng())
    }

    /// Spin drawing every choice from `rng`. A seeded generator gives
    /// reproducible output.
    pub fn spin_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<String, SpinError> {
        let mut spinner = Spinner {
            symbols: &self.symbols,
            rng,
            depth: 0,
            out: String::new(),
        };
        spinner.expression(&self.root)?;
        Ok(spinner.out)
    }

    pub fn root(&self) -> &Expression {
        &self.root
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }
}

struct Spinner<'a, R: ?Sized> {
    symbols: &'a SymbolTable,
    rng: &'a mut R,
    depth: usize,
    out: String,
}

impl<R: Rng + ?Sized> Spinner<'_, R> {
    fn expression(&mut self, expression: &Expression) -> Result<(), SpinError> {
        for element in &expression.elements {
            match element {
                Element::Literal(text) => self.out.push_str(text),
                Element::Nested(node) => self.node(node)?,
            }
        }
        Ok(())
    }

    fn node(&mut self, node: &Node) -> Result<(), SpinError> {
        match node {
            Node::Picker(picker) => {
                let alternatives = picker.alternatives();
                // fully shuffled: output follows selection order
                let chosen = index::sample(
                    &mut *self.rng,
                    alternatives.len(),
                    picker.count() as usize,
                );
                tracing::trace!(chosen = ?chosen, of = alternatives.len(), "picked");
                self.depth += 1;
                for i in chosen {
                    self.expression(&alternatives[i])?;
                }
                self.depth -= 1;
            }
            Node::Variable { symbol } => {
                let symbols = self.symbols;
                let Some(value) = symbols.get(symbol) else {
                    return Err(SpinError::UndefinedSymbol {
                        symbol: symbol.clone(),
                    });
                };
                if self.depth >= MAX_DEPTH {
                    return Err(SpinError::RecursionLimit {
                        symbol: symbol.clone(),
                        depth: MAX_DEPTH,
                    });
                }
                self.depth += 1;
                self.expression(value)?;
                self.depth -= 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn compile(template: &str) -> Spintax {
        match Spintax::compile(template) {
            Ok(spintax) => spintax,
            Err(e) => panic!("Failed to compile '{template}': {e:?}"),
        }
    }

    #[test]
    fn test_literal_spins_unchanged() {
        let spintax = compile("no choices here");
        assert_eq!(spintax.spin().unwrap(), "no choices here");
    }

    #[test]
    fn test_zero_count_spins_empty() {
        assert_eq!(compile("<{:0:a|b}>").spin().unwrap(), "<>");
    }

    #[test]
    fn test_full_count_is_a_permutation() {
        let spintax = compile("{:3:a|b|c}");
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = HashSet::new();
        for _ in 0..300 {
            let out = spintax.spin_with(&mut rng).unwrap();
            let mut chars: Vec<char> = out.chars().collect();
            chars.sort_unstable();
            assert_eq!(chars, vec!['a', 'b', 'c']);
            seen.insert(out);
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_multi_pick_order_is_random() {
        let spintax = compile("{:2:a|b}");
        let mut rng = StdRng::seed_from_u64(11);
        let seen: HashSet<String> = (0..200)
            .map(|_| spintax.spin_with(&mut rng).unwrap())
            .collect();
        assert_eq!(seen, HashSet::from(["ab".to_string(), "ba".to_string()]));
    }

    #[test]
    fn test_seeded_spins_repeat() {
        let spintax = compile("{a|b|c}{:2:d|e|f|g}{h|{i|j}}");
        let mut first = StdRng::seed_from_u64(42);
        let mut second = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            assert_eq!(
                spintax.spin_with(&mut first).unwrap(),
                spintax.spin_with(&mut second).unwrap()
            );
        }
    }

    #[test]
    fn test_undefined_symbol() {
        assert_eq!(
            compile("hi [missing]").spin(),
            Err(SpinError::UndefinedSymbol {
                symbol: "missing".to_string()
            })
        );
    }

    #[test]
    fn test_undefined_symbol_inside_definition() {
        let mut spintax = compile("[outer]");
        spintax.define("outer", "<[inner]>").unwrap();
        assert_eq!(
            spintax.spin(),
            Err(SpinError::UndefinedSymbol {
                symbol: "inner".to_string()
            })
        );
    }

    #[test]
    fn test_self_reference_hits_limit() {
        let mut spintax = compile("[x]");
        spintax.define("x", "[x]").unwrap();
        assert_eq!(
            spintax.spin(),
            Err(SpinError::RecursionLimit {
                symbol: "x".to_string(),
                depth: MAX_DEPTH
            })
        );
    }

    #[test]
    fn test_recursive_definition_terminates() {
        let mut spintax = compile("[x]");
        spintax.define("x", "{a|a[x]}").unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..100 {
            let out = spintax.spin_with(&mut rng).unwrap();
            assert!(!out.is_empty());
            assert!(out.chars().all(|c| c == 'a'));
        }
    }

    #[test]
    fn test_depth_resets_between_siblings() {
        let mut spintax = compile("[a][a][a]");
        spintax.define("a", "[b]").unwrap();
        spintax.define("b", "x").unwrap();
        assert_eq!(spintax.spin().unwrap(), "xxx");
    }

    #[test]
    fn test_failed_define_keeps_table() {
        let mut spintax = compile("[x]");
        spintax.define("x", "old").unwrap();
        assert!(spintax.define("x", "{broken").is_err());
        assert_eq!(spintax.spin().unwrap(), "old");
        assert_eq!(spintax.symbols().len(), 1);
    }

    #[test]
    fn test_symbol_table() {
        let mut table = SymbolTable::default();
        assert!(table.is_empty());
        assert!(table.define("a", Expression::default()).is_none());
        assert!(table.define("a", Expression::default()).is_some());
        assert!(table.contains("a"));
        assert!(!table.contains("b"));
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_nested_recursion_hits_limit() {
        let nesting = crate::parse::MAX_NESTING;
        let mut spintax = compile("[x]");
        let definition = format!("{}[x]{}", "{".repeat(nesting), "}".repeat(nesting));
        spintax.define("x", &definition).unwrap();
        assert_eq!(
            spintax.spin(),
            Err(SpinError::RecursionLimit {
                symbol: "x".to_string(),
                depth: MAX_DEPTH
            })
        );
    }

    #[test]
    fn test_define_error_names_symbol() {
        let mut spintax = compile("[x]");
        let err = spintax.define("x", "{broken").unwrap_err();
        assert_eq!(err.to_string(), "failed to define `x`");
        assert!(err.downcast_ref::<crate::parse::ParseError>().is_some());
    }

    #[test]
    fn test_escaped_symbol_name() {
        let mut spintax = compile(r"<[a\]b]>");
        spintax.define("a]b", "found").unwrap();
        assert_eq!(spintax.spin().unwrap(), "<found>");
    }

    #[test]
    fn test_spin_from_many_threads() {
        let mut spintax = compile("{:2:a|b|c} [x]");
        spintax.define("x", "{y|z}").unwrap();
        let spintax = &spintax;
        std::thread::scope(|scope| {
            for seed in 0..4 {
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    for _ in 0..200 {
                        let out = spintax.spin_with(&mut rng).unwrap();
                        let (picks, x) = out.split_once(' ').unwrap();
                        let mut picks: Vec<char> = picks.chars().collect();
                        picks.dedup();
                        assert_eq!(picks.len(), 2, "got {out:?}");
                        assert!(picks.iter().all(|c| "abc".contains(*c)), "got {out:?}");
                        assert!(x == "y" || x == "z", "got {out:?}");
                    }
                    spintax.spin().unwrap();
                });
            }
        });
    }
}
