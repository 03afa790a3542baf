//! # Function Registry
//!
//! Static metadata about the scalar and aggregate functions the rewriter and
//! the constant evaluator know. Lookup is O(1) through a compile-time perfect
//! hash map keyed by lower-case name; aliases map to the same entry and carry
//! the canonical name the rewriter substitutes.
//!
//! | Alias | Canonical |
//! |-------|-----------|
//! | `ucase` | `upper` |
//! | `lcase` | `lower` |
//! | `substr` | `substring` |
//! | `ceil` | `ceiling` |
//! | `pow` | `power` |
//! | `len`, `char_length`, `character_length` | `length` |
//! | `cast` | `convert` |
//! | `ifnull`, `nvl` | `coalesce` |
//! | `\|\|` | `concat` |
//! | `current_timestamp` | `now` |
//! | `random` | `rand` |
//!
//! `inverse` tells the rewriter how `f(x) op c` can be solved for `x`.

use phf::phf_map;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Scalar,
    Aggregate,
}

/// How an argument of the function can be isolated in a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inverse {
    None,
    /// `x + c`: subtract.
    Add,
    /// `x - c` / `c - x`.
    Subtract,
    /// `x * c`: divide, flipping the operator for negative `c`.
    Multiply,
    /// `x / c`: multiply, flipping the operator for negative `c`.
    Divide,
    /// `convert(x, T)`: convert the constant back to the type of `x`.
    Convert,
    /// A parse function; the named format function undoes it.
    Parse(&'static str),
    /// A format function; the named parse function undoes it.
    Format(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionInfo {
    pub canonical: &'static str,
    pub kind: FunctionKind,
    pub deterministic: bool,
    pub inverse: Inverse,
}

const fn scalar(canonical: &'static str) -> FunctionInfo {
    FunctionInfo {
        canonical,
        kind: FunctionKind::Scalar,
        deterministic: true,
        inverse: Inverse::None,
    }
}

const fn invertible(canonical: &'static str, inverse: Inverse) -> FunctionInfo {
    FunctionInfo {
        canonical,
        kind: FunctionKind::Scalar,
        deterministic: true,
        inverse,
    }
}

const fn volatile(canonical: &'static str) -> FunctionInfo {
    FunctionInfo {
        canonical,
        kind: FunctionKind::Scalar,
        deterministic: false,
        inverse: Inverse::None,
    }
}

const fn aggregate(canonical: &'static str) -> FunctionInfo {
    FunctionInfo {
        canonical,
        kind: FunctionKind::Aggregate,
        deterministic: true,
        inverse: Inverse::None,
    }
}

static FUNCTIONS: phf::Map<&'static str, FunctionInfo> = phf_map! {
    "+" => invertible("+", Inverse::Add),
    "-" => invertible("-", Inverse::Subtract),
    "*" => invertible("*", Inverse::Multiply),
    "/" => invertible("/", Inverse::Divide),
    "concat" => scalar("concat"),
    "||" => scalar("concat"),
    "upper" => scalar("upper"),
    "ucase" => scalar("upper"),
    "lower" => scalar("lower"),
    "lcase" => scalar("lower"),
    "length" => scalar("length"),
    "len" => scalar("length"),
    "char_length" => scalar("length"),
    "character_length" => scalar("length"),
    "substring" => scalar("substring"),
    "substr" => scalar("substring"),
    "trim" => scalar("trim"),
    "abs" => scalar("abs"),
    "ceiling" => scalar("ceiling"),
    "ceil" => scalar("ceiling"),
    "floor" => scalar("floor"),
    "round" => scalar("round"),
    "mod" => scalar("mod"),
    "power" => scalar("power"),
    "pow" => scalar("power"),
    "sqrt" => scalar("sqrt"),
    "coalesce" => scalar("coalesce"),
    "ifnull" => scalar("coalesce"),
    "nvl" => scalar("coalesce"),
    "nullif" => scalar("nullif"),
    "convert" => invertible("convert", Inverse::Convert),
    "cast" => invertible("convert", Inverse::Convert),
    "parseinteger" => invertible("parseinteger", Inverse::Parse("formatinteger")),
    "formatinteger" => invertible("formatinteger", Inverse::Format("parseinteger")),
    "parselong" => invertible("parselong", Inverse::Parse("formatlong")),
    "formatlong" => invertible("formatlong", Inverse::Format("parselong")),
    "parsedouble" => invertible("parsedouble", Inverse::Parse("formatdouble")),
    "formatdouble" => invertible("formatdouble", Inverse::Format("parsedouble")),
    "parsedate" => invertible("parsedate", Inverse::Parse("formatdate")),
    "formatdate" => invertible("formatdate", Inverse::Format("parsedate")),
    "parsetimestamp" => invertible("parsetimestamp", Inverse::Parse("formattimestamp")),
    "formattimestamp" => invertible("formattimestamp", Inverse::Format("parsetimestamp")),
    "now" => volatile("now"),
    "current_timestamp" => volatile("now"),
    "rand" => volatile("rand"),
    "random" => volatile("rand"),
    "count" => aggregate("count"),
    "sum" => aggregate("sum"),
    "avg" => aggregate("avg"),
    "min" => aggregate("min"),
    "max" => aggregate("max"),
};

pub fn lookup(name: &str) -> Option<&'static FunctionInfo> {
    match FUNCTIONS.get(name) {
        Some(info) => Some(info),
        None => FUNCTIONS.get(name.to_ascii_lowercase().as_str()),
    }
}

/// The canonical spelling of `name`; unknown names are returned lower-cased.
pub fn canonical_name(name: &str) -> String {
    match lookup(name) {
        Some(info) => info.canonical.to_string(),
        None => name.to_ascii_lowercase(),
    }
}

pub fn is_aggregate(name: &str) -> bool {
    lookup(name).is_some_and(|info| info.kind == FunctionKind::Aggregate)
}

/// Known, deterministic and not an aggregate: may be folded over constants.
pub fn is_foldable(name: &str) -> bool {
    lookup(name).is_some_and(|info| info.deterministic && info.kind == FunctionKind::Scalar)
}

pub fn inverse(name: &str) -> Inverse {
    lookup(name).map(|info| info.inverse).unwrap_or(Inverse::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical_names() {
        assert_eq!(canonical_name("UCASE"), "upper");
        assert_eq!(canonical_name("nvl"), "coalesce");
        assert_eq!(canonical_name("cast"), "convert");
        assert_eq!(canonical_name("my_udf"), "my_udf");
    }

    #[test]
    fn classification() {
        assert!(is_aggregate("SUM"));
        assert!(!is_foldable("sum"));
        assert!(!is_foldable("rand"));
        assert!(is_foldable("+"));
        assert!(!is_foldable("unknown_function"));
    }

    #[test]
    fn parse_and_format_pair_up() {
        assert_eq!(inverse("parseinteger"), Inverse::Parse("formatinteger"));
        assert_eq!(inverse("formatdate"), Inverse::Format("parsedate"));
        assert_eq!(inverse("upper"), Inverse::None);
    }
}
