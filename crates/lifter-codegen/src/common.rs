use sha2::{Digest, Sha256};

use crate::merge::MergeFn;

/// Convert a spec name to PascalCase ("shopping_cart" -> "ShoppingCart",
/// "add-item" -> "AddItem").
pub fn to_pascal_case(s: &str) -> String {
    s.split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(c) => {
                    let mut result = c.to_uppercase().to_string();
                    result.extend(chars);
                    result
                }
                None => String::new(),
            }
        })
        .collect()
}

const RUST_KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "else", "enum", "extern", "false", "fn", "for",
    "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref", "return",
    "self", "static", "struct", "super", "trait", "true", "type", "unsafe", "use", "where",
    "while", "async", "await", "dyn",
];

/// A valid Rust field identifier for a spec name ("add-item" -> "add_item").
pub fn to_field_ident(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if RUST_KEYWORDS.contains(&out.as_str()) {
        out.insert_str(0, "r#");
    }
    out
}

/// Rust type used for a lattice in rendered scaffolds.
pub fn rust_type(f: &MergeFn) -> String {
    match f {
        MergeFn::VectorSum => "BTreeMap<String, u64>".into(),
        MergeFn::PnVectorSum => "PnCounter".into(),
        MergeFn::FieldVectorSum { .. } => "BTreeMap<String, PnCounter>".into(),
        MergeFn::SetUnion | MergeFn::GeneratorSet { .. } => "BTreeSet<String>".into(),
        MergeFn::ObservedRemoveSet => "OrSet".into(),
        MergeFn::LwwRegister => "Option<(u64, String, String)>".into(),
        MergeFn::MaxRegister => "u64".into(),
        MergeFn::TokenMax => "(u64, Option<String>)".into(),
        MergeFn::GraphUnion => "Graph".into(),
        MergeFn::FlagOr => "bool".into(),
        MergeFn::StateJoin { machine, .. } => format!("{}State", to_pascal_case(machine)),
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
