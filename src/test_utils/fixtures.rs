//! Test fixtures for flake descriptions and revisions.

use crate::flake_ref::Rev;

/// A revision made of one repeated byte, e.g. `test_rev(0xab)` is `abab…ab`.
pub fn test_rev(byte: u8) -> Rev {
    Rev::from_bytes([byte; 20])
}

/// The text of a `flake.toml`.
///
/// The description is "The `<name>` flake" and `provides` renders
/// `{"self": <own outPath>}`.
pub fn flake_toml(name: &str, requires: &[&str], non_flake_requires: &[(&str, &str)]) -> String {
    let mut toml = format!("name = \"{name}\"\ndescription = \"The {name} flake\"\n");
    let requires: Vec<String> = requires.iter().map(|r| format!("\"{r}\"")).collect();
    toml.push_str(&format!("requires = [{}]\n", requires.join(", ")));

    toml.push_str("\n[nonFlakeRequires]\n");
    for (alias, flake_ref) in non_flake_requires {
        toml.push_str(&format!("{alias} = \"{flake_ref}\"\n"));
    }

    toml.push_str("\n[provides]\n");
    toml.push_str(&format!("lambda = '{{\"self\": \"{{{{ {name}.outPath }}}}\"}}'\n"));
    toml
}
