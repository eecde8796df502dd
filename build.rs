use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Variable families the importer reads from the environment.
const ENV_PREFIXES: [&str; 2] = ["CIVIC_", "OPENSTATES_"];

/// Upper-case tokens under those prefixes that are not variables.
const NOT_VARIABLES: [&str; 1] = ["CIVIC_WARN"];

fn rust_sources(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            rust_sources(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

/// Upper-case identifiers under one of the prefixes, anywhere in `source`.
fn env_names(source: &str, out: &mut BTreeSet<String>) {
    let tokens = source.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'));
    for token in tokens {
        let is_name = ENV_PREFIXES.iter().any(|p| token.len() > p.len() && token.starts_with(p))
            && token
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
            && !token.ends_with('_')
            && !NOT_VARIABLES.contains(&token);
        if is_name {
            out.insert(token.to_string());
        }
    }
}

fn write_env_allowlist(out_dir: &Path) -> std::io::Result<()> {
    let mut sources = Vec::new();
    rust_sources(Path::new("src"), &mut sources)?;

    let mut names = BTreeSet::new();
    for file in sources {
        if let Ok(content) = fs::read_to_string(&file) {
            env_names(&content, &mut names);
        }
    }

    let mut f = fs::File::create(out_dir.join("civic_env_allowlist.rs"))?;
    writeln!(f, "pub const GENERATED_ENV_ALLOWLIST: &[&str] = &[")?;
    for name in names {
        writeln!(f, "    \"{name}\",")?;
    }
    writeln!(f, "];")
}

fn main() {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));
    write_env_allowlist(&out_dir).expect("failed to generate the civic-ingest env allowlist");

    // Stamped into lock files and `status` so a held lock names the binary that took it.
    let built = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_default();
    println!(
        "cargo:rustc-env=INGEST_BUILD_ID=civic-ingest-{version}-{:x}{:05x}",
        built.as_secs(),
        built.subsec_micros()
    );
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
}
