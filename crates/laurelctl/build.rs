// Build script for laurelctl - embeds version at compile time

fn main() {
    // Release pipelines may override the Cargo.toml version
    let version =
        std::env::var("LAUREL_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=LAUREL_VERSION={}", version);
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-env-changed=LAUREL_VERSION");
}
