fn main() {
    // `toml-cfg` reads this at compile time.
    println!("cargo:rerun-if-changed=cfg.toml");
}
