fn main() {
    // Config artifacts resolve the crispy_config_context_* symbols from the
    // running crispy binary at call time; plugins resolve the engine's data
    // store accessors the same way. Export the dynamic symbol table.
    println!("cargo:rustc-link-arg=-rdynamic");
}
