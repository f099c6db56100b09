fn main() {
    // Config artifacts and plugins resolve the crispy_config_context_* and
    // crispy_plugin_engine_* symbols from the host process at call time.
    // Export the dynamic symbol table so test binaries can serve them.
    println!("cargo:rustc-link-arg=-rdynamic");
}
