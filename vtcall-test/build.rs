fn main() {
    println!("cargo:rustc-env=TEST_ROOT={}", env!("CARGO_MANIFEST_DIR"));

    cc::Build::new()
        .file("fixtures/objects.c")
        .warnings(true)
        .compile("vtcall-fixtures");

    println!("cargo:rerun-if-changed=fixtures/objects.c");
}
