fn main() {
    println!("cargo:rerun-if-changed=proto/logstore.proto");
    tonic_prost_build::configure()
        .compile_protos(&["proto/logstore.proto"], &["proto/"])
        .expect("Failed to compile proto/logstore.proto");
}
