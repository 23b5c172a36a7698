fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_prost_build::configure().compile_protos(&["proto/chat.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/chat.proto");
    println!("cargo:rerun-if-changed=migrations");

    Ok(())
}
