fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Vendored protoc, so the build does not need a system install.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .bytes(["."])
        .compile_protos(&["proto/elevenlabs.proto"], &["proto"])?;
    Ok(())
}
