fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The server stub is generated too (unused in the library itself) so
    // integration tests can stand up an in-process fake HyperService.
    tonic_build::configure()
        .build_server(true)
        .compile_protos(&["proto/hyperdb.proto"], &["proto"])?;
    Ok(())
}
