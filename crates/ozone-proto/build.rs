fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // Compile protobuf definitions
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/hdds.proto",
                "proto/scm.proto",
                "proto/datanode.proto",
                "proto/container.proto",
                "proto/ksm.proto",
            ],
            &["proto"],
        )?;

    Ok(())
}
