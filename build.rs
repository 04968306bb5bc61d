fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // Tell Cargo to rerun if the proto files change
    println!("cargo:rerun-if-changed=proto/mailflow/v1/user.proto");
    println!("cargo:rerun-if-changed=proto/mailflow/v1/email.proto");

    // Compile the proto files
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/mailflow/v1/user.proto",
                "proto/mailflow/v1/email.proto",
            ],
            &["proto"],
        )?;

    Ok(())
}
