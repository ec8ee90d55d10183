fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // Compile the resource-monitor gRPC protocol definitions.
    // monitor: resource registration, invoke/call, shutdown signaling
    // engine:  deployment-engine side channel (version checks)
    // loader:  out-of-process schema server
    let mut config = prost_build::Config::new();
    config.disable_comments(["."]);

    tonic_build::configure()
        .build_server(false) // We only need the client side
        .compile_protos_with_config(
            config,
            &[
                "proto/monitor.proto",
                "proto/engine.proto",
                "proto/loader.proto",
            ],
            &["proto/"],
        )?;
    Ok(())
}
