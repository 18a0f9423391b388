// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("vendored protoc binary"),
    );

    tonic_build::configure()
        .build_client(false)
        .build_server(true)
        .compile_protos(
            &["proto/envoy/ext_proc.proto", "proto/grpc/health.proto"],
            &["proto"],
        )?;

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/sandbox/process.proto"], &["proto"])?;

    Ok(())
}
