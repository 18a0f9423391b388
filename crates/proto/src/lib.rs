// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! sp-proto: generated wire types.
//!
//! Vendored subsets of the Envoy external-processor contract and the
//! gRPC health protocol, plus the in-sandbox process stream. Compiled by
//! `tonic-build` from `proto/`.

pub mod envoy {
    pub mod config {
        pub mod core {
            pub mod v3 {
                tonic::include_proto!("envoy.config.core.v3");
            }
        }
    }

    pub mod r#type {
        pub mod v3 {
            include!(concat!(env!("OUT_DIR"), "/envoy.r#type.v3.rs"));
        }
    }

    pub mod service {
        pub mod ext_proc {
            pub mod v3 {
                tonic::include_proto!("envoy.service.ext_proc.v3");
            }
        }
    }
}

pub mod grpc {
    pub mod health {
        pub mod v1 {
            tonic::include_proto!("grpc.health.v1");
        }
    }
}

pub mod sandbox {
    pub mod process {
        pub mod v1 {
            tonic::include_proto!("sandbox.process.v1");
        }
    }
}
