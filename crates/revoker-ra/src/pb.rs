//! Generated protobuf/gRPC types, compiled from `proto/revoker.proto` by
//! `build.rs` at build time.

tonic::include_proto!("revoker");
