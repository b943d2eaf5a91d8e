/// Generated gRPC protocol definitions for the Lattice management plane.
///
/// This crate provides the protocol buffer definitions and generated code
/// for the management channel between the control plane and driver/node
/// endpoints.
pub mod lattice {
    pub mod v1 {
        tonic::include_proto!("lattice.v1");
    }
}

// Re-export commonly used types for convenience
pub use lattice::v1::*;

/// Metadata key carrying the session id on every authenticated request.
pub const SESSION_METADATA_KEY: &str = "x-lattice-session";
