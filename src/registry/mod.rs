//! Thin adapters around external collaborators: the code-forge search
//! endpoint and the host system's package managers.

pub mod forge;
pub mod system;
